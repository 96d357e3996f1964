//! Coordinates: typed, sorted, distinct axes of values.
//!
//! Coordinate values are compared across coordinates through `CoordValue`, which is independent
//! of the coordinate's unit and storage: times are expressed in seconds from the runtime. This is
//! what lets an index into one coordinate be translated to an index into another coordinate that
//! holds a different subset of values, possibly in a different unit.
//!
mod ensemble;
mod runtime;
mod time;
mod union;
mod vertical;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{AsyncRead, AsyncWrite};

use crate::{
    config::Config,
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
    time::{Instant, TimeUnit},
};

pub use ensemble::{EnsembleCoord, Member};
pub use runtime::RuntimeCoord;
pub use time::{IntervalCoord, Time2DAxes, Time2DCoord, TimeAxis, TimeCoord, TimeInterval};
pub use vertical::{Level, VerticalCoord};

pub(crate) use time::TimeBuilder;
pub(crate) use union::union;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Coordinate {
    Runtime(RuntimeCoord),
    Time(TimeCoord),
    TimeInterval(IntervalCoord),
    Time2D(Time2DCoord),
    Vertical(VerticalCoord),
    Ensemble(EnsembleCoord),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoordKind {
    Runtime,
    Time,
    TimeInterval,
    Time2D,
    Vertical,
    Ensemble,
}

/// The dimension a coordinate plays in a variable's coordinate tuple.
///
/// Tuples are always ordered runtime, time, ensemble, vertical, with the last two optional.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Runtime,
    Time,
    Ensemble,
    Vertical,
}

/// A single coordinate value, independent of the coordinate that holds it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoordValue {
    Runtime(Instant),

    /// Offset from the runtime, in seconds
    Time(i64),

    /// Interval bounds relative to the runtime, in seconds
    Interval(i64, i64),

    Vertical(Level),
    Ensemble(Member),
}

/// Coordinates with equal merge keys are unioned when coordinates are shared
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MergeKey {
    kind: CoordKind,
    code: u8,
    is_layer: bool,
}

impl Coordinate {
    pub fn kind(&self) -> CoordKind {
        match self {
            Coordinate::Runtime(_) => CoordKind::Runtime,
            Coordinate::Time(_) => CoordKind::Time,
            Coordinate::TimeInterval(_) => CoordKind::TimeInterval,
            Coordinate::Time2D(_) => CoordKind::Time2D,
            Coordinate::Vertical(_) => CoordKind::Vertical,
            Coordinate::Ensemble(_) => CoordKind::Ensemble,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Coordinate::Runtime(_) => Role::Runtime,
            Coordinate::Time(_) | Coordinate::TimeInterval(_) | Coordinate::Time2D(_) => Role::Time,
            Coordinate::Vertical(_) => Role::Vertical,
            Coordinate::Ensemble(_) => Role::Ensemble,
        }
    }

    /// The small integer that qualifies the coordinate's values: runtime significance, time unit
    /// or level type
    pub fn code(&self) -> u8 {
        match self {
            Coordinate::Runtime(coord) => coord.code,
            Coordinate::Time(coord) => coord.unit.code(),
            Coordinate::TimeInterval(coord) => coord.unit.code(),
            Coordinate::Time2D(coord) => coord.unit.code(),
            Coordinate::Vertical(coord) => coord.code,
            Coordinate::Ensemble(_) => 0,
        }
    }

    pub fn unit(&self) -> Option<TimeUnit> {
        match self {
            Coordinate::Time(coord) => Some(coord.unit),
            Coordinate::TimeInterval(coord) => Some(coord.unit),
            Coordinate::Time2D(coord) => Some(coord.unit),
            _ => None,
        }
    }

    /// Length of the dimension this coordinate defines
    pub fn len(&self) -> usize {
        match self {
            Coordinate::Runtime(coord) => coord.len(),
            Coordinate::Time(coord) => coord.len(),
            Coordinate::TimeInterval(coord) => coord.len(),
            Coordinate::Time2D(coord) => coord.len(),
            Coordinate::Vertical(coord) => coord.len(),
            Coordinate::Ensemble(coord) => coord.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at an index, for coordinates whose values don't depend on the runtime.
    ///
    /// Always `None` for `Time2D`, use `value_in_run`.
    ///
    pub fn value(&self, index: usize) -> Option<CoordValue> {
        self.value_in_run(None, index)
    }

    pub fn index_of(&self, value: &CoordValue) -> Option<usize> {
        self.index_in_run(None, value)
    }

    /// Value at an index, in the context of a runtime.
    ///
    /// Only `Time2D` coordinates use the runtime, all other kinds ignore it.
    ///
    pub fn value_in_run(&self, run: Option<&Instant>, index: usize) -> Option<CoordValue> {
        match self {
            Coordinate::Runtime(coord) => coord.get(index).map(CoordValue::Runtime),
            Coordinate::Time(coord) => coord.value(index),
            Coordinate::TimeInterval(coord) => coord.value(index),
            Coordinate::Time2D(coord) => coord.axis_for(run?)?.value(coord.unit, index),
            Coordinate::Vertical(coord) => {
                coord.levels.get(index).copied().map(CoordValue::Vertical)
            }
            Coordinate::Ensemble(coord) => {
                coord.members.get(index).copied().map(CoordValue::Ensemble)
            }
        }
    }

    /// Index of a value, in the context of a runtime
    pub fn index_in_run(&self, run: Option<&Instant>, value: &CoordValue) -> Option<usize> {
        match (self, value) {
            (Coordinate::Runtime(coord), CoordValue::Runtime(runtime)) => coord.index_of(runtime),
            (Coordinate::Time(coord), _) => coord.index_of(value),
            (Coordinate::TimeInterval(coord), _) => coord.index_of(value),
            (Coordinate::Time2D(coord), _) => coord.axis_for(run?)?.index_of(coord.unit, value),
            (Coordinate::Vertical(coord), CoordValue::Vertical(level)) => coord.index_of(level),
            (Coordinate::Ensemble(coord), CoordValue::Ensemble(member)) => coord.index_of(member),
            _ => None,
        }
    }

    /// All values of the coordinate in the context of a runtime
    pub fn values_in_run(&self, run: Option<&Instant>) -> Vec<CoordValue> {
        (0..self.len())
            .filter_map(|index| self.value_in_run(run, index))
            .collect()
    }

    /// Runtimes of a `Runtime` or `Time2D` coordinate
    pub fn runtimes(&self) -> Option<&[Instant]> {
        match self {
            Coordinate::Runtime(coord) => Some(&coord.runtimes),
            Coordinate::Time2D(coord) => Some(&coord.runtimes),
            _ => None,
        }
    }

    pub fn base_name(&self) -> String {
        match self {
            Coordinate::Runtime(_) => String::from("reftime"),
            Coordinate::Time(_) | Coordinate::Time2D(_) => String::from("time"),
            Coordinate::TimeInterval(_) => String::from("time_interval"),
            Coordinate::Vertical(coord) => coord.base_name(),
            Coordinate::Ensemble(_) => String::from("ens"),
        }
    }

    pub(crate) fn merge_key(&self, config: &Config) -> MergeKey {
        let code = match self {
            Coordinate::Runtime(_) if config.union_runtime_coords => 0,
            _ => self.code(),
        };
        let is_layer = match self {
            Coordinate::Vertical(coord) => coord.is_layer,
            _ => false,
        };

        MergeKey {
            kind: self.kind(),
            code,
            is_layer,
        }
    }
}

/// Give each coordinate of a group a distinct name.
///
/// The first coordinate with a given base name gets the base name, later ones get a numeric
/// suffix: `time`, `time1`, `time2`, ...
///
pub fn coordinate_names(coordinates: &[Coordinate]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    coordinates
        .iter()
        .map(|coord| {
            let base = coord.base_name();
            let count = seen.entry(base.clone()).or_insert(0);
            let name = match *count {
                0 => base,
                n => format!("{base}{n}"),
            };
            *count += 1;

            name
        })
        .collect()
}

/// Translate an index tuple from one coordinate tuple to another, by value.
///
/// `from` and `to` are coordinate tuples with the same roles in the same order. The runtime
/// component is resolved first so that runtime dependent coordinates can be looked up in the
/// context of the runtime. Returns `None` if any value of `from` at `index` is missing from `to`.
///
pub(crate) fn translate(
    from: &[&Coordinate],
    to: &[&Coordinate],
    index: &[usize],
) -> Option<Vec<usize>> {
    let mut run = None;
    let mut translated = Vec::with_capacity(index.len());
    for ((from, to), i) in from.iter().zip(to).zip(index) {
        let value = from.value_in_run(run.as_ref(), *i)?;
        if let CoordValue::Runtime(runtime) = value {
            run = Some(runtime);
        }
        translated.push(to.index_in_run(run.as_ref(), &value)?);
    }

    Some(translated)
}

const COORD_RUNTIME: u8 = 0;
const COORD_TIME: u8 = 1;
const COORD_INTERVAL: u8 = 2;
const COORD_TIME2D: u8 = 3;
const COORD_VERTICAL: u8 = 4;
const COORD_ENSEMBLE: u8 = 5;

const AXES_ORTHOGONAL: u8 = 0;
const AXES_REGULAR: u8 = 1;
const AXES_IRREGULAR: u8 = 2;

const AXIS_OFFSETS: u8 = 0;
const AXIS_INTERVALS: u8 = 1;

pub(crate) async fn write_instants(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    instants: &[Instant],
) -> Result<()> {
    stream.write_u32(instants.len() as u32).await?;
    for instant in instants {
        stream.write_i64(instant.timestamp_millis()).await?;
    }

    Ok(())
}

pub(crate) async fn read_instants(
    stream: &mut (impl AsyncRead + Unpin + Send),
) -> Result<Vec<Instant>> {
    let len = stream.read_u32().await? as usize;
    let mut instants = Vec::with_capacity(len);
    for _ in 0..len {
        let millis = stream.read_i64().await?;
        let instant = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::Corrupt(format!("invalid timestamp: {millis}")))?;
        instants.push(instant);
    }

    Ok(instants)
}

async fn read_unit(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<TimeUnit> {
    let code = stream.read_byte().await?;
    TimeUnit::try_from(code).map_err(|_| Error::Corrupt(format!("unknown time unit: {code}")))
}

async fn write_offsets(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    offsets: &[i32],
) -> Result<()> {
    stream.write_u32(offsets.len() as u32).await?;
    for offset in offsets {
        stream.write_i32(*offset).await?;
    }

    Ok(())
}

async fn read_offsets(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Vec<i32>> {
    let len = stream.read_u32().await? as usize;
    let mut offsets = Vec::with_capacity(len);
    for _ in 0..len {
        offsets.push(stream.read_i32().await?);
    }

    Ok(offsets)
}

async fn write_intervals(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    intervals: &[TimeInterval],
) -> Result<()> {
    stream.write_u32(intervals.len() as u32).await?;
    for interval in intervals {
        stream.write_i32(interval.start).await?;
        stream.write_i32(interval.end).await?;
    }

    Ok(())
}

async fn read_intervals(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Vec<TimeInterval>> {
    let len = stream.read_u32().await? as usize;
    let mut intervals = Vec::with_capacity(len);
    for _ in 0..len {
        let start = stream.read_i32().await?;
        let end = stream.read_i32().await?;
        intervals.push(TimeInterval::new(start, end));
    }

    Ok(intervals)
}

async fn write_axis(stream: &mut (impl AsyncWrite + Unpin + Send), axis: &TimeAxis) -> Result<()> {
    match axis {
        TimeAxis::Offsets(offsets) => {
            stream.write_byte(AXIS_OFFSETS).await?;
            write_offsets(stream, offsets).await
        }
        TimeAxis::Intervals(intervals) => {
            stream.write_byte(AXIS_INTERVALS).await?;
            write_intervals(stream, intervals).await
        }
    }
}

async fn read_axis(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<TimeAxis> {
    match stream.read_byte().await? {
        AXIS_OFFSETS => Ok(TimeAxis::Offsets(read_offsets(stream).await?)),
        AXIS_INTERVALS => Ok(TimeAxis::Intervals(read_intervals(stream).await?)),
        tag => Err(Error::Corrupt(format!("unknown time axis type: {tag}"))),
    }
}

#[async_trait]
impl Serialize for Coordinate {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        match self {
            Coordinate::Runtime(coord) => {
                stream.write_byte(COORD_RUNTIME).await?;
                stream.write_byte(coord.code).await?;
                write_instants(stream, &coord.runtimes).await?;
            }
            Coordinate::Time(coord) => {
                stream.write_byte(COORD_TIME).await?;
                stream.write_byte(coord.unit.code()).await?;
                write_offsets(stream, &coord.offsets).await?;
            }
            Coordinate::TimeInterval(coord) => {
                stream.write_byte(COORD_INTERVAL).await?;
                stream.write_byte(coord.unit.code()).await?;
                write_intervals(stream, &coord.intervals).await?;
            }
            Coordinate::Time2D(coord) => {
                stream.write_byte(COORD_TIME2D).await?;
                stream.write_byte(coord.unit.code()).await?;
                write_instants(stream, &coord.runtimes).await?;
                match &coord.axes {
                    Time2DAxes::Orthogonal(axis) => {
                        stream.write_byte(AXES_ORTHOGONAL).await?;
                        write_axis(stream, axis).await?;
                    }
                    Time2DAxes::Regular(axes) => {
                        stream.write_byte(AXES_REGULAR).await?;
                        stream.write_u32(axes.len() as u32).await?;
                        for (time_of_day, axis) in axes {
                            stream.write_u32(*time_of_day).await?;
                            write_axis(stream, axis).await?;
                        }
                    }
                    Time2DAxes::Irregular(axes) => {
                        stream.write_byte(AXES_IRREGULAR).await?;
                        stream.write_u32(axes.len() as u32).await?;
                        for axis in axes {
                            write_axis(stream, axis).await?;
                        }
                    }
                }
            }
            Coordinate::Vertical(coord) => {
                stream.write_byte(COORD_VERTICAL).await?;
                stream.write_byte(coord.code).await?;
                stream.write_byte(coord.is_layer as u8).await?;
                stream.write_u32(coord.levels.len() as u32).await?;
                for level in &coord.levels {
                    stream.write_f64(level.value1).await?;
                    if coord.is_layer {
                        stream.write_f64(level.value2.unwrap_or(f64::NAN)).await?;
                    }
                }
            }
            Coordinate::Ensemble(coord) => {
                stream.write_byte(COORD_ENSEMBLE).await?;
                stream.write_u32(coord.members.len() as u32).await?;
                for member in &coord.members {
                    stream.write_byte(member.ens_type).await?;
                    stream.write_i32(member.number).await?;
                }
            }
        }

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let coord = match stream.read_byte().await? {
            COORD_RUNTIME => {
                let code = stream.read_byte().await?;
                let runtimes = read_instants(stream).await?;
                Coordinate::Runtime(RuntimeCoord { code, runtimes })
            }
            COORD_TIME => {
                let unit = read_unit(stream).await?;
                let offsets = read_offsets(stream).await?;
                Coordinate::Time(TimeCoord { unit, offsets })
            }
            COORD_INTERVAL => {
                let unit = read_unit(stream).await?;
                let intervals = read_intervals(stream).await?;
                Coordinate::TimeInterval(IntervalCoord { unit, intervals })
            }
            COORD_TIME2D => {
                let unit = read_unit(stream).await?;
                let runtimes = read_instants(stream).await?;
                let axes = match stream.read_byte().await? {
                    AXES_ORTHOGONAL => Time2DAxes::Orthogonal(read_axis(stream).await?),
                    AXES_REGULAR => {
                        let len = stream.read_u32().await? as usize;
                        let mut axes = Vec::with_capacity(len);
                        for _ in 0..len {
                            let time_of_day = stream.read_u32().await?;
                            axes.push((time_of_day, read_axis(stream).await?));
                        }
                        Time2DAxes::Regular(axes)
                    }
                    AXES_IRREGULAR => {
                        let len = stream.read_u32().await? as usize;
                        let mut axes = Vec::with_capacity(len);
                        for _ in 0..len {
                            axes.push(read_axis(stream).await?);
                        }
                        Time2DAxes::Irregular(axes)
                    }
                    tag => return Err(Error::Corrupt(format!("unknown Time2D layout: {tag}"))),
                };

                Coordinate::Time2D(Time2DCoord {
                    unit,
                    runtimes,
                    axes,
                })
            }
            COORD_VERTICAL => {
                let code = stream.read_byte().await?;
                let is_layer = stream.read_byte().await? != 0;
                let len = stream.read_u32().await? as usize;
                let mut levels = Vec::with_capacity(len);
                for _ in 0..len {
                    let value1 = stream.read_f64().await?;
                    let value2 = if is_layer {
                        Some(stream.read_f64().await?)
                    } else {
                        None
                    };
                    levels.push(Level { value1, value2 });
                }

                Coordinate::Vertical(VerticalCoord {
                    code,
                    is_layer,
                    levels,
                })
            }
            COORD_ENSEMBLE => {
                let len = stream.read_u32().await? as usize;
                let mut members = Vec::with_capacity(len);
                for _ in 0..len {
                    let ens_type = stream.read_byte().await?;
                    let number = stream.read_i32().await?;
                    members.push(Member { ens_type, number });
                }

                Coordinate::Ensemble(EnsembleCoord { members })
            }
            tag => return Err(Error::Corrupt(format!("unknown coordinate type: {tag}"))),
        };

        Ok(coord)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use futures::io::Cursor;

    use super::*;
    use crate::testing;

    fn time2d() -> Coordinate {
        let mut builder = TimeBuilder::new(false);
        for (run, offsets) in [(0, vec![0, 3, 6]), (1, vec![0, 3]), (2, vec![0, 6])] {
            for offset in offsets {
                builder.push(
                    testing::runtime(run),
                    TimeUnit::Hour,
                    CoordValue::Time(offset * 3600),
                );
            }
        }

        builder.finish().unwrap().unwrap()
    }

    fn all_kinds() -> Vec<Coordinate> {
        vec![
            Coordinate::Runtime(RuntimeCoord::new(
                1,
                [testing::runtime(1), testing::runtime(0)],
            )),
            Coordinate::Time(TimeCoord {
                unit: TimeUnit::Hour,
                offsets: vec![0, 3, 6],
            }),
            Coordinate::TimeInterval(IntervalCoord {
                unit: TimeUnit::Minute,
                intervals: vec![TimeInterval::new(0, 180), TimeInterval::new(180, 360)],
            }),
            time2d(),
            Coordinate::Vertical(VerticalCoord::new(
                100,
                false,
                [Level::new(85000.0, None), Level::new(50000.0, None)],
            )),
            Coordinate::Vertical(VerticalCoord::new(
                108,
                true,
                [Level::new(0.0, Some(3000.0))],
            )),
            Coordinate::Ensemble(EnsembleCoord::new([
                Member {
                    ens_type: 3,
                    number: 2,
                },
                Member {
                    ens_type: 3,
                    number: 1,
                },
            ])),
        ]
    }

    #[test]
    fn value_and_index() {
        for coord in all_kinds() {
            let runs: Vec<Option<Instant>> = match coord.runtimes() {
                Some(runtimes) if coord.kind() == CoordKind::Time2D => {
                    runtimes.iter().copied().map(Some).collect()
                }
                _ => vec![None],
            };
            for run in runs {
                for index in 0..coord.len() {
                    if let Some(value) = coord.value_in_run(run.as_ref(), index) {
                        assert_eq!(coord.index_in_run(run.as_ref(), &value), Some(index));
                    }
                }
            }
        }
    }

    #[test]
    fn time2d_needs_a_runtime() {
        let coord = time2d();
        assert_eq!(coord.value(0), None);
        assert_eq!(
            coord.value_in_run(Some(&testing::runtime(2)), 1),
            Some(CoordValue::Time(6 * 3600))
        );
        assert_eq!(coord.value_in_run(Some(&testing::runtime(2)), 2), None);
        assert_eq!(coord.value_in_run(Some(&testing::runtime(5)), 0), None);
    }

    #[test]
    fn values_are_unit_agnostic() {
        let hours = Coordinate::Time(TimeCoord {
            unit: TimeUnit::Hour,
            offsets: vec![0, 3, 6],
        });
        let minutes = Coordinate::Time(TimeCoord {
            unit: TimeUnit::Minute,
            offsets: vec![90, 180],
        });

        assert_eq!(minutes.index_of(&hours.value(1).unwrap()), Some(1));
        assert_eq!(hours.index_of(&minutes.value(0).unwrap()), None);
    }

    #[test]
    fn test_translate() {
        let run = testing::runtime;
        let master_runtime = Coordinate::Runtime(RuntimeCoord::new(0, [run(0), run(1), run(2)]));
        let master_time = Coordinate::Time(TimeCoord {
            unit: TimeUnit::Hour,
            offsets: vec![0, 3, 6],
        });
        let child_runtime = Coordinate::Runtime(RuntimeCoord::new(0, [run(1)]));
        let child_time = Coordinate::Time(TimeCoord {
            unit: TimeUnit::Minute,
            offsets: vec![180, 360],
        });

        let from = [&master_runtime, &master_time];
        let to = [&child_runtime, &child_time];
        assert_eq!(translate(&from, &to, &[1, 1]), Some(vec![0, 0]));
        assert_eq!(translate(&from, &to, &[1, 2]), Some(vec![0, 1]));
        assert_eq!(translate(&from, &to, &[1, 0]), None);
        assert_eq!(translate(&from, &to, &[0, 1]), None);
        assert_eq!(translate(&from, &to, &[3, 1]), None);
    }

    #[test]
    fn translate_through_time2d() {
        let runtime = Coordinate::Runtime(RuntimeCoord::new(
            0,
            [testing::runtime(0), testing::runtime(1), testing::runtime(2)],
        ));
        let time = time2d();
        let flat = Coordinate::Time(TimeCoord {
            unit: TimeUnit::Hour,
            offsets: vec![0, 3, 6],
        });

        let from = [&runtime, &time];
        let to = [&runtime, &flat];
        assert_eq!(translate(&from, &to, &[2, 1]), Some(vec![2, 2]));
        assert_eq!(translate(&to, &from, &[2, 2]), Some(vec![2, 1]));
        assert_eq!(translate(&to, &from, &[2, 1]), None);
    }

    #[test]
    fn test_names() {
        let mut coords = all_kinds();
        coords.push(coords[1].clone());
        let names = coordinate_names(&coords);
        assert_eq!(
            names,
            vec![
                "reftime",
                "time",
                "time_interval",
                "time1",
                "isobaric",
                "pressure_difference_layer",
                "ens",
                "time2"
            ]
        );
    }

    #[test]
    fn test_merge_key() {
        let config = Config::default();
        let a = Coordinate::Runtime(RuntimeCoord::new(0, [testing::runtime(0)]));
        let b = Coordinate::Runtime(RuntimeCoord::new(
            1,
            [testing::runtime(0) + Duration::hours(1)],
        ));
        assert_ne!(a.merge_key(&config), b.merge_key(&config));

        let config = Config {
            union_runtime_coords: true,
            ..Config::default()
        };
        assert_eq!(a.merge_key(&config), b.merge_key(&config));
    }

    #[tokio::test]
    async fn serialize_deserialize() -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        let coords = all_kinds();
        for coord in &coords {
            coord.write_to(&mut buffer).await?;
        }

        let mut buffer = Cursor::new(buffer);
        for coord in coords {
            assert_eq!(Coordinate::read_from(&mut buffer).await?, coord);
        }

        Ok(())
    }

    #[tokio::test]
    async fn unknown_tag() {
        let mut buffer = Cursor::new(vec![42_u8]);
        assert!(matches!(
            Coordinate::read_from(&mut buffer).await,
            Err(Error::Corrupt(_))
        ));
    }
}
