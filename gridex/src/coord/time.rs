use std::collections::{BTreeMap, BTreeSet};

use chrono::Timelike;

use super::{CoordValue, Coordinate};
use crate::{
    errors::{Error, Result},
    time::{Instant, TimeUnit},
};

/// Bounds of a statistically processed interval, in the owning coordinate's unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeInterval {
    pub start: i32,
    pub end: i32,
}

impl TimeInterval {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> i32 {
        self.end - self.start
    }
}

/// Forecast offsets from a single runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeCoord {
    pub unit: TimeUnit,
    pub offsets: Vec<i32>,
}

/// Statistical intervals from a single runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntervalCoord {
    pub unit: TimeUnit,
    pub intervals: Vec<TimeInterval>,
}

/// The times of one runtime in a `Time2DCoord`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeAxis {
    Offsets(Vec<i32>),
    Intervals(Vec<TimeInterval>),
}

/// How the time axes of a `Time2DCoord` relate to its runtimes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Time2DAxes {
    /// Every runtime has the same times
    Orthogonal(TimeAxis),

    /// Runtimes at the same time of day have the same times. Keyed by seconds since midnight.
    Regular(Vec<(u32, TimeAxis)>),

    /// One axis per runtime, in runtime order
    Irregular(Vec<TimeAxis>),
}

/// Forecast times that depend on the runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Time2DCoord {
    pub unit: TimeUnit,
    pub runtimes: Vec<Instant>,
    pub axes: Time2DAxes,
}

impl TimeCoord {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn value(&self, index: usize) -> Option<CoordValue> {
        offset_value(self.unit, &self.offsets, index)
    }

    pub fn index_of(&self, value: &CoordValue) -> Option<usize> {
        offset_index(self.unit, &self.offsets, value)
    }
}

impl IntervalCoord {
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn value(&self, index: usize) -> Option<CoordValue> {
        interval_value(self.unit, &self.intervals, index)
    }

    pub fn index_of(&self, value: &CoordValue) -> Option<usize> {
        interval_index(self.unit, &self.intervals, value)
    }
}

impl TimeAxis {
    pub fn len(&self) -> usize {
        match self {
            TimeAxis::Offsets(offsets) => offsets.len(),
            TimeAxis::Intervals(intervals) => intervals.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, unit: TimeUnit, index: usize) -> Option<CoordValue> {
        match self {
            TimeAxis::Offsets(offsets) => offset_value(unit, offsets, index),
            TimeAxis::Intervals(intervals) => interval_value(unit, intervals, index),
        }
    }

    pub fn index_of(&self, unit: TimeUnit, value: &CoordValue) -> Option<usize> {
        match self {
            TimeAxis::Offsets(offsets) => offset_index(unit, offsets, value),
            TimeAxis::Intervals(intervals) => interval_index(unit, intervals, value),
        }
    }
}

impl Time2DCoord {
    /// Length of the time dimension: the length of the longest axis
    pub fn len(&self) -> usize {
        match &self.axes {
            Time2DAxes::Orthogonal(axis) => Some(axis.len()),
            Time2DAxes::Regular(axes) => axes.iter().map(|(_, axis)| axis.len()).max(),
            Time2DAxes::Irregular(axes) => axes.iter().map(TimeAxis::len).max(),
        }
        .unwrap_or(0)
    }

    pub fn is_intervals(&self) -> bool {
        let is_intervals = |axis: &TimeAxis| matches!(axis, TimeAxis::Intervals(_));
        match &self.axes {
            Time2DAxes::Orthogonal(axis) => is_intervals(axis),
            Time2DAxes::Regular(axes) => axes.iter().any(|(_, axis)| is_intervals(axis)),
            Time2DAxes::Irregular(axes) => axes.iter().any(is_intervals),
        }
    }

    /// The time axis for a runtime, if the runtime is part of this coordinate
    pub fn axis_for(&self, run: &Instant) -> Option<&TimeAxis> {
        let index = self.runtimes.binary_search(run).ok()?;
        match &self.axes {
            Time2DAxes::Orthogonal(axis) => Some(axis),
            Time2DAxes::Regular(axes) => {
                let time_of_day = run.num_seconds_from_midnight();
                axes.iter()
                    .find(|(key, _)| *key == time_of_day)
                    .map(|(_, axis)| axis)
            }
            Time2DAxes::Irregular(axes) => axes.get(index),
        }
    }
}

fn offset_value(unit: TimeUnit, offsets: &[i32], index: usize) -> Option<CoordValue> {
    offsets
        .get(index)
        .map(|offset| CoordValue::Time(unit.to_seconds(*offset)))
}

fn offset_index(unit: TimeUnit, offsets: &[i32], value: &CoordValue) -> Option<usize> {
    match value {
        CoordValue::Time(seconds) => {
            let offset = unit.from_seconds(*seconds)?;
            offsets.binary_search(&offset).ok()
        }
        _ => None,
    }
}

fn interval_value(unit: TimeUnit, intervals: &[TimeInterval], index: usize) -> Option<CoordValue> {
    intervals.get(index).map(|interval| {
        CoordValue::Interval(unit.to_seconds(interval.start), unit.to_seconds(interval.end))
    })
}

fn interval_index(unit: TimeUnit, intervals: &[TimeInterval], value: &CoordValue) -> Option<usize> {
    match value {
        CoordValue::Interval(start, end) => {
            let interval = TimeInterval::new(unit.from_seconds(*start)?, unit.from_seconds(*end)?);
            intervals.binary_search(&interval).ok()
        }
        _ => None,
    }
}

/// Convert a set of unit-agnostic time values to an axis in the given unit
fn axis_from_values(
    unit: TimeUnit,
    intervals: bool,
    values: &BTreeSet<CoordValue>,
) -> Result<TimeAxis> {
    let convert = |seconds: i64| {
        unit.from_seconds(seconds).ok_or_else(|| {
            Error::Descriptor(format!(
                "time value of {seconds}s can't be expressed in unit {unit:?}"
            ))
        })
    };

    // Sorted because conversion preserves the order of the set
    if intervals {
        let mut axis = Vec::with_capacity(values.len());
        for value in values {
            if let CoordValue::Interval(start, end) = value {
                axis.push(TimeInterval::new(convert(*start)?, convert(*end)?));
            }
        }

        Ok(TimeAxis::Intervals(axis))
    } else {
        let mut axis = Vec::with_capacity(values.len());
        for value in values {
            if let CoordValue::Time(seconds) = value {
                axis.push(convert(*seconds)?);
            }
        }

        Ok(TimeAxis::Offsets(axis))
    }
}

fn single_run(unit: TimeUnit, axis: TimeAxis) -> Coordinate {
    match axis {
        TimeAxis::Offsets(offsets) => Coordinate::Time(TimeCoord { unit, offsets }),
        TimeAxis::Intervals(intervals) => {
            Coordinate::TimeInterval(IntervalCoord { unit, intervals })
        }
    }
}

/// Accumulates time values per runtime.
///
/// Values are held in seconds until `finish`, which expresses them in the finest unit seen. That
/// conversion is exact because every supported unit divides every coarser one.
///
pub(crate) struct TimeBuilder {
    unit: Option<TimeUnit>,
    intervals: bool,
    runs: BTreeMap<Instant, BTreeSet<CoordValue>>,
}

impl TimeBuilder {
    pub(crate) fn new(intervals: bool) -> Self {
        Self {
            unit: None,
            intervals,
            runs: BTreeMap::new(),
        }
    }

    /// Add a time value, `CoordValue::Time` or `CoordValue::Interval`, for a runtime
    pub(crate) fn push(&mut self, run: Instant, unit: TimeUnit, value: CoordValue) {
        self.unit = Some(self.unit.map_or(unit, |current| current.finest(unit)));
        self.runs.entry(run).or_default().insert(value);
    }

    /// Register a runtime with no time values
    pub(crate) fn touch(&mut self, run: Instant, unit: TimeUnit) {
        self.unit = Some(self.unit.map_or(unit, |current| current.finest(unit)));
        self.runs.entry(run).or_default();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.runs.values().all(BTreeSet::is_empty)
    }

    /// A single runtime yields a `Time` or `TimeInterval` coordinate, several runtimes a `Time2D`.
    /// Returns `None` if no values were added.
    ///
    pub(crate) fn finish(self) -> Result<Option<Coordinate>> {
        let unit = match self.unit {
            Some(unit) => unit,
            None => return Ok(None),
        };
        let intervals = self.intervals;

        if self.runs.len() == 1 {
            let values = self.runs.into_values().next().unwrap_or_default();
            let axis = axis_from_values(unit, intervals, &values)?;
            return Ok(Some(single_run(unit, axis)));
        }

        let mut runtimes = Vec::with_capacity(self.runs.len());
        let mut axes = Vec::with_capacity(self.runs.len());
        for (run, values) in self.runs {
            runtimes.push(run);
            axes.push(axis_from_values(unit, intervals, &values)?);
        }

        Ok(Some(Coordinate::Time2D(Time2DCoord {
            unit,
            axes: classify(&runtimes, axes),
            runtimes,
        })))
    }
}

/// Find the most compact representation of per-runtime axes
fn classify(runtimes: &[Instant], axes: Vec<TimeAxis>) -> Time2DAxes {
    if let Some(first) = axes.first() {
        if axes.iter().all(|axis| axis == first) {
            return Time2DAxes::Orthogonal(first.clone());
        }
    }

    let mut by_time_of_day: BTreeMap<u32, &TimeAxis> = BTreeMap::new();
    let mut regular = true;
    for (run, axis) in runtimes.iter().zip(&axes) {
        let time_of_day = run.num_seconds_from_midnight();
        match by_time_of_day.get(&time_of_day) {
            Some(seen) if *seen != axis => {
                regular = false;
                break;
            }
            Some(_) => {}
            None => {
                by_time_of_day.insert(time_of_day, axis);
            }
        }
    }

    // Regular only pays off when some runtimes actually share an axis
    if regular && by_time_of_day.len() < runtimes.len() {
        let axes = by_time_of_day
            .into_iter()
            .map(|(time_of_day, axis)| (time_of_day, axis.clone()))
            .collect();
        return Time2DAxes::Regular(axes);
    }

    Time2DAxes::Irregular(axes)
}
