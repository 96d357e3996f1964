//! Turn the ragged set of records of one horizontal grid into variables, each with its own
//! coordinates and a dense index of its records over those coordinates.
//!
use std::collections::HashMap;

use crate::{
    config::Config,
    coord::{
        Coordinate, CoordValue, EnsembleCoord, Level, Member, RuntimeCoord, TimeBuilder,
        TimeInterval, VerticalCoord,
    },
    errors::{Error, Result},
    identity::VariableIdentity,
    record::{EnsembleSpec, RecordDescriptor, TimeSpec},
    sparse::{Records, SparseArrayBuilder},
    time::TimeUnit,
};

/// Record counts for a group or a variable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Records offered to the group
    pub total: u64,

    /// Records present in the index
    pub used: u64,

    /// Records replaced by a later record with the same coordinates
    pub duplicates: u64,

    /// Index cells with no record
    pub missing: u64,

    /// Records dropped by the interval filter
    pub filtered: u64,

    /// Records that couldn't be classified
    pub rejected: u64,
}

impl GroupStats {
    pub(crate) fn add(&mut self, other: &GroupStats) {
        self.total += other.total;
        self.used += other.used;
        self.duplicates += other.duplicates;
        self.missing += other.missing;
        self.filtered += other.filtered;
        self.rejected += other.rejected;
    }

    pub(crate) fn of_records(records: &Records) -> Self {
        Self {
            total: (records.used() + records.duplicates()) as u64,
            used: records.used() as u64,
            duplicates: records.duplicates() as u64,
            missing: records.missing() as u64,
            filtered: 0,
            rejected: 0,
        }
    }
}

/// A variable with its own coordinates, before coordinates are shared within the group
#[derive(Debug)]
pub struct VariableBuild {
    pub identity: VariableIdentity,

    /// Runtime, time, then optionally ensemble and vertical
    pub coordinates: Vec<Coordinate>,
    pub records: Records,
}

/// The result of rectilinearizing one group
#[derive(Debug)]
pub struct GroupBuild {
    pub grid_hash: u64,

    /// Sorted by identity
    pub variables: Vec<VariableBuild>,
    pub stats: GroupStats,
}

/// Builds the variables of one group from its records.
///
/// Records may be pushed in any order, the variables and their coordinates don't depend on it.
/// Only which of two records with identical coordinates is kept depends on order: the later one.
///
pub struct Rectilinearizer<'a> {
    config: &'a Config,
    grid_hash: u64,
    variables: HashMap<VariableIdentity, Vec<RecordDescriptor>>,
    stats: GroupStats,
}

impl<'a> Rectilinearizer<'a> {
    pub fn new(config: &'a Config, grid_hash: u64) -> Self {
        Self {
            config,
            grid_hash,
            variables: HashMap::new(),
            stats: GroupStats::default(),
        }
    }

    /// Classify a record and add it to its variable.
    ///
    /// Records that can't be classified are dropped with a warning and counted. Records excluded
    /// by the interval filter are counted as filtered.
    ///
    pub fn push(&mut self, record: RecordDescriptor) {
        self.stats.total += 1;

        if record.grid_hash != self.grid_hash {
            self.drop_record(
                &record,
                Error::Descriptor(format!(
                    "grid {:x} doesn't belong in group {:x}",
                    record.grid_hash, self.grid_hash
                )),
            );
            return;
        }

        if let Err(err) = record.validate() {
            self.drop_record(&record, err);
            return;
        }

        if let TimeSpec::Interval { start, end, .. } = record.time {
            let variable = (record.discipline, record.category, record.parameter);
            if !self
                .config
                .interval_filter
                .keeps(variable, TimeInterval::new(start, end))
            {
                self.stats.filtered += 1;
                return;
            }
        }

        let identity = VariableIdentity::of(&record, self.config);
        self.variables.entry(identity).or_default().push(record);
    }

    /// Count a record that failed to decode upstream
    pub fn reject(&mut self, err: &Error) {
        log::warn!("dropping record in group {:x}: {err}", self.grid_hash);
        self.stats.total += 1;
        self.stats.rejected += 1;
    }

    fn drop_record(&mut self, record: &RecordDescriptor, err: Error) {
        log::warn!(
            "dropping record at file {} offset {}: {err}",
            record.locator.file,
            record.locator.offset
        );
        self.stats.rejected += 1;
    }

    /// Build every variable's coordinates and records index.
    ///
    /// Fails with `Error::EmptyGroup` if no record could be classified.
    ///
    pub fn finish(self) -> Result<GroupBuild> {
        if self.variables.is_empty() {
            return Err(Error::EmptyGroup {
                grid_hash: self.grid_hash,
            });
        }

        let mut variables: Vec<(VariableIdentity, Vec<RecordDescriptor>)> =
            self.variables.into_iter().collect();
        variables.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut stats = self.stats;
        let mut built = Vec::with_capacity(variables.len());
        for (identity, records) in variables {
            let variable = build_variable(identity, &records)?;
            let variable_stats = GroupStats::of_records(&variable.records);
            log::debug!(
                "{}: used {}, duplicates {}, missing {}",
                identity.name(),
                variable_stats.used,
                variable_stats.duplicates,
                variable_stats.missing
            );
            stats.used += variable_stats.used;
            stats.duplicates += variable_stats.duplicates;
            stats.missing += variable_stats.missing;
            built.push(variable);
        }

        Ok(GroupBuild {
            grid_hash: self.grid_hash,
            variables: built,
            stats,
        })
    }
}

/// A record's coordinate values, in tuple order
fn values_of(identity: &VariableIdentity, record: &RecordDescriptor) -> Result<Vec<CoordValue>> {
    let unit = TimeUnit::try_from(record.time_unit)?;
    let mut values = vec![CoordValue::Runtime(record.runtime)];
    values.push(match record.time {
        TimeSpec::Point(offset) => CoordValue::Time(unit.to_seconds(offset)),
        TimeSpec::Interval { start, end, .. } => {
            CoordValue::Interval(unit.to_seconds(start), unit.to_seconds(end))
        }
    });

    if identity.is_ensemble {
        match record.ensemble {
            Some(EnsembleSpec::Member { ens_type, number }) => {
                values.push(CoordValue::Ensemble(Member { ens_type, number }))
            }
            _ => {
                return Err(Error::Descriptor(String::from(
                    "ensemble variable record has no ensemble member",
                )))
            }
        }
    }

    if identity.has_vertical() {
        let level = Level::new(record.level.value1, record.level.value2);
        values.push(CoordValue::Vertical(level));
    }

    Ok(values)
}

fn build_variable(
    identity: VariableIdentity,
    records: &[RecordDescriptor],
) -> Result<VariableBuild> {
    let values = records
        .iter()
        .map(|record| values_of(&identity, record))
        .collect::<Result<Vec<_>>>()?;

    // Lowest significance code, whatever the order records arrived in
    let runtime_code = records
        .iter()
        .map(|record| record.runtime_significance)
        .min()
        .unwrap_or(0);
    let mut coordinates = vec![Coordinate::Runtime(RuntimeCoord::new(
        runtime_code,
        records.iter().map(|record| record.runtime),
    ))];

    let mut times = TimeBuilder::new(identity.statistic.is_some());
    for (record, values) in records.iter().zip(&values) {
        let unit = TimeUnit::try_from(record.time_unit)?;
        times.push(record.runtime, unit, values[1]);
    }
    let time = times
        .finish()?
        .ok_or_else(|| Error::Descriptor(format!("{} has no times", identity.name())))?;
    coordinates.push(time);

    let mut position = 2;
    if identity.is_ensemble {
        let members = values.iter().filter_map(|values| match values[position] {
            CoordValue::Ensemble(member) => Some(member),
            _ => None,
        });
        coordinates.push(Coordinate::Ensemble(EnsembleCoord::new(members)));
        position += 1;
    }

    if identity.has_vertical() {
        let levels = values.iter().filter_map(|values| match values[position] {
            CoordValue::Vertical(level) => Some(level),
            _ => None,
        });
        coordinates.push(Coordinate::Vertical(VerticalCoord::new(
            identity.level_type,
            identity.is_layer,
            levels,
        )));
    }

    let shape: Vec<usize> = coordinates.iter().map(Coordinate::len).collect();
    let mut builder = SparseArrayBuilder::new(&shape);
    for (record, values) in records.iter().zip(&values) {
        let run = Some(&record.runtime);
        let index = coordinates
            .iter()
            .zip(values)
            .map(|(coord, value)| coord.index_in_run(run, value))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| {
                Error::Descriptor(format!("record not found in coordinates of {}", identity.name()))
            })?;
        builder.add(&index, record.locator)?;
    }

    Ok(VariableBuild {
        identity,
        coordinates,
        records: builder.finish(),
    })
}
