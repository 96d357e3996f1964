//! Decoded record descriptors, as handed to the index builder by an external decoder.
//!
use std::sync::Arc;

use crate::{
    errors::{Error, Result},
    time::{Instant, TimeUnit},
};

/// Physical location of one record's payload.
///
/// Opaque to the index: only the external decoder interprets it.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordLocator {
    /// Index into the owning leaf collection's file list
    pub file: u32,

    /// Byte offset of the record's data section
    pub offset: u64,

    /// Byte offset of the bitmap section, if the record has one
    pub bitmap_offset: Option<u64>,

    /// Byte offset of the data representation section, if it isn't implied by `offset`
    pub drs_offset: Option<u64>,
}

impl RecordLocator {
    pub fn new(file: u32, offset: u64) -> Self {
        Self {
            file,
            offset,
            bitmap_offset: None,
            drs_offset: None,
        }
    }
}

/// A record located in a specific source file, as returned by a lookup.
///
/// Partitioned collections span many leaf collections, each with its own file list, so lookups
/// resolve the locator's file number to a path before handing it back.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordRef {
    pub path: Arc<str>,
    pub locator: RecordLocator,
}

/// Forecast time of a record, in the record's time unit and relative to its runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeSpec {
    /// Instantaneous value at an offset
    Point(i32),

    /// Statistically processed (accumulation, average, ...) over an interval
    Interval { start: i32, end: i32, statistic: u8 },
}

/// Vertical level of a record
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelSpec {
    /// Type of first fixed surface (WMO code table 4.5)
    pub level_type: u8,

    /// Value of the first fixed surface
    pub value1: f64,

    /// Value of the second fixed surface, for layers
    pub value2: Option<f64>,
}

impl LevelSpec {
    pub fn new(level_type: u8, value1: f64) -> Self {
        Self {
            level_type,
            value1,
            value2: None,
        }
    }

    pub fn layer(level_type: u8, value1: f64, value2: f64) -> Self {
        Self {
            level_type,
            value1,
            value2: Some(value2),
        }
    }

    pub fn is_layer(&self) -> bool {
        self.value2.is_some()
    }
}

/// Ensemble information of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsembleSpec {
    /// An individual ensemble member
    Member { ens_type: u8, number: i32 },

    /// A product derived from all members, e.g. ensemble mean (WMO code table 4.7)
    Derived(u8),
}

/// Probability forecast information of a record
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbabilitySpec {
    /// WMO code table 4.9
    pub prob_type: u8,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Everything the index needs to know about a decoded record.
///
#[derive(Clone, Debug, PartialEq)]
pub struct RecordDescriptor {
    pub center: u16,
    pub subcenter: u16,
    pub master_table: u8,
    pub local_table: u8,
    pub generating_process: u8,

    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,

    /// Significance of the reference time (WMO code table 1.2)
    pub runtime_significance: u8,
    pub runtime: Instant,

    /// WMO code table 4.4
    pub time_unit: u8,
    pub time: TimeSpec,

    pub level: LevelSpec,
    pub ensemble: Option<EnsembleSpec>,
    pub probability: Option<ProbabilitySpec>,
    pub percentile: Option<u8>,

    /// Hash of the horizontal grid definition
    pub grid_hash: u64,

    pub locator: RecordLocator,
}

impl RecordDescriptor {
    /// Check that a record can be placed in a coordinate system.
    ///
    pub fn validate(&self) -> Result<TimeUnit> {
        if self.parameter == 255 || self.category == 255 || self.discipline == 255 {
            return Err(Error::Descriptor(format!(
                "missing parameter {}-{}-{}",
                self.discipline, self.category, self.parameter
            )));
        }

        let unit = TimeUnit::try_from(self.time_unit)?;
        let offsets = match self.time {
            TimeSpec::Point(offset) => [offset, offset],
            TimeSpec::Interval { start, end, .. } => [start, end],
        };
        if let Some(offset) = offsets.iter().find(|offset| !unit.is_representable(**offset)) {
            return Err(Error::Descriptor(format!(
                "time offset {offset} in unit {unit:?} is out of range"
            )));
        }
        if let TimeSpec::Interval { start, end, .. } = self.time {
            if end < start {
                return Err(Error::Descriptor(format!(
                    "time interval ends ({end}) before it starts ({start})"
                )));
            }
        }

        let level = &self.level;
        if !level.value1.is_finite() || !level.value2.map_or(true, f64::is_finite) {
            return Err(Error::Descriptor(format!(
                "level of type {} has no finite value",
                level.level_type
            )));
        }

        Ok(unit)
    }
}

/// Supplier of records for building a leaf collection.
///
/// Records must be produced in a deterministic order (e.g. by file, then by offset), since when
/// two records land on the same coordinates the later one wins.
///
pub trait RecordSource {
    /// Names of the source files, indexed by `RecordLocator::file`
    fn files(&self) -> Vec<String>;

    /// Decoded records. A record that fails to decode is reported as an error and skipped.
    fn records(&self) -> Box<dyn Iterator<Item = Result<RecordDescriptor>> + '_>;
}

/// A `RecordSource` over records already held in memory
#[derive(Clone, Debug, Default)]
pub struct RecordList {
    pub files: Vec<String>,
    pub records: Vec<RecordDescriptor>,
}

impl RecordSource for RecordList {
    fn files(&self) -> Vec<String> {
        self.files.clone()
    }

    fn records(&self) -> Box<dyn Iterator<Item = Result<RecordDescriptor>> + '_> {
        Box::new(self.records.iter().cloned().map(Ok))
    }
}
