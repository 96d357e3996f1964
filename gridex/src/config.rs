//! Build and read policy for collection indexes.
//!
//! A `Config` is passed explicitly to every operation that needs policy. It can be deserialized
//! from JSON; any field left out takes its default value.
//!
//! ```json
//! {
//!     "union_runtime_coords": true,
//!     "interval_filter": {
//!         "exclude_zero": true,
//!         "only_length": [{"variable": "0-1-8", "length": 3}]
//!     }
//! }
//! ```
//!
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::{coord::TimeInterval, errors::Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Merge runtime coordinates within a group even when their codes differ
    pub union_runtime_coords: bool,

    /// Whether statistically processed intervals of different lengths belong to the same
    /// variable. When false, the interval length becomes part of the variable identity.
    pub interval_merge: bool,

    /// Which time intervals are kept when building coordinates
    pub interval_filter: IntervalFilter,

    /// What to do with a partitioned variable that no partition contributes to
    pub missing_partition: MissingPartitionPolicy,

    /// Size limit, in bytes, for the resolver's object cache
    pub cache_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            union_runtime_coords: false,
            interval_merge: true,
            interval_filter: IntervalFilter::default(),
            missing_partition: MissingPartitionPolicy::default(),
            cache_bytes: 64 << 20,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalFilter {
    /// Drop intervals whose start equals their end
    pub exclude_zero: bool,

    /// Drop intervals with exactly these bounds, expressed in the record's own time unit
    pub exclude_bounds: Vec<[i32; 2]>,

    /// For the named variables, keep only intervals of the given length
    pub only_length: Vec<LengthRule>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LengthRule {
    /// Variable id as "discipline-category-parameter", e.g. "0-1-8"
    pub variable: String,

    /// Required interval length, in the record's own time unit
    pub length: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPartitionPolicy {
    /// List the variable, every lookup on it is missing
    #[default]
    Unreachable,

    /// Fail the build
    Error,
}

impl Config {
    pub fn from_json(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

impl IntervalFilter {
    /// Whether an interval survives the filter.
    ///
    /// `variable` is the (discipline, category, parameter) triple of the record or variable the
    /// interval belongs to. Bounds are in the interval's own time unit.
    ///
    pub fn keeps(&self, variable: (u8, u8, u8), interval: TimeInterval) -> bool {
        if self.exclude_zero && interval.start == interval.end {
            return false;
        }

        if self
            .exclude_bounds
            .iter()
            .any(|[start, end]| *start == interval.start && *end == interval.end)
        {
            return false;
        }

        let id = format!("{}-{}-{}", variable.0, variable.1, variable.2);
        self.only_length
            .iter()
            .filter(|rule| rule.variable == id)
            .all(|rule| interval.end - interval.start == rule.length)
    }

    pub fn is_empty(&self) -> bool {
        !self.exclude_zero && self.exclude_bounds.is_empty() && self.only_length.is_empty()
    }
}
