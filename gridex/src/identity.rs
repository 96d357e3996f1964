use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

use crate::{
    config::Config,
    errors::Result,
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
    record::{EnsembleSpec, RecordDescriptor, TimeSpec},
};

/// First value of the range WMO reserves for local use in most code tables
const LOCAL_START: u8 = 192;

/// Identity of a variable.
///
/// Records with equal identities belong to the same variable. Equality, hashing and ordering are
/// all derived from the same key, so they always agree.
///
#[derive(Clone, Copy, Debug)]
pub struct VariableIdentity {
    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,

    pub level_type: u8,
    pub is_layer: bool,

    /// Statistical process type, for variables defined over time intervals
    pub statistic: Option<u8>,

    /// Interval length in seconds, only when intervals of different lengths are not merged
    pub interval_length: Option<i64>,

    /// Whether the variable has an ensemble member dimension
    pub is_ensemble: bool,

    /// Derived ensemble product, e.g. ensemble mean
    pub ens_derived: Option<u8>,

    pub probability: Option<ProbabilityKey>,
    pub percentile: Option<u8>,

    pub grid_hash: u64,

    /// Originating center and subcenter. Only set when one of the other fields falls in a range
    /// reserved for local use, since the meaning of local codes depends on who produced them.
    pub local: Option<(u16, u16)>,
}

/// Probability discriminator with limits stored as raw bits so it can be hashed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbabilityKey {
    pub prob_type: u8,
    pub lower: Option<u64>,
    pub upper: Option<u64>,
}

type Key = (
    (u8, u8, u8),
    (u8, bool),
    (Option<u8>, Option<i64>),
    (bool, Option<u8>, Option<ProbabilityKey>, Option<u8>),
    u64,
    Option<(u16, u16)>,
);

impl VariableIdentity {
    /// Compute the identity of the variable a record belongs to.
    ///
    pub fn of(record: &RecordDescriptor, config: &Config) -> Self {
        let (statistic, interval_length) = match record.time {
            TimeSpec::Point(_) => (None, None),
            TimeSpec::Interval {
                start,
                end,
                statistic,
            } => {
                let length = if config.interval_merge {
                    None
                } else {
                    // Unit is checked by `RecordDescriptor::validate` before classification
                    let seconds = crate::time::TimeUnit::try_from(record.time_unit)
                        .map(|unit| unit.to_seconds(end - start))
                        .unwrap_or((end - start) as i64);
                    Some(seconds)
                };
                (Some(statistic), length)
            }
        };

        let (is_ensemble, ens_derived) = match record.ensemble {
            None => (false, None),
            Some(EnsembleSpec::Member { .. }) => (true, None),
            Some(EnsembleSpec::Derived(kind)) => (false, Some(kind)),
        };

        let probability = record.probability.map(|prob| ProbabilityKey {
            prob_type: prob.prob_type,
            lower: prob.lower.map(f64::to_bits),
            upper: prob.upper.map(f64::to_bits),
        });

        let mut identity = Self {
            discipline: record.discipline,
            category: record.category,
            parameter: record.parameter,
            level_type: record.level.level_type,
            is_layer: record.level.is_layer(),
            statistic,
            interval_length,
            is_ensemble,
            ens_derived,
            probability,
            percentile: record.percentile,
            grid_hash: record.grid_hash,
            local: None,
        };

        // Compatibility requirement: local codes are only meaningful together with the center
        // that defined them, so they have to be part of the identity.
        if identity.uses_local_tables() {
            identity.local = Some((record.center, record.subcenter));
        }

        identity
    }

    /// Whether any field of this identity falls in a range reserved for local use
    pub fn uses_local_tables(&self) -> bool {
        let local = |code: u8| (LOCAL_START..255).contains(&code);

        local(self.discipline)
            || local(self.category)
            || local(self.parameter)
            || local(self.level_type)
            || self.statistic.map_or(false, local)
            || self.ens_derived.map_or(false, local)
    }

    /// Whether records of this variable vary along a vertical coordinate.
    ///
    /// Level types that name a single surface (ground, cloud base, mean sea level, the entire
    /// atmosphere, ...) don't get a vertical coordinate.
    ///
    pub fn has_vertical(&self) -> bool {
        has_vertical(self.level_type)
    }

    /// The (discipline, category, parameter) triple
    pub fn parameter_id(&self) -> (u8, u8, u8) {
        (self.discipline, self.category, self.parameter)
    }

    /// A stable, human readable name. Only for display: the name plays no part in identity.
    ///
    pub fn name(&self) -> String {
        let mut name = format!(
            "VAR_{}-{}-{}_L{}",
            self.discipline, self.category, self.parameter, self.level_type
        );
        if self.is_layer {
            name.push_str("_layer");
        }
        if let Some(statistic) = self.statistic {
            name.push_str(&format!("_I{statistic}"));
            if let Some(length) = self.interval_length {
                name.push_str(&format!("_{length}s"));
            }
        }
        if self.is_ensemble {
            name.push_str("_Ens");
        }
        if let Some(derived) = self.ens_derived {
            name.push_str(&format!("_D{derived}"));
        }
        if let Some(prob) = self.probability {
            name.push_str(&format!("_Prob{}", prob.prob_type));
            for limit in [prob.lower, prob.upper].into_iter().flatten() {
                name.push_str(&format!("_{}", f64::from_bits(limit)));
            }
        }
        if let Some(percentile) = self.percentile {
            name.push_str(&format!("_Pct{percentile}"));
        }
        if let Some((center, subcenter)) = self.local {
            name.push_str(&format!("_C{center}-{subcenter}"));
        }

        name
    }

    fn key(&self) -> Key {
        (
            (self.discipline, self.category, self.parameter),
            (self.level_type, self.is_layer),
            (self.statistic, self.interval_length),
            (
                self.is_ensemble,
                self.ens_derived,
                self.probability,
                self.percentile,
            ),
            self.grid_hash,
            self.local,
        )
    }
}

pub(crate) fn has_vertical(level_type: u8) -> bool {
    !matches!(level_type, 1..=10 | 101 | 200 | 204 | 211..=215 | 220 | 255)
}

impl PartialEq for VariableIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for VariableIdentity {}

impl Hash for VariableIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for VariableIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VariableIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for VariableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

async fn write_option_u8(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    value: Option<u8>,
) -> Result<()> {
    match value {
        Some(value) => {
            stream.write_byte(1).await?;
            stream.write_byte(value).await?;
        }
        None => stream.write_byte(0).await?,
    }

    Ok(())
}

async fn read_option_u8(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Option<u8>> {
    Ok(match stream.read_byte().await? {
        0 => None,
        _ => Some(stream.read_byte().await?),
    })
}

async fn write_option_u64(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    value: Option<u64>,
) -> Result<()> {
    match value {
        Some(value) => {
            stream.write_byte(1).await?;
            stream.write_u64(value).await?;
        }
        None => stream.write_byte(0).await?,
    }

    Ok(())
}

async fn read_option_u64(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Option<u64>> {
    Ok(match stream.read_byte().await? {
        0 => None,
        _ => Some(stream.read_u64().await?),
    })
}

#[async_trait]
impl Serialize for VariableIdentity {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_byte(self.discipline).await?;
        stream.write_byte(self.category).await?;
        stream.write_byte(self.parameter).await?;
        stream.write_byte(self.level_type).await?;
        stream.write_byte(self.is_layer as u8).await?;
        write_option_u8(stream, self.statistic).await?;
        write_option_u64(stream, self.interval_length.map(|length| length as u64)).await?;
        stream.write_byte(self.is_ensemble as u8).await?;
        write_option_u8(stream, self.ens_derived).await?;
        match self.probability {
            Some(prob) => {
                stream.write_byte(1).await?;
                stream.write_byte(prob.prob_type).await?;
                write_option_u64(stream, prob.lower).await?;
                write_option_u64(stream, prob.upper).await?;
            }
            None => stream.write_byte(0).await?,
        }
        write_option_u8(stream, self.percentile).await?;
        stream.write_u64(self.grid_hash).await?;
        match self.local {
            Some((center, subcenter)) => {
                stream.write_byte(1).await?;
                stream.write_u16(center).await?;
                stream.write_u16(subcenter).await?;
            }
            None => stream.write_byte(0).await?,
        }

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let discipline = stream.read_byte().await?;
        let category = stream.read_byte().await?;
        let parameter = stream.read_byte().await?;
        let level_type = stream.read_byte().await?;
        let is_layer = stream.read_byte().await? != 0;
        let statistic = read_option_u8(stream).await?;
        let interval_length = read_option_u64(stream).await?.map(|length| length as i64);
        let is_ensemble = stream.read_byte().await? != 0;
        let ens_derived = read_option_u8(stream).await?;
        let probability = match stream.read_byte().await? {
            0 => None,
            _ => Some(ProbabilityKey {
                prob_type: stream.read_byte().await?,
                lower: read_option_u64(stream).await?,
                upper: read_option_u64(stream).await?,
            }),
        };
        let percentile = read_option_u8(stream).await?;
        let grid_hash = stream.read_u64().await?;
        let local = match stream.read_byte().await? {
            0 => None,
            _ => Some((stream.read_u16().await?, stream.read_u16().await?)),
        };

        Ok(Self {
            discipline,
            category,
            parameter,
            level_type,
            is_layer,
            statistic,
            interval_length,
            is_ensemble,
            ens_derived,
            probability,
            percentile,
            grid_hash,
            local,
        })
    }
}
