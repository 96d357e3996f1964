use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
};

/// A vertical level, or a layer between two levels.
///
/// Levels are totally ordered by `f64::total_cmp`, with negative zero normalized to zero so that
/// equality, ordering and hashing agree.
///
#[derive(Clone, Copy, Debug)]
pub struct Level {
    pub value1: f64,
    pub value2: Option<f64>,
}

fn normalize(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

impl Level {
    pub fn new(value1: f64, value2: Option<f64>) -> Self {
        Self {
            value1: normalize(value1),
            value2: value2.map(normalize),
        }
    }

    pub fn is_layer(&self) -> bool {
        self.value2.is_some()
    }
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Level {}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        normalize(self.value1)
            .total_cmp(&normalize(other.value1))
            .then_with(|| match (self.value2, other.value2) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => normalize(a).total_cmp(&normalize(b)),
            })
    }
}

impl Hash for Level {
    fn hash<H: Hasher>(&self, state: &mut H) {
        normalize(self.value1).to_bits().hash(state);
        self.value2.map(|value| normalize(value).to_bits()).hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerticalCoord {
    /// Type of fixed surface (WMO code table 4.5)
    pub code: u8,
    pub is_layer: bool,
    pub levels: Vec<Level>,
}

impl VerticalCoord {
    pub fn new(code: u8, is_layer: bool, levels: impl IntoIterator<Item = Level>) -> Self {
        let mut levels: Vec<Level> = levels.into_iter().collect();
        levels.sort();
        levels.dedup();

        Self {
            code,
            is_layer,
            levels,
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn index_of(&self, level: &Level) -> Option<usize> {
        self.levels.binary_search(level).ok()
    }

    /// Conventional name for a level type
    pub fn base_name(&self) -> String {
        let name = match self.code {
            20 => "temperature_level",
            100 => "isobaric",
            102 => "altitude_above_msl",
            103 => "height_above_ground",
            104 => "sigma",
            105 => "hybrid",
            106 => "depth_below_surface",
            107 => "isentrope",
            108 => "pressure_difference",
            109 => "potential_vorticity_surface",
            160 => "depth_below_sea",
            _ => return format!("level{}", self.code),
        };

        if self.is_layer {
            format!("{name}_layer")
        } else {
            String::from(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_zero() {
        let a = Level::new(-0.0, None);
        let b = Level::new(0.0, None);
        assert_eq!(a, b);

        let coord = VerticalCoord::new(103, false, [a, b, Level::new(2.0, None)]);
        assert_eq!(coord.len(), 2);
        assert_eq!(coord.index_of(&Level::new(0.0, None)), Some(0));
    }

    #[test]
    fn layers_sort_after_levels() {
        let coord = VerticalCoord::new(
            100,
            true,
            [
                Level::new(500.0, Some(850.0)),
                Level::new(500.0, None),
                Level::new(200.0, Some(500.0)),
            ],
        );
        assert_eq!(
            coord.levels,
            vec![
                Level::new(200.0, Some(500.0)),
                Level::new(500.0, None),
                Level::new(500.0, Some(850.0)),
            ]
        );
        assert_eq!(coord.base_name(), "isobaric_layer");
    }
}
