use crate::time::Instant;

/// Reference times of forecast runs, sorted and distinct
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeCoord {
    /// Significance of the reference time (WMO code table 1.2)
    pub code: u8,
    pub runtimes: Vec<Instant>,
}

impl RuntimeCoord {
    /// Build from any collection of instants. Duplicates are removed.
    ///
    pub fn new(code: u8, runtimes: impl IntoIterator<Item = Instant>) -> Self {
        let mut runtimes: Vec<Instant> = runtimes.into_iter().collect();
        runtimes.sort();
        runtimes.dedup();

        Self { code, runtimes }
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Instant> {
        self.runtimes.get(index).copied()
    }

    pub fn index_of(&self, runtime: &Instant) -> Option<usize> {
        self.runtimes.binary_search(runtime).ok()
    }

    /// First and last runtime
    pub fn bounds(&self) -> Option<(Instant, Instant)> {
        Some((*self.runtimes.first()?, *self.runtimes.last()?))
    }
}
