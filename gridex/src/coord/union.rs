use std::collections::BTreeSet;

use super::{
    CoordKind, CoordValue, Coordinate, EnsembleCoord, RuntimeCoord, TimeBuilder, VerticalCoord,
};
use crate::{
    errors::{Error, Result},
    time::{Instant, TimeUnit},
};

/// Union coordinates of the same kind into one sorted, distinct coordinate.
///
/// The code of the first coordinate is kept. Time values are expressed in the finest unit of the
/// coordinates being merged. Returns `None` if `coords` is empty.
///
pub(crate) fn union(coords: &[&Coordinate]) -> Result<Option<Coordinate>> {
    let first = match coords.first() {
        Some(first) => *first,
        None => return Ok(None),
    };
    if let Some(other) = coords.iter().find(|coord| coord.kind() != first.kind()) {
        return Err(Error::Corrupt(format!(
            "can't union {:?} coordinate with {:?} coordinate",
            first.kind(),
            other.kind()
        )));
    }

    let coord = match first {
        Coordinate::Runtime(runtime) => {
            let runtimes = coords
                .iter()
                .filter_map(|coord| coord.runtimes())
                .flatten()
                .copied();
            Coordinate::Runtime(RuntimeCoord::new(runtime.code, runtimes))
        }
        Coordinate::Time(_) | Coordinate::TimeInterval(_) => {
            // Not runtime dependent, so all values go under a single nominal runtime
            let mut builder = TimeBuilder::new(first.kind() == CoordKind::TimeInterval);
            for coord in coords {
                let unit = time_unit(coord)?;
                builder.touch(Instant::default(), unit);
                for value in coord.values_in_run(None) {
                    builder.push(Instant::default(), unit, value);
                }
            }
            match builder.finish()? {
                Some(coord) => coord,
                None => return Ok(None),
            }
        }
        Coordinate::Time2D(time) => {
            let mut builder = TimeBuilder::new(time.is_intervals());
            for coord in coords {
                let unit = time_unit(coord)?;
                for run in coord.runtimes().unwrap_or_default() {
                    builder.touch(*run, unit);
                    for value in coord.values_in_run(Some(run)) {
                        builder.push(*run, unit, value);
                    }
                }
            }
            match builder.finish()? {
                Some(coord) => coord,
                None => return Ok(None),
            }
        }
        Coordinate::Vertical(vertical) => {
            let levels = coords.iter().flat_map(|coord| {
                coord.values_in_run(None).into_iter().filter_map(|value| match value {
                    CoordValue::Vertical(level) => Some(level),
                    _ => None,
                })
            });
            Coordinate::Vertical(VerticalCoord::new(vertical.code, vertical.is_layer, levels))
        }
        Coordinate::Ensemble(_) => {
            let members: BTreeSet<_> = coords
                .iter()
                .flat_map(|coord| coord.values_in_run(None))
                .filter_map(|value| match value {
                    CoordValue::Ensemble(member) => Some(member),
                    _ => None,
                })
                .collect();
            Coordinate::Ensemble(EnsembleCoord::new(members))
        }
    };

    Ok(Some(coord))
}

fn time_unit(coord: &Coordinate) -> Result<TimeUnit> {
    coord
        .unit()
        .ok_or_else(|| Error::Corrupt(format!("{:?} coordinate has no time unit", coord.kind())))
}
