//! Merge the coordinates of a group's variables into one shared list of coordinates.
//!
use crate::{
    config::Config,
    coord::{self, Coordinate, MergeKey},
    errors::{Error, Result},
    identity::VariableIdentity,
    rectilinear::{GroupBuild, GroupStats},
    sparse::Records,
};

/// A variable whose coordinates are references into its group's shared coordinates
#[derive(Debug)]
pub struct SharedVariable {
    pub identity: VariableIdentity,

    /// Indexes into `SharedGroup::coordinates`, in tuple order
    pub coord_index: Vec<usize>,

    /// Records, addressed in the shared coordinates
    pub records: Records,
}

#[derive(Debug)]
pub struct SharedGroup {
    pub grid_hash: u64,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<SharedVariable>,
    pub stats: GroupStats,
}

/// Union coordinate tuples by merge key.
///
/// Returns the shared coordinates, in order of first appearance, and for each tuple, the index of
/// each of its coordinates in the shared list.
///
pub(crate) fn share_coordinates(
    config: &Config,
    tuples: &[Vec<&Coordinate>],
) -> Result<(Vec<Coordinate>, Vec<Vec<usize>>)> {
    let mut keys: Vec<MergeKey> = vec![];
    let mut members: Vec<Vec<&Coordinate>> = vec![];
    let mut indexes = Vec::with_capacity(tuples.len());

    for tuple in tuples {
        let mut tuple_index = Vec::with_capacity(tuple.len());
        for coord in tuple {
            let key = coord.merge_key(config);
            let slot = match keys.iter().position(|k| *k == key) {
                Some(slot) => slot,
                None => {
                    keys.push(key);
                    members.push(vec![]);
                    keys.len() - 1
                }
            };
            members[slot].push(*coord);
            tuple_index.push(slot);
        }
        indexes.push(tuple_index);
    }

    let mut shared = Vec::with_capacity(members.len());
    for coords in members {
        let coord = coord::union(&coords)?
            .ok_or_else(|| Error::Corrupt(String::from("no coordinates to share")))?;
        shared.push(coord);
    }

    Ok((shared, indexes))
}

/// Relabel a records index from one coordinate tuple to another, by coordinate value
pub(crate) fn reindex(
    records: &Records,
    from: &[&Coordinate],
    to: &[&Coordinate],
) -> Result<Records> {
    let shape: Vec<usize> = to.iter().map(|coord| coord.len()).collect();
    records.reindex(&shape, |index| coord::translate(from, to, index))
}

/// Shares coordinates within a group
pub struct CoordinateSharer<'a> {
    config: &'a Config,
}

impl<'a> CoordinateSharer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Merge the coordinates of a group's variables and reindex every variable's records against
    /// the merged coordinates.
    ///
    pub fn share(&self, group: GroupBuild) -> Result<SharedGroup> {
        let tuples: Vec<Vec<&Coordinate>> = group
            .variables
            .iter()
            .map(|variable| variable.coordinates.iter().collect())
            .collect();
        let (coordinates, indexes) = share_coordinates(self.config, &tuples)?;

        let mut variables = Vec::with_capacity(group.variables.len());
        for (variable, coord_index) in group.variables.iter().zip(indexes) {
            let from: Vec<&Coordinate> = variable.coordinates.iter().collect();
            let to: Vec<&Coordinate> = coord_index.iter().map(|i| &coordinates[*i]).collect();
            let records = reindex(&variable.records, &from, &to)?;
            variables.push(SharedVariable {
                identity: variable.identity,
                coord_index,
                records,
            });
        }

        Ok(SharedGroup {
            grid_hash: group.grid_hash,
            coordinates,
            variables,
            stats: group.stats,
        })
    }
}
