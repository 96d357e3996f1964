//! The read path: from an index tuple to a record, through any number of partition levels.
//!
use std::sync::Arc;

use async_recursion::async_recursion;

use crate::{
    collection::{Collection, CollectionKind, CollectionType, VariableContent},
    coord::{self, CoordValue, Coordinate},
    errors::{Error, Result},
    partition::PartitionMembership,
    record::RecordRef,
};

impl Collection {
    /// Find the record at an index tuple of a variable.
    ///
    /// `index` has one component per coordinate of the variable, in the order given by
    /// `coordinates_of`. Returns `Ok(None)` if there is no record at that index, which is normal
    /// for the sparse coordinate spaces of gridded collections. An index of the wrong rank or out
    /// of bounds is an error.
    ///
    /// Partitioned collections route the lookup to the partition that owns the index's runtime,
    /// translating the index by coordinate value, never by position. A partition that can't be
    /// loaded is skipped, and everything it would have held is reported missing.
    ///
    #[async_recursion]
    pub async fn lookup(
        &self,
        group: usize,
        variable: usize,
        index: &[usize],
    ) -> Result<Option<RecordRef>> {
        let coords = self.coordinates_of(group, variable)?;
        check_index(&coords, index)?;

        match &self.variable(group, variable)?.content {
            VariableContent::Leaf(leaf) => {
                let records = leaf.get(&self.resolver).await?;
                let locator = match records.get(index)? {
                    Some(locator) => *locator,
                    None => return Ok(None),
                };
                let path = self
                    .files()
                    .and_then(|files| files.get(locator.file as usize))
                    .ok_or_else(|| {
                        Error::Corrupt(format!("record refers to unknown file {}", locator.file))
                    })?;

                Ok(Some(RecordRef {
                    path: Arc::clone(path),
                    locator,
                }))
            }
            VariableContent::Composite(members) => {
                let partition = match self.owner(group, variable, &coords, index) {
                    Some(partition) => partition,
                    None => return Ok(None),
                };
                let member = match members.iter().find(|m| m.partition as usize == partition) {
                    Some(member) => member,
                    None => return Ok(None),
                };

                self.lookup_in_partition(member, &coords, index).await
            }
        }
    }

    /// The partition owning the runtime of an index
    fn owner(
        &self,
        group: usize,
        variable: usize,
        coords: &[&Coordinate],
        index: &[usize],
    ) -> Option<usize> {
        let run_to_partition = match &self.kind {
            CollectionKind::Partitioned {
                run_to_partition, ..
            } => run_to_partition,
            CollectionKind::Leaf { .. } => return None,
        };

        // Positional lookup is only valid when the variable's runtime coordinate is identical to
        // the collection's
        let runtime_coord = self.variable(group, variable).ok()?.coord_index[0];
        let aligned = self.collection_type == CollectionType::PartitionUniqueTimes
            && self.groups[group].is_master_runtime[runtime_coord];
        let run = if aligned {
            index[0]
        } else {
            match coords[0].value(index[0]) {
                Some(CoordValue::Runtime(run)) => self.runtime.index_of(&run)?,
                _ => return None,
            }
        };

        run_to_partition.get(run).map(|partition| *partition as usize)
    }

    async fn lookup_in_partition(
        &self,
        member: &PartitionMembership,
        coords: &[&Coordinate],
        index: &[usize],
    ) -> Result<Option<RecordRef>> {
        let partition = member.partition as usize;
        let partitions = self.partitions();
        if self.all_failed() {
            return Err(Error::NoPartitions);
        }
        if self.has_failed(partition) {
            return Ok(None);
        }

        let child = match self.resolver.get_collection(&partitions[partition].cid).await {
            Ok(child) => child,
            Err(err) => {
                log::warn!(
                    "{}: skipping partition {}: {err}",
                    self.name,
                    partitions[partition].name
                );
                if self.mark_failed(partition) {
                    return Err(Error::NoPartitions);
                }
                return Ok(None);
            }
        };

        let group = member.group as usize;
        let variable = member.variable as usize;
        let translated = {
            let to = child.coordinates_of(group, variable)?;
            coord::translate(coords, &to, index)
        };

        match translated {
            Some(index) => child.lookup(group, variable, &index).await,
            None => Ok(None),
        }
    }

    fn has_failed(&self, partition: usize) -> bool {
        self.failed.lock().contains(&partition)
    }

    fn all_failed(&self) -> bool {
        self.failed.lock().len() == self.partitions().len()
    }

    /// Remember that a partition couldn't be loaded. Returns whether every partition has failed.
    fn mark_failed(&self, partition: usize) -> bool {
        let mut failed = self.failed.lock();
        failed.insert(partition);

        failed.len() == self.partitions().len()
    }
}

fn check_index(coords: &[&Coordinate], index: &[usize]) -> Result<()> {
    let shape: Vec<usize> = coords.iter().map(|coord| coord.len()).collect();
    if index.len() != shape.len() || index.iter().zip(&shape).any(|(i, n)| i >= n) {
        return Err(Error::BadIndex {
            index: index.to_vec(),
            shape,
        });
    }

    Ok(())
}
