//! Union sibling collections into one partitioned collection.
//!
//! A partitioned collection doesn't copy its children's records. For each variable it keeps union
//! coordinates covering every child, plus a membership list saying where the variable lives in
//! each child that has it. Lookups are routed down to the children by value (see `router`).
//!
use std::{collections::BTreeMap, sync::Arc};

use cid::Cid;

use crate::{
    collection::{
        Collection, CollectionType, Group, Metadata, Partition, VariableContent, VariableIndex,
    },
    config::{Config, MissingPartitionPolicy},
    coord::{self, CoordValue, Coordinate, Role, RuntimeCoord, TimeBuilder, TimeInterval},
    errors::{Error, Result},
    identity::VariableIdentity,
    rectilinear::GroupStats,
    resolver::Resolver,
    share::share_coordinates,
    time::{Instant, TimeUnit},
};

/// Where a variable of a partitioned collection lives in one of its partitions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionMembership {
    /// Index of the partition in the collection's partition list
    pub partition: u32,

    /// Index of the group in the partition
    pub group: u32,

    /// Index of the variable in that group
    pub variable: u32,
}

/// Everything a partitioned collection is made of
pub(crate) struct PartitionBuild {
    pub(crate) collection_type: CollectionType,
    pub(crate) metadata: Metadata,
    pub(crate) runtime: RuntimeCoord,
    pub(crate) partitions: Vec<Partition>,
    pub(crate) run_to_partition: Vec<u32>,
    pub(crate) groups: Vec<Group>,
    pub(crate) stats: GroupStats,
}

/// A variable's source in a child: (partition, group, variable)
type Source = (usize, usize, usize);

pub struct PartitionUnionizer<'a> {
    config: &'a Config,
}

impl<'a> PartitionUnionizer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Load child collections and union them.
    ///
    /// `children` are pairs of partition name and CID. Children are ordered by their first
    /// runtime, then by name.
    ///
    pub(crate) async fn union(
        &self,
        resolver: &Arc<Resolver>,
        children: &[(String, Cid)],
    ) -> Result<PartitionBuild> {
        if children.is_empty() {
            return Err(Error::NoPartitions);
        }

        let mut loaded = Vec::with_capacity(children.len());
        for (name, cid) in children {
            let child = resolver.get_collection(cid).await?;
            let (start, end) = child
                .runtime
                .bounds()
                .ok_or_else(|| Error::Corrupt(format!("partition {name} has no runtimes")))?;
            let partition = Partition {
                name: name.clone(),
                cid: *cid,
                start,
                end,
            };
            loaded.push((partition, child));
        }
        loaded.sort_by(|(a, _), (b, _)| a.start.cmp(&b.start).then_with(|| a.name.cmp(&b.name)));
        let (partitions, children): (Vec<Partition>, Vec<Arc<Collection>>) =
            loaded.into_iter().unzip();

        self.union_loaded(partitions, &children)
    }

    /// Union already loaded children, given in partition order
    fn union_loaded(
        &self,
        partitions: Vec<Partition>,
        children: &[Arc<Collection>],
    ) -> Result<PartitionBuild> {
        let runtime = RuntimeCoord::new(
            children[0].runtime.code,
            children
                .iter()
                .flat_map(|child| child.runtime.runtimes.iter().copied()),
        );
        let run_to_partition = owners(&partitions, children, &runtime)?;
        let collection_type = partition_type(&partitions);

        // Groups are matched across children by grid
        let mut by_grid: BTreeMap<u64, Vec<(usize, usize)>> = BTreeMap::new();
        for (p, child) in children.iter().enumerate() {
            for (g, group) in child.groups.iter().enumerate() {
                by_grid.entry(group.grid_hash).or_default().push((p, g));
            }
        }

        let mut stats = GroupStats::default();
        let mut groups = Vec::with_capacity(by_grid.len());
        for (grid_hash, sources) in by_grid {
            let group = self.union_group(grid_hash, &sources, &partitions, children)?;
            stats.add(&group.stats);
            groups.push(group);
        }

        Ok(PartitionBuild {
            collection_type,
            metadata: children[0].metadata,
            runtime,
            partitions,
            run_to_partition,
            groups,
            stats,
        })
    }

    fn union_group(
        &self,
        grid_hash: u64,
        sources: &[(usize, usize)],
        partitions: &[Partition],
        children: &[Arc<Collection>],
    ) -> Result<Group> {
        let mut stats = GroupStats::default();
        let mut variables: BTreeMap<VariableIdentity, Vec<Source>> = BTreeMap::new();
        for (p, g) in sources {
            let group = &children[*p].groups[*g];
            stats.add(&group.stats);
            for (v, variable) in group.variables.iter().enumerate() {
                variables
                    .entry(variable.identity)
                    .or_default()
                    .push((*p, *g, v));
            }
        }

        let mut unions = Vec::with_capacity(variables.len());
        for (identity, sources) in variables {
            let union = self.union_variable(&identity, &sources, children)?;
            if union.members.is_empty() {
                match self.config.missing_partition {
                    MissingPartitionPolicy::Error => {
                        return Err(Error::MissingPartition(identity.name()));
                    }
                    MissingPartitionPolicy::Unreachable => {
                        let names: Vec<&str> = sources
                            .iter()
                            .map(|(p, _, _)| partitions[*p].name.as_str())
                            .collect();
                        log::warn!(
                            "{identity}: every time value in {names:?} is filtered out, \
                            variable is listed but unreachable"
                        );
                    }
                }
            }
            unions.push((identity, union));
        }

        let tuples: Vec<Vec<&Coordinate>> = unions
            .iter()
            .map(|(_, union)| union.coordinates.iter().collect())
            .collect();
        let (coordinates, indexes) = share_coordinates(self.config, &tuples)?;

        let variables = unions
            .into_iter()
            .zip(indexes)
            .map(|((identity, union), coord_index)| VariableIndex {
                identity,
                coord_index,
                stats: union.stats,
                content: VariableContent::Composite(union.members),
            })
            .collect();

        Ok(Group::new(grid_hash, coordinates, variables, stats))
    }

    /// Union the coordinates of one variable across the children that have it
    fn union_variable(
        &self,
        identity: &VariableIdentity,
        sources: &[Source],
        children: &[Arc<Collection>],
    ) -> Result<VariableUnion> {
        let tuples = sources
            .iter()
            .map(|(p, g, v)| children[*p].coordinates_of(*g, *v))
            .collect::<Result<Vec<_>>>()?;
        let roles: Vec<Role> = tuples[0].iter().map(|coord| coord.role()).collect();
        if roles.len() < 2 || roles[0] != Role::Runtime || roles[1] != Role::Time {
            return Err(Error::Corrupt(format!("{identity} has coordinates {roles:?}")));
        }
        if let Some(tuple) = tuples
            .iter()
            .find(|tuple| !tuple.iter().map(|coord| coord.role()).eq(roles.iter().copied()))
        {
            return Err(Error::Corrupt(format!(
                "{identity} has coordinates {roles:?} in one partition and {:?} in another",
                tuple.iter().map(|coord| coord.role()).collect::<Vec<_>>()
            )));
        }

        // Time values are filtered before they are unioned, and a child only counts as having the
        // variable if some of its time values survive.
        let mut members = vec![];
        let mut stats = GroupStats::default();
        let mut time = TimeBuilder::new(is_intervals(tuples[0][1]));
        for ((p, g, v), tuple) in sources.iter().zip(&tuples) {
            let unit = tuple[1].unit().ok_or_else(|| {
                Error::Corrupt(format!("{identity} has a time coordinate with no unit"))
            })?;
            let mut kept = 0;
            for run in tuple[0].runtimes().unwrap_or_default() {
                time.touch(*run, unit);
                for value in tuple[1].values_in_run(Some(run)) {
                    if self.keeps(identity, unit, &value) {
                        time.push(*run, unit, value);
                        kept += 1;
                    }
                }
            }

            if kept > 0 {
                members.push(PartitionMembership {
                    partition: *p as u32,
                    group: *g as u32,
                    variable: *v as u32,
                });
                stats.add(&children[*p].variable(*g, *v)?.stats);
            }
        }

        let no_union = || Error::Corrupt(format!("{identity} has nothing to union"));
        let runtimes: Vec<&Coordinate> = tuples.iter().map(|tuple| tuple[0]).collect();
        let mut coordinates = vec![
            coord::union(&runtimes)?.ok_or_else(no_union)?,
            time.finish()?.ok_or_else(no_union)?,
        ];
        for position in 2..roles.len() {
            let coords: Vec<&Coordinate> = tuples.iter().map(|tuple| tuple[position]).collect();
            coordinates.push(coord::union(&coords)?.ok_or_else(no_union)?);
        }

        Ok(VariableUnion {
            coordinates,
            members,
            stats,
        })
    }

    /// Whether a time value passes the interval filter
    fn keeps(&self, identity: &VariableIdentity, unit: TimeUnit, value: &CoordValue) -> bool {
        match value {
            CoordValue::Interval(start, end) => {
                match (unit.from_seconds(*start), unit.from_seconds(*end)) {
                    (Some(start), Some(end)) => self
                        .config
                        .interval_filter
                        .keeps(identity.parameter_id(), TimeInterval::new(start, end)),
                    _ => true,
                }
            }
            _ => true,
        }
    }
}

struct VariableUnion {
    /// In tuple order
    coordinates: Vec<Coordinate>,
    members: Vec<PartitionMembership>,
    stats: GroupStats,
}

fn is_intervals(coord: &Coordinate) -> bool {
    match coord {
        Coordinate::TimeInterval(_) => true,
        Coordinate::Time2D(time) => time.is_intervals(),
        _ => false,
    }
}

/// Assign each runtime to the first partition that has it.
///
/// A runtime found in more than one partition points at overlapping source collections. That is
/// logged and the first partition keeps the runtime.
///
fn owners(
    partitions: &[Partition],
    children: &[Arc<Collection>],
    runtime: &RuntimeCoord,
) -> Result<Vec<u32>> {
    let mut owners: Vec<Option<usize>> = vec![None; runtime.len()];
    for (p, child) in children.iter().enumerate() {
        for run in &child.runtime.runtimes {
            let i = runtime
                .index_of(run)
                .ok_or_else(|| Error::Corrupt(format!("runtime {run} missing from union")))?;
            match owners[i] {
                None => owners[i] = Some(p),
                Some(owner) => log::warn!(
                    "partitions {} and {} both have runtime {run}, keeping {}",
                    partitions[owner].name,
                    partitions[p].name,
                    partitions[owner].name,
                ),
            }
        }
    }

    owners
        .into_iter()
        .map(|owner| owner.map(|p| p as u32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::Corrupt(String::from("runtime with no partition")))
}

/// Partitions sorted by start overlap if one starts before an earlier one ends
fn partition_type(partitions: &[Partition]) -> CollectionType {
    let mut end: Option<Instant> = None;
    for partition in partitions {
        end = match end {
            Some(end) if partition.start <= end => return CollectionType::PartitionTwoD,
            Some(end) => Some(end.max(partition.end)),
            None => Some(partition.end),
        };
    }

    CollectionType::PartitionUniqueTimes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collection::CollectionKind,
        config::IntervalFilter,
        coord::CoordKind,
        record::{RecordDescriptor, TimeSpec},
        testing::{self, MemoryMapper},
    };

    async fn leaf(
        resolver: &Arc<Resolver>,
        name: &str,
        records: Vec<RecordDescriptor>,
    ) -> Result<(String, Cid)> {
        let cid = Collection::build(name, &testing::source(records), &Config::default(), resolver)
            .await?;

        Ok((String::from(name), cid))
    }

    fn values(coord: &Coordinate) -> Vec<CoordValue> {
        match coord.runtimes() {
            Some(runtimes) if coord.kind() == CoordKind::Time2D => runtimes
                .iter()
                .flat_map(|run| coord.values_in_run(Some(run)))
                .collect(),
            _ => coord.values_in_run(None),
        }
    }

    #[tokio::test]
    async fn union_coverage() -> Result<()> {
        let resolver = testing::resolver();
        let a = leaf(&resolver, "a", testing::grid(&[0, 1], &[0, 3, 6], 0)).await?;
        let b = leaf(&resolver, "b", testing::grid(&[2], &[0, 3, 9], 0)).await?;
        let config = Config::default();
        let cid = Collection::build_partitioned("ab", &[b.clone(), a.clone()], &config, &resolver)
            .await?;

        let collection = resolver.get_collection(&cid).await?;
        assert_eq!(collection.collection_type, CollectionType::PartitionUniqueTimes);
        let names: Vec<&str> = collection
            .partitions()
            .iter()
            .map(|partition| partition.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(
            collection.runtime.runtimes,
            vec![testing::runtime(0), testing::runtime(1), testing::runtime(2)]
        );

        let group = &collection.groups[0];
        let variable = &group.variables[0];
        assert_eq!(variable.members().unwrap().len(), 2);
        assert_eq!(variable.stats.used, 9);

        // Every child value is in the union, and nothing else
        let union = collection.coordinates_of(0, 0)?;
        for (position, coord) in union.iter().enumerate() {
            let mut expected = vec![];
            for (_, cid) in [&a, &b] {
                let child = resolver.get_collection(cid).await?;
                expected.extend(values(child.coordinates_of(0, 0)?[position]));
            }
            let actual = values(coord);
            for value in &expected {
                assert!(actual.contains(value));
            }
            for value in &actual {
                assert!(expected.contains(value));
            }
        }

        Ok(())
    }

    #[tokio::test]
    async fn overlapping_partitions() -> Result<()> {
        let resolver = testing::resolver();
        let a = leaf(&resolver, "a", testing::grid(&[0, 1], &[0, 3], 0)).await?;
        let b = leaf(&resolver, "b", testing::grid(&[1, 2], &[0, 6], 0)).await?;
        let cid = Collection::build_partitioned("ab", &[a, b], &Config::default(), &resolver)
            .await?;

        let collection = resolver.get_collection(&cid).await?;
        assert_eq!(collection.collection_type, CollectionType::PartitionTwoD);
        match &collection.kind {
            CollectionKind::Partitioned {
                run_to_partition, ..
            } => assert_eq!(run_to_partition, &vec![0, 0, 1]),
            _ => panic!("expecting a partitioned collection"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn variables_missing_from_some_partitions() -> Result<()> {
        let resolver = testing::resolver();
        let mut records = testing::grid(&[0], &[0, 3], 0);
        records.extend(testing::grid(&[0], &[0], 1));
        let a = leaf(&resolver, "a", records).await?;
        let b = leaf(&resolver, "b", testing::grid(&[1], &[0], 0)).await?;
        let cid = Collection::build_partitioned("ab", &[a, b], &Config::default(), &resolver)
            .await?;

        let collection = resolver.get_collection(&cid).await?;
        let group = &collection.groups[0];
        assert_eq!(group.variables.len(), 2);
        assert_eq!(
            group.variables[0].members().unwrap(),
            &[
                PartitionMembership {
                    partition: 0,
                    group: 0,
                    variable: 0
                },
                PartitionMembership {
                    partition: 1,
                    group: 0,
                    variable: 0
                }
            ]
        );
        assert_eq!(
            group.variables[1].members().unwrap(),
            &[PartitionMembership {
                partition: 0,
                group: 0,
                variable: 1
            }]
        );

        Ok(())
    }

    fn accumulations(run: usize, bounds: &[(i32, i32)]) -> Vec<RecordDescriptor> {
        bounds
            .iter()
            .enumerate()
            .map(|(i, (start, end))| {
                let mut record = testing::record(run, 0, 8, run as u64 * 100 + i as u64);
                record.category = 1;
                record.time = TimeSpec::Interval {
                    start: *start,
                    end: *end,
                    statistic: 1,
                };
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn filter_before_union() -> Result<()> {
        let resolver = testing::resolver();
        let a = leaf(&resolver, "a", accumulations(0, &[(0, 0), (0, 3), (0, 6)])).await?;
        let b = leaf(&resolver, "b", accumulations(1, &[(0, 0), (3, 6)])).await?;
        let config = Config {
            interval_filter: IntervalFilter {
                exclude_zero: true,
                exclude_bounds: vec![[0, 6]],
                ..IntervalFilter::default()
            },
            ..Config::default()
        };
        let cid = Collection::build_partitioned("ab", &[a, b], &config, &resolver).await?;

        let collection = resolver.get_collection(&cid).await?;
        let time = collection.coordinates_of(0, 0)?[1];
        assert_eq!(
            values(time),
            vec![
                CoordValue::Interval(0, 3 * 3600),
                CoordValue::Interval(3 * 3600, 6 * 3600),
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn missing_partition_policy() -> Result<()> {
        let resolver = testing::resolver();
        let a = leaf(&resolver, "a", accumulations(0, &[(0, 0)])).await?;
        let b = leaf(&resolver, "b", accumulations(1, &[(0, 0)])).await?;
        let mut config = Config {
            interval_filter: IntervalFilter {
                exclude_zero: true,
                ..IntervalFilter::default()
            },
            ..Config::default()
        };

        let cid = Collection::build_partitioned("ab", &[a.clone(), b.clone()], &config, &resolver)
            .await?;
        let collection = resolver.get_collection(&cid).await?;
        assert_eq!(collection.groups[0].variables[0].members(), Some(&[][..]));

        config.missing_partition = MissingPartitionPolicy::Error;
        let result = Collection::build_partitioned("ab", &[a, b], &config, &resolver).await;
        assert!(matches!(result, Err(Error::MissingPartition(_))));

        Ok(())
    }

    #[tokio::test]
    async fn no_partitions() {
        let resolver = testing::resolver();
        let result =
            Collection::build_partitioned("none", &[], &Config::default(), &resolver).await;
        assert!(matches!(result, Err(Error::NoPartitions)));
    }

    #[tokio::test]
    async fn partitions_of_partitions() -> Result<()> {
        let mapper = MemoryMapper::new();
        let resolver = testing::resolver_for(mapper.clone());
        let config = Config::default();
        let a = leaf(&resolver, "a", testing::grid(&[0], &[0, 3], 0)).await?;
        let b = leaf(&resolver, "b", testing::grid(&[1], &[0, 3], 0)).await?;
        let c = leaf(&resolver, "c", testing::grid(&[2], &[0, 6], 0)).await?;
        let ab = Collection::build_partitioned("ab", &[a, b], &config, &resolver).await?;
        let abc = Collection::build_partitioned(
            "abc",
            &[(String::from("ab"), ab), c],
            &config,
            &resolver,
        )
        .await?;

        let collection = testing::resolver_for(mapper).get_collection(&abc).await?;
        assert_eq!(collection.runtime.len(), 3);
        assert_eq!(collection.partitions().len(), 2);
        assert_eq!(collection.groups[0].variables[0].stats.used, 6);

        Ok(())
    }
}
