//! Collections: the persisted, queryable index over a set of records, or over a set of child
//! collections (partitions).
//!
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use cid::Cid;
use futures::{
    io::{AsyncRead, AsyncWrite},
    lock::Mutex as AsyncMutex,
};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::{
    cache::Cacheable,
    config::Config,
    coord::{self, CoordValue, Coordinate, RuntimeCoord},
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
    identity::VariableIdentity,
    node::{self, Node},
    partition::{PartitionMembership, PartitionUnionizer},
    record::{RecordDescriptor, RecordSource},
    rectilinear::{GroupStats, Rectilinearizer},
    resolver::Resolver,
    share::{CoordinateSharer, SharedGroup},
    sparse::Records,
    time::{Instant, TimeUnit},
};

/// Temporal shape of a collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionType {
    /// Every record has the same runtime
    SingleRuntime = 0,

    /// Several runtimes, but no valid time is forecast by more than one of them
    MultipleRuntimesUniqueTimes = 1,

    /// Several runtimes with overlapping valid times
    MultipleRuntimes = 2,

    /// Partitions whose runtime ranges don't overlap
    PartitionUniqueTimes = 3,

    /// Partitions whose runtime ranges overlap
    PartitionTwoD = 4,
}

impl CollectionType {
    pub fn is_partitioned(self) -> bool {
        matches!(
            self,
            CollectionType::PartitionUniqueTimes | CollectionType::PartitionTwoD
        )
    }
}

impl TryFrom<u8> for CollectionType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CollectionType::SingleRuntime),
            1 => Ok(CollectionType::MultipleRuntimesUniqueTimes),
            2 => Ok(CollectionType::MultipleRuntimes),
            3 => Ok(CollectionType::PartitionUniqueTimes),
            4 => Ok(CollectionType::PartitionTwoD),
            _ => Err(Error::Corrupt(format!("unknown collection type: {code}"))),
        }
    }
}

/// Descriptive metadata of a collection, taken from its first record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub center: u16,
    pub subcenter: u16,
    pub master_table: u8,
    pub local_table: u8,
    pub generating_process: u8,
}

impl Metadata {
    pub(crate) fn of(record: &RecordDescriptor) -> Self {
        Self {
            center: record.center,
            subcenter: record.subcenter,
            master_table: record.master_table,
            local_table: record.local_table,
            generating_process: record.generating_process,
        }
    }
}

/// A child collection of a partitioned collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub cid: Cid,

    /// First and last runtime of the child
    pub start: Instant,
    pub end: Instant,
}

#[derive(Debug)]
pub enum CollectionKind {
    /// Built directly from records
    Leaf {
        /// Source files, indexed by `RecordLocator::file`
        files: Vec<Arc<str>>,
    },

    /// Built from child collections
    Partitioned {
        /// Sorted by start, then by name
        partitions: Vec<Partition>,

        /// For each runtime of the collection, the partition that owns it
        run_to_partition: Vec<u32>,
    },
}

/// Records sharing one horizontal grid
pub struct Group {
    pub grid_hash: u64,

    /// Coordinates shared by the group's variables
    pub coordinates: Vec<Coordinate>,

    /// Sorted by identity
    pub variables: Vec<VariableIndex>,
    pub stats: GroupStats,

    /// For each coordinate, whether it is exactly the collection's runtime coordinate
    pub(crate) is_master_runtime: Vec<bool>,
}

impl Group {
    pub(crate) fn new(
        grid_hash: u64,
        coordinates: Vec<Coordinate>,
        variables: Vec<VariableIndex>,
        stats: GroupStats,
    ) -> Self {
        Self {
            grid_hash,
            coordinates,
            variables,
            stats,
            is_master_runtime: vec![],
        }
    }

    pub fn name(&self) -> String {
        format!("{:016x}", self.grid_hash)
    }

    /// Distinct names for the group's coordinates, in the same order
    pub fn coordinate_names(&self) -> Vec<String> {
        coord::coordinate_names(&self.coordinates)
    }

    /// Index of the variable with the given identity
    pub fn variable(&self, identity: &VariableIdentity) -> Option<usize> {
        self.variables
            .binary_search_by(|variable| variable.identity.cmp(identity))
            .ok()
    }

    fn align(&mut self, runtime: &RuntimeCoord) {
        self.is_master_runtime = self
            .coordinates
            .iter()
            .map(|coord| match coord {
                Coordinate::Runtime(coord) => coord.runtimes == runtime.runtimes,
                _ => false,
            })
            .collect();
    }
}

/// A variable of a group
pub struct VariableIndex {
    pub identity: VariableIdentity,

    /// Indexes into the group's coordinates, in tuple order: runtime, time, then optionally
    /// ensemble and vertical
    pub coord_index: Vec<usize>,
    pub stats: GroupStats,
    pub(crate) content: VariableContent,
}

impl VariableIndex {
    /// Which partitions hold this variable, for a variable of a partitioned collection
    pub fn members(&self) -> Option<&[PartitionMembership]> {
        match &self.content {
            VariableContent::Composite(members) => Some(members),
            VariableContent::Leaf(_) => None,
        }
    }

    /// The stored records, for a variable of a leaf collection
    pub fn records_cid(&self) -> Option<&Cid> {
        match &self.content {
            VariableContent::Leaf(leaf) => Some(&leaf.cid),
            VariableContent::Composite(_) => None,
        }
    }
}

pub(crate) enum VariableContent {
    Leaf(LeafRecords),
    Composite(Vec<PartitionMembership>),
}

/// Records of a leaf variable, loaded on first use
pub(crate) struct LeafRecords {
    pub(crate) cid: Cid,
    loaded: AsyncMutex<Option<Arc<Records>>>,
}

impl LeafRecords {
    fn new(cid: Cid) -> Self {
        Self {
            cid,
            loaded: AsyncMutex::new(None),
        }
    }

    /// Get the records, loading them if this is the first time they're needed.
    ///
    /// Concurrent callers wait on the first one's load.
    ///
    pub(crate) async fn get(&self, resolver: &Arc<Resolver>) -> Result<Arc<Records>> {
        let mut loaded = self.loaded.lock().await;
        if let Some(records) = &*loaded {
            return Ok(Arc::clone(records));
        }

        let records = resolver.get_records(&self.cid).await?;
        *loaded = Some(Arc::clone(&records));

        Ok(records)
    }
}

/// An index over gridded records, organized into groups of variables with shared coordinates.
///
pub struct Collection {
    pub name: String,
    pub collection_type: CollectionType,
    pub metadata: Metadata,

    /// Every runtime in the collection
    pub runtime: RuntimeCoord,
    pub groups: Vec<Group>,
    pub kind: CollectionKind,

    /// Totals over all groups, plus records that couldn't be decoded at all
    pub stats: GroupStats,

    /// Set when the collection is loaded from the store
    pub cid: Option<Cid>,

    /// Partitions that failed to load while routing a lookup
    pub(crate) failed: Mutex<HashSet<usize>>,
    pub(crate) resolver: Arc<Resolver>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("collection_type", &self.collection_type)
            .field("cid", &self.cid)
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Collection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        collection_type: CollectionType,
        metadata: Metadata,
        runtime: RuntimeCoord,
        mut groups: Vec<Group>,
        kind: CollectionKind,
        stats: GroupStats,
        resolver: &Arc<Resolver>,
    ) -> Self {
        for group in groups.iter_mut() {
            group.align(&runtime);
        }

        Self {
            name,
            collection_type,
            metadata,
            runtime,
            groups,
            kind,
            stats,
            cid: None,
            failed: Mutex::new(HashSet::new()),
            resolver: Arc::clone(resolver),
        }
    }

    /// Build a leaf collection from records and store it.
    ///
    /// Records are grouped by horizontal grid, and each group is rectilinearized and has its
    /// coordinates shared independently of the others, in parallel. Nothing is stored unless every
    /// group builds successfully. Returns the CID of the stored collection.
    ///
    pub async fn build(
        name: &str,
        source: &dyn RecordSource,
        config: &Config,
        resolver: &Arc<Resolver>,
    ) -> Result<Cid> {
        let files: Vec<Arc<str>> = source.files().into_iter().map(Arc::from).collect();
        let mut metadata = None;
        let mut undecoded = 0;
        let mut by_grid: BTreeMap<u64, Vec<RecordDescriptor>> = BTreeMap::new();
        for record in source.records() {
            match record {
                Ok(record) if record.locator.file as usize >= files.len() => {
                    log::warn!(
                        "{name}: dropping record at offset {} of unknown file {}",
                        record.locator.offset,
                        record.locator.file
                    );
                    undecoded += 1;
                }
                Ok(record) => {
                    metadata.get_or_insert_with(|| Metadata::of(&record));
                    by_grid.entry(record.grid_hash).or_default().push(record);
                }
                Err(err) => {
                    log::warn!("{name}: dropping record: {err}");
                    undecoded += 1;
                }
            }
        }
        let metadata = metadata.ok_or(Error::NoRecords)?;

        let by_grid: Vec<(u64, Vec<RecordDescriptor>)> = by_grid.into_iter().collect();
        let shared = by_grid
            .into_par_iter()
            .map(|(grid_hash, records)| {
                let mut group = Rectilinearizer::new(config, grid_hash);
                for record in records {
                    group.push(record);
                }

                CoordinateSharer::new(config).share(group.finish()?)
            })
            .collect::<Result<Vec<SharedGroup>>>()?;

        let runtime = runtime_of(shared.iter().flat_map(|group| &group.coordinates));
        let collection_type = leaf_type(&shared, &runtime);

        let mut stats = GroupStats {
            total: undecoded,
            rejected: undecoded,
            ..GroupStats::default()
        };
        let mut groups = Vec::with_capacity(shared.len());
        for group in shared {
            let mut variables = Vec::with_capacity(group.variables.len());
            for variable in group.variables {
                let cid = resolver.save(&variable.records).await?;
                variables.push(VariableIndex {
                    identity: variable.identity,
                    coord_index: variable.coord_index,
                    stats: GroupStats::of_records(&variable.records),
                    content: VariableContent::Leaf(LeafRecords::new(cid)),
                });
            }
            stats.add(&group.stats);
            groups.push(Group::new(
                group.grid_hash,
                group.coordinates,
                variables,
                group.stats,
            ));
        }

        let collection = Collection::new(
            String::from(name),
            collection_type,
            metadata,
            runtime,
            groups,
            CollectionKind::Leaf { files },
            stats,
            resolver,
        );
        let cid = resolver.save(&collection).await?;
        log::info!(
            "built collection {name} ({cid}): {:?}, {} groups, {} of {} records used",
            collection.collection_type,
            collection.groups.len(),
            collection.stats.used,
            collection.stats.total,
        );

        Ok(cid)
    }

    /// Build a partitioned collection from already stored child collections and store it.
    ///
    /// `children` are pairs of partition name and CID. Returns the CID of the stored collection.
    ///
    pub async fn build_partitioned(
        name: &str,
        children: &[(String, Cid)],
        config: &Config,
        resolver: &Arc<Resolver>,
    ) -> Result<Cid> {
        let union = PartitionUnionizer::new(config)
            .union(resolver, children)
            .await?;

        let collection = Collection::new(
            String::from(name),
            union.collection_type,
            union.metadata,
            union.runtime,
            union.groups,
            CollectionKind::Partitioned {
                partitions: union.partitions,
                run_to_partition: union.run_to_partition,
            },
            union.stats,
            resolver,
        );
        let cid = resolver.save(&collection).await?;
        log::info!(
            "built partitioned collection {name} ({cid}): {:?}, {} partitions, {} groups",
            collection.collection_type,
            collection.partitions().len(),
            collection.groups.len(),
        );

        Ok(cid)
    }

    pub fn is_partitioned(&self) -> bool {
        matches!(self.kind, CollectionKind::Partitioned { .. })
    }

    /// Child collections, empty for a leaf collection
    pub fn partitions(&self) -> &[Partition] {
        match &self.kind {
            CollectionKind::Partitioned { partitions, .. } => partitions,
            CollectionKind::Leaf { .. } => &[],
        }
    }

    /// Source files, for a leaf collection
    pub fn files(&self) -> Option<&[Arc<str>]> {
        match &self.kind {
            CollectionKind::Leaf { files } => Some(files),
            CollectionKind::Partitioned { .. } => None,
        }
    }

    /// Index of the group for a horizontal grid
    pub fn group(&self, grid_hash: u64) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.grid_hash == grid_hash)
    }

    pub fn variable(&self, group: usize, variable: usize) -> Result<&VariableIndex> {
        self.groups
            .get(group)
            .and_then(|g| g.variables.get(variable))
            .ok_or(Error::BadVariable { group, variable })
    }

    /// The coordinate tuple of a variable, in the order its index tuples use
    pub fn coordinates_of(&self, group: usize, variable: usize) -> Result<Vec<&Coordinate>> {
        let var = self.variable(group, variable)?;
        let coordinates = &self.groups[group].coordinates;
        var.coord_index
            .iter()
            .map(|i| {
                coordinates
                    .get(*i)
                    .ok_or_else(|| Error::Corrupt(format!("no coordinate {i} in group {group}")))
            })
            .collect()
    }
}

/// Union of the runtimes of all runtime coordinates in a list
pub(crate) fn runtime_of<'a>(coordinates: impl Iterator<Item = &'a Coordinate>) -> RuntimeCoord {
    let mut code = None;
    let mut runtimes = vec![];
    for coordinate in coordinates {
        if let Coordinate::Runtime(runtime) = coordinate {
            code.get_or_insert(runtime.code);
            runtimes.extend_from_slice(&runtime.runtimes);
        }
    }

    RuntimeCoord::new(code.unwrap_or(1), runtimes)
}

/// Decide whether the valid times of a leaf collection are unique across runtimes.
///
/// Valid times are compared per variable: two variables forecasting the same valid time from
/// different runtimes don't make the collection two dimensional.
///
fn leaf_type(groups: &[SharedGroup], runtime: &RuntimeCoord) -> CollectionType {
    if runtime.len() <= 1 {
        return CollectionType::SingleRuntime;
    }

    for group in groups {
        for variable in &group.variables {
            let coords: Vec<&Coordinate> = variable
                .coord_index
                .iter()
                .map(|i| &group.coordinates[*i])
                .collect();
            let (runtimes, times) = match (coords.first(), coords.get(1)) {
                (Some(runtimes), Some(times)) => (runtimes, times),
                _ => continue,
            };

            let mut seen: HashMap<Instant, Instant> = HashMap::new();
            for (index, _) in variable.records.iter() {
                let run = match runtimes.value(index[0]) {
                    Some(CoordValue::Runtime(run)) => run,
                    _ => continue,
                };
                let seconds = match times.value_in_run(Some(&run), index[1]) {
                    Some(CoordValue::Time(seconds)) => seconds,
                    Some(CoordValue::Interval(_, end)) => end,
                    _ => continue,
                };
                let valid = match TimeUnit::valid_time(run, seconds) {
                    Some(valid) => valid,
                    None => continue,
                };
                if let Some(other) = seen.insert(valid, run) {
                    if other != run {
                        return CollectionType::MultipleRuntimes;
                    }
                }
            }
        }
    }

    CollectionType::MultipleRuntimesUniqueTimes
}

const KIND_LEAF: u8 = 0;
const KIND_PARTITIONED: u8 = 1;

const CONTENT_LEAF: u8 = 0;
const CONTENT_COMPOSITE: u8 = 1;

#[async_trait]
impl Serialize for Metadata {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_u16(self.center).await?;
        stream.write_u16(self.subcenter).await?;
        stream.write_byte(self.master_table).await?;
        stream.write_byte(self.local_table).await?;
        stream.write_byte(self.generating_process).await?;

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        Ok(Self {
            center: stream.read_u16().await?,
            subcenter: stream.read_u16().await?,
            master_table: stream.read_byte().await?,
            local_table: stream.read_byte().await?,
            generating_process: stream.read_byte().await?,
        })
    }
}

#[async_trait]
impl Serialize for GroupStats {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_u64(self.total).await?;
        stream.write_u64(self.used).await?;
        stream.write_u64(self.duplicates).await?;
        stream.write_u64(self.missing).await?;
        stream.write_u64(self.filtered).await?;
        stream.write_u64(self.rejected).await?;

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        Ok(Self {
            total: stream.read_u64().await?,
            used: stream.read_u64().await?,
            duplicates: stream.read_u64().await?,
            missing: stream.read_u64().await?,
            filtered: stream.read_u64().await?,
            rejected: stream.read_u64().await?,
        })
    }
}

#[async_trait]
impl Serialize for Partition {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_string(&self.name).await?;
        stream.write_cid(&self.cid).await?;
        coord::write_instants(stream, &[self.start, self.end]).await?;

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let name = stream.read_string().await?;
        let cid = stream.read_cid().await?;
        match coord::read_instants(stream).await?[..] {
            [start, end] => Ok(Self {
                name,
                cid,
                start,
                end,
            }),
            _ => Err(Error::Corrupt(format!("bad bounds for partition {name}"))),
        }
    }
}

async fn write_runtime(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    runtime: &RuntimeCoord,
) -> Result<()> {
    stream.write_byte(runtime.code).await?;
    coord::write_instants(stream, &runtime.runtimes).await
}

async fn read_runtime(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<RuntimeCoord> {
    let code = stream.read_byte().await?;
    let runtimes = coord::read_instants(stream).await?;

    Ok(RuntimeCoord::new(code, runtimes))
}

async fn write_variable(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    variable: &VariableIndex,
) -> Result<()> {
    variable.identity.write_to(stream).await?;
    stream.write_u32(variable.coord_index.len() as u32).await?;
    for i in &variable.coord_index {
        stream.write_u32(*i as u32).await?;
    }
    variable.stats.write_to(stream).await?;

    match &variable.content {
        VariableContent::Leaf(leaf) => {
            stream.write_byte(CONTENT_LEAF).await?;
            stream.write_cid(&leaf.cid).await?;
        }
        VariableContent::Composite(members) => {
            stream.write_byte(CONTENT_COMPOSITE).await?;
            stream.write_u32(members.len() as u32).await?;
            for member in members {
                stream.write_u32(member.partition).await?;
                stream.write_u32(member.group).await?;
                stream.write_u32(member.variable).await?;
            }
        }
    }

    Ok(())
}

async fn read_variable(
    stream: &mut (impl AsyncRead + Unpin + Send),
    coordinates: usize,
    partitions: usize,
) -> Result<VariableIndex> {
    let identity = VariableIdentity::read_from(stream).await?;
    let rank = stream.read_u32().await? as usize;
    let mut coord_index = Vec::with_capacity(rank);
    for _ in 0..rank {
        let i = stream.read_u32().await? as usize;
        if i >= coordinates {
            return Err(Error::Corrupt(format!(
                "{identity} refers to coordinate {i} of {coordinates}"
            )));
        }
        coord_index.push(i);
    }
    let stats = GroupStats::read_from(stream).await?;

    let content = match stream.read_byte().await? {
        CONTENT_LEAF => VariableContent::Leaf(LeafRecords::new(stream.read_cid().await?)),
        CONTENT_COMPOSITE => {
            let len = stream.read_u32().await? as usize;
            let mut members = Vec::with_capacity(len);
            for _ in 0..len {
                let member = PartitionMembership {
                    partition: stream.read_u32().await?,
                    group: stream.read_u32().await?,
                    variable: stream.read_u32().await?,
                };
                if member.partition as usize >= partitions {
                    return Err(Error::Corrupt(format!(
                        "{identity} refers to partition {} of {partitions}",
                        member.partition
                    )));
                }
                members.push(member);
            }
            VariableContent::Composite(members)
        }
        tag => return Err(Error::Corrupt(format!("unknown variable content: {tag}"))),
    };

    Ok(VariableIndex {
        identity,
        coord_index,
        stats,
        content,
    })
}

impl Cacheable for Collection {
    fn size(&self) -> u64 {
        let mut size = 256 + self.runtime.len() as u64 * 8;
        if let CollectionKind::Partitioned { partitions, .. } = &self.kind {
            size += partitions.len() as u64 * 96 + self.runtime.len() as u64 * 4;
        }
        for group in &self.groups {
            size += 64;
            for coord in &group.coordinates {
                let cells = match coord {
                    Coordinate::Time2D(time) => time.len() * time.runtimes.len(),
                    _ => coord.len(),
                };
                size += 32 + cells as u64 * 16;
            }
            for variable in &group.variables {
                size += 160 + variable.coord_index.len() as u64 * 8;
                if let VariableContent::Composite(members) = &variable.content {
                    size += members.len() as u64 * 12;
                }
            }
        }

        size
    }
}

#[async_trait]
impl Node for Collection {
    const NODE_TYPE: u8 = node::NODE_COLLECTION;

    async fn save_to(
        &self,
        _resolver: &Arc<Resolver>,
        stream: &mut (impl AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        stream.write_string(&self.name).await?;
        stream.write_byte(self.collection_type as u8).await?;
        self.metadata.write_to(stream).await?;
        self.stats.write_to(stream).await?;
        write_runtime(stream, &self.runtime).await?;

        match &self.kind {
            CollectionKind::Leaf { files } => {
                stream.write_byte(KIND_LEAF).await?;
                stream.write_u32(files.len() as u32).await?;
                for file in files {
                    stream.write_string(file).await?;
                }
            }
            CollectionKind::Partitioned {
                partitions,
                run_to_partition,
            } => {
                stream.write_byte(KIND_PARTITIONED).await?;
                stream.write_u32(partitions.len() as u32).await?;
                for partition in partitions {
                    partition.write_to(stream).await?;
                }
                stream.write_u32(run_to_partition.len() as u32).await?;
                for partition in run_to_partition {
                    stream.write_u32(*partition).await?;
                }
            }
        }

        stream.write_u32(self.groups.len() as u32).await?;
        for group in &self.groups {
            stream.write_u64(group.grid_hash).await?;
            group.stats.write_to(stream).await?;
            stream.write_u32(group.coordinates.len() as u32).await?;
            for coord in &group.coordinates {
                coord.write_to(stream).await?;
            }
            stream.write_u32(group.variables.len() as u32).await?;
            for variable in &group.variables {
                write_variable(stream, variable).await?;
            }
        }

        Ok(())
    }

    async fn load_from(
        resolver: &Arc<Resolver>,
        stream: &mut (impl AsyncRead + Unpin + Send),
    ) -> Result<Self> {
        let name = stream.read_string().await?;
        let collection_type = CollectionType::try_from(stream.read_byte().await?)?;
        let metadata = Metadata::read_from(stream).await?;
        let stats = GroupStats::read_from(stream).await?;
        let runtime = read_runtime(stream).await?;

        let kind = match stream.read_byte().await? {
            KIND_LEAF => {
                let len = stream.read_u32().await? as usize;
                let mut files = Vec::with_capacity(len);
                for _ in 0..len {
                    files.push(Arc::from(stream.read_string().await?));
                }
                CollectionKind::Leaf { files }
            }
            KIND_PARTITIONED => {
                let len = stream.read_u32().await? as usize;
                let mut partitions = Vec::with_capacity(len);
                for _ in 0..len {
                    partitions.push(Partition::read_from(stream).await?);
                }
                let len = stream.read_u32().await? as usize;
                if len != runtime.len() {
                    return Err(Error::Corrupt(format!(
                        "{len} runtime owners for {} runtimes",
                        runtime.len()
                    )));
                }
                let mut run_to_partition = Vec::with_capacity(len);
                for _ in 0..len {
                    let partition = stream.read_u32().await?;
                    if partition as usize >= partitions.len() {
                        return Err(Error::Corrupt(format!("no partition {partition}")));
                    }
                    run_to_partition.push(partition);
                }
                CollectionKind::Partitioned {
                    partitions,
                    run_to_partition,
                }
            }
            tag => return Err(Error::Corrupt(format!("unknown collection kind: {tag}"))),
        };
        let partitions = match &kind {
            CollectionKind::Partitioned { partitions, .. } => partitions.len(),
            CollectionKind::Leaf { .. } => 0,
        };

        let len = stream.read_u32().await? as usize;
        let mut groups = Vec::with_capacity(len);
        for _ in 0..len {
            let grid_hash = stream.read_u64().await?;
            let group_stats = GroupStats::read_from(stream).await?;
            let n_coords = stream.read_u32().await? as usize;
            let mut coordinates = Vec::with_capacity(n_coords);
            for _ in 0..n_coords {
                coordinates.push(Coordinate::read_from(stream).await?);
            }
            let n_vars = stream.read_u32().await? as usize;
            let mut variables = Vec::with_capacity(n_vars);
            for _ in 0..n_vars {
                variables.push(read_variable(stream, n_coords, partitions).await?);
            }
            groups.push(Group::new(grid_hash, coordinates, variables, group_stats));
        }

        Ok(Collection::new(
            name,
            collection_type,
            metadata,
            runtime,
            groups,
            kind,
            stats,
            resolver,
        ))
    }

    fn ls(&self) -> Vec<(String, Cid)> {
        match &self.kind {
            CollectionKind::Leaf { .. } => self
                .groups
                .iter()
                .flat_map(|group| {
                    let group_name = group.name();
                    group.variables.iter().filter_map(move |variable| {
                        variable
                            .records_cid()
                            .map(|cid| (format!("{group_name}/{}", variable.identity), *cid))
                    })
                })
                .collect(),
            CollectionKind::Partitioned { partitions, .. } => partitions
                .iter()
                .map(|partition| (partition.name.clone(), partition.cid))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::{LevelSpec, RecordList},
        testing::{self, MemoryMapper},
    };

    async fn load(mapper: &MemoryMapper, cid: &Cid) -> Result<Arc<Collection>> {
        testing::resolver_for(mapper.clone()).get_collection(cid).await
    }

    fn two_variables() -> RecordList {
        let mut records = testing::grid(&[0, 1], &[0, 3, 6], 0);
        records.extend(testing::grid(&[0, 1], &[3, 6], 1));
        let mut high = testing::record(1, 6, 1, 42);
        high.level = LevelSpec::new(100, 50000.0);
        records.push(high);

        testing::source(records)
    }

    #[tokio::test]
    async fn round_trip() -> Result<()> {
        let mapper = MemoryMapper::new();
        let resolver = testing::resolver_for(mapper.clone());
        let source = two_variables();
        let config = Config::default();
        let cid = Collection::build("test", &source, &config, &resolver).await?;

        let collection = load(&mapper, &cid).await?;
        assert_eq!(collection.name, "test");
        assert_eq!(collection.cid, Some(cid));
        assert_eq!(collection.metadata.center, 7);
        assert_eq!(collection.files().unwrap(), &[Arc::<str>::from("test.grib2")][..]);
        assert_eq!(collection.groups.len(), 1);

        let group = &collection.groups[0];
        assert_eq!(group.name(), "0000000000000001");
        assert_eq!(group.coordinates.len(), 3);
        assert_eq!(group.coordinate_names(), vec!["reftime", "time", "isobaric"]);
        assert_eq!(group.variables.len(), 2);
        assert_eq!(group.stats.total, 11);
        assert_eq!(group.stats.used, 11);

        // Every record is where its coordinate values say it is
        for record in &source.records {
            let identity = VariableIdentity::of(record, &config);
            let v = group.variable(&identity).unwrap();
            let coords = collection.coordinates_of(0, v)?;
            let run = CoordValue::Runtime(record.runtime);
            let hour = match record.time {
                crate::record::TimeSpec::Point(hour) => hour as i64 * 3600,
                _ => unreachable!(),
            };
            let level = match coords[2].value(0) {
                Some(CoordValue::Vertical(level)) if level.value1 == record.level.value1 => 0,
                _ => 1,
            };
            let index = vec![
                coords[0].index_of(&run).unwrap(),
                coords[1]
                    .index_in_run(Some(&record.runtime), &CoordValue::Time(hour))
                    .unwrap(),
                level,
            ];
            let found = collection.lookup(0, v, &index).await?.unwrap();
            assert_eq!(found.locator, record.locator);
            assert_eq!(&*found.path, "test.grib2");
        }

        Ok(())
    }

    #[tokio::test]
    async fn saved_form_is_stable() -> Result<()> {
        let mapper = MemoryMapper::new();
        let resolver = testing::resolver_for(mapper.clone());
        let cid = Collection::build("test", &two_variables(), &Config::default(), &resolver).await?;

        // Saving a loaded collection gives back the same object
        let collection = load(&mapper, &cid).await?;
        assert_eq!(resolver.save(&*collection).await?, cid);

        Ok(())
    }

    #[tokio::test]
    async fn collection_types() -> Result<()> {
        let resolver = testing::resolver();
        let config = Config::default();

        let single = testing::source(testing::grid(&[0], &[0, 3], 0));
        let cid = Collection::build("single", &single, &config, &resolver).await?;
        assert_eq!(
            resolver.get_collection(&cid).await?.collection_type,
            CollectionType::SingleRuntime
        );

        // Runs are 12 hours apart
        let unique = testing::source(testing::grid(&[0, 1], &[0, 6], 0));
        let cid = Collection::build("unique", &unique, &config, &resolver).await?;
        assert_eq!(
            resolver.get_collection(&cid).await?.collection_type,
            CollectionType::MultipleRuntimesUniqueTimes
        );

        let overlapping = testing::source(testing::grid(&[0, 1], &[0, 12], 0));
        let cid = Collection::build("overlapping", &overlapping, &config, &resolver).await?;
        assert_eq!(
            resolver.get_collection(&cid).await?.collection_type,
            CollectionType::MultipleRuntimes
        );

        Ok(())
    }

    #[tokio::test]
    async fn groups_by_grid() -> Result<()> {
        let resolver = testing::resolver();
        let mut records = testing::grid(&[0], &[0, 3], 0);
        let mut other = testing::grid(&[0, 1], &[0], 0);
        for record in other.iter_mut() {
            record.grid_hash = 2;
        }
        records.extend(other);

        let source = testing::source(records);
        let cid = Collection::build("grids", &source, &Config::default(), &resolver).await?;
        let collection = resolver.get_collection(&cid).await?;
        assert_eq!(collection.groups.len(), 2);
        assert_eq!(collection.group(2), Some(1));
        assert_eq!(collection.runtime.len(), 2);
        assert_eq!(collection.stats.used, 4);

        Ok(())
    }

    #[tokio::test]
    async fn nothing_stored_on_failure() -> Result<()> {
        let mapper = MemoryMapper::new();
        let resolver = testing::resolver_for(mapper.clone());

        let mut records = testing::grid(&[0], &[0], 0);
        let mut bad = testing::record(0, 3, 1, 99);
        bad.grid_hash = 2;
        bad.time_unit = 200;
        records.push(bad);

        let source = testing::source(records);
        let result = Collection::build("bad", &source, &Config::default(), &resolver).await;
        assert!(matches!(result, Err(Error::EmptyGroup { grid_hash: 2 })));
        assert_eq!(mapper.len(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn no_records() {
        let resolver = testing::resolver();
        let source = testing::source(vec![]);
        let result = Collection::build("empty", &source, &Config::default(), &resolver).await;
        assert!(matches!(result, Err(Error::NoRecords)));
    }

    #[tokio::test]
    async fn unknown_file_is_dropped() -> Result<()> {
        let resolver = testing::resolver();
        let mut records = testing::grid(&[0], &[0], 0);
        let mut stray = testing::record(0, 3, 0, 99);
        stray.locator.file = 3;
        records.push(stray);

        let source = testing::source(records);
        let cid = Collection::build("stray", &source, &Config::default(), &resolver).await?;
        let collection = resolver.get_collection(&cid).await?;
        assert_eq!(collection.stats.rejected, 1);
        assert_eq!(collection.stats.used, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_ls() -> Result<()> {
        let resolver = testing::resolver();
        let cid = Collection::build("test", &two_variables(), &Config::default(), &resolver).await?;

        let ls = resolver.ls(&cid).await?;
        assert_eq!(ls.len(), 2);
        assert!(ls[0].name.starts_with("0000000000000001/VAR_0-0-0_L100"));
        assert_eq!(ls[0].node_type, Some("Records"));

        Ok(())
    }
}
