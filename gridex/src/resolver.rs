use std::sync::Arc;

use cid::Cid;
use futures::{io::AsyncRead, FutureExt};

use crate::{
    cache::{Cache, Cacheable},
    collection::Collection,
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite},
    mapper::Mapper,
    node::{self, Node},
    sparse::Records,
};

const MAGIC_NUMBER: u16 = 0x6E63;

/// Version of the container format written by this library
pub const FORMAT_VERSION: u32 = 3;

/// Oldest container format this library can still read
pub const MIN_FORMAT_VERSION: u32 = 2;

/// The `Resolver` manages storage and retrieval of index objects.
///
/// To store and load objects, a Resolver must be provided with a concrete `Mapper` implementation.
/// Loaded objects are kept in RAM in an LRU cache up to a specified size limit, for fast
/// re-retrieval of recently used objects.
///
pub struct Resolver {
    mapper: Box<dyn Mapper>,
    cache: Cache<Cid, CacheItem>,
}

enum CacheItem {
    Collection(Arc<Collection>),
    Records(Arc<Records>),
}

impl CacheItem {
    fn ls(&self) -> Vec<(String, Cid)> {
        match self {
            CacheItem::Collection(collection) => collection.ls(),
            CacheItem::Records(records) => records.ls(),
        }
    }
}

impl Cacheable for CacheItem {
    fn size(&self) -> u64 {
        match self {
            CacheItem::Collection(collection) => collection.size(),
            CacheItem::Records(records) => records.size(),
        }
    }
}

impl Resolver {
    /// Create a new `Resolver`
    ///
    /// # Arguments
    ///
    /// * `mapper` - A boxed implementation of `Mapper`, which handles writing to and reading from
    ///   the underlying data store.
    /// * `cache_bytes` - The size limit, in bytes, for the LRU cache used by the resolver to hold
    ///   recently used objects in RAM.
    ///
    pub fn new(mapper: Box<dyn Mapper>, cache_bytes: u64) -> Self {
        let cache = Cache::new(cache_bytes);
        Self { mapper, cache }
    }

    /// Get a `Collection` from the store.
    ///
    /// # Arguments
    ///
    /// * `cid` - The CID of the collection to retrieve.
    ///
    pub async fn get_collection(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<Collection>> {
        match &*self.check_cache(cid).await? {
            CacheItem::Collection(collection) => Ok(Arc::clone(collection)),
            _ => Err(Error::Corrupt(format!("{cid} is not a collection"))),
        }
    }

    /// Get the records of a leaf variable from the store.
    ///
    pub(crate) async fn get_records(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<Records>> {
        match &*self.check_cache(cid).await? {
            CacheItem::Records(records) => Ok(Arc::clone(records)),
            _ => Err(Error::Corrupt(format!("{cid} is not a records table"))),
        }
    }

    async fn check_cache(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<CacheItem>> {
        let resolver = Arc::clone(self);
        let load = |cid: Cid| async move { resolver.retrieve(cid).await }.boxed();
        self.cache.get(cid, load).await
    }

    /// Store a node
    ///
    pub(crate) async fn save<O>(self: &Arc<Resolver>, node: &O) -> Result<Cid>
    where
        O: Node + Sync,
    {
        let mut stream = self.mapper.store().await?;
        stream.write_u16(MAGIC_NUMBER).await?;
        stream.write_u32(FORMAT_VERSION).await?;
        stream.write_byte(O::NODE_TYPE).await?;

        node.save_to(self, &mut stream).await?;

        Ok(stream.finish().await?)
    }

    /// Retrieve a node
    ///
    async fn retrieve(self: &Arc<Resolver>, cid: Cid) -> Result<CacheItem> {
        let mut stream = self.mapper.load(&cid).await?.ok_or(Error::NotFound(cid))?;
        let node_type = self.read_header(&cid, &mut stream).await?;
        let item = match node_type {
            node::NODE_COLLECTION => {
                let mut collection = Collection::load_from(self, &mut stream).await?;
                collection.cid = Some(cid);
                CacheItem::Collection(Arc::new(collection))
            }
            node::NODE_RECORDS => {
                CacheItem::Records(Arc::new(Records::load_from(self, &mut stream).await?))
            }
            _ => return Err(Error::UnknownNodeType(node_type)),
        };

        Ok(item)
    }

    /// Check the header of a stored object and return its node type.
    ///
    /// Objects written by an older, incompatible version of the format are rejected with
    /// `Error::ObsoleteVersion`. Other version differences are read on a best effort basis.
    ///
    async fn read_header(
        &self,
        cid: &Cid,
        stream: &mut (impl AsyncRead + Unpin + Send),
    ) -> Result<u8> {
        let magic_number = stream.read_u16().await?;
        if magic_number != MAGIC_NUMBER {
            return Err(Error::BadMagic);
        }

        let version = stream.read_u32().await?;
        if version < MIN_FORMAT_VERSION {
            return Err(Error::ObsoleteVersion {
                found: version,
                minimum: MIN_FORMAT_VERSION,
            });
        }
        if version != FORMAT_VERSION {
            log::warn!(
                "{cid} has format version {version}, expecting {FORMAT_VERSION}: reading anyway"
            );
        }

        Ok(stream.read_byte().await?)
    }

    /// List the objects referenced by an object
    ///
    pub async fn ls(self: &Arc<Resolver>, cid: &Cid) -> Result<Vec<LsEntry>> {
        let object = self.check_cache(cid).await?;
        let mut ls = Vec::new();
        for (name, cid) in object.ls() {
            let node_type = self.node_type_of(&cid).await?;
            let size = self.mapper.size_of(&cid).await?;
            ls.push(LsEntry {
                cid,
                name,
                node_type,
                size,
            });
        }

        Ok(ls)
    }

    async fn node_type_of(&self, cid: &Cid) -> Result<Option<&'static str>> {
        match self.mapper.load(cid).await? {
            None => Ok(None),
            Some(mut stream) => {
                let code = self.read_header(cid, &mut stream).await?;
                Ok(node::type_name(code))
            }
        }
    }
}

pub struct LsEntry {
    pub cid: Cid,
    pub name: String,
    pub node_type: Option<&'static str>,
    pub size: Option<u64>,
}
