//! Filesystem storage for gridex collection indexes.
//!
//! `FsMapper` implements the `gridex::Mapper` interface over a directory, storing each object in
//! a file named by its CID. `FsCatalog` adds named heads on top of that, so collections can be
//! found by name, and rebuilds a collection's index when it is missing or was written by an
//! incompatible version of the format.
//!
use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use async_trait::async_trait;
use cid::{multihash::MultihashGeneric, Cid};
use futures::{
    io::{AllowStdIo, AsyncRead, AsyncWrite},
    task::{Context, Poll},
};
use multihash::{Hasher, Sha2_256};
use tempfile::NamedTempFile;

use gridex::{
    Collection, Config, Error, Mapper, ReadSeek, RecordSource, RecordStore, Resolver, Result,
    StoreWrite,
};

/// The SHA_256 multicodec code
const SHA2_256: u64 = 0x12;

const OBJECTS: &str = "objects";
const HEADS: &str = "heads";
const CONFIG: &str = "config.json";

/// A `Mapper` that stores objects as files in a directory.
///
/// Objects are first written to a temporary file in the same directory, which is moved into place
/// once the object is complete. An object that isn't finished, because of an error or a crash,
/// never appears in the store.
///
pub struct FsMapper {
    root: PathBuf,
}

impl FsMapper {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS))?;

        Ok(Self { root })
    }

    fn objects(&self) -> PathBuf {
        self.root.join(OBJECTS)
    }

    fn path_for(&self, cid: &Cid) -> PathBuf {
        self.objects().join(cid.to_string())
    }
}

#[async_trait]
impl Mapper for FsMapper {
    async fn store(&self) -> io::Result<Box<dyn StoreWrite + '_>> {
        let file = NamedTempFile::new_in(self.objects())?;

        Ok(Box::new(FsStoreWrite {
            mapper: self,
            file: AllowStdIo::new(file),
            hash: Sha2_256::default(),
        }))
    }

    async fn load(&self, cid: &Cid) -> io::Result<Option<Box<dyn AsyncRead + Unpin + Send + '_>>> {
        match File::open(self.path_for(cid)) {
            Ok(file) => Ok(Some(Box::new(AllowStdIo::new(BufReader::new(file))))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn size_of(&self, cid: &Cid) -> io::Result<Option<u64>> {
        match fs::metadata(self.path_for(cid)) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

struct FsStoreWrite<'a> {
    mapper: &'a FsMapper,
    file: AllowStdIo<NamedTempFile>,
    hash: Sha2_256,
}

impl<'a> AsyncWrite for FsStoreWrite<'a> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(len)) = result {
            self.hash.update(&buf[..len]);
        }

        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_close(cx)
    }
}

#[async_trait]
impl<'a> StoreWrite for FsStoreWrite<'a> {
    async fn finish(self: Box<Self>) -> io::Result<Cid> {
        let FsStoreWrite {
            mapper,
            file,
            mut hash,
        } = *self;
        let hash = MultihashGeneric::wrap(SHA2_256, hash.finalize())
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let cid = Cid::new_v1(SHA2_256, hash);

        let mut file = file.into_inner();
        file.flush()?;
        file.persist(mapper.path_for(&cid)).map_err(|err| err.error)?;

        Ok(cid)
    }
}

/// Write a small file so that readers see either the old contents or the new, never a mix
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.persist(path).map_err(|err| err.error)?;

    Ok(())
}

fn check_name(name: &str) -> io::Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(|c: char| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid collection name: {name:?}"),
        ));
    }

    Ok(())
}

/// Named collection indexes stored in a directory.
///
/// The directory holds the object store, one head file per collection giving the CID of its
/// current index, and optionally a `config.json` with the build configuration.
///
pub struct FsCatalog {
    root: PathBuf,
    config: Config,
    resolver: Arc<Resolver>,
}

impl FsCatalog {
    /// Open a catalog, creating its directory if needed.
    ///
    /// If the directory contains a `config.json` it is used as the configuration, otherwise the
    /// default configuration is used.
    ///
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = match File::open(root.join(CONFIG)) {
            Ok(file) => Config::from_json(BufReader::new(file))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(err) => return Err(err.into()),
        };

        Self::with_config(root, config)
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        let mapper = FsMapper::new(&root)?;
        fs::create_dir_all(root.join(HEADS))?;
        let resolver = Arc::new(Resolver::new(Box::new(mapper), config.cache_bytes));

        Ok(Self {
            root,
            config,
            resolver,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// The CID of a collection's current index, if there is one
    pub fn head(&self, name: &str) -> Result<Option<Cid>> {
        check_name(name)?;
        let mut file = match File::open(self.root.join(HEADS).join(name)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut head = String::new();
        file.read_to_string(&mut head)?;

        Ok(Some(Cid::try_from(head.trim())?))
    }

    pub fn set_head(&self, name: &str, cid: &Cid) -> Result<()> {
        check_name(name)?;
        write_atomic(&self.root.join(HEADS).join(name), cid.to_string().as_bytes())?;

        Ok(())
    }

    /// Open a collection by name.
    ///
    /// Returns `Ok(None)` if the collection has no index, or if its index can't be used by this
    /// version of the library and needs to be rebuilt.
    ///
    pub async fn open(&self, name: &str) -> Result<Option<Arc<Collection>>> {
        let cid = match self.head(name)? {
            Some(cid) => cid,
            None => return Ok(None),
        };

        match self.resolver.get_collection(&cid).await {
            Ok(collection) => Ok(Some(collection)),
            Err(Error::ObsoleteVersion { found, minimum }) => {
                log::info!(
                    "index of {name} has format version {found}, oldest supported is {minimum}: \
                    needs rebuild"
                );
                Ok(None)
            }
            Err(Error::NotFound(cid)) => {
                log::warn!("index {cid} of {name} is missing from the store: needs rebuild");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Open a leaf collection by name, building its index from `source` if needed
    pub async fn open_or_build(
        &self,
        name: &str,
        source: &dyn RecordSource,
    ) -> Result<Arc<Collection>> {
        if let Some(collection) = self.open(name).await? {
            return Ok(collection);
        }

        log::info!("building index of {name}");
        let cid = Collection::build(name, source, &self.config, &self.resolver).await?;
        self.set_head(name, &cid)?;

        self.resolver.get_collection(&cid).await
    }

    /// Open a partitioned collection by name, building its index from the named child collections
    /// if needed.
    ///
    /// The index is also rebuilt if any child's index has changed since it was built. Children
    /// must already have indexes.
    ///
    pub async fn open_or_build_partitioned(
        &self,
        name: &str,
        children: &[&str],
    ) -> Result<Arc<Collection>> {
        let mut heads = Vec::with_capacity(children.len());
        for child in children {
            let cid = self.head(child)?.ok_or_else(|| {
                Error::IO(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("partition {child} of {name} has no index"),
                ))
            })?;
            heads.push((String::from(*child), cid));
        }

        if let Some(collection) = self.open(name).await? {
            let mut built: Vec<(&str, &Cid)> = collection
                .partitions()
                .iter()
                .map(|partition| (partition.name.as_str(), &partition.cid))
                .collect();
            let mut current: Vec<(&str, &Cid)> =
                heads.iter().map(|(name, cid)| (name.as_str(), cid)).collect();
            built.sort();
            current.sort();
            if built == current {
                return Ok(collection);
            }
            log::info!("partitions of {name} have changed: needs rebuild");
        }

        log::info!("building index of {name} from {} partitions", heads.len());
        let cid = Collection::build_partitioned(name, &heads, &self.config, &self.resolver).await?;
        self.set_head(name, &cid)?;

        self.resolver.get_collection(&cid).await
    }
}

/// Opens record files relative to a base directory
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RecordStore for FsRecordStore {
    fn open(&self, path: &str) -> Result<Box<dyn ReadSeek + '_>> {
        let file = File::open(self.root.join(path))?;

        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Seek, SeekFrom};

    use chrono::{Duration, TimeZone, Utc};
    use futures::AsyncReadExt;
    use futures::AsyncWriteExt;
    use tempfile::tempdir;

    use gridex::{
        read_records, CoordValue, Decoder, Instant, LevelSpec, RecordDescriptor, RecordList,
        RecordLocator, TimeSpec, MIN_FORMAT_VERSION,
    };

    fn runtime(run: usize) -> Instant {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(12 * run as i64)
    }

    fn record(run: usize, hour: i32, offset: u64) -> RecordDescriptor {
        RecordDescriptor {
            center: 7,
            subcenter: 0,
            master_table: 2,
            local_table: 1,
            generating_process: 2,
            discipline: 0,
            category: 0,
            parameter: 0,
            runtime_significance: 1,
            runtime: runtime(run),
            time_unit: 1,
            time: TimeSpec::Point(hour),
            level: LevelSpec::new(1, 0.0),
            ensemble: None,
            probability: None,
            percentile: None,
            grid_hash: 1,
            locator: RecordLocator::new(0, offset),
        }
    }

    fn source(file: &str, runs: &[usize], hours: &[i32]) -> RecordList {
        let mut records = vec![];
        for run in runs {
            for hour in hours {
                records.push(record(*run, *hour, (*run * 16 + *hour as usize) as u64));
            }
        }

        RecordList {
            files: vec![String::from(file)],
            records,
        }
    }

    #[tokio::test]
    async fn store_and_load() -> io::Result<()> {
        let dir = tempdir()?;
        let mapper = FsMapper::new(dir.path())?;

        let mut stream = mapper.store().await?;
        stream.write_all(b"Hi mom!").await?;
        let cid = stream.finish().await?;

        let mut stream = mapper.store().await?;
        stream.write_all(b"Hi mom!").await?;
        assert_eq!(stream.finish().await?, cid);

        let mut contents = String::new();
        let mut stream = mapper.load(&cid).await?.unwrap();
        stream.read_to_string(&mut contents).await?;
        assert_eq!(contents, "Hi mom!");
        assert_eq!(mapper.size_of(&cid).await?, Some(7));

        // Only the finished object is in the store
        assert_eq!(fs::read_dir(dir.path().join(OBJECTS))?.count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn unfinished_objects_disappear() -> io::Result<()> {
        let dir = tempdir()?;
        let mapper = FsMapper::new(dir.path())?;

        let mut stream = mapper.store().await?;
        stream.write_all(b"never finished").await?;
        drop(stream);

        assert_eq!(fs::read_dir(dir.path().join(OBJECTS))?.count(), 0);

        let elsewhere = tempdir()?;
        let other = FsMapper::new(elsewhere.path())?;
        let mut stream = other.store().await?;
        stream.write_all(b"somewhere else").await?;
        let missing = stream.finish().await?;

        assert!(mapper.load(&missing).await?.is_none());
        assert_eq!(mapper.size_of(&missing).await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn open_or_build() -> Result<()> {
        let dir = tempdir()?;
        let catalog = FsCatalog::new(dir.path())?;
        assert!(catalog.open("a").await?.is_none());

        let a = catalog
            .open_or_build("a", &source("a.grib2", &[0, 1], &[0, 3]))
            .await?;
        let cid = catalog.head("a")?.unwrap();
        assert_eq!(a.cid, Some(cid));

        // A second catalog over the same directory finds the index without building
        let catalog = FsCatalog::new(dir.path())?;
        let a = catalog
            .open_or_build("a", &source("a.grib2", &[0], &[0]))
            .await?;
        assert_eq!(a.cid, Some(cid));
        assert_eq!(a.runtime.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn missing_index_is_rebuilt() -> Result<()> {
        let dir = tempdir()?;
        let catalog = FsCatalog::new(dir.path())?;
        catalog
            .open_or_build("a", &source("a.grib2", &[0], &[0]))
            .await?;
        let cid = catalog.head("a")?.unwrap();
        fs::remove_file(dir.path().join(OBJECTS).join(cid.to_string()))?;

        let catalog = FsCatalog::new(dir.path())?;
        let a = catalog
            .open_or_build("a", &source("a.grib2", &[0], &[0]))
            .await?;
        assert_eq!(a.cid, Some(cid));
        assert!(dir.path().join(OBJECTS).join(cid.to_string()).exists());

        Ok(())
    }

    #[tokio::test]
    async fn obsolete_index_is_rebuilt() -> Result<()> {
        let dir = tempdir()?;
        let catalog = FsCatalog::new(dir.path())?;

        // An index written by a version of the format that is no longer readable
        let mapper = FsMapper::new(dir.path())?;
        let mut stream = mapper.store().await?;
        stream.write_all(&0x6E63_u16.to_be_bytes()).await?;
        stream
            .write_all(&(MIN_FORMAT_VERSION - 1).to_be_bytes())
            .await?;
        stream.write_all(&[0]).await?;
        let obsolete = stream.finish().await?;
        catalog.set_head("a", &obsolete)?;

        assert!(catalog.open("a").await?.is_none());
        let a = catalog
            .open_or_build("a", &source("a.grib2", &[0, 1], &[0, 3]))
            .await?;
        assert_ne!(a.cid, Some(obsolete));
        assert_eq!(catalog.head("a")?, a.cid);
        assert_eq!(a.runtime.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn partitioned() -> Result<()> {
        let dir = tempdir()?;
        let catalog = FsCatalog::new(dir.path())?;
        catalog
            .open_or_build("a", &source("a.grib2", &[0, 1], &[0, 3]))
            .await?;
        catalog
            .open_or_build("b", &source("b.grib2", &[2], &[0, 3]))
            .await?;

        let ab = catalog.open_or_build_partitioned("ab", &["a", "b"]).await?;
        assert_eq!(ab.partitions().len(), 2);
        let first = ab.cid;

        let coords = ab.coordinates_of(0, 0)?;
        let run = runtime(2);
        let index = vec![
            coords[0].index_of(&CoordValue::Runtime(run)).unwrap(),
            coords[1]
                .index_in_run(Some(&run), &CoordValue::Time(3 * 3600))
                .unwrap(),
        ];
        let found = ab.lookup(0, 0, &index).await?.unwrap();
        assert_eq!(&*found.path, "b.grib2");
        assert_eq!(found.locator.offset, 35);

        // Unchanged partitions, unchanged index
        let ab = catalog.open_or_build_partitioned("ab", &["a", "b"]).await?;
        assert_eq!(ab.cid, first);

        // A rebuilt partition means a rebuilt index
        fs::remove_file(dir.path().join(HEADS).join("b"))?;
        catalog
            .open_or_build("b", &source("b.grib2", &[2, 3], &[0, 3]))
            .await?;
        let ab = catalog.open_or_build_partitioned("ab", &["a", "b"]).await?;
        assert_ne!(ab.cid, first);
        assert_eq!(ab.runtime.len(), 4);

        assert!(matches!(
            catalog.open_or_build_partitioned("abc", &["a", "b", "c"]).await,
            Err(Error::IO(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn config_file() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join(CONFIG),
            r#"{"union_runtime_coords": true, "cache_bytes": 1024}"#,
        )?;

        let catalog = FsCatalog::new(dir.path())?;
        assert!(catalog.config().union_runtime_coords);
        assert_eq!(catalog.config().cache_bytes, 1024);

        fs::write(dir.path().join(CONFIG), "not json")?;
        assert!(matches!(FsCatalog::new(dir.path()), Err(Error::Config(_))));

        Ok(())
    }

    #[test]
    fn bad_names() -> Result<()> {
        let dir = tempdir()?;
        let catalog = FsCatalog::new(dir.path())?;
        for name in ["", "../a", ".hidden", "a/b"] {
            assert!(matches!(catalog.head(name), Err(Error::IO(_))));
        }

        Ok(())
    }

    struct ByteDecoder;

    impl Decoder for ByteDecoder {
        fn decode(
            &self,
            file: &mut dyn ReadSeek,
            locator: &RecordLocator,
        ) -> Result<ndarray::Array2<f32>> {
            file.seek(SeekFrom::Start(locator.offset))?;
            let mut byte = [0; 1];
            file.read_exact(&mut byte)?;

            Ok(ndarray::Array2::from_elem((1, 1), byte[0] as f32))
        }
    }

    #[tokio::test]
    async fn read_through_catalog() -> Result<()> {
        let dir = tempdir()?;
        let data: Vec<u8> = (0..64).collect();
        fs::write(dir.path().join("a.grib2"), &data)?;

        let catalog = FsCatalog::new(dir.path().join("index"))?;
        let a = catalog
            .open_or_build("a", &source("a.grib2", &[0, 1], &[0, 3]))
            .await?;
        let mut requests = vec![];
        for run in 0..2 {
            for hour in 0..2 {
                requests.push(a.lookup(0, 0, &[run, hour]).await?.unwrap());
            }
        }

        let store = FsRecordStore::new(dir.path());
        let values: Vec<f32> = read_records(&store, &ByteDecoder, &requests)
            .into_iter()
            .map(|result| result.map(|array| array[[0, 0]]))
            .collect::<Result<_>>()?;
        assert_eq!(values, vec![0.0, 3.0, 16.0, 19.0]);

        Ok(())
    }
}
