use std::{
    collections::HashMap,
    io::{self, Write},
    mem,
    pin::Pin,
    result,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use cid::{multihash::MultihashGeneric, Cid};
use futures::{
    io::{AsyncRead, AsyncWrite, Cursor, Error as AioError},
    task::{Context, Poll},
};
use multihash::{Hasher, Sha2_256};
use parking_lot::Mutex;

use crate::{
    mapper::{Mapper, StoreWrite},
    record::{LevelSpec, RecordDescriptor, RecordList, RecordLocator, TimeSpec},
    resolver::Resolver,
    time::Instant,
};

pub(crate) type AioResult<T> = result::Result<T, AioError>;

/// The SHA_256 multicodec code
const SHA2_256: u64 = 0x12;

/// A test implementation of Mapper that stores objects in RAM.
///
/// Clones share the same store, so several resolvers can be pointed at it.
///
#[derive(Clone, Default)]
pub(crate) struct MemoryMapper {
    objects: Arc<Mutex<HashMap<Cid, Vec<u8>>>>,
    loads: Arc<AtomicUsize>,
}

impl MemoryMapper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of times an object has been loaded from this store
    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of objects in the store
    pub(crate) fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Make an object disappear from the store
    pub(crate) fn remove(&self, cid: &Cid) {
        self.objects.lock().remove(cid);
    }
}

#[async_trait]
impl Mapper for MemoryMapper {
    async fn store(&self) -> io::Result<Box<dyn StoreWrite + '_>> {
        Ok(Box::new(MemoryMapperStoreWrite::new(self)))
    }

    async fn load(&self, cid: &Cid) -> io::Result<Option<Box<dyn AsyncRead + Unpin + Send + '_>>> {
        let objects = self.objects.lock();
        Ok(objects.get(cid).map(|object| {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Box::new(Cursor::new(object.clone())) as Box<dyn AsyncRead + Unpin + Send>
        }))
    }

    async fn size_of(&self, cid: &Cid) -> io::Result<Option<u64>> {
        let objects = self.objects.lock();
        Ok(objects.get(cid).map(|object| object.len() as u64))
    }
}

struct MemoryMapperStoreWrite<'a> {
    mapper: &'a MemoryMapper,
    buffer: Vec<u8>,
    hash: Sha2_256,
}

impl<'a> MemoryMapperStoreWrite<'a> {
    fn new(mapper: &'a MemoryMapper) -> Self {
        Self {
            mapper,
            buffer: Vec::new(),
            hash: Sha2_256::default(),
        }
    }
}

impl<'a> AsyncWrite for MemoryMapperStoreWrite<'a> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<AioResult<usize>> {
        let result = self.buffer.write(buf);
        if let Ok(len) = result {
            self.hash.update(&buf[..len]);
        }

        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<AioResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<AioResult<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl<'a> StoreWrite for MemoryMapperStoreWrite<'a> {
    async fn finish(mut self: Box<Self>) -> io::Result<Cid> {
        let object = mem::take(&mut self.buffer);
        let digest = self.hash.finalize();
        let hash = MultihashGeneric::wrap(SHA2_256, digest)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let cid = Cid::new_v1(SHA2_256, hash);
        self.mapper.objects.lock().insert(cid, object);

        Ok(cid)
    }
}

pub(crate) fn cid_for(data: &str) -> Cid {
    let mut hash = Sha2_256::default();
    hash.update(data.as_bytes());

    let digest = hash.finalize();
    let hash = MultihashGeneric::wrap(SHA2_256, digest).expect("a sha2-256 digest always fits");

    Cid::new_v1(SHA2_256, hash)
}

pub(crate) fn resolver() -> Arc<Resolver> {
    resolver_for(MemoryMapper::new())
}

pub(crate) fn resolver_for(mapper: MemoryMapper) -> Arc<Resolver> {
    Arc::new(Resolver::new(Box::new(mapper), 1 << 20))
}

/// Reference times for test records, twelve hours apart starting 2024-01-01T00:00Z
pub(crate) fn runtime(run: usize) -> Instant {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(12 * run as i64)
}

/// A record of temperature-like parameter `parameter` on the 850 hPa surface.
///
/// `hour` is the forecast offset from `runtime(run)`, and `offset` the record's position in file 0.
///
pub(crate) fn record(run: usize, hour: i32, parameter: u8, offset: u64) -> RecordDescriptor {
    RecordDescriptor {
        center: 7,
        subcenter: 0,
        master_table: 2,
        local_table: 1,
        generating_process: 2,
        discipline: 0,
        category: 0,
        parameter,
        runtime_significance: 1,
        runtime: runtime(run),
        time_unit: 1,
        time: TimeSpec::Point(hour),
        level: LevelSpec::new(100, 85000.0),
        ensemble: None,
        probability: None,
        percentile: None,
        grid_hash: 1,
        locator: RecordLocator::new(0, offset),
    }
}

/// Records for `runs` × `hours` of a single variable, with distinct offsets
pub(crate) fn grid(runs: &[usize], hours: &[i32], parameter: u8) -> Vec<RecordDescriptor> {
    let mut records = vec![];
    for run in runs {
        for hour in hours {
            let offset = (*run as u64) * 1_000_000 + (*hour as u64) * 1000 + parameter as u64;
            records.push(record(*run, *hour, parameter, offset));
        }
    }

    records
}

pub(crate) fn source(records: Vec<RecordDescriptor>) -> RecordList {
    RecordList {
        files: vec![String::from("test.grib2")],
        records,
    }
}
