use std::{mem, sync::Arc};

use async_trait::async_trait;
use cid::Cid;
use futures::io::{AsyncRead, AsyncWrite};
use ndarray::{ArrayD, Dimension, IxDyn};

use crate::{
    cache::Cacheable,
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite},
    node::{Node, NODE_RECORDS},
    record::RecordLocator,
    resolver::Resolver,
};

/// A dense N-dimensional index over a sparse set of items.
///
/// Each cell of `track` holds either 0, for a missing item, or a 1 based index into `content`.
///
#[derive(Clone, Debug, PartialEq)]
pub struct SparseArray<T> {
    track: ArrayD<u32>,
    content: Vec<T>,
    duplicates: u32,
}

/// The records of a leaf variable
pub type Records = SparseArray<RecordLocator>;

impl<T> SparseArray<T> {
    /// Get the item at an index.
    ///
    /// Returns `Ok(None)` for a missing item, or `Err(Error::BadIndex)` if the index doesn't fit
    /// the array's shape.
    ///
    pub fn get(&self, index: &[usize]) -> Result<Option<&T>> {
        let shape = self.track.shape();
        if index.len() != shape.len() || index.iter().zip(shape).any(|(i, n)| i >= n) {
            return Err(Error::BadIndex {
                index: index.to_vec(),
                shape: shape.to_vec(),
            });
        }

        Ok(match self.track[index] {
            0 => None,
            k => self.content.get(k as usize - 1),
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.track.shape()
    }

    /// Number of cells in the array
    pub fn cells(&self) -> usize {
        self.track.len()
    }

    /// Number of cells holding an item
    pub fn used(&self) -> usize {
        self.content.len()
    }

    /// Number of cells not holding an item
    pub fn missing(&self) -> usize {
        self.cells() - self.used()
    }

    /// Number of items that were replaced by a later item at the same index
    pub fn duplicates(&self) -> usize {
        self.duplicates as usize
    }

    /// Iterate over present items with their indexes, in row major order
    pub fn iter(&self) -> impl Iterator<Item = (Vec<usize>, &T)> + '_ {
        self.track
            .indexed_iter()
            .filter(|(_, k)| **k != 0)
            .map(|(index, k)| (index.slice().to_vec(), &self.content[*k as usize - 1]))
    }

    /// Relabel the indexes of this array's items.
    ///
    /// `map` translates an index in this array to an index in an array of shape `shape`. The
    /// result holds exactly the same items as this array. It is an error for `map` to drop an
    /// item, or to map two items to the same index.
    ///
    pub fn reindex<F>(&self, shape: &[usize], map: F) -> Result<Self>
    where
        T: Clone,
        F: Fn(&[usize]) -> Option<Vec<usize>>,
    {
        let mut track = ArrayD::zeros(IxDyn(shape));
        for (index, k) in self.track.indexed_iter() {
            if *k == 0 {
                continue;
            }

            let old = index.slice();
            let new = map(old).ok_or_else(|| {
                Error::Corrupt(format!("reindex has no place for item at {old:?}"))
            })?;
            let cell = track.get_mut(&new[..]).ok_or_else(|| Error::BadIndex {
                index: new.clone(),
                shape: shape.to_vec(),
            })?;
            if *cell != 0 {
                return Err(Error::Corrupt(format!("reindex maps two items to {new:?}")));
            }
            *cell = *k;
        }

        Ok(Self {
            track,
            content: self.content.clone(),
            duplicates: self.duplicates,
        })
    }
}

pub struct SparseArrayBuilder<T> {
    track: ArrayD<u32>,
    content: Vec<T>,
    duplicates: u32,
}

impl<T> SparseArrayBuilder<T> {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            track: ArrayD::zeros(IxDyn(shape)),
            content: Vec::new(),
            duplicates: 0,
        }
    }

    /// Place an item. If an item is already at `index`, the new one replaces it and is counted
    /// as a duplicate.
    ///
    pub fn add(&mut self, index: &[usize], item: T) -> Result<()> {
        let shape = self.track.shape().to_vec();
        if index.len() != shape.len() {
            return Err(Error::BadIndex {
                index: index.to_vec(),
                shape,
            });
        }
        let cell = self
            .track
            .get_mut(index)
            .ok_or_else(|| Error::BadIndex {
                index: index.to_vec(),
                shape,
            })?;

        match *cell {
            0 => {
                self.content.push(item);
                *cell = self.content.len() as u32;
            }
            k => {
                self.content[k as usize - 1] = item;
                self.duplicates += 1;
            }
        }

        Ok(())
    }

    pub fn finish(self) -> SparseArray<T> {
        SparseArray {
            track: self.track,
            content: self.content,
            duplicates: self.duplicates,
        }
    }
}

impl Cacheable for Records {
    fn size(&self) -> u64 {
        let track = self.track.len() * mem::size_of::<u32>();
        let content = self.content.len() * mem::size_of::<RecordLocator>();

        (track + content) as u64
    }
}

async fn write_option(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    value: Option<u64>,
) -> Result<()> {
    match value {
        Some(value) => {
            stream.write_byte(1).await?;
            stream.write_u64(value).await?;
        }
        None => stream.write_byte(0).await?,
    }

    Ok(())
}

async fn read_option(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Option<u64>> {
    Ok(match stream.read_byte().await? {
        0 => None,
        _ => Some(stream.read_u64().await?),
    })
}

#[async_trait]
impl Node for Records {
    const NODE_TYPE: u8 = NODE_RECORDS;

    async fn save_to(
        &self,
        _resolver: &Arc<Resolver>,
        stream: &mut (impl AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let shape = self.track.shape();
        stream.write_u32(shape.len() as u32).await?;
        for n in shape {
            stream.write_u32(*n as u32).await?;
        }
        for k in self.track.iter() {
            stream.write_u32(*k).await?;
        }

        stream.write_u32(self.content.len() as u32).await?;
        for locator in &self.content {
            stream.write_u32(locator.file).await?;
            stream.write_u64(locator.offset).await?;
            write_option(stream, locator.bitmap_offset).await?;
            write_option(stream, locator.drs_offset).await?;
        }
        stream.write_u32(self.duplicates).await?;

        Ok(())
    }

    async fn load_from(
        _resolver: &Arc<Resolver>,
        stream: &mut (impl AsyncRead + Unpin + Send),
    ) -> Result<Self> {
        let rank = stream.read_u32().await? as usize;
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(stream.read_u32().await? as usize);
        }

        let cells: usize = shape.iter().product();
        let mut track = Vec::with_capacity(cells);
        for _ in 0..cells {
            track.push(stream.read_u32().await?);
        }

        let len = stream.read_u32().await? as usize;
        let mut content = Vec::with_capacity(len);
        for _ in 0..len {
            let file = stream.read_u32().await?;
            let offset = stream.read_u64().await?;
            let bitmap_offset = read_option(stream).await?;
            let drs_offset = read_option(stream).await?;
            content.push(RecordLocator {
                file,
                offset,
                bitmap_offset,
                drs_offset,
            });
        }
        let duplicates = stream.read_u32().await?;

        if track.iter().any(|k| *k as usize > len) {
            return Err(Error::Corrupt(String::from(
                "records track points past the end of its content",
            )));
        }
        let track = ArrayD::from_shape_vec(IxDyn(&shape), track)
            .map_err(|err| Error::Corrupt(err.to_string()))?;

        Ok(Self {
            track,
            content,
            duplicates,
        })
    }

    fn ls(&self) -> Vec<(String, Cid)> {
        vec![]
    }
}
