use std::io;

use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncRead, AsyncWrite};

/// A content addressed object store that index objects are saved to and loaded from.
///
#[async_trait]
pub trait Mapper: Send + Sync {
    /// Obtain an output stream for writing an object to the store.
    ///
    /// The CID for the object is obtained from the `finish` method of the returned `StoreWrite`
    /// object. An object that is never finished must not become visible in the store.
    ///
    async fn store(&self) -> io::Result<Box<dyn StoreWrite + '_>>;

    /// Obtain an input stream for reading an object from the store.
    ///
    /// Returns `Ok(None)` if given `cid` isn't in the store.
    ///
    async fn load(&self, cid: &Cid) -> io::Result<Option<Box<dyn AsyncRead + Unpin + Send + '_>>>;

    /// Get the size, in bytes, of object identified by `cid`
    ///
    async fn size_of(&self, cid: &Cid) -> io::Result<Option<u64>>;
}

#[async_trait]
pub trait StoreWrite: AsyncWrite + Unpin + Send {
    /// Close the output stream and return the `cid` for the newly written object.
    ///
    async fn finish(self: Box<Self>) -> io::Result<Cid>;
}
