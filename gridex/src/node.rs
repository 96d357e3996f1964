use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use futures::io::{AsyncRead, AsyncWrite};

use crate::{errors::Result, resolver::Resolver};

pub(crate) const NODE_COLLECTION: u8 = 1;
pub(crate) const NODE_RECORDS: u8 = 2;

/// An object stored in the index.
///
#[async_trait]
pub(crate) trait Node: Sized {
    const NODE_TYPE: u8;

    /// Save an object into the store
    ///
    async fn save_to(
        &self,
        resolver: &Arc<Resolver>,
        stream: &mut (impl AsyncWrite + Unpin + Send),
    ) -> Result<()>;

    /// Load an object from a stream
    async fn load_from(
        resolver: &Arc<Resolver>,
        stream: &mut (impl AsyncRead + Unpin + Send),
    ) -> Result<Self>;

    /// List other objects referenced by this one
    fn ls(&self) -> Vec<(String, Cid)>;
}

pub(crate) fn type_name(node_type: u8) -> Option<&'static str> {
    match node_type {
        NODE_COLLECTION => Some("Collection"),
        NODE_RECORDS => Some("Records"),
        _ => None,
    }
}
