use std::io;
use std::result;

use cid::Cid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),

    #[error("invalid content id: {0}")]
    Cid(#[from] cid::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid varint: {0}")]
    Varint(#[from] unsigned_varint::io::ReadError),

    #[error("object not found: {0}")]
    NotFound(Cid),

    #[error("object could not be loaded")]
    Load,

    #[error("not a gridex index node")]
    BadMagic,

    #[error("index format version {found} is older than oldest supported version {minimum}")]
    ObsoleteVersion { found: u32, minimum: u32 },

    #[error("unrecognized node type: {0}")]
    UnknownNodeType(u8),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("unclassifiable record: {0}")]
    Descriptor(String),

    #[error("group {grid_hash:#018x} has no usable records")]
    EmptyGroup { grid_hash: u64 },

    #[error("collection has no usable records")]
    NoRecords,

    #[error("no partitions available")]
    NoPartitions,

    #[error("index {index:?} is not valid for shape {shape:?}")]
    BadIndex { index: Vec<usize>, shape: Vec<usize> },

    #[error("no such variable: group {group}, variable {variable}")]
    BadVariable { group: usize, variable: usize },

    #[error("variable {0} is not present in any partition")]
    MissingPartition(String),

    #[error("unable to decode record: {0}")]
    Decode(String),
}

pub type Result<T> = result::Result<T, Error>;
