mod cache;
mod collection;
mod config;
mod coord;
mod errors;
mod extio;
mod identity;
mod mapper;
mod node;
mod partition;
mod reader;
mod record;
mod rectilinear;
mod resolver;
mod router;
mod share;
mod sparse;
mod time;

#[cfg(test)]
mod testing;

pub use collection::{
    Collection, CollectionKind, CollectionType, Group, Metadata, Partition, VariableIndex,
};
pub use config::{Config, IntervalFilter, LengthRule, MissingPartitionPolicy};
pub use coord::{
    coordinate_names, CoordKind, CoordValue, Coordinate, EnsembleCoord, IntervalCoord, Level,
    Member, Role, RuntimeCoord, Time2DAxes, Time2DCoord, TimeAxis, TimeCoord, TimeInterval,
    VerticalCoord,
};
pub use errors::{Error, Result};
pub use identity::{ProbabilityKey, VariableIdentity};
pub use mapper::{Mapper, StoreWrite};
pub use partition::PartitionMembership;
pub use reader::{read_records, Decoder, ReadSeek, RecordStore};
pub use record::{
    EnsembleSpec, LevelSpec, ProbabilitySpec, RecordDescriptor, RecordList, RecordLocator,
    RecordRef, RecordSource, TimeSpec,
};
pub use rectilinear::{GroupBuild, GroupStats, Rectilinearizer, VariableBuild};
pub use resolver::{LsEntry, Resolver, FORMAT_VERSION, MIN_FORMAT_VERSION};
pub use share::{CoordinateSharer, SharedGroup, SharedVariable};
pub use sparse::{Records, SparseArray, SparseArrayBuilder};
pub use time::{Instant, TimeUnit};
