//! IR data model: operations, nodes, stages, and the build graph they
//! compose into (§3, §4.9).

pub mod cachekey;
pub mod graph;
pub mod node;
pub mod operation;
pub mod port;
pub mod stage;

pub use cachekey::CacheKey;
pub use graph::BuildGraph;
pub use node::{BuildNode, NodeConstraints};
pub use operation::{
    ExecNetworkMode, ExecOperation, FilesystemOperation, FsAction, FsMetadata, FsSource,
    ImageOperation, ImageSource, MetadataOperation, Mount, MountSource, Operation,
    OperationVisitor, SecurityMode,
};
pub use port::{PortSpec, Protocol};
pub use stage::Stage;
