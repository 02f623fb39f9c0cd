//! Network record, CIDR allocator, and lifecycle service (§3, §4.7).

mod cidr;
mod helper;
mod service;
mod types;

pub use cidr::Subnet;
pub use helper::{InMemoryNetworkHelper, InMemoryNetworkHelperFactory};
pub use service::{ContainerNetworkRefs, NetworkService};
pub use types::{
    Attachment, HelperState, NetworkConfig, NetworkHelper, NetworkHelperFactory, NetworkMode,
    NetworkRuntimeState,
};
