//! Container record, bundle, and lifecycle service (§3, §4.6).

mod bundle;
mod record;
mod service;

pub use bundle::Bundle;
pub use record::{
    ContainerConfig, ContainerOptions, ContainerRecord, ContainerState, InitProcessConfig,
    RuntimeHandle, RuntimeStatus, StopOptions,
};
pub use service::{ContainerService, ContainerSnapshot};
