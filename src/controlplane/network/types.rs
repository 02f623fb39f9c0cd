//! Network record, attachment, and helper contract (§3, §4.7).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::controlplane::store::Entity;
use crate::error::Result;

use super::cidr::Subnet;

/// Network mode. Only `Nat` is in scope (§3); kept as an enum rather
/// than a bare string so adding a mode later is a variant, not a string
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    /// NAT'd bridge network.
    Nat,
}

/// The persisted configuration for one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Unique network id.
    pub id: String,
    /// Network mode.
    pub mode: NetworkMode,
    /// Optional explicit subnet; when absent the daemon's default CIDR
    /// pool is used.
    pub subnet: Option<Subnet>,
}

impl Entity for NetworkConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Derived, non-persisted runtime state (§3).
#[derive(Debug, Clone)]
pub enum NetworkRuntimeState {
    /// Configuration persisted but no helper is currently running (boot
    /// recovery, or a helper that has not yet reported `Running`).
    Created,
    /// The helper is up and serving allocation requests.
    Running {
        /// The helper's own bridge address.
        address: Ipv4Addr,
        /// The subnet gateway address.
        gateway: Ipv4Addr,
    },
}

/// A (network, hostname, address, gateway) binding (§3 GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Owning network id.
    pub network_id: String,
    /// Hostname the attachment was allocated for.
    pub hostname: String,
    /// Allocated address, guaranteed within the network's subnet.
    pub address: Ipv4Addr,
    /// The network's gateway address.
    pub gateway: Ipv4Addr,
}

/// Observed state of a network helper process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    /// The helper process has been asked to start but has not yet
    /// confirmed.
    Starting,
    /// The helper is serving requests.
    Running {
        /// The helper's bridge address.
        address: Ipv4Addr,
        /// The subnet gateway address.
        gateway: Ipv4Addr,
    },
    /// The helper failed to start.
    Failed,
}

/// One helper process per network: owns the allocator and answers
/// attachment queries (§4.7).
#[async_trait]
pub trait NetworkHelper: Send + Sync {
    /// Start the helper and report its resulting state.
    async fn start(&self) -> Result<HelperState>;

    /// Current observed state.
    async fn state(&self) -> Result<HelperState>;

    /// Allocate an address for `hostname`.
    async fn allocate(&self, hostname: &str) -> Result<Attachment>;

    /// Release the attachment held by `hostname`, if any.
    async fn deallocate(&self, hostname: &str) -> Result<()>;

    /// Look up the attachment for `hostname`, if one exists.
    async fn lookup(&self, hostname: &str) -> Result<Option<Attachment>>;

    /// Disable the allocator. Fails with [`Error::invalid_state`] if any
    /// attachment is still active.
    async fn disable_allocator(&self) -> Result<()>;
}

/// Produces a fresh [`NetworkHelper`] for a network being created or
/// replayed at boot. Kept as a factory so the binding to a real plugin
/// process versus an in-process fake is a construction-time choice, not
/// baked into [`super::service::NetworkService`].
pub trait NetworkHelperFactory: Send + Sync {
    /// Build (but do not yet start) a helper for `network_id` over
    /// `subnet`.
    fn spawn(&self, network_id: &str, subnet: Subnet) -> std::sync::Arc<dyn NetworkHelper>;
}
