//! An in-process [`NetworkHelper`] used when no external network plugin
//! is bound, and by every test in this module.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::controlplane::allocator::AddressAllocator;
use crate::error::{Error, Result};

use super::cidr::Subnet;
use super::types::{Attachment, HelperState, NetworkHelper, NetworkHelperFactory};

/// Allocates addresses directly within this process rather than over a
/// Mach service boundary.
pub struct InMemoryNetworkHelper {
    network_id: String,
    subnet: Subnet,
    allocator: Mutex<AddressAllocator>,
    state: Mutex<HelperState>,
}

impl InMemoryNetworkHelper {
    /// Build (but do not start) a helper for `network_id`.
    #[must_use]
    pub fn new(network_id: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            network_id: network_id.into(),
            allocator: Mutex::new(AddressAllocator::new(
                subnet.allocator_lower(),
                subnet.allocator_size(),
            )),
            subnet,
            state: Mutex::new(HelperState::Starting),
        }
    }
}

#[async_trait]
impl NetworkHelper for InMemoryNetworkHelper {
    async fn start(&self) -> Result<HelperState> {
        let running = HelperState::Running {
            address: self.subnet.gateway(),
            gateway: self.subnet.gateway(),
        };
        *self.state.lock().await = running;
        Ok(running)
    }

    async fn state(&self) -> Result<HelperState> {
        Ok(*self.state.lock().await)
    }

    async fn allocate(&self, hostname: &str) -> Result<Attachment> {
        let index = self.allocator.lock().await.allocate(hostname)?;
        Ok(Attachment {
            network_id: self.network_id.clone(),
            hostname: hostname.to_string(),
            address: Ipv4Addr::from(index),
            gateway: self.subnet.gateway(),
        })
    }

    async fn deallocate(&self, hostname: &str) -> Result<()> {
        self.allocator.lock().await.release(hostname);
        Ok(())
    }

    async fn lookup(&self, hostname: &str) -> Result<Option<Attachment>> {
        let allocator = self.allocator.lock().await;
        Ok(allocator.lookup(hostname).map(|index| Attachment {
            network_id: self.network_id.clone(),
            hostname: hostname.to_string(),
            address: Ipv4Addr::from(index),
            gateway: self.subnet.gateway(),
        }))
    }

    async fn disable_allocator(&self) -> Result<()> {
        let mut allocator = self.allocator.lock().await;
        if allocator.disable() {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "network {} still has active attachments",
                self.network_id
            )))
        }
    }
}

/// Builds [`InMemoryNetworkHelper`]s.
#[derive(Default)]
pub struct InMemoryNetworkHelperFactory;

impl NetworkHelperFactory for InMemoryNetworkHelperFactory {
    fn spawn(&self, network_id: &str, subnet: Subnet) -> Arc<dyn NetworkHelper> {
        Arc::new(InMemoryNetworkHelper::new(network_id, subnet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_then_lookup_then_deallocate() {
        let helper = InMemoryNetworkHelper::new("n1", Subnet::parse("10.0.0.0/24").unwrap());
        helper.start().await.unwrap();
        let att = helper.allocate("host-a").await.unwrap();
        assert!(Subnet::parse("10.0.0.0/24").unwrap().contains(att.address));
        assert_eq!(helper.lookup("host-a").await.unwrap(), Some(att));
        helper.deallocate("host-a").await.unwrap();
        assert_eq!(helper.lookup("host-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn disable_allocator_fails_with_active_attachment() {
        let helper = InMemoryNetworkHelper::new("n1", Subnet::parse("10.0.0.0/24").unwrap());
        helper.start().await.unwrap();
        helper.allocate("host-a").await.unwrap();
        let err = helper.disable_allocator().await.unwrap_err();
        assert_eq!(err.category(), "invalid_state");
        helper.deallocate("host-a").await.unwrap();
        helper.disable_allocator().await.unwrap();
    }
}
