//! Single-writer network lifecycle service (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::controlplane::servicemgr::ServiceManager;
use crate::controlplane::store::EntityStore;
use crate::error::{Error, Result};

use super::cidr::Subnet;
use super::types::{
    Attachment, HelperState, NetworkConfig, NetworkHelper, NetworkHelperFactory, NetworkMode,
    NetworkRuntimeState,
};

/// The unidirectional cross-service dependency documented in §5 and
/// §9: the network service borrows the container service's record set
/// under the container service's own lock to check referential
/// integrity before deleting a network. The container service never
/// calls back into the network service, so no lock cycle exists.
#[async_trait]
pub trait ContainerNetworkRefs: Send + Sync {
    /// The id of a container still referencing `network_id`, if any.
    async fn referencing_container(&self, network_id: &str) -> Result<Option<String>>;
}

struct NetworkEntry {
    config: NetworkConfig,
    state: NetworkRuntimeState,
    helper: Option<Arc<dyn NetworkHelper>>,
}

/// The single-writer network lifecycle service.
pub struct NetworkService {
    default_network_id: String,
    store: EntityStore<NetworkConfig>,
    service_manager: Arc<dyn ServiceManager>,
    helper_factory: Arc<dyn NetworkHelperFactory>,
    container_refs: Arc<dyn ContainerNetworkRefs>,
    networks: Mutex<HashMap<String, NetworkEntry>>,
}

impl NetworkService {
    /// Build an empty service. `store_root` backs the entity store;
    /// `default_network_id` names the network that may never be
    /// deleted.
    #[must_use]
    pub fn new(
        store_root: impl Into<std::path::PathBuf>,
        service_manager: Arc<dyn ServiceManager>,
        helper_factory: Arc<dyn NetworkHelperFactory>,
        container_refs: Arc<dyn ContainerNetworkRefs>,
        default_network_id: impl Into<String>,
    ) -> Self {
        Self {
            default_network_id: default_network_id.into(),
            store: EntityStore::new(store_root),
            service_manager,
            helper_factory,
            container_refs,
            networks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new network. Rejects a duplicate id and, when a subnet
    /// is given, any overlap with a currently `Running` network's
    /// subnet.
    #[instrument(skip(self), fields(network_id = %id))]
    pub async fn create(&self, id: String, subnet: Option<Subnet>) -> Result<()> {
        let mut networks = self.networks.lock().await;
        if networks.contains_key(&id) {
            return Err(Error::exists(format!("network already exists: {id}")));
        }
        if let Some(subnet) = &subnet {
            for entry in networks.values() {
                if let (NetworkRuntimeState::Running { .. }, Some(existing)) =
                    (&entry.state, &entry.config.subnet)
                {
                    if existing.overlaps(subnet) {
                        return Err(Error::exists(format!(
                            "subnet {subnet} overlaps running network {} ({existing})",
                            entry.config.id
                        )));
                    }
                }
            }
        }

        let config = NetworkConfig {
            id: id.clone(),
            mode: NetworkMode::Nat,
            subnet,
        };
        let label = format!("network.{id}");
        let plist_path = std::path::PathBuf::from(format!("/tmp/{id}.plist"));
        self.service_manager.register(&plist_path, &label).await?;

        let helper = subnet.map(|s| self.helper_factory.spawn(&id, s));
        let state = match &helper {
            Some(helper) => match helper.start().await {
                Ok(HelperState::Running { address, gateway }) => {
                    NetworkRuntimeState::Running { address, gateway }
                }
                _ => NetworkRuntimeState::Created,
            },
            None => NetworkRuntimeState::Created,
        };

        if let Err(err) = self.store.create(&config) {
            warn!(error = %err, "rolling back helper registration after persistence failure");
            let _ = self.service_manager.deregister(&label).await;
            return Err(err);
        }

        networks.insert(
            id.clone(),
            NetworkEntry {
                config,
                state,
                helper,
            },
        );
        info!(network_id = %id, "network created");
        Ok(())
    }

    /// Delete a network. Rejects the default network id, rejects any
    /// network still referenced by a container, and otherwise disables
    /// the allocator (failing if attachments remain active) before
    /// tearing the helper and persisted config down.
    #[instrument(skip(self), fields(network_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id == self.default_network_id {
            return Err(Error::unsupported("the default network cannot be deleted"));
        }

        let mut networks = self.networks.lock().await;
        let entry = networks
            .get(id)
            .ok_or_else(|| Error::not_found(format!("no such network: {id}")))?;

        // Checked under the same lock acquisition that performs the
        // removal below, so no container can attach to this network
        // between the check and the mutation (§5).
        if let Some(container_id) = self.container_refs.referencing_container(id).await? {
            return Err(Error::invalid_state(format!(
                "network {id} is still referenced by container {container_id}"
            )));
        }

        if let Some(helper) = &entry.helper {
            helper.disable_allocator().await?;
        }

        let label = format!("network.{id}");
        if let Err(err) = self.service_manager.deregister(&label).await {
            warn!(error = %err, "failed to deregister network helper during delete, continuing");
        }
        self.store.delete(id)?;
        networks.remove(id);
        info!(network_id = %id, "network deleted");
        Ok(())
    }

    /// Allocate (or reuse) an attachment for `hostname` on network `id`.
    pub async fn attach(&self, id: &str, hostname: &str) -> Result<Attachment> {
        let networks = self.networks.lock().await;
        let entry = networks
            .get(id)
            .ok_or_else(|| Error::not_found(format!("no such network: {id}")))?;
        let helper = entry
            .helper
            .as_ref()
            .ok_or_else(|| Error::invalid_state(format!("network {id} has no running helper")))?;
        helper.allocate(hostname).await
    }

    /// Release the attachment held by `hostname` on network `id`.
    pub async fn detach(&self, id: &str, hostname: &str) -> Result<()> {
        let networks = self.networks.lock().await;
        let entry = networks
            .get(id)
            .ok_or_else(|| Error::not_found(format!("no such network: {id}")))?;
        if let Some(helper) = &entry.helper {
            helper.deallocate(hostname).await?;
        }
        Ok(())
    }

    /// Look up `hostname` across every network, returning the first
    /// match (§4.7).
    pub async fn lookup(&self, hostname: &str) -> Result<Option<Attachment>> {
        let networks = self.networks.lock().await;
        for entry in networks.values() {
            if let Some(helper) = &entry.helper {
                if let Some(att) = helper.lookup(hostname).await? {
                    return Ok(Some(att));
                }
            }
        }
        Ok(None)
    }

    /// Replay every persisted network config at boot, re-registering
    /// helpers. A helper that fails to come up `Running` is logged and
    /// left `Created` rather than failing the whole boot (§7).
    pub async fn replay_persisted(&self) -> Result<()> {
        let configs = self.store.list()?;
        let mut networks = self.networks.lock().await;
        for config in configs {
            let label = format!("network.{}", config.id);
            let plist_path = std::path::PathBuf::from(format!("/tmp/{}.plist", config.id));
            if let Err(err) = self.service_manager.register(&plist_path, &label).await {
                warn!(network_id = %config.id, error = %err, "failed to re-register network helper at boot");
            }

            let helper = config.subnet.map(|s| self.helper_factory.spawn(&config.id, s));
            let state = match &helper {
                Some(helper) => match helper.start().await {
                    Ok(HelperState::Running { address, gateway }) => {
                        NetworkRuntimeState::Running { address, gateway }
                    }
                    _ => {
                        warn!(network_id = %config.id, "network helper did not come up Running at boot");
                        NetworkRuntimeState::Created
                    }
                },
                None => NetworkRuntimeState::Created,
            };
            networks.insert(
                config.id.clone(),
                NetworkEntry {
                    config,
                    state,
                    helper,
                },
            );
        }
        Ok(())
    }

    /// Whether the given network is currently `Running`.
    pub async fn is_running(&self, id: &str) -> bool {
        matches!(
            self.networks.lock().await.get(id).map(|e| &e.state),
            Some(NetworkRuntimeState::Running { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::network::helper::InMemoryNetworkHelperFactory;
    use crate::controlplane::servicemgr::InMemoryServiceManager;

    struct NoRefs;
    #[async_trait]
    impl ContainerNetworkRefs for NoRefs {
        async fn referencing_container(&self, _network_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct OneRef(&'static str);
    #[async_trait]
    impl ContainerNetworkRefs for OneRef {
        async fn referencing_container(&self, _network_id: &str) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn make_service(refs: Arc<dyn ContainerNetworkRefs>) -> (tempfile::TempDir, NetworkService) {
        let tmp = tempfile::tempdir().unwrap();
        let svc = NetworkService::new(
            tmp.path().to_path_buf(),
            Arc::new(InMemoryServiceManager::new()),
            Arc::new(InMemoryNetworkHelperFactory),
            refs,
            "default",
        );
        (tmp, svc)
    }

    #[tokio::test]
    async fn subnet_overlap_rejected_on_create() {
        let (_tmp, svc) = make_service(Arc::new(NoRefs));
        svc.create("nA".into(), Some(Subnet::parse("10.0.0.0/24").unwrap()))
            .await
            .unwrap();
        let err = svc
            .create("nB".into(), Some(Subnet::parse("10.0.0.128/25").unwrap()))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "exists");
    }

    #[tokio::test]
    async fn delete_with_dependent_container_fails_invalid_state() {
        let (_tmp, svc) = make_service(Arc::new(OneRef("c1")));
        svc.create("nA".into(), Some(Subnet::parse("10.0.0.0/24").unwrap()))
            .await
            .unwrap();
        let err = svc.delete("nA").await.unwrap_err();
        assert_eq!(err.category(), "invalid_state");
        assert!(err.to_string().contains("c1"));
    }

    #[tokio::test]
    async fn default_network_cannot_be_deleted() {
        let (_tmp, svc) = make_service(Arc::new(NoRefs));
        svc.create("default".into(), Some(Subnet::parse("10.0.0.0/24").unwrap()))
            .await
            .unwrap();
        let err = svc.delete("default").await.unwrap_err();
        assert_eq!(err.category(), "unsupported");
    }

    #[tokio::test]
    async fn delete_succeeds_once_unreferenced() {
        let (_tmp, svc) = make_service(Arc::new(NoRefs));
        svc.create("nA".into(), Some(Subnet::parse("10.0.0.0/24").unwrap()))
            .await
            .unwrap();
        svc.delete("nA").await.unwrap();
        assert!(!svc.is_running("nA").await);
    }

    #[tokio::test]
    async fn lookup_finds_attachment_across_networks() {
        let (_tmp, svc) = make_service(Arc::new(NoRefs));
        svc.create("nA".into(), Some(Subnet::parse("10.0.0.0/24").unwrap()))
            .await
            .unwrap();
        let att = svc.attach("nA", "host-a").await.unwrap();
        let found = svc.lookup("host-a").await.unwrap().unwrap();
        assert_eq!(found, att);
        assert!(Subnet::parse("10.0.0.0/24").unwrap().contains(found.address));
    }
}
