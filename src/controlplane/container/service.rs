//! Single-writer actor over the container id → record map (§4.6).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use async_trait::async_trait;

use crate::config::AppRoots;
use crate::controlplane::network::ContainerNetworkRefs;
use crate::controlplane::plugin::PluginLoader;
use crate::error::{Error, Result};

use super::bundle::Bundle;
use super::record::{
    ContainerConfig, ContainerOptions, ContainerRecord, ContainerState, RuntimeHandle,
    RuntimeStatus, StopOptions,
};

/// A point-in-time view of one container, returned by `list`.
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    /// Container id.
    pub id: String,
    /// Coarse status: `"stopped"`, `"running"`, or `"exited"`.
    pub status: String,
    /// Networks currently attached, when known (only queried while
    /// `Alive`).
    pub networks: Vec<String>,
}

/// The single-writer container lifecycle service.
pub struct ContainerService {
    roots: AppRoots,
    plugin_loader: Arc<PluginLoader>,
    records: Mutex<HashMap<String, ContainerRecord>>,
}

impl ContainerService {
    /// Build an empty service.
    #[must_use]
    pub fn new(roots: AppRoots, plugin_loader: Arc<PluginLoader>) -> Self {
        Self {
            roots,
            plugin_loader,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// List every container, querying live helpers for their current
    /// status and networks.
    pub async fn list(&self) -> Result<Vec<ContainerSnapshot>> {
        let records = self.records.lock().await;
        let mut out = Vec::with_capacity(records.len());
        for record in records.values() {
            let networks = match &record.state {
                ContainerState::Alive(handle) => handle.networks().await.unwrap_or_default(),
                _ => Vec::new(),
            };
            out.push(ContainerSnapshot {
                id: record.id.clone(),
                status: record.coarse_status().to_string(),
                networks,
            });
        }
        Ok(out)
    }

    /// Create a new container record and its bundle.
    ///
    /// Rolls the bundle back if any step after its creation fails.
    #[instrument(skip(self, clone_rootfs), fields(container_id = %id))]
    pub async fn create(
        &self,
        id: String,
        config: ContainerConfig,
        options: ContainerOptions,
        clone_rootfs: impl FnOnce(&std::path::Path) -> Result<()> + Send,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&id) {
            return Err(Error::exists(format!("container already exists: {id}")));
        }

        let plugin = self
            .plugin_loader
            .find_by_name(&config.runtime_handler)?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "runtime plugin not found: {}",
                    config.runtime_handler
                ))
            })?;

        let bundle = Bundle::at(&self.roots, &id);
        let configuration_json = serde_json::to_vec(&config)?;
        bundle.create(&configuration_json, clone_rootfs)?;

        let result = self.finish_create(&id, &bundle, &plugin, &config, &options).await;
        if let Err(err) = &result {
            warn!(error = %err, "rolling back bundle after failed create");
            let _ = bundle.remove();
            return Err(result.unwrap_err());
        }

        records.insert(id.clone(), ContainerRecord::new(id, config, options));
        Ok(())
    }

    async fn finish_create(
        &self,
        id: &str,
        bundle: &Bundle,
        plugin: &crate::controlplane::plugin::Plugin,
        config: &ContainerConfig,
        options: &ContainerOptions,
    ) -> Result<()> {
        let options_json = serde_json::to_vec(options)?;
        bundle.write_options(&options_json)?;
        self.plugin_loader
            .register_with_launchd(plugin, &self.roots.bundle_dir(id), &config.init_process.arguments, id)
            .await?;
        Ok(())
    }

    /// Delete a container. Fails with [`Error::invalid_state`] if the
    /// container is `Alive` and its helper reports `Running` or
    /// `Stopping`.
    #[instrument(skip(self), fields(container_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get(id)
            .ok_or_else(|| Error::not_found(format!("no such container: {id}")))?;

        if let ContainerState::Alive(handle) = &record.state {
            match handle.status().await? {
                RuntimeStatus::Running | RuntimeStatus::Starting | RuntimeStatus::Stopping => {
                    return Err(Error::invalid_state(format!(
                        "container {id} must be stopped before deletion"
                    )));
                }
                RuntimeStatus::Exited(_) => {}
            }
        }

        self.teardown(id, &record.config.runtime_handler).await?;
        records.remove(id);
        Ok(())
    }

    async fn teardown(&self, id: &str, runtime_handler: &str) -> Result<()> {
        match self.plugin_loader.find_by_name(runtime_handler) {
            Ok(Some(plugin)) => {
                if let Err(err) = self.plugin_loader.deregister_with_launchd(&plugin, id).await {
                    warn!(error = %err, "failed to deregister helper during teardown, continuing");
                }
            }
            Ok(None) => {
                warn!(runtime_handler, "runtime plugin not found during teardown, skipping deregistration");
            }
            Err(err) => {
                warn!(error = %err, "failed to look up runtime plugin during teardown, continuing");
            }
        }
        let bundle = Bundle::at(&self.roots, id);
        bundle.remove()
    }

    /// Stop a container. A no-op on `Dead`/`Exited` records.
    pub async fn stop(&self, id: &str, options: StopOptions) -> Result<()> {
        let records = self.records.lock().await;
        let record = records
            .get(id)
            .ok_or_else(|| Error::not_found(format!("no such container: {id}")))?;
        match &record.state {
            ContainerState::Alive(handle) => handle.stop(&options).await,
            ContainerState::Dead | ContainerState::Exited(_) => Ok(()),
        }
    }

    /// Open readable handles to `container.log` and `boot.log`.
    pub async fn logs(&self, id: &str) -> Result<Vec<std::fs::File>> {
        let records = self.records.lock().await;
        if !records.contains_key(id) {
            return Err(Error::not_found(format!("no such container: {id}")));
        }
        let bundle = Bundle::at(&self.roots, id);
        Ok(vec![
            std::fs::File::open(bundle.container_log())?,
            std::fs::File::open(bundle.boot_log())?,
        ])
    }

    /// Ingest a `containerStart` event: `Dead → Alive(handle)`.
    pub async fn container_start(&self, id: &str, handle: Arc<dyn RuntimeHandle>) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("no such container: {id}")))?;
        if !matches!(record.state, ContainerState::Dead) {
            return Err(Error::invalid_state(format!(
                "container {id} is not Dead, cannot start"
            )));
        }
        record.state = ContainerState::Alive(handle);
        info!(container_id = %id, "container started");
        Ok(())
    }

    /// Ingest a `containerExit` event: `Alive → Exited(code)`. If the
    /// container's options require auto-remove, cascades to teardown
    /// within the same lock acquisition. Exits on non-`Alive` records
    /// are ignored per §4.6.
    #[instrument(skip(self), fields(container_id = %id, exit_code = code))]
    pub async fn container_exit(&self, id: &str, code: i32) -> Result<()> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(id) else {
            return Ok(());
        };
        if !matches!(record.state, ContainerState::Alive(_)) {
            return Ok(());
        }
        record.state = ContainerState::Exited(code);
        info!(container_id = %id, exit_code = code, "container exited");

        if record.options.auto_remove {
            self.teardown(id, &record.config.runtime_handler).await?;
            records.remove(id);
            info!(container_id = %id, "auto-removed after exit");
        }
        Ok(())
    }
}

/// The documented unidirectional cross-service dependency (§5, §9): the
/// network service borrows this snapshot, taken under the container
/// service's own lock, to check referential integrity before deleting a
/// network. This impl never calls into the network service, so no lock
/// cycle is introduced.
#[async_trait]
impl ContainerNetworkRefs for ContainerService {
    async fn referencing_container(&self, network_id: &str) -> Result<Option<String>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|record| record.config.networks.iter().any(|n| n == network_id))
            .map(|record| record.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::container::record::InitProcessConfig;
    use crate::controlplane::servicemgr::{InMemoryServiceManager, ServiceManager};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeHandle {
        status: RuntimeStatus,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl RuntimeHandle for FakeHandle {
        async fn status(&self) -> Result<RuntimeStatus> {
            Ok(self.status)
        }
        async fn stop(&self, _options: &StopOptions) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn networks(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn sample_config() -> ContainerConfig {
        ContainerConfig {
            runtime_handler: "fake-runtime".into(),
            image_reference: "scratch".into(),
            platform: "linux/arm64".into(),
            init_process: InitProcessConfig {
                executable: "/bin/sh".into(),
                arguments: vec![],
                environment: StdHashMap::new(),
                working_directory: None,
                user: None,
            },
            networks: vec![],
        }
    }

    fn write_plugin(dir: &std::path::Path) {
        std::fs::create_dir_all(dir).unwrap();
        let manifest = serde_json::json!({
            "name": "fake-runtime",
            "types": ["runtime"],
            "auto_boot": false,
            "executable": "bin/fake-runtime"
        });
        std::fs::write(dir.join("plugin.json"), manifest.to_string()).unwrap();
    }

    async fn make_service() -> (tempfile::TempDir, ContainerService) {
        let (tmp, svc, _helper_mgr) = make_service_with_helper_manager().await;
        (tmp, svc)
    }

    async fn make_service_with_helper_manager(
    ) -> (tempfile::TempDir, ContainerService, Arc<InMemoryServiceManager>) {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(&tmp.path().join("plugins/fake-runtime"));
        let roots = AppRoots::new(tmp.path().join("approot"));
        let helper_mgr = Arc::new(InMemoryServiceManager::new());
        let loader = Arc::new(PluginLoader::new(
            vec![tmp.path().join("plugins")],
            helper_mgr.clone(),
            crate::config::DaemonConfig::default(),
        ));
        let svc = ContainerService::new(roots, loader);
        (tmp, svc, helper_mgr)
    }

    #[tokio::test]
    async fn create_start_exit_with_auto_remove_scenario() {
        let (_tmp, svc) = make_service().await;
        let mut options = ContainerOptions::default();
        options.auto_remove = true;
        svc.create("c1".into(), sample_config(), options, |rootfs| {
            std::fs::create_dir_all(rootfs)?;
            Ok(())
        })
        .await
        .unwrap();

        let snapshots = svc.list().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, "stopped");

        let handle = Arc::new(FakeHandle {
            status: RuntimeStatus::Running,
            stopped: AtomicBool::new(false),
        });
        svc.container_start("c1", handle).await.unwrap();
        let snapshots = svc.list().await.unwrap();
        assert_eq!(snapshots[0].status, "running");

        svc.container_exit("c1", 0).await.unwrap();
        let snapshots = svc.list().await.unwrap();
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn delete_rejects_running_container() {
        let (_tmp, svc) = make_service().await;
        svc.create("c1".into(), sample_config(), ContainerOptions::default(), |rootfs| {
            std::fs::create_dir_all(rootfs)?;
            Ok(())
        })
        .await
        .unwrap();
        let handle = Arc::new(FakeHandle {
            status: RuntimeStatus::Running,
            stopped: AtomicBool::new(false),
        });
        svc.container_start("c1", handle).await.unwrap();

        let err = svc.delete("c1").await.unwrap_err();
        assert_eq!(err.category(), "invalid_state");
    }

    #[tokio::test]
    async fn stop_on_dead_container_is_noop() {
        let (_tmp, svc) = make_service().await;
        svc.create("c1".into(), sample_config(), ContainerOptions::default(), |rootfs| {
            std::fs::create_dir_all(rootfs)?;
            Ok(())
        })
        .await
        .unwrap();
        svc.stop("c1", StopOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn create_registers_plugin_and_delete_deregisters_it() {
        let (_tmp, svc, helper_mgr) = make_service_with_helper_manager().await;
        svc.create("c1".into(), sample_config(), ContainerOptions::default(), |rootfs| {
            std::fs::create_dir_all(rootfs)?;
            Ok(())
        })
        .await
        .unwrap();

        let label = "com.container/com.container.fake-runtime.c1";
        assert!(helper_mgr.is_registered(label).await.unwrap());

        svc.delete("c1").await.unwrap();
        assert!(!helper_mgr.is_registered(label).await.unwrap());
    }

    #[tokio::test]
    async fn create_fails_when_runtime_plugin_missing() {
        let (_tmp, svc) = make_service().await;
        let mut cfg = sample_config();
        cfg.runtime_handler = "does-not-exist".into();
        let err = svc
            .create("c1".into(), cfg, ContainerOptions::default(), |rootfs| {
                std::fs::create_dir_all(rootfs)?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "not_found");
    }
}
