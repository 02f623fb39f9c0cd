//! Plugin discovery, ordered search path, and launchd binding (§4.5).
//!
//! Plugins are external processes, never in-process extensions (§9):
//! discovery is path walking and manifest parsing, nothing more.

use crate::config::DaemonConfig;
use crate::controlplane::servicemgr::ServiceManager;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a plugin declares about itself, parsed from its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name, used for lookup-by-name (runtime handler selection).
    pub name: String,
    /// Declared types, e.g. `"runtime"`, `"network"`.
    pub types: Vec<String>,
    /// Whether the daemon should start this plugin automatically at boot.
    pub auto_boot: bool,
    /// Path to the executable or app bundle, relative to the plugin's
    /// own directory.
    pub executable: PathBuf,
}

/// A discovered plugin: its manifest plus the directory it was found in.
#[derive(Debug, Clone)]
pub struct Plugin {
    /// Parsed manifest.
    pub manifest: PluginManifest,
    /// Directory (or app bundle root) the plugin was discovered under.
    pub root: PathBuf,
}

impl Plugin {
    /// Whether this plugin declares `type_name` among its types.
    #[must_use]
    pub fn has_type(&self, type_name: &str) -> bool {
        self.manifest.types.iter().any(|t| t == type_name)
    }

    /// The Mach service name this plugin's helper instances register
    /// under: `{prefix}{runtime}.{instance}`.
    #[must_use]
    pub fn mach_service_name(&self, config: &DaemonConfig, instance_id: &str) -> String {
        config.helper_label(&self.manifest.name, instance_id)
    }
}

/// A source of plugins rooted at one directory: either a directory
/// carrying a manifest file, or a macOS app bundle. Both are consulted,
/// first-match-by-name, when resolving a search path.
trait PluginFactory: Send + Sync {
    fn discover(&self, dir: &Path) -> Result<Option<Plugin>>;
}

struct ManifestDirFactory;

impl PluginFactory for ManifestDirFactory {
    fn discover(&self, dir: &Path) -> Result<Option<Plugin>> {
        let manifest_path = dir.join("plugin.json");
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&manifest_path)?;
        let manifest: PluginManifest = serde_json::from_slice(&bytes)?;
        Ok(Some(Plugin {
            manifest,
            root: dir.to_path_buf(),
        }))
    }
}

struct AppBundleFactory;

impl PluginFactory for AppBundleFactory {
    fn discover(&self, dir: &Path) -> Result<Option<Plugin>> {
        if dir.extension().and_then(|e| e.to_str()) != Some("app") {
            return Ok(None);
        }
        let manifest_path = dir.join("Contents/Resources/plugin.json");
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&manifest_path)?;
        let manifest: PluginManifest = serde_json::from_slice(&bytes)?;
        Ok(Some(Plugin {
            manifest,
            root: dir.to_path_buf(),
        }))
    }
}

/// Discovers plugins across an ordered directory list and binds them to
/// the service manager.
pub struct PluginLoader {
    search_path: Vec<PathBuf>,
    factories: Vec<Box<dyn PluginFactory>>,
    service_manager: Arc<dyn ServiceManager>,
    config: DaemonConfig,
}

impl PluginLoader {
    /// Build a loader over `search_path`, consulted in order.
    #[must_use]
    pub fn new(
        search_path: Vec<PathBuf>,
        service_manager: Arc<dyn ServiceManager>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            search_path,
            factories: vec![Box::new(ManifestDirFactory), Box::new(AppBundleFactory)],
            service_manager,
            config,
        }
    }

    /// Walk the search path and return every plugin found, first-match
    /// by name: if two directories contain a plugin of the same name,
    /// only the first (in search-path order) is kept.
    pub fn find_plugins(&self) -> Result<Vec<Plugin>> {
        let mut found = Vec::new();
        let mut seen_names = std::collections::HashSet::new();

        for dir in &self.search_path {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                for factory in &self.factories {
                    if let Some(plugin) = factory.discover(&path)? {
                        if seen_names.insert(plugin.manifest.name.clone()) {
                            debug!(name = %plugin.manifest.name, root = %plugin.root.display(), "discovered plugin");
                            found.push(plugin);
                        }
                        break;
                    }
                }
            }
        }
        Ok(found)
    }

    /// Find the first plugin declaring `type_name`.
    pub fn find_by_type(&self, type_name: &str) -> Result<Option<Plugin>> {
        Ok(self
            .find_plugins()?
            .into_iter()
            .find(|p| p.has_type(type_name)))
    }

    /// Find a plugin by exact name (runtime handler selection).
    pub fn find_by_name(&self, name: &str) -> Result<Option<Plugin>> {
        Ok(self
            .find_plugins()?
            .into_iter()
            .find(|p| p.manifest.name == name))
    }

    /// Register `plugin`'s instance `instance_id` with the service
    /// manager, pointing at a launchd plist synthesized under `root_url`.
    pub async fn register_with_launchd(
        &self,
        plugin: &Plugin,
        root_url: &Path,
        args: &[String],
        instance_id: &str,
    ) -> Result<String> {
        let label = plugin.mach_service_name(&self.config, instance_id);
        let plist_path = root_url.join(format!("{instance_id}.plist"));
        debug!(label = %label, executable = %plugin.manifest.executable.display(), args = ?args, "registering plugin instance with launchd");
        self.service_manager.register(&plist_path, &label).await?;
        Ok(label)
    }

    /// Deregister `plugin`'s instance `instance_id`.
    pub async fn deregister_with_launchd(&self, plugin: &Plugin, instance_id: &str) -> Result<()> {
        let label = plugin.mach_service_name(&self.config, instance_id);
        self.service_manager.deregister(&label).await
    }

    /// Auto-boot every plugin that declares `auto_boot = true`,
    /// tolerating individual registration failures (boot-time recovery
    /// is lenient per §7).
    pub async fn boot_autostart_plugins(&self, root_url: &Path) -> Result<Vec<String>> {
        let mut started = Vec::new();
        for plugin in self.find_plugins()? {
            if !plugin.manifest.auto_boot {
                continue;
            }
            match self
                .register_with_launchd(&plugin, root_url, &[], "default")
                .await
            {
                Ok(label) => started.push(label),
                Err(err) => warn!(plugin = %plugin.manifest.name, error = %err, "auto-boot plugin failed to register"),
            }
        }
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::servicemgr::InMemoryServiceManager;

    fn write_manifest(dir: &Path, manifest: &PluginManifest) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("plugin.json"),
            serde_json::to_vec(manifest).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn find_plugins_discovers_manifest_directories() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("linux-vm");
        write_manifest(
            &plugin_dir,
            &PluginManifest {
                name: "linux-vm".into(),
                types: vec!["runtime".into()],
                auto_boot: true,
                executable: "bin/linux-vm".into(),
            },
        );

        let loader = PluginLoader::new(
            vec![root.path().to_path_buf()],
            Arc::new(InMemoryServiceManager::new()),
            DaemonConfig::default(),
        );
        let found = loader.find_plugins().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.name, "linux-vm");
    }

    #[test]
    fn first_directory_wins_on_name_collision() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        write_manifest(
            &dir_a.path().join("net"),
            &PluginManifest {
                name: "net".into(),
                types: vec!["network".into()],
                auto_boot: false,
                executable: "a".into(),
            },
        );
        write_manifest(
            &dir_b.path().join("net"),
            &PluginManifest {
                name: "net".into(),
                types: vec!["network".into()],
                auto_boot: false,
                executable: "b".into(),
            },
        );

        let loader = PluginLoader::new(
            vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()],
            Arc::new(InMemoryServiceManager::new()),
            DaemonConfig::default(),
        );
        let found = loader.find_by_name("net").unwrap().unwrap();
        assert_eq!(found.manifest.executable, PathBuf::from("a"));
    }

    #[tokio::test]
    async fn register_with_launchd_uses_mach_service_naming_rule() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("vmnet");
        write_manifest(
            &plugin_dir,
            &PluginManifest {
                name: "vmnet".into(),
                types: vec!["network".into()],
                auto_boot: false,
                executable: "bin/vmnet".into(),
            },
        );
        let mgr = Arc::new(InMemoryServiceManager::new());
        let loader = PluginLoader::new(
            vec![root.path().to_path_buf()],
            mgr.clone(),
            DaemonConfig::default(),
        );
        let plugin = loader.find_by_name("vmnet").unwrap().unwrap();
        let label = loader
            .register_with_launchd(&plugin, root.path(), &[], "net-1")
            .await
            .unwrap();
        assert_eq!(label, "com.container/com.container.vmnet.net-1");
        assert!(mgr.is_registered(&label).await.unwrap());
    }
}
