//! App roots and daemon configuration.
//!
//! Mirrors the teacher's habit of deriving prerequisites from the
//! environment (`prerequisites.rs` reads `DOCKER_HOST`, binary search
//! paths, and so on) rather than inventing a bespoke config-file format.
//! Every field has a default; environment variables under the
//! `CONTAINER_` prefix override it.

use std::path::PathBuf;

const ENV_PREFIX: &str = "CONTAINER_";

/// On-disk layout root, per §6: `{appRoot}/containers`, `/networks`,
/// `/kernels`, `/apiserver`.
#[derive(Debug, Clone)]
pub struct AppRoots {
    root: PathBuf,
}

impl AppRoots {
    /// Build roots under the given base directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read `CONTAINER_APP_ROOT`, falling back to `~/Library/Application
    /// Support/container` when unset (or `/var/lib/container` if `HOME`
    /// is unavailable, matching the teacher's "never panic on missing
    /// environment" posture).
    #[must_use]
    pub fn from_env() -> Self {
        if let Ok(root) = std::env::var(format!("{ENV_PREFIX}APP_ROOT")) {
            return Self::new(root);
        }
        let base = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join("Library/Application Support/container"))
            .unwrap_or_else(|_| PathBuf::from("/var/lib/container"));
        Self::new(base)
    }

    /// `{appRoot}/containers`.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// `{appRoot}/containers/{id}`.
    #[must_use]
    pub fn bundle_dir(&self, id: &str) -> PathBuf {
        self.containers_dir().join(id)
    }

    /// `{appRoot}/networks`.
    #[must_use]
    pub fn networks_dir(&self) -> PathBuf {
        self.root.join("networks")
    }

    /// `{appRoot}/networks/{id}`.
    #[must_use]
    pub fn network_dir(&self, id: &str) -> PathBuf {
        self.networks_dir().join(id)
    }

    /// `{appRoot}/kernels`.
    #[must_use]
    pub fn kernels_dir(&self) -> PathBuf {
        self.root.join("kernels")
    }

    /// `{appRoot}/kernels/default.kernel-{arch}`.
    #[must_use]
    pub fn default_kernel_link(&self, arch: &str) -> PathBuf {
        self.kernels_dir().join(format!("default.kernel-{arch}"))
    }

    /// `{appRoot}/apiserver/apiserver.log`.
    #[must_use]
    pub fn apiserver_log(&self) -> PathBuf {
        self.root.join("apiserver").join("apiserver.log")
    }

    /// The root itself.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

/// Daemon-wide tunables, each overridable via `CONTAINER_*` environment
/// variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Mach/launchd service domain, e.g. `com.example.container`.
    pub service_domain: String,
    /// Label prefix for helper services (`{prefix}.{runtime}.{instance}`).
    pub service_prefix: String,
    /// Default CIDR used when a network is created without an explicit
    /// subnet.
    pub default_cidr: String,
    /// Ordered plugin search path.
    pub plugin_search_path: Vec<PathBuf>,
    /// Global scheduler concurrency ceiling for the build engine.
    pub max_scheduler_concurrency: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            service_domain: "com.container".to_string(),
            service_prefix: "com.container.".to_string(),
            default_cidr: "192.168.64.0/24".to_string(),
            plugin_search_path: vec![
                PathBuf::from("/usr/local/libexec/container/plugins"),
                PathBuf::from("/opt/container/plugins"),
            ],
            max_scheduler_concurrency: num_cpus_fallback(),
        }
    }
}

impl DaemonConfig {
    /// Start from defaults, then apply any `CONTAINER_*` overrides found
    /// in the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}SERVICE_DOMAIN")) {
            cfg.service_domain = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}SERVICE_PREFIX")) {
            cfg.service_prefix = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}DEFAULT_CIDR")) {
            cfg.default_cidr = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}PLUGIN_PATH")) {
            cfg.plugin_search_path = std::env::split_paths(&v).collect();
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}MAX_CONCURRENCY")) {
            if let Ok(n) = v.parse() {
                cfg.max_scheduler_concurrency = n;
            }
        }
        cfg
    }

    /// The launchd label for a helper service instance, per §4.4:
    /// `{domain}/{prefix}.{runtime}.{instance-id}`.
    #[must_use]
    pub fn helper_label(&self, runtime: &str, instance_id: &str) -> String {
        format!(
            "{}/{}{runtime}.{instance_id}",
            self.service_domain, self.service_prefix
        )
    }

    /// The daemon's own launchd label: `{prefix}apiserver`.
    #[must_use]
    pub fn apiserver_label(&self) -> String {
        format!("{}apiserver", self.service_prefix)
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_dir_nests_under_containers() {
        let roots = AppRoots::new("/tmp/root");
        assert_eq!(
            roots.bundle_dir("c1"),
            PathBuf::from("/tmp/root/containers/c1")
        );
    }

    #[test]
    fn helper_label_matches_spec_shape() {
        let cfg = DaemonConfig::default();
        assert_eq!(
            cfg.helper_label("linux-vm", "abc123"),
            "com.container/com.container.linux-vm.abc123"
        );
        assert_eq!(cfg.apiserver_label(), "com.container.apiserver");
    }
}
