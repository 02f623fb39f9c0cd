//! On-disk bundle directory owned exclusively by the container service
//! for the lifetime of one container (§3).

use crate::config::AppRoots;
use crate::error::Result;
use std::path::PathBuf;

/// Handle to one container's bundle directory.
#[derive(Debug, Clone)]
pub struct Bundle {
    dir: PathBuf,
}

impl Bundle {
    /// The bundle for `id` under `roots`, without touching the
    /// filesystem.
    #[must_use]
    pub fn at(roots: &AppRoots, id: &str) -> Self {
        Self {
            dir: roots.bundle_dir(id),
        }
    }

    /// Create the bundle directory, write `configuration.json`, clone
    /// the image rootfs from `rootfs_source` via a filesystem clone, and
    /// touch empty log files.
    ///
    /// `clone_rootfs` is left as a callback: the actual clone mechanism
    /// (APFS clonefile, or a snapshotter-backed copy for the build
    /// engine's own use of bundles) is a platform/runtime concern this
    /// module does not own.
    pub fn create(
        &self,
        configuration_json: &[u8],
        clone_rootfs: impl FnOnce(&std::path::Path) -> Result<()>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join("configuration.json"), configuration_json)?;
        std::fs::File::create(self.dir.join("container.log"))?;
        std::fs::File::create(self.dir.join("boot.log"))?;
        let rootfs_dir = self.dir.join("rootfs");
        let result = clone_rootfs(&rootfs_dir);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
        result
    }

    /// Persist `options.json`.
    pub fn write_options(&self, options_json: &[u8]) -> Result<()> {
        std::fs::write(self.dir.join("options.json"), options_json)?;
        Ok(())
    }

    /// Path to `container.log`.
    #[must_use]
    pub fn container_log(&self) -> PathBuf {
        self.dir.join("container.log")
    }

    /// Path to `boot.log`.
    #[must_use]
    pub fn boot_log(&self) -> PathBuf {
        self.dir.join("boot.log")
    }

    /// Whether the bundle directory currently exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Remove the entire bundle directory. A no-op if it does not exist.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_config_and_logs_then_clones_rootfs() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = AppRoots::new(tmp.path());
        let bundle = Bundle::at(&roots, "c1");
        bundle
            .create(b"{}", |rootfs| {
                std::fs::create_dir_all(rootfs)?;
                Ok(())
            })
            .unwrap();
        assert!(bundle.exists());
        assert!(bundle.container_log().is_file());
        assert!(bundle.boot_log().is_file());
    }

    #[test]
    fn create_rolls_back_on_clone_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = AppRoots::new(tmp.path());
        let bundle = Bundle::at(&roots, "c1");
        let result = bundle.create(b"{}", |_rootfs| {
            Err(crate::error::Error::internal("clone failed"))
        });
        assert!(result.is_err());
        assert!(!bundle.exists());
    }

    #[test]
    fn remove_missing_bundle_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = AppRoots::new(tmp.path());
        let bundle = Bundle::at(&roots, "nonexistent");
        bundle.remove().unwrap();
    }
}
