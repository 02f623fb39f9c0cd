//! Per-architecture default kernel management (§4.8).

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::AppRoots;
use crate::controlplane::rpc::ProgressSink;
use crate::error::{Error, Result};

/// A target platform's CPU architecture, e.g. `"arm64"`, `"amd64"`.
pub type Arch = String;

/// Fetches, extracts, and symlinks the default kernel per architecture.
pub struct KernelService {
    roots: AppRoots,
}

impl KernelService {
    /// Build a service rooted at `roots`.
    #[must_use]
    pub fn new(roots: AppRoots) -> Self {
        Self { roots }
    }

    /// Copy `file` into the kernel directory and atomically re-point
    /// `default.kernel-{arch}` at it.
    pub fn install_kernel(&self, file: &Path, platform: &Arch) -> Result<PathBuf> {
        std::fs::create_dir_all(self.roots.kernels_dir())?;
        let file_name = file
            .file_name()
            .ok_or_else(|| Error::invalid_argument("kernel file has no name"))?;
        let installed_path = self.roots.kernels_dir().join(file_name);
        std::fs::copy(file, &installed_path)?;
        self.repoint_symlink(platform, &installed_path)?;
        info!(platform = %platform, path = %installed_path.display(), "installed kernel");
        Ok(installed_path)
    }

    /// Download `tar_url` to a unique temp directory, extract it,
    /// resolve `inner_path` within the extraction, and install that as
    /// the default kernel for `platform`. Download and extraction are
    /// delegated to the caller-supplied closures so this module does not
    /// own HTTP or archive format concerns (both are external
    /// collaborators per §1); progress is reported best-effort.
    pub fn install_kernel_from(
        &self,
        tar_url: &str,
        inner_path: &Path,
        platform: &Arch,
        download: impl FnOnce(&str, &Path, &ProgressSink) -> Result<()>,
        extract: impl FnOnce(&Path, &Path) -> Result<()>,
        progress: &ProgressSink,
    ) -> Result<PathBuf> {
        let temp_dir = std::env::temp_dir().join(format!(
            "container-kernel-{}",
            uuid_like_suffix()
        ));
        std::fs::create_dir_all(&temp_dir)?;
        let tar_path = temp_dir.join("kernel.tar");

        debug!(url = tar_url, "downloading kernel archive");
        download(tar_url, &tar_path, progress)?;
        extract(&tar_path, &temp_dir)?;

        let resolved = std::fs::canonicalize(temp_dir.join(inner_path))
            .map_err(|_| Error::not_found("kernel inner path not found after extraction"))?;
        let installed = self.install_kernel(&resolved, platform)?;
        let _ = std::fs::remove_dir_all(&temp_dir);
        Ok(installed)
    }

    /// Resolve the default kernel symlink for `platform`.
    pub fn get_default_kernel(&self, platform: &Arch) -> Result<(PathBuf, Arch)> {
        let link = self.roots.default_kernel_link(platform);
        let target = std::fs::read_link(&link)
            .map_err(|_| Error::not_found(format!("no default kernel for platform {platform}")))?;
        let resolved = if target.is_absolute() {
            target
        } else {
            self.roots.kernels_dir().join(target)
        };
        if !resolved.is_file() {
            return Err(Error::not_found(format!(
                "default kernel symlink for {platform} points at a missing file"
            )));
        }
        Ok((resolved, platform.clone()))
    }

    fn repoint_symlink(&self, platform: &Arch, target: &Path) -> Result<()> {
        let link = self.roots.default_kernel_link(platform);
        let tmp_link = self
            .roots
            .kernels_dir()
            .join(format!(".default.kernel-{platform}.tmp"));
        let _ = std::fs::remove_file(&tmp_link);
        symlink(target, &tmp_link)?;
        std::fs::rename(&tmp_link, &link)?;
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::fs::copy(target, link)?;
    Ok(())
}

fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_get_default_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = AppRoots::new(tmp.path());
        let svc = KernelService::new(roots);

        let source = tmp.path().join("vmlinux-arm64");
        std::fs::write(&source, b"fake kernel bytes").unwrap();

        let installed = svc.install_kernel(&source, &"arm64".to_string()).unwrap();
        let (resolved, arch) = svc.get_default_kernel(&"arm64".to_string()).unwrap();
        assert_eq!(resolved, installed);
        assert_eq!(arch, "arm64");
    }

    #[test]
    fn get_default_kernel_missing_arch_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = AppRoots::new(tmp.path());
        let svc = KernelService::new(roots);
        let err = svc.get_default_kernel(&"riscv64".to_string()).unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[test]
    fn reinstalling_repoints_symlink_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = AppRoots::new(tmp.path());
        let svc = KernelService::new(roots);

        let v1 = tmp.path().join("v1");
        std::fs::write(&v1, b"v1").unwrap();
        svc.install_kernel(&v1, &"arm64".to_string()).unwrap();

        let v2 = tmp.path().join("v2");
        std::fs::write(&v2, b"v2").unwrap();
        let installed_v2 = svc.install_kernel(&v2, &"arm64".to_string()).unwrap();

        let (resolved, _) = svc.get_default_kernel(&"arm64".to_string()).unwrap();
        assert_eq!(resolved, installed_v2);
    }
}
