//! Contract with the host service supervisor (launchd on macOS) (§4.4).
//!
//! The daemon never talks to launchd directly in this crate — that
//! binding is an external collaborator (§1) — but every service that
//! registers helper processes programs against this trait, and tests
//! exercise it against an in-memory fake.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Register/deregister/kickstart/enumerate long-lived child services.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Register a service described by the plist at `plist_path`,
    /// returning its label.
    async fn register(&self, plist_path: &Path, label: &str) -> Result<()>;

    /// Deregister the service with the given label. A no-op if it is
    /// not currently registered.
    async fn deregister(&self, label: &str) -> Result<()>;

    /// Restart the service with the given label.
    async fn kickstart(&self, label: &str) -> Result<()>;

    /// List the labels of every currently registered service.
    async fn enumerate(&self) -> Result<Vec<String>>;

    /// Whether `label` is currently registered.
    async fn is_registered(&self, label: &str) -> Result<bool> {
        Ok(self.enumerate().await?.iter().any(|l| l == label))
    }
}

/// An in-memory [`ServiceManager`] used by tests and by any embedding
/// that does not have a real launchd to talk to.
#[derive(Default)]
pub struct InMemoryServiceManager {
    registered: Mutex<HashSet<String>>,
    kickstarts: Mutex<Vec<String>>,
    plist_paths: Mutex<Vec<PathBuf>>,
}

impl InMemoryServiceManager {
    /// A fresh, empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `kickstart` has been called, for assertions.
    #[must_use]
    pub fn kickstart_count(&self, label: &str) -> usize {
        self.kickstarts
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.as_str() == label)
            .count()
    }
}

#[async_trait]
impl ServiceManager for InMemoryServiceManager {
    async fn register(&self, plist_path: &Path, label: &str) -> Result<()> {
        let mut registered = self.registered.lock().unwrap();
        if !registered.insert(label.to_string()) {
            return Err(Error::exists(format!("already registered: {label}")));
        }
        self.plist_paths.lock().unwrap().push(plist_path.to_path_buf());
        Ok(())
    }

    async fn deregister(&self, label: &str) -> Result<()> {
        self.registered.lock().unwrap().remove(label);
        Ok(())
    }

    async fn kickstart(&self, label: &str) -> Result<()> {
        if !self.registered.lock().unwrap().contains(label) {
            return Err(Error::not_found(format!("not registered: {label}")));
        }
        self.kickstarts.lock().unwrap().push(label.to_string());
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        Ok(self.registered.lock().unwrap().iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_enumerate_and_deregister() {
        let mgr = InMemoryServiceManager::new();
        mgr.register(Path::new("/tmp/x.plist"), "com.container/helper.1")
            .await
            .unwrap();
        assert!(mgr.is_registered("com.container/helper.1").await.unwrap());
        mgr.deregister("com.container/helper.1").await.unwrap();
        assert!(!mgr.is_registered("com.container/helper.1").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_register_fails_exists() {
        let mgr = InMemoryServiceManager::new();
        mgr.register(Path::new("/tmp/x.plist"), "label").await.unwrap();
        let err = mgr
            .register(Path::new("/tmp/x.plist"), "label")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "exists");
    }

    #[tokio::test]
    async fn kickstart_requires_prior_registration() {
        let mgr = InMemoryServiceManager::new();
        assert!(mgr.kickstart("missing").await.is_err());
        mgr.register(Path::new("/tmp/x.plist"), "label").await.unwrap();
        mgr.kickstart("label").await.unwrap();
        assert_eq!(mgr.kickstart_count("label"), 1);
    }
}
