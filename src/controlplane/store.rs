//! Directory-per-id, filesystem-backed keyed record store (§4.2).
//!
//! The store persists network configuration records as JSON. It does not
//! mediate concurrency; callers (the network service) serialize access
//! through their own single-writer lock.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Anything a stored entity must provide: a stable directory-safe id.
pub trait Entity: Serialize + DeserializeOwned {
    /// The id used as the entity's directory name.
    fn id(&self) -> &str;
}

/// A directory-per-id store rooted at `root`. Each entity lives at
/// `{root}/{id}/record.json`.
#[derive(Debug, Clone)]
pub struct EntityStore<T> {
    root: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Entity> EntityStore<T> {
    /// Open (without creating) a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _marker: PhantomData,
        }
    }

    fn entity_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.entity_dir(id).join("record.json")
    }

    /// Create a new entity. Fails with [`Error::exists`] if the id
    /// directory already exists. Writes are atomic: a temp file is
    /// written and renamed into place, then the parent directory is
    /// fsync'd so the rename is durable.
    pub fn create(&self, entity: &T) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let dir = self.entity_dir(entity.id());
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::exists(format!(
                    "entity already exists: {}",
                    entity.id()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.write_record(&dir, entity);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&dir);
        }
        result
    }

    fn write_record(&self, dir: &Path, entity: &T) -> Result<()> {
        let payload = serde_json::to_vec_pretty(entity)?;
        let tmp_path = dir.join("record.json.tmp");
        std::fs::write(&tmp_path, &payload)?;
        std::fs::rename(&tmp_path, dir.join("record.json"))?;
        fsync_dir(dir)?;
        Ok(())
    }

    /// Fetch the entity stored under `id`.
    pub fn get(&self, id: &str) -> Result<T> {
        let path = self.record_path(id);
        let bytes = std::fs::read(&path)
            .map_err(|_| Error::not_found(format!("no entity with id: {id}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// List every entity currently persisted, in directory-listing order.
    pub fn list(&self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let record = entry.path().join("record.json");
            if !record.exists() {
                continue;
            }
            let bytes = std::fs::read(&record)?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Delete the entity stored under `id`. A no-op if it does not exist.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.entity_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<()> {
    let file = std::fs::File::open(dir)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        value: u32,
    }

    impl Entity for Widget {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn create_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store: EntityStore<Widget> = EntityStore::new(dir.path());
        let w = Widget {
            id: "w1".into(),
            value: 42,
        };
        store.create(&w).unwrap();
        assert_eq!(store.get("w1").unwrap(), w);
        store.delete("w1").unwrap();
        assert_eq!(store.get("w1").unwrap_err().category(), "not_found");
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let store: EntityStore<Widget> = EntityStore::new(dir.path());
        let w = Widget {
            id: "w1".into(),
            value: 1,
        };
        store.create(&w).unwrap();
        let err = store.create(&w).unwrap_err();
        assert_eq!(err.category(), "exists");
    }

    #[test]
    fn list_returns_all_persisted_entities() {
        let dir = tempfile::tempdir().unwrap();
        let store: EntityStore<Widget> = EntityStore::new(dir.path());
        store
            .create(&Widget {
                id: "a".into(),
                value: 1,
            })
            .unwrap();
        store
            .create(&Widget {
                id: "b".into(),
                value: 2,
            })
            .unwrap();
        let mut listed = store.list().unwrap();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "a");
        assert_eq!(listed[1].id, "b");
    }

    #[test]
    fn delete_missing_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store: EntityStore<Widget> = EntityStore::new(dir.path());
        store.delete("missing").unwrap();
    }
}
