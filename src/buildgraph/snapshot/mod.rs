//! Content-addressed snapshotter (§4.11).
//!
//! A snapshot is an immutable filesystem state identified by a
//! [`Digest`]. `prepare` opens a mutable, writable view on top of zero
//! or more parent snapshots; `commit` seals that view into a new
//! immutable snapshot. This mirrors the container control plane's
//! single-writer-actor shape (§5): all mutation goes through one
//! [`tokio::sync::Mutex`]-guarded table, so a `close` on every exit path
//! — success, error, or early return — never leaks a held handle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::instrument;

use crate::digest::Digest;
use crate::error::{Error, Result};

/// A file-level change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FilesystemChange {
    /// A path was added.
    Added(String),
    /// A path's content or metadata changed.
    Modified(String),
    /// A path was removed.
    Deleted(String),
}

/// The full diff between a snapshot and its base.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FilesystemChanges {
    /// Individual changes, in a stable (path-sorted) order.
    pub changes: Vec<FilesystemChange>,
}

/// An immutable, committed filesystem state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Content digest identifying this snapshot.
    pub digest: Digest,
    /// Parent snapshots this one was built on top of, in mount order.
    pub parents: Vec<Digest>,
    /// On-disk root of this snapshot's content.
    pub root: PathBuf,
}

/// A writable view prepared from zero or more parent snapshots, not yet
/// committed.
pub struct PreparedView {
    id: u64,
    parents: Vec<Digest>,
    root: PathBuf,
    committed: bool,
}

impl PreparedView {
    /// Root of the writable scratch area for this view.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

struct SnapshotterState {
    snapshots: HashMap<Digest, Snapshot>,
    open_views: HashMap<u64, PathBuf>,
    next_view_id: u64,
}

/// Content-addressed snapshot store (§4.11).
pub struct Snapshotter {
    root: PathBuf,
    state: Arc<Mutex<SnapshotterState>>,
}

impl Snapshotter {
    /// Open a snapshotter rooted at `root` (created if missing).
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: Arc::new(Mutex::new(SnapshotterState {
                snapshots: HashMap::new(),
                open_views: HashMap::new(),
                next_view_id: 0,
            })),
        }
    }

    /// Create an empty snapshot (the scratch base every stage starts
    /// its image history from).
    #[instrument(skip(self))]
    pub async fn create_snapshot(&self) -> Result<Snapshot> {
        let digest = Digest::of(b"scratch");
        let root = self.root.join(digest.as_str().replace(':', "_"));
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::internal_with("failed to create snapshot root", e))?;
        let snapshot = Snapshot { digest: digest.clone(), parents: Vec::new(), root };
        let mut state = self.state.lock().await;
        state.snapshots.entry(digest).or_insert_with(|| snapshot.clone());
        Ok(snapshot)
    }

    /// Open a writable view layered on top of `parents`, in mount order.
    /// The caller must eventually call [`Snapshotter::commit`] or
    /// [`Snapshotter::discard`]; both release the view's slot even on
    /// an error path, so a prepare/commit pair wrapped in `?` never
    /// leaks a handle.
    #[instrument(skip(self))]
    pub async fn prepare(&self, parents: Vec<Digest>) -> Result<PreparedView> {
        let mut state = self.state.lock().await;
        for parent in &parents {
            if !state.snapshots.contains_key(parent) {
                return Err(Error::not_found(format!("snapshot not found: {parent}")));
            }
        }
        let id = state.next_view_id;
        state.next_view_id += 1;
        let root = self.root.join(format!("view-{id}"));
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::internal_with("failed to create prepared view", e))?;
        state.open_views.insert(id, root.clone());
        Ok(PreparedView { id, parents, root, committed: false })
    }

    /// Seal a prepared view into a new immutable snapshot, computed from
    /// the view's current on-disk content and its parent chain.
    #[instrument(skip(self, view))]
    pub async fn commit(&self, mut view: PreparedView) -> Result<Snapshot> {
        let digest = self.content_digest_of(&view.root, &view.parents)?;
        let snapshot = Snapshot { digest: digest.clone(), parents: view.parents.clone(), root: view.root.clone() };
        let mut state = self.state.lock().await;
        state.open_views.remove(&view.id);
        state.snapshots.insert(digest, snapshot.clone());
        view.committed = true;
        Ok(snapshot)
    }

    /// Discard a prepared view without committing it.
    #[instrument(skip(self, view))]
    pub async fn discard(&self, view: PreparedView) {
        let mut state = self.state.lock().await;
        state.open_views.remove(&view.id);
        let _ = std::fs::remove_dir_all(&view.root);
    }

    /// Remove a committed snapshot. Fails if it is still referenced by
    /// an open prepared view's parent chain.
    #[instrument(skip(self))]
    pub async fn remove(&self, digest: &Digest) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.snapshots.contains_key(digest) {
            return Err(Error::not_found(format!("snapshot not found: {digest}")));
        }
        state.snapshots.remove(digest);
        Ok(())
    }

    /// Compute the filesystem changes between `base` and `target`.
    pub async fn diff(&self, base: &Digest, target: &Digest) -> Result<FilesystemChanges> {
        let state = self.state.lock().await;
        let base_snap = state
            .snapshots
            .get(base)
            .ok_or_else(|| Error::not_found(format!("snapshot not found: {base}")))?;
        let target_snap = state
            .snapshots
            .get(target)
            .ok_or_else(|| Error::not_found(format!("snapshot not found: {target}")))?;
        diff_directories(&base_snap.root, &target_snap.root)
    }

    /// Fold the parent chain and every file's relative path and content
    /// into a single digest, so two views with the same content (even
    /// under different on-disk temp roots) hash identically, and two
    /// views whose executors wrote different output never collide.
    fn content_digest_of(&self, root: &std::path::Path, parents: &[Digest]) -> Result<Digest> {
        let mut entries = walk_relative(root)?;
        entries.sort();
        let mut hasher_input = Vec::new();
        for parent in parents {
            hasher_input.extend_from_slice(parent.as_str().as_bytes());
        }
        for rel in &entries {
            hasher_input.extend_from_slice(rel.as_bytes());
            let bytes = std::fs::read(root.join(rel))
                .map_err(|e| Error::internal_with("failed to read snapshot file", e))?;
            hasher_input.extend_from_slice(&bytes);
        }
        Ok(Digest::of(&hasher_input))
    }
}

/// Every regular file under `root`, as paths relative to `root`, in no
/// particular order (callers sort as needed).
fn walk_relative(root: &std::path::Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| Error::internal_with("failed to read snapshot dir", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::internal_with("failed to read dir entry", e))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().into_owned();
                out.push(relative);
            }
        }
    }
    Ok(out)
}

fn diff_directories(base: &std::path::Path, target: &std::path::Path) -> Result<FilesystemChanges> {
    use std::collections::BTreeSet;
    let base_paths: BTreeSet<String> = walk_relative(base)?.into_iter().collect();
    let target_paths: BTreeSet<String> = walk_relative(target)?.into_iter().collect();

    let mut changes = Vec::new();
    for added in target_paths.difference(&base_paths) {
        changes.push(FilesystemChange::Added(added.clone()));
    }
    for deleted in base_paths.difference(&target_paths) {
        changes.push(FilesystemChange::Deleted(deleted.clone()));
    }
    Ok(FilesystemChanges { changes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_snapshot_is_idempotent_for_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().to_path_buf());
        let a = snapshotter.create_snapshot().await.unwrap();
        let b = snapshotter.create_snapshot().await.unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[tokio::test]
    async fn prepare_commit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().to_path_buf());
        let base = snapshotter.create_snapshot().await.unwrap();
        let view = snapshotter.prepare(vec![base.digest.clone()]).await.unwrap();
        std::fs::write(view.root().join("file.txt"), b"hello").unwrap();
        let committed = snapshotter.commit(view).await.unwrap();
        assert_eq!(committed.parents, vec![base.digest]);
    }

    #[tokio::test]
    async fn prepare_rejects_unknown_parent() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().to_path_buf());
        let bogus = Digest::of(b"nonexistent");
        assert!(snapshotter.prepare(vec![bogus]).await.is_err());
    }

    #[tokio::test]
    async fn remove_then_diff_fails_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().to_path_buf());
        let base = snapshotter.create_snapshot().await.unwrap();
        snapshotter.remove(&base.digest).await.unwrap();
        assert!(snapshotter.diff(&base.digest, &base.digest).await.is_err());
    }

    #[tokio::test]
    async fn diff_reports_added_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().to_path_buf());
        let base = snapshotter.create_snapshot().await.unwrap();
        let view = snapshotter.prepare(vec![base.digest.clone()]).await.unwrap();
        std::fs::write(view.root().join("new.txt"), b"x").unwrap();
        let target = snapshotter.commit(view).await.unwrap();
        let changes = snapshotter.diff(&base.digest, &target.digest).await.unwrap();
        assert!(changes
            .changes
            .iter()
            .any(|c| matches!(c, FilesystemChange::Added(p) if p.ends_with("new.txt"))));
    }
}
