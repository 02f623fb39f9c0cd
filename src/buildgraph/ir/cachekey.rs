//! Cache key computation (§4.9, §4.12).
//!
//! A node's cache key folds its own operation digest together with its
//! dependencies' cache keys (in dependency order) and the target
//! platform, so that a change anywhere upstream invalidates everything
//! downstream without re-walking the whole graph on every lookup.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

use super::operation::Operation;

/// A collision-resistant key identifying one node's cacheable output,
/// given its full upstream input set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Digest);

impl CacheKey {
    /// Compute a node's cache key from its own operation, its
    /// dependencies' cache keys in dependency order, and the resolved
    /// platform string.
    #[must_use]
    pub fn compute(operation: &Operation, dependency_keys: &[CacheKey], platform: &str) -> Self {
        let op_digest = operation.content_digest();
        let mut parts = vec![op_digest];
        parts.extend(dependency_keys.iter().map(|k| k.0.clone()));
        parts.push(Digest::of(platform.as_bytes()));
        CacheKey(Digest::combine(parts.iter()))
    }

    /// The underlying digest.
    #[must_use]
    pub fn digest(&self) -> &Digest {
        &self.0
    }
}
