//! A single unit of work within a stage (§3, §4.9).

use serde::{Deserialize, Serialize};

use super::cachekey::CacheKey;
use super::operation::Operation;

/// Constraints a node's execution must satisfy, independent of the
/// operation itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConstraints {
    /// Target platform override, e.g. `"linux/arm64"`. `None` inherits
    /// the owning stage's platform.
    pub platform: Option<String>,
    /// Disable cache lookups for this node even if its cache key hits.
    pub no_cache: bool,
}

/// One node in the build graph: an operation plus the edges and
/// constraints around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNode {
    /// Unique id within the owning graph.
    pub id: String,
    /// The work this node performs.
    pub operation: Operation,
    /// Ids of nodes that must complete before this one runs. Order is
    /// insertion order as recorded by the dependency analyzer, not
    /// significant to identity.
    pub dependencies: Vec<String>,
    /// Execution constraints.
    pub constraints: NodeConstraints,
}

impl BuildNode {
    /// Construct a node with no dependencies and default constraints.
    #[must_use]
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            operation,
            dependencies: Vec::new(),
            constraints: NodeConstraints::default(),
        }
    }

    /// Compute this node's cache key given its dependencies' already
    /// computed cache keys, in the same order as `self.dependencies`.
    #[must_use]
    pub fn cache_key(&self, dependency_keys: &[CacheKey], platform: &str) -> CacheKey {
        CacheKey::compute(&self.operation, dependency_keys, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::ir::operation::{ImageOperation, ImageSource};

    #[test]
    fn new_node_has_no_dependencies() {
        let node = BuildNode::new("n1", Operation::Image(ImageOperation { source: ImageSource::Scratch }));
        assert!(node.dependencies.is_empty());
        assert!(!node.constraints.no_cache);
    }

    #[test]
    fn cache_key_is_stable_for_same_inputs() {
        let node = BuildNode::new("n1", Operation::Image(ImageOperation { source: ImageSource::Scratch }));
        let k1 = node.cache_key(&[], "linux/amd64");
        let k2 = node.cache_key(&[], "linux/amd64");
        assert_eq!(k1, k2);
    }

    #[test]
    fn cache_key_changes_with_platform() {
        let node = BuildNode::new("n1", Operation::Image(ImageOperation { source: ImageSource::Scratch }));
        let amd = node.cache_key(&[], "linux/amd64");
        let arm = node.cache_key(&[], "linux/arm64");
        assert_ne!(amd, arm);
    }
}
