//! A named phase of the build graph, rooted at a base image (§3, §4.9).

use serde::{Deserialize, Serialize};

use super::node::BuildNode;
use super::operation::ImageOperation;

/// One stage: a base image plus the nodes built on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique id within the owning graph.
    pub id: String,
    /// Optional user-facing name, e.g. a Dockerfile `AS builder` alias.
    /// Referenced by other stages' `COPY --from=name` and mount sources.
    pub name: Option<String>,
    /// The base rootfs this stage starts from.
    pub base: ImageOperation,
    /// Nodes in this stage, in the order they were added. Dependency
    /// edges (not this order) determine execution order.
    pub nodes: Vec<BuildNode>,
    /// Target platform for this stage, if overridden from the graph
    /// default.
    pub platform: Option<String>,
}

impl Stage {
    /// Construct an empty stage rooted at `base`.
    #[must_use]
    pub fn new(id: impl Into<String>, base: ImageOperation) -> Self {
        Self {
            id: id.into(),
            name: None,
            base,
            nodes: Vec::new(),
            platform: None,
        }
    }

    /// Find a node by id within this stage.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&BuildNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The resolved platform for this stage, falling back to
    /// `graph_default` when unset.
    #[must_use]
    pub fn resolved_platform<'a>(&'a self, graph_default: &'a str) -> &'a str {
        self.platform.as_deref().unwrap_or(graph_default)
    }
}
