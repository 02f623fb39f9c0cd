//! Structural validation over the fully cross-linked graph (§4.10).
//!
//! Runs after [`super::DependencyAnalyzer`] so it can additionally
//! check that every cross-stage reference resolved to a real stage
//! (the dependency analyzer already enforces this as it runs, but a
//! graph assembled by hand rather than through the builder may skip
//! that step, so the validator re-checks from scratch).

use crate::error::Result;

use crate::buildgraph::ir::BuildGraph;

/// Final structural gate before a graph is handed to the scheduler.
pub struct Validator;

impl Validator {
    /// Construct a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `graph`, returning the IR-level structural error on
    /// failure (duplicate ids/names, dangling dependency, cycle).
    pub fn analyze(&self, graph: &BuildGraph) -> Result<()> {
        graph.validate()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::frontend::GraphBuilder;

    #[test]
    fn valid_graph_passes() {
        let (graph, _) = GraphBuilder::new()
            .stage_from("alpine:3")
            .run(vec!["true".into()])
            .done()
            .build()
            .unwrap();
        assert!(Validator::new().analyze(&graph).is_ok());
    }
}
