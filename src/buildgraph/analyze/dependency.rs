//! Dependency analyzer: resolves edges the builder cannot see on its own
//! (§4.9, §4.10).
//!
//! Within a stage, instruction order already implies sequential
//! dependencies (wired by [`crate::buildgraph::frontend::builder`] as
//! nodes are appended). This analyzer adds the edges that only become
//! visible once the whole graph is assembled: a `COPY --from=<stage>`
//! or stage-sourced mount must wait on every node in the referenced
//! stage, since the source stage's filesystem state is only final once
//! its last node completes.

use std::collections::HashMap;

use crate::error::{Error, Result};

use crate::buildgraph::ir::{BuildGraph, FsSource, MountSource, Operation};

/// Resolves cross-stage references into explicit dependency edges.
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// Construct a new analyzer. Stateless; a method rather than a free
    /// function for symmetry with [`crate::buildgraph::analyze::Validator`]
    /// and [`crate::buildgraph::analyze::SemanticAnalyzer`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Mutate `graph` in place, adding a dependency from every node that
    /// references another stage to that stage's last node.
    pub fn analyze(&self, graph: &mut BuildGraph) -> Result<()> {
        let last_node_by_stage = last_nodes(graph);

        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for (stage_idx, stage) in graph.stages.iter().enumerate() {
            for (node_idx, node) in stage.nodes.iter().enumerate() {
                if let Some(referenced) = referenced_stage(&node.operation) {
                    let last = last_node_by_stage.get(referenced).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "node {} references unknown stage {referenced}",
                            node.id
                        ))
                    })?;
                    if last == &node.id {
                        continue;
                    }
                    edits.push((stage_idx, node_idx, last.clone()));
                }
            }
        }

        for (stage_idx, node_idx, dep_id) in edits {
            let node = &mut graph.stages[stage_idx].nodes[node_idx];
            if !node.dependencies.contains(&dep_id) {
                node.dependencies.push(dep_id);
            }
        }
        Ok(())
    }
}

impl Default for DependencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn last_nodes(graph: &BuildGraph) -> HashMap<&str, String> {
    let mut map = HashMap::new();
    for stage in &graph.stages {
        if let Some(last) = stage.nodes.last() {
            map.insert(stage.id.as_str(), last.id.clone());
            if let Some(name) = &stage.name {
                map.insert(name.as_str(), last.id.clone());
            }
        }
    }
    map
}

fn referenced_stage(operation: &Operation) -> Option<&str> {
    match operation {
        Operation::Filesystem(fs) => match &fs.source {
            FsSource::Stage { stage_id, .. } => Some(stage_id.as_str()),
            _ => None,
        },
        Operation::Exec(exec) => exec.mounts.iter().find_map(|m| match &m.source {
            MountSource::Stage { stage_id } => Some(stage_id.as_str()),
            _ => None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::frontend::GraphBuilder;

    #[test]
    fn cross_stage_copy_depends_on_source_stage_last_node() {
        let (built, _findings) = GraphBuilder::new()
            .stage_from("golang:1")
            .named("builder")
            .run(vec!["go".into(), "build".into()])
            .run(vec!["strip".into(), "bin".into()])
            .done()
            .stage_from("alpine:3")
            .named("runtime")
            .copy_from_stage("builder", "/app/bin", "/usr/local/bin/app")
            .done()
            .build()
            .unwrap();
        let runtime = built.stage_by_name("runtime").unwrap();
        let builder_stage = built.stage_by_name("builder").unwrap();
        let last_builder_node = builder_stage.nodes.last().unwrap().id.clone();
        assert!(runtime.nodes[0].dependencies.contains(&last_builder_node));
    }

    #[test]
    fn unknown_stage_reference_is_rejected() {
        use crate::buildgraph::ir::{BuildGraph, BuildNode, FilesystemOperation, FsAction, FsMetadata, ImageOperation, ImageSource, Stage};
        let mut graph = BuildGraph::new();
        let mut stage = Stage::new("s1", ImageOperation { source: ImageSource::Scratch });
        stage.nodes.push(BuildNode::new(
            "n1",
            Operation::Filesystem(FilesystemOperation {
                action: FsAction::Copy,
                source: FsSource::Stage { stage_id: "missing".into(), path: "/x".into() },
                destination: "/y".into(),
                metadata: FsMetadata::default(),
            }),
        ));
        graph.stages.push(stage);
        assert!(DependencyAnalyzer::new().analyze(&mut graph).is_err());
    }
}
