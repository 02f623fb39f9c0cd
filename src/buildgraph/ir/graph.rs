//! The whole build graph: stages plus build-wide parameters (§3, §4.9).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::stage::Stage;

/// A complete, graph-builder-assembled description of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildGraph {
    /// Stages, in the order they were declared.
    pub stages: Vec<Stage>,
    /// Build argument defaults, keyed by name.
    pub build_args: BTreeMap<String, String>,
    /// Target platforms this graph should be built for.
    pub target_platforms: Vec<String>,
    /// Free-form build metadata, e.g. labels applied to every stage.
    pub metadata: BTreeMap<String, String>,
}

impl BuildGraph {
    /// Construct an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            build_args: BTreeMap::new(),
            target_platforms: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Find a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Find a stage by its user-facing name.
    #[must_use]
    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name.as_deref() == Some(name))
    }

    /// Validate structural invariants: unique stage ids, unique stage
    /// names, every node dependency resolves to a node in the same
    /// stage, and the intra-stage dependency graph is acyclic.
    ///
    /// Cross-stage references (`COPY --from`, stage-sourced mounts) are
    /// checked by the dependency analyzer, which has the frontend's
    /// stage-name table; this validates only what the IR itself can see.
    pub fn validate(&self) -> Result<()> {
        let mut seen_stage_ids = HashSet::new();
        let mut seen_stage_names = HashSet::new();
        for stage in &self.stages {
            if !seen_stage_ids.insert(stage.id.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "duplicate stage id: {}",
                    stage.id
                )));
            }
            if let Some(name) = &stage.name {
                if !seen_stage_names.insert(name.as_str()) {
                    return Err(Error::invalid_argument(format!(
                        "duplicate stage name: {name}"
                    )));
                }
            }
            self.validate_stage_nodes(stage)?;
        }
        Ok(())
    }

    fn validate_stage_nodes(&self, stage: &Stage) -> Result<()> {
        let node_ids: HashSet<&str> = stage.nodes.iter().map(|n| n.id.as_str()).collect();
        for node in &stage.nodes {
            for dep in &node.dependencies {
                if !node_ids.contains(dep.as_str()) {
                    return Err(Error::invalid_argument(format!(
                        "node {} in stage {} depends on unknown node {dep}",
                        node.id, stage.id
                    )));
                }
            }
        }
        detect_cycle(stage)
    }
}

impl Default for BuildGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum VisitState {
    Visiting,
    Done,
}

fn detect_cycle(stage: &Stage) -> Result<()> {
    let adjacency: HashMap<&str, &[String]> = stage
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.dependencies.as_slice()))
        .collect();
    let mut state: HashMap<&str, VisitState> = HashMap::new();

    for node in &stage.nodes {
        if !state.contains_key(node.id.as_str()) {
            visit(node.id.as_str(), &adjacency, &mut state, stage.id.as_str())?;
        }
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    adjacency: &HashMap<&'a str, &'a [String]>,
    state: &mut HashMap<&'a str, VisitState>,
    stage_id: &str,
) -> Result<()> {
    state.insert(id, VisitState::Visiting);
    if let Some(deps) = adjacency.get(id) {
        for dep in deps.iter() {
            match state.get(dep.as_str()) {
                Some(VisitState::Visiting) => {
                    return Err(Error::invalid_argument(format!(
                        "dependency cycle in stage {stage_id} involving node {dep}"
                    )));
                }
                Some(VisitState::Done) => continue,
                None => visit(dep.as_str(), adjacency, state, stage_id)?,
            }
        }
    }
    state.insert(id, VisitState::Done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::ir::node::BuildNode;
    use crate::buildgraph::ir::operation::{ExecNetworkMode, ExecOperation, ImageOperation, ImageSource, Operation, SecurityMode};
    use std::collections::BTreeMap as Map;

    fn exec_node(id: &str, deps: &[&str]) -> BuildNode {
        let mut node = BuildNode::new(
            id,
            Operation::Exec(ExecOperation {
                command: vec!["true".into()],
                env: Map::new(),
                mounts: vec![],
                workdir: None,
                user: None,
                network_mode: ExecNetworkMode::Sandbox,
                security: SecurityMode::Default,
            }),
        );
        node.dependencies = deps.iter().map(|s| s.to_string()).collect();
        node
    }

    fn base_stage(id: &str) -> Stage {
        Stage::new(id, ImageOperation { source: ImageSource::Scratch })
    }

    #[test]
    fn empty_graph_is_valid() {
        assert!(BuildGraph::new().validate().is_ok());
    }

    #[test]
    fn duplicate_stage_id_is_rejected() {
        let mut graph = BuildGraph::new();
        graph.stages.push(base_stage("s1"));
        graph.stages.push(base_stage("s1"));
        assert!(graph.validate().is_err());
    }

    #[test]
    fn duplicate_stage_name_is_rejected() {
        let mut graph = BuildGraph::new();
        let mut a = base_stage("s1");
        a.name = Some("builder".into());
        let mut b = base_stage("s2");
        b.name = Some("builder".into());
        graph.stages.push(a);
        graph.stages.push(b);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let mut graph = BuildGraph::new();
        let mut stage = base_stage("s1");
        stage.nodes.push(exec_node("n1", &["missing"]));
        graph.stages.push(stage);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn self_referential_cycle_is_rejected() {
        let mut graph = BuildGraph::new();
        let mut stage = base_stage("s1");
        stage.nodes.push(exec_node("n1", &["n2"]));
        stage.nodes.push(exec_node("n2", &["n1"]));
        graph.stages.push(stage);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn linear_chain_is_valid() {
        let mut graph = BuildGraph::new();
        let mut stage = base_stage("s1");
        stage.nodes.push(exec_node("n1", &[]));
        stage.nodes.push(exec_node("n2", &["n1"]));
        stage.nodes.push(exec_node("n3", &["n2"]));
        graph.stages.push(stage);
        assert!(graph.validate().is_ok());
    }
}
