//! Semantic analyzer: advisory, non-blocking findings about a graph's
//! layering, cacheability, security posture, and size (§4.9, §4.10).
//!
//! The distilled source this module is modeled on dispatched these
//! findings fire-and-forget while the rest of analysis continued,
//! which meant two builds of the same graph could report findings in
//! different orders or occasionally drop one under load. Here
//! [`SemanticAnalyzer::analyze`] computes every finding before
//! returning, in a fixed rule order, so the result is deterministic —
//! the reporter's `analyzing` event stream only gets to replay what
//! already exists rather than race to produce it.

use crate::buildgraph::frontend::{Finding, Severity};
use crate::buildgraph::ir::{BuildGraph, FsAction, MetadataOperation, Operation};

/// Produces advisory findings over an already-validated graph.
pub struct SemanticAnalyzer;

impl SemanticAnalyzer {
    /// Construct a new analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run every rule over `graph`, in a fixed order, and return all
    /// findings. Never fails: a semantic analyzer has nothing to reject,
    /// only to advise.
    #[must_use]
    pub fn analyze(&self, graph: &BuildGraph) -> Vec<Finding> {
        let mut findings = Vec::new();
        findings.extend(layer_efficiency(graph));
        findings.extend(cache_invalidation(graph));
        findings.extend(security(graph));
        findings.extend(size(graph));
        findings
    }
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn layer_efficiency(graph: &BuildGraph) -> Vec<Finding> {
    let mut findings = Vec::new();
    for stage in &graph.stages {
        let mut run_streak = 0u32;
        for node in &stage.nodes {
            if matches!(node.operation, Operation::Exec(_)) {
                run_streak += 1;
            } else {
                if run_streak >= 3 {
                    findings.push(Finding {
                        rule: "layer-efficiency".into(),
                        node_id: None,
                        stage_id: Some(stage.id.clone()),
                        message: format!(
                            "stage {} has {run_streak} consecutive exec nodes; consider combining them into one to reduce layer count",
                            stage.id
                        ),
                        severity: Severity::Info,
                    });
                }
                run_streak = 0;
            }
        }
        if run_streak >= 3 {
            findings.push(Finding {
                rule: "layer-efficiency".into(),
                node_id: None,
                stage_id: Some(stage.id.clone()),
                message: format!(
                    "stage {} has {run_streak} consecutive exec nodes; consider combining them into one to reduce layer count",
                    stage.id
                ),
                severity: Severity::Info,
            });
        }
    }
    findings
}

fn cache_invalidation(graph: &BuildGraph) -> Vec<Finding> {
    let mut findings = Vec::new();
    for stage in &graph.stages {
        for (idx, node) in stage.nodes.iter().enumerate() {
            let is_broad_copy = matches!(
                &node.operation,
                Operation::Filesystem(fs)
                    if fs.action == FsAction::Copy && fs.destination == "."
            );
            if is_broad_copy && idx + 1 < stage.nodes.len() {
                let followed_by_run = stage.nodes[idx + 1..]
                    .iter()
                    .any(|n| matches!(n.operation, Operation::Exec(_)));
                if followed_by_run {
                    findings.push(Finding {
                        rule: "cache-invalidator".into(),
                        node_id: Some(node.id.clone()),
                        stage_id: Some(stage.id.clone()),
                        message: "copying the whole context before running build commands invalidates the cache on any source change; copy dependency manifests first".into(),
                        severity: Severity::Warning,
                    });
                }
            }
        }
    }
    findings
}

fn security(graph: &BuildGraph) -> Vec<Finding> {
    let mut findings = Vec::new();
    for stage in &graph.stages {
        let sets_user = stage
            .nodes
            .iter()
            .any(|n| matches!(&n.operation, Operation::Metadata(MetadataOperation::User { .. })));
        let has_exec = stage.nodes.iter().any(|n| matches!(n.operation, Operation::Exec(_)));
        if has_exec && !sets_user {
            findings.push(Finding {
                rule: "security".into(),
                node_id: None,
                stage_id: Some(stage.id.clone()),
                message: format!("stage {} never sets a non-root user; the final image will run as root", stage.id),
                severity: Severity::Warning,
            });
        }
        for node in &stage.nodes {
            if let Operation::Exec(exec) = &node.operation {
                if matches!(exec.security, crate::buildgraph::ir::SecurityMode::Insecure) {
                    findings.push(Finding {
                        rule: "security".into(),
                        node_id: Some(node.id.clone()),
                        stage_id: Some(stage.id.clone()),
                        message: format!("node {} runs with relaxed confinement", node.id),
                        severity: Severity::Warning,
                    });
                }
            }
        }
    }
    findings
}

fn size(graph: &BuildGraph) -> Vec<Finding> {
    let mut findings = Vec::new();
    for stage in &graph.stages {
        for node in &stage.nodes {
            if let Operation::Filesystem(fs) = &node.operation {
                if fs.action == FsAction::Add {
                    findings.push(Finding {
                        rule: "size".into(),
                        node_id: Some(node.id.clone()),
                        stage_id: Some(stage.id.clone()),
                        message: "ADD may fetch or extract an archive of unknown size; prefer an explicit COPY of a pre-fetched artifact".into(),
                        severity: Severity::Info,
                    });
                }
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::frontend::GraphBuilder;

    #[test]
    fn flags_long_exec_streak() {
        let (graph, _) = GraphBuilder::new()
            .stage_from("alpine:3")
            .run(vec!["a".into()])
            .run(vec!["b".into()])
            .run(vec!["c".into()])
            .user("app")
            .done()
            .build()
            .unwrap();
        let findings = SemanticAnalyzer::new().analyze(&graph);
        assert!(findings.iter().any(|f| f.rule == "layer-efficiency"));
    }

    #[test]
    fn flags_missing_user() {
        let (graph, _) = GraphBuilder::new()
            .stage_from("alpine:3")
            .run(vec!["echo".into(), "hi".into()])
            .done()
            .build()
            .unwrap();
        let findings = SemanticAnalyzer::new().analyze(&graph);
        assert!(findings.iter().any(|f| f.rule == "security"));
    }

    #[test]
    fn analysis_is_deterministic_across_runs() {
        let (graph, _) = GraphBuilder::new()
            .stage_from("alpine:3")
            .run(vec!["a".into()])
            .run(vec!["b".into()])
            .run(vec!["c".into()])
            .done()
            .build()
            .unwrap();
        let a = SemanticAnalyzer::new().analyze(&graph);
        let b = SemanticAnalyzer::new().analyze(&graph);
        assert_eq!(a, b);
    }
}
