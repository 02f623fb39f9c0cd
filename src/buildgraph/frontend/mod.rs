//! Graph builder and Dockerfile-syntax frontend (§4.10).

pub mod builder;
pub mod dockerfile;

pub use builder::GraphBuilder;
pub use dockerfile::DockerfileFrontend;

/// An advisory observation produced by the semantic analyzer (§4.10).
/// Findings never block a build; they are surfaced to callers via the
/// reporter's `analyzing` event stream.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Finding {
    /// Which rule produced this finding, e.g. `"layer-efficiency"`.
    pub rule: String,
    /// Id of the node the finding concerns, if any.
    pub node_id: Option<String>,
    /// Id of the stage the finding concerns, if any.
    pub stage_id: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Relative severity, for sorting/filtering in UIs.
    pub severity: Severity,
}

/// Severity of an advisory finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    /// Informational; no action implied.
    Info,
    /// Worth a look; not a correctness concern.
    Warning,
}
