//! Fluent graph builder (§4.10).
//!
//! Mirrors a Dockerfile's instruction order without depending on
//! Dockerfile syntax: callers assemble a graph stage by stage, node by
//! node, then call [`GraphBuilder::build`] to run the analyzer pipeline
//! and get back a validated [`BuildGraph`].

use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::super::analyze::{DependencyAnalyzer, SemanticAnalyzer, Validator};
use super::super::ir::{
    BuildGraph, BuildNode, ExecNetworkMode, ExecOperation, FilesystemOperation, FsAction,
    FsMetadata, FsSource, ImageOperation, ImageSource, MetadataOperation, Mount, Operation,
    SecurityMode, Stage,
};
use super::Finding;

/// Builds a stage within a [`GraphBuilder`]. Returned by
/// [`GraphBuilder::stage`]; call [`StageBuilder::done`] to fold it back
/// into the parent builder.
pub struct StageBuilder {
    graph: GraphBuilder,
    stage: Stage,
    next_node_id: usize,
}

impl StageBuilder {
    fn allocate_id(&mut self) -> String {
        let id = format!("{}-n{}", self.stage.id, self.next_node_id);
        self.next_node_id += 1;
        id
    }

    /// Give this stage a name, referenceable by other stages' `copy_from`
    /// and mount calls.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.stage.name = Some(name.into());
        self
    }

    /// Override this stage's target platform.
    #[must_use]
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.stage.platform = Some(platform.into());
        self
    }

    /// Run a command.
    #[must_use]
    pub fn run(mut self, command: Vec<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Exec(ExecOperation {
                command,
                env: BTreeMap::new(),
                mounts: Vec::new(),
                workdir: None,
                user: None,
                network_mode: ExecNetworkMode::Sandbox,
                security: SecurityMode::Default,
            }),
        ));
        self
    }

    /// Run a command with explicit mounts and environment.
    #[must_use]
    pub fn run_with(
        mut self,
        command: Vec<String>,
        env: BTreeMap<String, String>,
        mounts: Vec<Mount>,
    ) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Exec(ExecOperation {
                command,
                env,
                mounts,
                workdir: None,
                user: None,
                network_mode: ExecNetworkMode::Sandbox,
                security: SecurityMode::Default,
            }),
        ));
        self
    }

    /// Copy from the build context into this stage.
    #[must_use]
    pub fn copy(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Filesystem(FilesystemOperation {
                action: FsAction::Copy,
                source: FsSource::Context { path: source.into() },
                destination: destination.into(),
                metadata: FsMetadata::default(),
            }),
        ));
        self
    }

    /// Copy from another stage's filesystem state into this stage.
    /// `from_stage` is resolved against stage names (and falls back to
    /// stage ids) by the dependency analyzer at build time.
    #[must_use]
    pub fn copy_from_stage(
        mut self,
        from_stage: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Filesystem(FilesystemOperation {
                action: FsAction::Copy,
                source: FsSource::Stage {
                    stage_id: from_stage.into(),
                    path: source.into(),
                },
                destination: destination.into(),
                metadata: FsMetadata::default(),
            }),
        ));
        self
    }

    /// Set an environment variable for the remainder of the stage.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Env { key: key.into(), value: value.into() }),
        ));
        self
    }

    /// Set the working directory for subsequent instructions.
    #[must_use]
    pub fn workdir(mut self, path: impl Into<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Workdir { path: path.into() }),
        ));
        self
    }

    /// Set the user for subsequent instructions and the final image.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::User { user: user.into() }),
        ));
        self
    }

    /// Set an image label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Label { key: key.into(), value: value.into() }),
        ));
        self
    }

    /// Document an exposed port, parsed per the `port[/proto]` or
    /// `lo-hi[/proto]` grammar.
    pub fn expose(mut self, port_spec: &str) -> Result<Self> {
        let port = super::super::ir::PortSpec::parse(port_spec)?;
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Expose { port }),
        ));
        Ok(self)
    }

    /// Set the image entrypoint.
    #[must_use]
    pub fn entrypoint(mut self, args: Vec<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Entrypoint { args }),
        ));
        self
    }

    /// Set the image default command.
    #[must_use]
    pub fn cmd(mut self, args: Vec<String>) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Cmd { args }),
        ));
        self
    }

    /// Configure a healthcheck probe.
    #[must_use]
    pub fn healthcheck(
        mut self,
        command: Vec<String>,
        interval_secs: u64,
        timeout_secs: u64,
        retries: u32,
    ) -> Self {
        let id = self.allocate_id();
        self.stage.nodes.push(BuildNode::new(
            id,
            Operation::Metadata(MetadataOperation::Healthcheck {
                command,
                interval_secs,
                timeout_secs,
                retries,
            }),
        ));
        self
    }

    /// Wire the last two nodes added in this stage as a dependency edge.
    /// Most instructions are sequential within a stage (§4.10); this is
    /// called automatically as nodes are appended so callers never need
    /// to call it directly, but is exposed for frontends that build
    /// nodes out of append order.
    #[must_use]
    pub fn chain_last_two(mut self) -> Self {
        let len = self.stage.nodes.len();
        if len >= 2 {
            let prev_id = self.stage.nodes[len - 2].id.clone();
            self.stage.nodes[len - 1].dependencies.push(prev_id);
        }
        self
    }

    /// Fold this stage back into the parent graph builder, chaining
    /// every node sequentially (the default within-stage ordering;
    /// cross-stage edges are added later by the dependency analyzer).
    #[must_use]
    pub fn done(mut self) -> GraphBuilder {
        for i in 1..self.stage.nodes.len() {
            let prev_id = self.stage.nodes[i - 1].id.clone();
            self.stage.nodes[i].dependencies.push(prev_id);
        }
        self.graph.graph.stages.push(self.stage);
        self.graph
    }
}

/// Fluent assembler for a [`BuildGraph`] (§4.10).
#[derive(Default)]
pub struct GraphBuilder {
    graph: BuildGraph,
    next_stage_id: usize,
}

impl GraphBuilder {
    /// Start with an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self { graph: BuildGraph::new(), next_stage_id: 0 }
    }

    /// Declare a build argument default.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.graph.build_args.insert(name.into(), default.into());
        self
    }

    /// Add a target platform.
    #[must_use]
    pub fn target_platform(mut self, platform: impl Into<String>) -> Self {
        self.graph.target_platforms.push(platform.into());
        self
    }

    /// Start a new stage rooted at a registry image.
    #[must_use]
    pub fn stage_from(mut self, reference: impl Into<String>) -> StageBuilder {
        let id = self.allocate_stage_id();
        let stage = Stage::new(id, ImageOperation { source: ImageSource::Registry { reference: reference.into() } });
        StageBuilder { graph: self, stage, next_node_id: 0 }
    }

    /// Start a new stage rooted at an empty rootfs.
    #[must_use]
    pub fn scratch(mut self) -> StageBuilder {
        let id = self.allocate_stage_id();
        let stage = Stage::new(id, ImageOperation { source: ImageSource::Scratch });
        StageBuilder { graph: self, stage, next_node_id: 0 }
    }

    fn allocate_stage_id(&mut self) -> String {
        let id = format!("stage-{}", self.next_stage_id);
        self.next_stage_id += 1;
        id
    }

    /// Run the analyzer pipeline (dependency resolution, validation,
    /// semantic review) and return the finished graph plus any advisory
    /// findings. Fails if structural validation rejects the graph.
    pub fn build(self) -> Result<(BuildGraph, Vec<Finding>)> {
        if self.graph.stages.is_empty() {
            return Err(Error::invalid_argument("build graph has no stages"));
        }
        let mut graph = self.graph;
        DependencyAnalyzer::new().analyze(&mut graph)?;
        Validator::new().analyze(&graph)?;
        let findings = SemanticAnalyzer::new().analyze(&graph);
        Ok((graph, findings))
    }
}
