//! Integration test for multi-stage builds and `COPY --from=` resolution.

use std::sync::Arc;

use async_trait::async_trait;
use container_platform::buildgraph::executor::{Executor, ExecutorCapabilities, ExecutorRegistry, ResourceMinimums};
use container_platform::buildgraph::frontend::DockerfileFrontend;
use container_platform::buildgraph::ir::{FsSource, Operation};
use container_platform::buildgraph::reporter::Reporter;
use container_platform::buildgraph::scheduler::{FailureMode, Scheduler};
use container_platform::buildgraph::snapshot::Snapshotter;
use container_platform::buildgraph::cache::BuildCache;
use container_platform::error::Result;

struct NoopExecutor {
    caps: ExecutorCapabilities,
}

#[async_trait]
impl Executor for NoopExecutor {
    fn name(&self) -> &str {
        "noop"
    }

    fn capabilities(&self) -> &ExecutorCapabilities {
        &self.caps
    }

    async fn execute(&self, operation: &Operation, _platform: &str, workdir: &std::path::Path) -> Result<()> {
        std::fs::write(workdir.join("op.digest"), operation.content_digest().as_str()).unwrap();
        Ok(())
    }
}

const DOCKERFILE: &str = "\
FROM golang:1 AS builder
RUN go build -o /app/bin ./...
FROM alpine:3
COPY --from=builder /app/bin /usr/local/bin/app
CMD [\"/usr/local/bin/app\"]
";

#[tokio::test]
async fn copy_from_builder_stage_resolves_and_schedules_in_order() {
    let (graph, _findings) = DockerfileFrontend::parse(DOCKERFILE).unwrap();
    assert_eq!(graph.stages.len(), 2);

    let runtime = graph.stages.last().unwrap();
    let copy_node = runtime
        .nodes
        .iter()
        .find(|n| matches!(&n.operation, Operation::Filesystem(fs) if matches!(&fs.source, FsSource::Stage { .. })))
        .expect("expected a cross-stage copy node");
    assert!(matches!(
        &copy_node.operation,
        Operation::Filesystem(fs) if matches!(&fs.source, FsSource::Stage { stage_id, .. } if stage_id == "builder")
    ));

    let dir = tempfile::tempdir().unwrap();
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(NoopExecutor {
        caps: ExecutorCapabilities {
            supported_kinds: vec!["image", "exec", "filesystem", "metadata"],
            platforms: vec![],
            privileged: false,
            resource_minimums: ResourceMinimums::default(),
            max_concurrency: 4,
        },
    }));
    let scheduler = Scheduler::new(
        Arc::new(BuildCache::new()),
        Arc::new(Snapshotter::new(dir.path().to_path_buf())),
        Arc::new(registry),
        Arc::new(Reporter::new()),
        4,
        FailureMode::FailFast,
    );

    let result = scheduler.run(&graph).await.unwrap();
    assert!(result.success);
    assert_eq!(result.nodes.len(), 2);
}
