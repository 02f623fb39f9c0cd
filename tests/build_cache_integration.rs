//! Integration test for build cache hits across repeated builds.

use std::sync::Arc;

use async_trait::async_trait;
use container_platform::buildgraph::executor::{Executor, ExecutorCapabilities, ExecutorRegistry, ResourceMinimums};
use container_platform::buildgraph::frontend::GraphBuilder;
use container_platform::buildgraph::reporter::Reporter;
use container_platform::buildgraph::scheduler::{FailureMode, Scheduler};
use container_platform::buildgraph::snapshot::Snapshotter;
use container_platform::buildgraph::{cache::BuildCache, ir::Operation};
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

#[tokio::test]
async fn repeated_build_hits_cache_for_every_node() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(NoopExecutor {
        caps: ExecutorCapabilities {
            supported_kinds: vec!["image", "exec"],
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

    let (graph, _findings) = GraphBuilder::new()
        .scratch()
        .run(vec!["echo".into(), "hi".into()])
        .done()
        .build()
        .unwrap();

    let first = scheduler.run(&graph).await.unwrap();
    assert!(first.success);
    assert!(first.nodes.iter().all(|n| !n.cache_hit));

    let second = scheduler.run(&graph).await.unwrap();
    assert!(second.success);
    assert!(second.nodes.iter().all(|n| n.cache_hit));

    assert_eq!(first.nodes.len(), second.nodes.len());
    for (a, b) in first.nodes.iter().zip(second.nodes.iter()) {
        assert_eq!(a.snapshot, b.snapshot);
    }
}
