//! Scheduler: executes a validated [`BuildGraph`] stage by stage,
//! dependency-ordered within each stage, against the cache, the
//! snapshotter, and the executor registry (§4.14).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::digest::Digest;
use crate::error::{Error, Result};

use crate::buildgraph::cache::{BuildCache, CacheEntry};
use crate::buildgraph::executor::ExecutorRegistry;
use crate::buildgraph::ir::{BuildGraph, BuildNode, CacheKey, FsSource, MountSource, Operation, Stage};
use crate::buildgraph::reporter::{BuildEvent, Reporter};
use crate::buildgraph::snapshot::Snapshotter;

/// Accumulated state threaded through one node's execution: the
/// platform and environment it runs under, and the image
/// configuration fields `Metadata` nodes contribute to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Resolved target platform, e.g. `"linux/amd64"`.
    pub platform: String,
    /// Accumulated environment variables.
    pub env: BTreeMap<String, String>,
    /// Current working directory, if set.
    pub cwd: Option<String>,
    /// Current user, if set.
    pub user: Option<String>,
    /// Most recent snapshot digest produced in this stage.
    pub snapshot: Option<Digest>,
    /// Accumulated image-config labels.
    pub labels: BTreeMap<String, String>,
}

/// How the scheduler reacts to a node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Stop dispatching new work the moment one node fails; already
    /// in-flight siblings still finish.
    FailFast,
    /// Keep running every independent node and report every failure at
    /// the end.
    CollectFailures,
}

/// Outcome of one node's execution.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Id of the node.
    pub node_id: String,
    /// Resulting snapshot, if it succeeded.
    pub snapshot: Option<Digest>,
    /// Failure message, if it failed.
    pub error: Option<String>,
    /// Whether this result came from the cache.
    pub cache_hit: bool,
}

/// A callback invoked after every node completes, success or failure.
pub type PostNodeCallback = Arc<dyn Fn(&NodeResult) + Send + Sync>;

/// Full outcome of a graph run.
pub struct GraphResult {
    /// Per-node results, in completion order.
    pub nodes: Vec<NodeResult>,
    /// Whether every node succeeded.
    pub success: bool,
}

/// Executes a validated graph against the cache, snapshotter, and
/// executor registry (§5: one shared, lock-guarded cache and
/// snapshotter; concurrency is bounded by a semaphore rather than by
/// spawning unboundedly).
pub struct Scheduler {
    cache: Arc<BuildCache>,
    snapshotter: Arc<Snapshotter>,
    executors: Arc<ExecutorRegistry>,
    reporter: Arc<Reporter>,
    global_concurrency: Arc<Semaphore>,
    failure_mode: FailureMode,
    on_node_complete: Option<PostNodeCallback>,
}

impl Scheduler {
    /// Construct a scheduler over shared build-engine state.
    #[must_use]
    pub fn new(
        cache: Arc<BuildCache>,
        snapshotter: Arc<Snapshotter>,
        executors: Arc<ExecutorRegistry>,
        reporter: Arc<Reporter>,
        max_concurrency: usize,
        failure_mode: FailureMode,
    ) -> Self {
        Self {
            cache,
            snapshotter,
            executors,
            reporter,
            global_concurrency: Arc::new(Semaphore::new(max_concurrency.max(1))),
            failure_mode,
            on_node_complete: None,
        }
    }

    /// Register a callback invoked after every node completes.
    pub fn on_node_complete(&mut self, callback: PostNodeCallback) {
        self.on_node_complete = Some(callback);
    }

    /// Run every stage in the graph in topological order (by cross-stage
    /// references), and within each stage run nodes in dependency order
    /// with up to the configured global concurrency.
    #[instrument(skip(self, graph), fields(stages = graph.stages.len()))]
    pub async fn run(&self, graph: &BuildGraph) -> Result<GraphResult> {
        let start = std::time::Instant::now();
        self.reporter.publish(BuildEvent::GraphStarted { stage_count: graph.stages.len() });

        let stage_order = topological_stage_order(graph)?;
        let mut all_results = Vec::new();
        let mut failed = false;

        for stage_id in stage_order {
            let stage = graph.stage(&stage_id).expect("topological order only names real stages");
            let platform = stage.resolved_platform(
                graph.target_platforms.first().map(String::as_str).unwrap_or("linux/amd64"),
            );
            let results = self.run_stage(stage, platform).await;
            let stage_failed = results.iter().any(|r| r.error.is_some());
            all_results.extend(results);
            if stage_failed {
                failed = true;
                if self.failure_mode == FailureMode::FailFast {
                    break;
                }
            }
        }

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.reporter.publish(BuildEvent::GraphCompleted { success: !failed, duration_ms });
        Ok(GraphResult { nodes: all_results, success: !failed })
    }

    /// Run `stage`'s nodes wave by wave: each wave is every not-yet-run
    /// node whose dependencies have all completed, dispatched
    /// concurrently (bounded by `global_concurrency`) via
    /// [`futures::future::join_all`]. A later wave only starts once the
    /// previous one has fully resolved, since its nodes may depend on
    /// this wave's snapshots and cache keys.
    async fn run_stage(&self, stage: &Stage, platform: &str) -> Vec<NodeResult> {
        // Validate up front so a cycle or dangling reference fails the
        // whole stage instead of surfacing mid-wave.
        if let Err(err) = topological_node_order(stage) {
            return vec![NodeResult {
                node_id: String::new(),
                snapshot: None,
                error: Some(err.to_string()),
                cache_hit: false,
            }];
        }

        let scratch = match self.snapshotter.create_snapshot().await {
            Ok(snap) => snap,
            Err(err) => {
                return vec![NodeResult {
                    node_id: String::new(),
                    snapshot: None,
                    error: Some(err.to_string()),
                    cache_hit: false,
                }]
            }
        };

        let mut indegree: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &stage.nodes {
            indegree.insert(node.id.clone(), node.dependencies.len());
            for dep in &node.dependencies {
                dependents.entry(dep.clone()).or_default().push(node.id.clone());
            }
        }

        let mut cache_keys: HashMap<String, CacheKey> = HashMap::new();
        let mut node_snapshots: HashMap<String, Digest> = HashMap::new();
        let mut failed_nodes: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        let mut halted = false;

        let mut ready: Vec<String> = stage
            .nodes
            .iter()
            .filter(|n| indegree.get(&n.id).copied().unwrap_or(0) == 0)
            .map(|n| n.id.clone())
            .collect();

        while !ready.is_empty() && !halted {
            let wave = std::mem::take(&mut ready);
            let mut runnable = Vec::new();
            let mut wave_results = Vec::new();

            for node_id in wave {
                let node = stage.node(&node_id).expect("node id came from this stage's own indegree map");
                if node.dependencies.iter().any(|d| failed_nodes.contains(d)) {
                    failed_nodes.insert(node.id.clone());
                    wave_results.push(NodeResult {
                        node_id: node.id.clone(),
                        snapshot: None,
                        error: Some("skipped: a dependency failed".to_string()),
                        cache_hit: false,
                    });
                    continue;
                }

                let dep_keys: Vec<CacheKey> =
                    node.dependencies.iter().filter_map(|d| cache_keys.get(d).cloned()).collect();
                let key = node.cache_key(&dep_keys, platform);
                cache_keys.insert(node.id.clone(), key.clone());
                let parents: Vec<Digest> = if node.dependencies.is_empty() {
                    vec![scratch.digest.clone()]
                } else {
                    node.dependencies.iter().filter_map(|d| node_snapshots.get(d).cloned()).collect()
                };
                runnable.push((node, key, parents));
            }

            if !runnable.is_empty() {
                let futures = runnable.iter().map(|(node, key, parents)| {
                    self.run_node(node, key, platform, parents.clone())
                });
                wave_results.extend(join_all(futures).await);
            }

            for result in &wave_results {
                if result.error.is_some() {
                    failed_nodes.insert(result.node_id.clone());
                } else if let Some(snapshot) = &result.snapshot {
                    node_snapshots.insert(result.node_id.clone(), snapshot.clone());
                }
                self.emit_node_result(result);
                if let Some(next) = dependents.get(&result.node_id) {
                    for dependent in next {
                        if let Some(count) = indegree.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.push(dependent.clone());
                            }
                        }
                    }
                }
            }

            let wave_failed = wave_results.iter().any(|r| r.error.is_some());
            results.extend(wave_results);
            if wave_failed && self.failure_mode == FailureMode::FailFast {
                halted = true;
            }
        }
        results
    }

    fn emit_node_result(&self, result: &NodeResult) {
        match (&result.snapshot, &result.error) {
            (Some(snapshot), None) => {
                self.reporter.publish(BuildEvent::NodeCompleted {
                    node_id: result.node_id.clone(),
                    cache_hit: result.cache_hit,
                    snapshot: snapshot.clone(),
                });
            }
            (_, Some(message)) => {
                self.reporter.publish(BuildEvent::NodeFailed {
                    node_id: result.node_id.clone(),
                    message: message.clone(),
                });
            }
            (None, None) => {}
        }
        if let Some(callback) = &self.on_node_complete {
            callback(result);
        }
    }

    /// Run one node: cache lookup, then (on a miss) prepare a writable
    /// view over `parents`, hand it to the executor registry so the
    /// executor's actual output lands on disk, and commit the view so
    /// the resulting snapshot digest reflects what was really
    /// produced (§3). A failed dispatch discards the view rather than
    /// committing a snapshot for work that never happened.
    #[instrument(skip(self, node, parents), fields(node_id = %node.id))]
    async fn run_node(&self, node: &BuildNode, key: &CacheKey, platform: &str, parents: Vec<Digest>) -> NodeResult {
        let _permit = match self.global_concurrency.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                return NodeResult {
                    node_id: node.id.clone(),
                    snapshot: None,
                    error: Some(format!("scheduler shutting down: {err}")),
                    cache_hit: false,
                }
            }
        };

        self.reporter.publish(BuildEvent::NodeStarted { node_id: node.id.clone() });

        if let Some(entry) = self.cache.get(key).await {
            info!(node_id = %node.id, "cache hit");
            return NodeResult {
                node_id: node.id.clone(),
                snapshot: Some(entry.snapshot),
                error: None,
                cache_hit: true,
            };
        }

        let started = std::time::Instant::now();
        let view = match self.snapshotter.prepare(parents).await {
            Ok(view) => view,
            Err(err) => {
                return NodeResult {
                    node_id: node.id.clone(),
                    snapshot: None,
                    error: Some(err.to_string()),
                    cache_hit: false,
                }
            }
        };

        if let Err(err) = self.executors.dispatch(&node.operation, platform, view.root()).await {
            warn!(node_id = %node.id, error = %err, "node execution failed");
            self.snapshotter.discard(view).await;
            return NodeResult {
                node_id: node.id.clone(),
                snapshot: None,
                error: Some(err.to_string()),
                cache_hit: false,
            };
        }

        let snapshot = match self.snapshotter.commit(view).await {
            Ok(snap) => snap,
            Err(err) => {
                return NodeResult {
                    node_id: node.id.clone(),
                    snapshot: None,
                    error: Some(err.to_string()),
                    cache_hit: false,
                }
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = self
            .cache
            .put(key.clone(), CacheEntry { snapshot: snapshot.digest.clone(), original_duration_ms: duration_ms })
            .await
        {
            warn!(node_id = %node.id, error = %err, "failed to store cache entry");
        }

        NodeResult { node_id: node.id.clone(), snapshot: Some(snapshot.digest), error: None, cache_hit: false }
    }
}

fn topological_node_order(stage: &Stage) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();

    fn visit(
        id: &str,
        stage: &Stage,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if !visiting.insert(id.to_string()) {
            return Err(Error::invalid_state(format!("dependency cycle detected at node {id}")));
        }
        let node = stage
            .node(id)
            .ok_or_else(|| Error::invalid_state(format!("unknown node referenced: {id}")))?;
        for dep in &node.dependencies {
            visit(dep, stage, visiting, done, order)?;
        }
        visiting.remove(id);
        done.insert(id.to_string());
        order.push(id.to_string());
        Ok(())
    }

    for node in &stage.nodes {
        visit(&node.id, stage, &mut visiting, &mut done, &mut order)?;
    }
    Ok(order)
}

fn topological_stage_order(graph: &BuildGraph) -> Result<Vec<String>> {
    let mut adjacency: HashMap<&str, HashSet<&str>> = HashMap::new();
    for stage in &graph.stages {
        adjacency.entry(stage.id.as_str()).or_default();
        for node in &stage.nodes {
            if let Some(referenced) = referenced_stage(&node.operation) {
                let resolved = resolve_stage_id(graph, referenced);
                if let Some(resolved) = resolved {
                    if resolved != stage.id {
                        adjacency.get_mut(stage.id.as_str()).unwrap().insert(
                            graph.stages.iter().find(|s| s.id == resolved).map(|s| s.id.as_str()).unwrap(),
                        );
                    }
                }
            }
        }
    }

    let mut order = Vec::new();
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();

    fn visit<'a>(
        id: &'a str,
        adjacency: &HashMap<&'a str, HashSet<&'a str>>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if !visiting.insert(id) {
            return Err(Error::invalid_state(format!("stage dependency cycle at {id}")));
        }
        if let Some(deps) = adjacency.get(id) {
            for dep in deps {
                visit(dep, adjacency, visiting, done, order)?;
            }
        }
        visiting.remove(id);
        done.insert(id);
        order.push(id.to_string());
        Ok(())
    }

    for stage in &graph.stages {
        visit(stage.id.as_str(), &adjacency, &mut visiting, &mut done, &mut order)?;
    }
    Ok(order)
}

fn resolve_stage_id(graph: &BuildGraph, name_or_id: &str) -> Option<String> {
    graph
        .stage(name_or_id)
        .or_else(|| graph.stage_by_name(name_or_id))
        .map(|s| s.id.clone())
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
