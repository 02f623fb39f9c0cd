//! Ordered, multi-consumer build event stream (§4.15).
//!
//! Every stage of the build — analysis, graph assembly, per-node
//! execution — publishes to one [`Reporter`]. Multiple consumers (a
//! terminal renderer, a log file, an RPC progress sink) can subscribe
//! independently and each sees every event in publish order; a slow or
//! absent consumer never blocks another, matching
//! [`crate::controlplane::rpc::ProgressSink`]'s one-writer-many-readers
//! shape in Core A.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::buildgraph::frontend::Finding;
use crate::digest::Digest;

/// One observable event in a build's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuildEvent {
    /// A build started.
    GraphStarted {
        /// Number of stages in the graph.
        stage_count: usize,
    },
    /// A build finished, successfully or not.
    GraphCompleted {
        /// Whether every node completed successfully.
        success: bool,
        /// Total wall-clock duration, in milliseconds.
        duration_ms: u64,
    },
    /// The semantic analyzer produced advisory findings.
    Analyzing {
        /// Findings produced, in rule order.
        findings: Vec<Finding>,
    },
    /// A stage was added to the in-progress graph.
    StageAdded {
        /// Id of the stage.
        stage_id: String,
    },
    /// A node was added to a stage.
    NodeAdded {
        /// Id of the owning stage.
        stage_id: String,
        /// Id of the node.
        node_id: String,
    },
    /// A node began executing.
    NodeStarted {
        /// Id of the node.
        node_id: String,
    },
    /// A node finished executing successfully.
    NodeCompleted {
        /// Id of the node.
        node_id: String,
        /// Whether this result came from the cache rather than a fresh
        /// execution.
        cache_hit: bool,
        /// Resulting snapshot digest.
        snapshot: Digest,
    },
    /// A node failed.
    NodeFailed {
        /// Id of the node.
        node_id: String,
        /// Failure description.
        message: String,
    },
    /// A low-level IR event, for debugging — e.g. a cache key
    /// computation or an executor score.
    IrEvent {
        /// Free-form description.
        message: String,
    },
}

impl BuildEvent {
    /// A stable event-kind label, for filtering.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BuildEvent::GraphStarted { .. } => "graph_started",
            BuildEvent::GraphCompleted { .. } => "graph_completed",
            BuildEvent::Analyzing { .. } => "analyzing",
            BuildEvent::StageAdded { .. } => "stage_added",
            BuildEvent::NodeAdded { .. } => "node_added",
            BuildEvent::NodeStarted { .. } => "node_started",
            BuildEvent::NodeCompleted { .. } => "node_completed",
            BuildEvent::NodeFailed { .. } => "node_failed",
            BuildEvent::IrEvent { .. } => "ir_event",
        }
    }
}

/// Render one event as a single NDJSON line, newline included.
pub fn render_ndjson(event: &BuildEvent) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    line
}

const CHANNEL_CAPACITY: usize = 1024;

/// Publishes build events to any number of subscribers, in order.
pub struct Reporter {
    sender: broadcast::Sender<BuildEvent>,
}

impl Reporter {
    /// Construct a reporter with room for [`CHANNEL_CAPACITY`] buffered
    /// events per subscriber before the slowest one starts missing
    /// events (`broadcast`'s standard lagging behavior).
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. A no-op if there are no subscribers.
    pub fn publish(&self, event: BuildEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream from this point forward.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }

    /// Subscribe, filtered to only the event kinds in `kinds`.
    pub fn subscribe_filtered(
        &self,
        kinds: Vec<&'static str>,
    ) -> impl futures::Stream<Item = BuildEvent> {
        let receiver = self.sender.subscribe();
        futures::stream::unfold((receiver, kinds), |(mut receiver, kinds)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if kinds.contains(&event.kind()) => {
                        return Some((event, (receiver, kinds)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let reporter = Reporter::new();
        reporter.publish(BuildEvent::GraphStarted { stage_count: 1 });
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let reporter = Reporter::new();
        let mut rx = reporter.subscribe();
        reporter.publish(BuildEvent::GraphStarted { stage_count: 2 });
        reporter.publish(BuildEvent::GraphCompleted { success: true, duration_ms: 10 });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind(), "graph_started");
        assert_eq!(second.kind(), "graph_completed");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_see_every_event() {
        let reporter = Reporter::new();
        let mut a = reporter.subscribe();
        let mut b = reporter.subscribe();
        reporter.publish(BuildEvent::IrEvent { message: "hi".into() });
        assert_eq!(a.recv().await.unwrap().kind(), "ir_event");
        assert_eq!(b.recv().await.unwrap().kind(), "ir_event");
    }

    #[tokio::test]
    async fn filtered_subscription_only_yields_matching_kinds() {
        let reporter = Reporter::new();
        let mut stream = Box::pin(reporter.subscribe_filtered(vec!["node_failed"]));
        reporter.publish(BuildEvent::NodeStarted { node_id: "n1".into() });
        reporter.publish(BuildEvent::NodeFailed { node_id: "n1".into(), message: "boom".into() });
        let event = stream.next().await.unwrap();
        assert_eq!(event.kind(), "node_failed");
    }

    #[test]
    fn ndjson_rendering_is_one_line_per_event() {
        let line = render_ndjson(&BuildEvent::IrEvent { message: "x".into() });
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.trim_end().starts_with('{'));
    }
}
