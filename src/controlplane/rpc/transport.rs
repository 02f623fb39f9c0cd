//! Route registry and typed request/response dispatch (§4.3).
//!
//! A handler maps one [`Message`] to another, or to a categorized
//! [`Error`]. Streaming handlers additionally deliver ordered progress
//! updates over a dedicated channel before returning their terminal
//! response.

use super::message::Message;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A single RPC endpoint.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request, returning the response payload or an error.
    async fn handle(&self, request: Message) -> Result<Message>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Message>> + Send,
{
    async fn handle(&self, request: Message) -> Result<Message> {
        (self)(request).await
    }
}

/// A route key, e.g. `"container.create"`.
pub type RouteKey = String;

/// Maps route keys to handlers and dispatches incoming requests.
#[derive(Default)]
pub struct Router {
    routes: HashMap<RouteKey, Arc<dyn Handler>>,
}

impl Router {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `route`. Replaces any existing handler
    /// for the same key.
    pub fn register(&mut self, route: impl Into<RouteKey>, handler: Arc<dyn Handler>) {
        let route = route.into();
        debug!(route = %route, "registering rpc route");
        self.routes.insert(route, handler);
    }

    /// Dispatch `request` to the handler registered for `route`.
    pub async fn dispatch(&self, route: &str, request: Message) -> Result<Message> {
        let handler = self.routes.get(route).cloned().ok_or_else(|| {
            warn!(route, "dispatch to unknown route");
            Error::not_found(format!("no route registered: {route}"))
        })?;
        handler.handle(request).await
    }

    /// Every registered route key, for the `health.ping` / plugin
    /// enumeration surfaces.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

/// One update in a streaming progress channel.
#[derive(Debug)]
pub enum ProgressUpdate {
    /// An intermediate update carrying a structured payload.
    Update(Message),
    /// The terminal update; no further updates follow.
    Done(Result<Message>),
}

/// The producer half of a streaming RPC response.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink {
    /// Create a linked sink/stream pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an intermediate update. Best-effort: a dropped receiver
    /// (the caller went away) is not an error for the producer.
    pub fn update(&self, message: Message) {
        let _ = self.tx.send(ProgressUpdate::Update(message));
    }

    /// Deliver the terminal update and close the channel.
    pub fn done(&self, result: Result<Message>) {
        let _ = self.tx.send(ProgressUpdate::Done(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::rpc::message::Value;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: Message) -> Result<Message> {
            Ok(request)
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let mut router = Router::new();
        router.register("echo", Arc::new(Echo));
        let req = Message::new().with("x", Value::Int(1));
        let resp = router.dispatch("echo", req.clone()).await.unwrap();
        assert_eq!(resp, req);
    }

    #[tokio::test]
    async fn dispatch_unknown_route_is_not_found() {
        let router = Router::new();
        let err = router
            .dispatch("nope", Message::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[tokio::test]
    async fn progress_sink_delivers_ordered_updates_then_terminal() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.update(Message::new().with("percent", Value::Int(10)));
        sink.update(Message::new().with("percent", Value::Int(90)));
        sink.done(Ok(Message::new()));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressUpdate::Update(_)));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ProgressUpdate::Update(_)));
        let third = rx.recv().await.unwrap();
        assert!(matches!(third, ProgressUpdate::Done(Ok(_))));
        drop(sink);
        assert!(rx.recv().await.is_none());
    }
}
