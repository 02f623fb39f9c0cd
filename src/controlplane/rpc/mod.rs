//! Typed request/response dispatch with a route registry and streaming
//! progress attachments (§4.3).

mod message;
mod transport;

pub use message::{Message, Value};
pub use transport::{Handler, ProgressSink, ProgressUpdate, RouteKey, Router};
