//! Core B: the build graph engine (§1, §4.9–§4.15).
//!
//! A content-addressed, cache-aware executor for multi-stage image
//! builds: a fluent builder and Dockerfile frontend produce an IR
//! graph, three analyzers resolve and validate it, and the scheduler
//! walks it stage by stage against a snapshotter, a build cache, and a
//! registry of executors, publishing every step to the reporter.

pub mod analyze;
pub mod cache;
pub mod executor;
pub mod frontend;
pub mod ir;
pub mod reporter;
pub mod scheduler;
pub mod snapshot;
