//! Core A: the container control plane (§1, §4.1–§4.8, §4.16).
//!
//! A headless daemon surface built from single-writer services
//! (container, network, kernel) sitting behind an RPC router, with
//! plugin discovery and service-manager registration as the substrate
//! that binds helper processes in.

pub mod allocator;
pub mod container;
pub mod forwarder;
pub mod kernel;
pub mod network;
pub mod plugin;
pub mod rpc;
pub mod servicemgr;
pub mod store;
