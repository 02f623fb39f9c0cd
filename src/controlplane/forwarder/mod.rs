//! TCP/UDP proxy forwarders with a bounded UDP flow cache (§4.16).

mod lru;
mod tcp;
mod udp;

pub use lru::LruCache;
pub use tcp::TcpForwarder;
pub use udp::UdpForwarder;
