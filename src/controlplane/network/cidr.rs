//! Subnet arithmetic backing the network service's allocator bounds and
//! overlap detection (§3, §8).

use crate::error::{Error, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 subnet, newtype over [`ipnetwork::Ipv4Network`] so call sites
/// don't reach for bit-twiddling when the crate already does it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet(Ipv4Network);

impl Subnet {
    /// Parse CIDR notation, e.g. `"10.0.0.0/24"`.
    pub fn parse(s: &str) -> Result<Self> {
        Ipv4Network::from_str(s)
            .map(Subnet)
            .map_err(|e| Error::invalid_argument(format!("invalid CIDR {s}: {e}")))
    }

    /// The network address.
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    /// Total number of addresses in the block (including network and
    /// broadcast).
    #[must_use]
    pub fn size(&self) -> u32 {
        self.0.size()
    }

    /// The gateway address: the first usable address, `network + 1`.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        u32_to_ip(ip_to_u32(self.network()) + 1)
    }

    /// The allocator's lower bound: `network + 2` (skipping network
    /// address and gateway), per §4.7.
    #[must_use]
    pub fn allocator_lower(&self) -> u32 {
        ip_to_u32(self.network()) + 2
    }

    /// The allocator's usable size: `size - 3` (network, gateway,
    /// broadcast excluded).
    #[must_use]
    pub fn allocator_size(&self) -> u32 {
        self.size().saturating_sub(3)
    }

    /// Whether an address falls within this subnet.
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.0.contains(addr)
    }

    /// Whether this subnet's address range overlaps `other`'s.
    #[must_use]
    pub fn overlaps(&self, other: &Subnet) -> bool {
        let (a_lo, a_hi) = self.bounds();
        let (b_lo, b_hi) = other.bounds();
        a_lo <= b_hi && b_lo <= a_hi
    }

    fn bounds(&self) -> (u32, u32) {
        let lo = ip_to_u32(self.network());
        (lo, lo + self.size() - 1)
    }

    /// Render back to CIDR notation.
    #[must_use]
    pub fn to_cidr_string(&self) -> String {
        self.0.to_string()
    }
}

fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

fn u32_to_ip(v: u32) -> Ipv4Addr {
    Ipv4Addr::from(v)
}

impl TryFrom<String> for Subnet {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Subnet::parse(&value)
    }
}

impl From<Subnet> for String {
    fn from(value: Subnet) -> Self {
        value.to_cidr_string()
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_cidr_string())
    }
}
