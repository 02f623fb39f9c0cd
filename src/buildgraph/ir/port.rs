//! Port specification parsing (§6, §8 boundary behaviors).
//!
//! `"80"` ⇒ tcp/80, `"80/udp"` ⇒ udp/80, `"8000-8100"` ⇒ tcp range.
//! `"0"`, `"x"`, and `"80/xyz"` are errors.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Transport protocol for a published or exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::invalid_argument(format!(
                "unknown port protocol: {other}"
            ))),
        }
    }
}

/// A parsed port specification: either a single port or an inclusive
/// range, both over one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// First (or only) port number.
    pub low: u16,
    /// Last port number (equal to `low` for a single port).
    pub high: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl PortSpec {
    /// Parse `port[/proto]` or `lo-hi[/proto]`, per §6/§8. Port `0` is
    /// rejected as invalid — a listener cannot bind port 0 as a
    /// published/exposed spec (ephemeral-port allocation is a runtime
    /// concern, not an IR concept).
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::invalid_argument("empty port spec"));
        }
        let (port_part, proto_part) = match s.split_once('/') {
            Some((p, proto)) => (p, proto),
            None => (s, "tcp"),
        };
        let protocol = Protocol::parse(proto_part)?;

        let (low, high) = match port_part.split_once('-') {
            Some((lo, hi)) => (parse_port_number(lo)?, parse_port_number(hi)?),
            None => {
                let p = parse_port_number(port_part)?;
                (p, p)
            }
        };
        if low == 0 || high == 0 {
            return Err(Error::invalid_argument("port 0 is not a valid spec"));
        }
        if low > high {
            return Err(Error::invalid_argument(format!(
                "port range {low}-{high} is empty"
            )));
        }
        Ok(PortSpec { low, high, protocol })
    }

    /// Whether this spec names a single port rather than a range.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.low == self.high
    }
}

fn parse_port_number(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| Error::invalid_argument(format!("invalid port number: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_port_defaults_to_tcp() {
        let spec = PortSpec::parse("80").unwrap();
        assert_eq!(spec, PortSpec { low: 80, high: 80, protocol: Protocol::Tcp });
    }

    #[test]
    fn explicit_udp_protocol() {
        let spec = PortSpec::parse("80/udp").unwrap();
        assert_eq!(spec.protocol, Protocol::Udp);
        assert_eq!(spec.low, 80);
    }

    #[test]
    fn range_form_parses_bounds() {
        let spec = PortSpec::parse("8000-8100").unwrap();
        assert_eq!(spec.low, 8000);
        assert_eq!(spec.high, 8100);
        assert_eq!(spec.protocol, Protocol::Tcp);
    }

    #[test]
    fn range_with_udp_protocol() {
        let spec = PortSpec::parse("8000-8100/udp").unwrap();
        assert_eq!(spec.protocol, Protocol::Udp);
    }

    #[test]
    fn zero_port_is_rejected() {
        assert!(PortSpec::parse("0").is_err());
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        assert!(PortSpec::parse("x").is_err());
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        assert!(PortSpec::parse("80/xyz").is_err());
    }
}
