//! Content digests shared by the snapshotter, the cache, and IR operations.
//!
//! Rendered as `algo:hex`, e.g. `sha256:e3b0c4...`. This is the one place
//! that touches the hashing primitive so the algorithm can change without
//! rippling through every call site.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A content-addressed digest, `algo:hex`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    /// Hash a single byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Combine this digest with others, in the order given, into a new
    /// digest. Used to fold a set of dependency digests into one value
    /// without caring which hash function backs `Digest::of`.
    #[must_use]
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a Digest>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.0.as_bytes());
            hasher.update(b"\0");
        }
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// The full `algo:hex` string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse an `algo:hex` string, validating it has the expected shape.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        let (algo, hex_part) = s
            .split_once(':')
            .ok_or_else(|| crate::error::Error::invalid_argument("digest missing algo prefix"))?;
        if algo != "sha256" {
            return Err(crate::error::Error::unsupported(format!(
                "unsupported digest algorithm: {algo}"
            )));
        }
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(crate::error::Error::invalid_argument(
                "digest hex payload must be 64 hex characters",
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
