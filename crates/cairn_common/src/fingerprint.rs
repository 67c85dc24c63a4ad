//! The fingerprint token that addresses cached computations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Deterministic identity of a computation for caching purposes.
///
/// Two computations with equal fingerprints are assumed interchangeable.
/// A fingerprint is never stored on the node it describes; it is recomputed
/// on demand from node structure and the current freshness of its sources.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(ContentHash);

impl Fingerprint {
    /// Wraps a content hash as a fingerprint.
    pub fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Returns the underlying digest.
    pub fn hash(&self) -> ContentHash {
        self.0
    }

    /// Returns the 32-character lowercase hex form used for artifact file names.
    pub fn to_hex(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..8])
    }
}

/// Error returned when parsing a fingerprint from its hex form fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint '{input}': expected 32 hex characters")]
pub struct ParseFingerprintError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseFingerprintError {
            input: s.to_string(),
        };
        if s.len() != 32 || !s.is_ascii() {
            return Err(err());
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(ContentHash::from_raw(bytes)))
    }
}
