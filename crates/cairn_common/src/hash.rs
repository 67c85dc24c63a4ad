//! Content hashing for canonical tuples and artifact checksums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit content hash computed using XXH3.
///
/// Two byte sequences with the same `ContentHash` are assumed to be identical.
/// Used for artifact checksums, in-memory table batch digests, and as the
/// digest primitive underneath [`Fingerprint`](crate::Fingerprint).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Wraps raw little-endian digest bytes.
    pub fn from_raw(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bytes_survive_wrapping() {
        let computed = ContentHash::from_bytes(b"Adelie,Torgersen,3750");
        let rewrapped = ContentHash::from_raw(*computed.as_bytes());
        assert_eq!(rewrapped, computed);
        assert_eq!(rewrapped.to_string(), computed.to_string());

        let mut raw = [0u8; 16];
        raw[15] = 0xab;
        assert_eq!(ContentHash::from_raw(raw).as_bytes(), &raw);
        assert!(ContentHash::from_raw(raw).to_string().ends_with("ab"));
    }

    #[test]
    fn ordering_follows_leading_bytes() {
        let low = ContentHash::from_raw([0; 16]);
        let mut mid = [0u8; 16];
        mid[15] = 0xff;
        let mut high = [0u8; 16];
        high[0] = 1;
        let mut hashes = vec![ContentHash::from_raw(high), low, ContentHash::from_raw(mid)];
        hashes.sort();
        assert_eq!(
            hashes,
            vec![low, ContentHash::from_raw(mid), ContentHash::from_raw(high)]
        );
        assert_eq!(low.cmp(&low), std::cmp::Ordering::Equal);
    }

    #[test]
    fn distinct_content_hashes_differently() {
        assert_eq!(ContentHash::from_bytes(b"Gentoo"), ContentHash::from_bytes(b"Gentoo"));
        assert_ne!(ContentHash::from_bytes(b"Gentoo"), ContentHash::from_bytes(b"Adelie"));
    }
}
