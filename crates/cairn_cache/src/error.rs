//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads are fail-safe: a damaged artifact is reported as a miss rather than
/// an error. The header and checksum variants surface through logging and
/// through the strict decoding used by maintenance commands.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The cache manifest could not be parsed as valid JSON.
    #[error("failed to parse cache manifest: {reason}")]
    ManifestParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// An artifact file has an invalid or missing header.
    #[error("invalid artifact header in {path}: {reason}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The artifact format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// No artifact is stored under the given fingerprint.
    #[error("no artifact stored for {key}")]
    NotFound {
        /// Hex fingerprint of the missing artifact.
        key: String,
    },

    /// The producer of an artifact failed, or the production this call was
    /// waiting on failed.
    #[error("producing artifact {key} failed: {reason}")]
    ProductionFailed {
        /// Hex fingerprint of the artifact being produced.
        key: String,
        /// The producer's error message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/tmp/cache/manifest.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("manifest.json"));
    }

    #[test]
    fn checksum_mismatch_display() {
        let err = CacheError::ChecksumMismatch {
            path: PathBuf::from("file.cairn"),
            expected: "aabb".to_string(),
            actual: "ccdd".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("aabb"));
        assert!(msg.contains("ccdd"));
    }

    #[test]
    fn version_mismatch_display() {
        let err = CacheError::VersionMismatch {
            path: PathBuf::from("old.cairn"),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn production_failed_display() {
        let err = CacheError::ProductionFailed {
            key: "00ff".to_string(),
            reason: "engine offline".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "producing artifact 00ff failed: engine offline"
        );
    }

    #[test]
    fn not_found_display() {
        let err = CacheError::NotFound {
            key: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
    }
}
