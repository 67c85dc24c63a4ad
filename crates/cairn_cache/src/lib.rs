//! Content-addressed storage for materialized computation results.
//!
//! Artifacts are keyed by the fingerprint of the computation that produced
//! them. A [`CacheStore`] answers whether a fingerprint has been materialized,
//! locates existing artifacts, and runs a producer at most once per
//! fingerprint when several callers ask for the same missing artifact.

#![warn(missing_docs)]

pub mod artifact;
pub mod backend;
pub mod error;
pub mod manifest;
pub mod store;

pub use artifact::{
    ArtifactHeader, FsBackend, ARTIFACT_FORMAT_VERSION, ARTIFACT_MAGIC, MAX_HEADER_LEN,
};
pub use backend::{ArtifactHandle, MemoryBackend, StorageBackend, StoredArtifact};
pub use error::CacheError;
pub use manifest::{CacheEntry, CacheManifest, MANIFEST_FILE};
pub use store::CacheStore;

/// Version recorded in artifact headers and the cache manifest.
pub const CAIRN_VERSION: &str = env!("CARGO_PKG_VERSION");
