//! Storage backends.
//!
//! A backend stores artifact bytes under a fingerprint and resolves a
//! fingerprint to a location. Eviction is the backend's business; the
//! [`CacheStore`](crate::CacheStore) only adds coordination and bookkeeping.

use crate::error::CacheError;
use cairn_common::Fingerprint;
use cairn_ir::Schema;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The result of running a computation: its schema and encoded rows.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    /// Schema of the materialized relation.
    pub schema: Schema,
    /// Encoded result rows, opaque to the cache.
    pub payload: Vec<u8>,
}

impl StoredArtifact {
    /// Creates an artifact from a schema and payload.
    pub fn new(schema: Schema, payload: Vec<u8>) -> Self {
        Self { schema, payload }
    }
}

/// A reference to a stored artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactHandle {
    /// Fingerprint the artifact is stored under.
    pub token: Fingerprint,
    /// Backend-specific location, such as a file path or `memory://` URI.
    pub location: String,
    /// Schema of the materialized relation.
    pub schema: Schema,
    /// Stored size in bytes.
    pub size: u64,
    /// When the artifact was written.
    pub created_at: DateTime<Utc>,
}

/// Where artifacts live.
///
/// Implementations must publish artifacts atomically: `locate` and `read`
/// never observe a partially written artifact.
pub trait StorageBackend: Send + Sync {
    /// Short human-readable description, used in logs.
    fn describe(&self) -> String;

    /// Stores `artifact` under `token`, replacing any previous artifact.
    fn write(
        &self,
        token: Fingerprint,
        artifact: &StoredArtifact,
    ) -> Result<ArtifactHandle, CacheError>;

    /// Resolves `token` to a handle, or `None` if nothing valid is stored.
    fn locate(&self, token: Fingerprint) -> Option<ArtifactHandle>;

    /// Reads back the artifact stored under `token`.
    fn read(&self, token: Fingerprint) -> Option<StoredArtifact>;

    /// Deletes the artifact stored under `token`. Returns whether anything
    /// was removed.
    fn remove(&self, token: Fingerprint) -> Result<bool, CacheError>;

    /// Lists every stored fingerprint.
    fn tokens(&self) -> Result<Vec<Fingerprint>, CacheError>;

    /// Returns `true` if an artifact is stored under `token`.
    fn exists(&self, token: Fingerprint) -> bool {
        self.locate(token).is_some()
    }
}

/// Keeps artifacts in process memory. Useful for tests and short-lived
/// sessions.
#[derive(Default)]
pub struct MemoryBackend {
    artifacts: RwLock<BTreeMap<Fingerprint, (StoredArtifact, DateTime<Utc>)>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(token: Fingerprint, artifact: &StoredArtifact, created_at: DateTime<Utc>) -> ArtifactHandle {
        ArtifactHandle {
            token,
            location: format!("memory://{token}"),
            schema: artifact.schema.clone(),
            size: artifact.payload.len() as u64,
            created_at,
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn write(
        &self,
        token: Fingerprint,
        artifact: &StoredArtifact,
    ) -> Result<ArtifactHandle, CacheError> {
        let created_at = Utc::now();
        self.artifacts
            .write()
            .insert(token, (artifact.clone(), created_at));
        Ok(Self::handle(token, artifact, created_at))
    }

    fn locate(&self, token: Fingerprint) -> Option<ArtifactHandle> {
        self.artifacts
            .read()
            .get(&token)
            .map(|(artifact, created_at)| Self::handle(token, artifact, *created_at))
    }

    fn read(&self, token: Fingerprint) -> Option<StoredArtifact> {
        self.artifacts.read().get(&token).map(|(a, _)| a.clone())
    }

    fn remove(&self, token: Fingerprint) -> Result<bool, CacheError> {
        Ok(self.artifacts.write().remove(&token).is_some())
    }

    fn tokens(&self) -> Result<Vec<Fingerprint>, CacheError> {
        Ok(self.artifacts.read().keys().copied().collect())
    }
}
