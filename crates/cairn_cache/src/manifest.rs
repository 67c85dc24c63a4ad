//! Cache manifest recording every materialized artifact.
//!
//! The manifest is stored as `manifest.json` in the cache directory. It maps
//! fingerprints to where their artifacts live, what schema they carry and when
//! they were produced, so maintenance commands can list and prune the cache
//! without opening artifact files.

use std::collections::BTreeMap;
use std::path::Path;

use cairn_common::Fingerprint;
use cairn_ir::Schema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::ArtifactHandle;
use crate::error::CacheError;

/// Name of the manifest file within the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Top-level cache manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Cairn version that produced this cache. Invalidate on version change.
    pub cairn_version: String,

    /// Materialized artifacts keyed by hex fingerprint.
    pub entries: BTreeMap<String, CacheEntry>,
}

/// Bookkeeping for one materialized artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Backend-specific location of the artifact.
    pub location: String,

    /// Schema of the materialized relation.
    pub schema: Schema,

    /// Stored size in bytes.
    pub size: u64,

    /// When the artifact was written.
    pub created_at: DateTime<Utc>,
}

impl From<&ArtifactHandle> for CacheEntry {
    fn from(handle: &ArtifactHandle) -> Self {
        Self {
            location: handle.location.clone(),
            schema: handle.schema.clone(),
            size: handle.size,
            created_at: handle.created_at,
        }
    }
}

impl CacheManifest {
    /// Creates a new, empty manifest for the given Cairn version.
    pub fn new(cairn_version: &str) -> Self {
        Self {
            cairn_version: cairn_version.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the manifest from the cache directory.
    pub fn try_load(cache_dir: &Path) -> Result<Self, CacheError> {
        let path = cache_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| CacheError::ManifestParse {
            reason: e.to_string(),
        })
    }

    /// Loads the manifest from the cache directory, returning `None` if
    /// the file doesn't exist or can't be parsed.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        match Self::try_load(cache_dir) {
            Ok(manifest) => Some(manifest),
            Err(CacheError::Io { .. }) => None,
            Err(e) => {
                tracing::warn!(dir = %cache_dir.display(), error = %e, "ignoring cache manifest");
                None
            }
        }
    }

    /// Saves the manifest to the cache directory.
    ///
    /// Creates the cache directory if it doesn't exist.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let path = cache_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Returns `true` if this manifest was produced by a compatible Cairn version.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.cairn_version == current_version
    }

    /// Records a freshly written artifact.
    pub fn record(&mut self, handle: &ArtifactHandle) {
        self.entries
            .insert(handle.token.to_hex(), CacheEntry::from(handle));
    }

    /// Looks up the entry for `token`.
    pub fn get(&self, token: Fingerprint) -> Option<&CacheEntry> {
        self.entries.get(&token.to_hex())
    }

    /// Fingerprints of every recorded entry. Keys that do not parse are skipped.
    pub fn tokens(&self) -> Vec<Fingerprint> {
        self.entries
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect()
    }

    /// Drops entries whose fingerprint fails `keep`. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(Fingerprint, &CacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            key.parse::<Fingerprint>()
                .map(|token| keep(token, entry))
                .unwrap_or(false)
        });
        before - self.entries.len()
    }

    /// Total stored size of all recorded artifacts.
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}
