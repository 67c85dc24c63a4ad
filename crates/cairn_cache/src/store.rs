//! The cache store.
//!
//! `CacheStore` ties a storage backend to the manifest and coordinates
//! production. Within one store, at most one producer runs per fingerprint:
//! the first caller to find an artifact missing claims the fingerprint, and
//! later callers for the same fingerprint block until the claim settles and
//! then share its outcome. A producer that panics releases its claim, and one
//! of the waiters takes over.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_common::Fingerprint;
use cairn_config::CacheConfig;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::artifact::FsBackend;
use crate::backend::{ArtifactHandle, StorageBackend, StoredArtifact};
use crate::error::CacheError;
use crate::manifest::{CacheEntry, CacheManifest};
use crate::CAIRN_VERSION;

/// Content-addressed artifact cache with materialize-once semantics.
pub struct CacheStore {
    backend: Arc<dyn StorageBackend>,

    /// Where the manifest is persisted, if anywhere.
    manifest_dir: Option<PathBuf>,

    manifest: Mutex<CacheManifest>,

    /// Productions currently running, by fingerprint.
    in_flight: Mutex<HashMap<Fingerprint, Arc<Flight>>>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Ready(ArtifactHandle),
    Failed(String),
    Abandoned,
}

#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<Outcome>>,
    settled: Condvar,
}

impl Flight {
    fn wait(&self) -> Outcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(settled) = outcome.as_ref() {
                return settled.clone();
            }
            self.settled.wait(&mut outcome);
        }
    }
}

/// A production claim. Dropping an unsettled claim marks it abandoned.
struct Claim<'a> {
    store: &'a CacheStore,
    token: Fingerprint,
    flight: Arc<Flight>,
    settled: bool,
}

impl Claim<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.publish(outcome);
        self.settled = true;
    }

    fn publish(&self, outcome: Outcome) {
        *self.flight.outcome.lock() = Some(outcome);
        self.store.in_flight.lock().remove(&self.token);
        self.flight.settled.notify_all();
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(token = %self.token, "producer abandoned its claim");
            self.publish(Outcome::Abandoned);
        }
    }
}

impl CacheStore {
    /// Creates a store over `backend` with an in-memory manifest.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            manifest_dir: None,
            manifest: Mutex::new(CacheManifest::new(CAIRN_VERSION)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a filesystem cache at `dir`, loading its manifest.
    ///
    /// A missing, unreadable or version-incompatible manifest starts the
    /// cache fresh.
    pub fn open(dir: &Path, compress: bool) -> Self {
        let manifest = CacheManifest::load(dir)
            .filter(|m| m.is_compatible(CAIRN_VERSION))
            .unwrap_or_else(|| CacheManifest::new(CAIRN_VERSION));
        let backend = FsBackend::new(dir).with_compression(compress);
        tracing::debug!(dir = %dir.display(), entries = manifest.entries.len(), "opened cache");
        Self {
            backend: Arc::new(backend),
            manifest_dir: Some(dir.to_path_buf()),
            manifest: Mutex::new(manifest),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the filesystem cache described by `config`. A relative
    /// directory is resolved against `base`.
    pub fn from_config(config: &CacheConfig, base: &Path) -> Self {
        let dir = if config.dir.is_absolute() {
            config.dir.clone()
        } else {
            base.join(&config.dir)
        };
        Self::open(&dir, config.compress)
    }

    /// The storage backend.
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Returns `true` if an artifact is stored under `token`.
    pub fn exists(&self, token: Fingerprint) -> bool {
        self.backend.exists(token)
    }

    /// Resolves `token` to its stored artifact.
    pub fn locate(&self, token: Fingerprint) -> Result<ArtifactHandle, CacheError> {
        self.backend.locate(token).ok_or_else(|| CacheError::NotFound {
            key: token.to_hex(),
        })
    }

    /// Reads back the artifact stored under `token`.
    pub fn read(&self, token: Fingerprint) -> Result<StoredArtifact, CacheError> {
        self.backend.read(token).ok_or_else(|| CacheError::NotFound {
            key: token.to_hex(),
        })
    }

    /// Returns the artifact stored under `token`, running `producer` to
    /// create it if it is missing.
    ///
    /// Concurrent calls for the same token run `producer` once between them;
    /// every caller receives a handle to the same artifact, or the same
    /// failure.
    pub fn materialize<F, E>(
        &self,
        token: Fingerprint,
        producer: F,
    ) -> Result<ArtifactHandle, CacheError>
    where
        F: FnOnce() -> Result<StoredArtifact, E>,
        E: fmt::Display,
    {
        loop {
            if let Some(handle) = self.backend.locate(token) {
                tracing::info!(%token, location = %handle.location, "cache hit");
                return Ok(handle);
            }

            let (flight, leader) = {
                let mut table = self.in_flight.lock();
                match table.get(&token) {
                    Some(flight) => (Arc::clone(flight), false),
                    None => {
                        let flight = Arc::new(Flight::default());
                        table.insert(token, Arc::clone(&flight));
                        (flight, true)
                    }
                }
            };

            if leader {
                let claim = Claim {
                    store: self,
                    token,
                    flight,
                    settled: false,
                };
                return self.produce(claim, producer);
            }

            tracing::debug!(%token, "waiting for in-flight production");
            match flight.wait() {
                Outcome::Ready(handle) => return Ok(handle),
                Outcome::Failed(reason) => {
                    return Err(CacheError::ProductionFailed {
                        key: token.to_hex(),
                        reason,
                    })
                }
                Outcome::Abandoned => continue,
            }
        }
    }

    fn produce<F, E>(&self, claim: Claim<'_>, producer: F) -> Result<ArtifactHandle, CacheError>
    where
        F: FnOnce() -> Result<StoredArtifact, E>,
        E: fmt::Display,
    {
        let token = claim.token;
        // A production may have finished between the lookup and the claim.
        if let Some(handle) = self.backend.locate(token) {
            claim.settle(Outcome::Ready(handle.clone()));
            return Ok(handle);
        }

        tracing::info!(%token, backend = %self.backend.describe(), "cache miss, producing");
        let artifact = match producer() {
            Ok(artifact) => artifact,
            Err(e) => {
                let reason = e.to_string();
                tracing::info!(%token, %reason, "production failed");
                claim.settle(Outcome::Failed(reason.clone()));
                return Err(CacheError::ProductionFailed {
                    key: token.to_hex(),
                    reason,
                });
            }
        };

        match self.backend.write(token, &artifact) {
            Ok(handle) => {
                tracing::info!(%token, location = %handle.location, size = handle.size, "produced artifact");
                self.record(&handle);
                claim.settle(Outcome::Ready(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                claim.settle(Outcome::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn record(&self, handle: &ArtifactHandle) {
        let mut manifest = self.manifest.lock();
        manifest.record(handle);
        if let Some(dir) = &self.manifest_dir {
            if let Err(e) = manifest.save(dir) {
                tracing::warn!(error = %e, "failed to save cache manifest");
            }
        }
    }

    /// A snapshot of the manifest.
    pub fn manifest(&self) -> CacheManifest {
        self.manifest.lock().clone()
    }

    /// Recorded entries in fingerprint order.
    pub fn entries(&self) -> Vec<(Fingerprint, CacheEntry)> {
        let manifest = self.manifest.lock();
        manifest
            .entries
            .iter()
            .filter_map(|(key, entry)| Some((key.parse().ok()?, entry.clone())))
            .collect()
    }

    /// Persists the manifest, if this store has a directory.
    pub fn save(&self) -> Result<(), CacheError> {
        match &self.manifest_dir {
            Some(dir) => self.manifest.lock().save(dir),
            None => Ok(()),
        }
    }

    /// Removes every stored artifact whose fingerprint is not in `live`.
    /// Artifacts being produced are left alone. Returns the number removed.
    pub fn gc(&self, live: &HashSet<Fingerprint>) -> Result<usize, CacheError> {
        let busy: HashSet<Fingerprint> = self.in_flight.lock().keys().copied().collect();
        let mut removed = 0;
        for token in self.backend.tokens()? {
            if live.contains(&token) || busy.contains(&token) {
                continue;
            }
            if self.backend.remove(token)? {
                tracing::debug!(%token, "removed artifact");
                removed += 1;
            }
        }
        self.manifest
            .lock()
            .retain(|token, _| live.contains(&token) || busy.contains(&token));
        self.save()?;
        tracing::info!(removed, "garbage collected artifacts");
        Ok(removed)
    }

    /// Removes stored artifacts the manifest does not know about.
    pub fn prune_orphans(&self) -> Result<usize, CacheError> {
        let live: HashSet<Fingerprint> = self.manifest.lock().tokens().into_iter().collect();
        self.gc(&live)
    }

    /// Removes recorded artifacts created before `cutoff`.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CacheError> {
        let live: HashSet<Fingerprint> = self
            .entries()
            .into_iter()
            .filter(|(_, entry)| entry.created_at >= cutoff)
            .map(|(token, _)| token)
            .collect();
        self.gc(&live)
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.describe())
            .field("manifest_dir", &self.manifest_dir)
            .finish_non_exhaustive()
    }
}
