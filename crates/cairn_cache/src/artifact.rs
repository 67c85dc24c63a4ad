//! On-disk artifact files.
//!
//! Each artifact is stored at `<root>/artifacts/<token>.cairn` as a 4-byte
//! little-endian header length, a bincode-encoded [`ArtifactHeader`], and the
//! payload. The payload may be gzip-compressed. Files are written under a
//! temporary name and renamed into place, so a reader never sees a partially
//! written artifact.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use cairn_common::{ContentHash, Fingerprint};
use cairn_ir::Schema;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::backend::{ArtifactHandle, StorageBackend, StoredArtifact};
use crate::error::CacheError;
use crate::CAIRN_VERSION;

/// Magic bytes identifying a Cairn artifact.
pub const ARTIFACT_MAGIC: [u8; 4] = *b"CAIR";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Largest encoded header accepted, in bytes.
pub const MAX_HEADER_LEN: usize = 1 << 20;

const ARTIFACT_SUBDIR: &str = "artifacts";
const ARTIFACT_EXT: &str = "cairn";

/// Header prepended to every artifact file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"CAIR"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Cairn version that produced this artifact.
    pub cairn_version: String,

    /// Content hash of the stored payload bytes (after compression).
    pub checksum: ContentHash,

    /// Schema of the materialized relation.
    pub schema: Schema,

    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: i64,

    /// Whether the payload is gzip-compressed.
    pub compressed: bool,
}

impl ArtifactHeader {
    fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created_at_ms).unwrap_or_default()
    }
}

/// Filesystem-backed artifact storage.
pub struct FsBackend {
    /// Root cache directory.
    root: PathBuf,

    /// Whether new artifacts are gzip-compressed.
    compress: bool,
}

impl FsBackend {
    /// Creates a backend rooted at `root`. Nothing is created on disk until
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compress: false,
        }
    }

    /// Enables or disables gzip compression of new artifacts.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Root cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for the artifact stored under `token`.
    pub fn artifact_path(&self, token: Fingerprint) -> PathBuf {
        self.artifact_dir().join(format!("{token}.{ARTIFACT_EXT}"))
    }

    fn artifact_dir(&self) -> PathBuf {
        self.root.join(ARTIFACT_SUBDIR)
    }

    fn ensure_dir(&self) -> Result<PathBuf, CacheError> {
        let dir = self.artifact_dir();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    fn encode(&self, artifact: &StoredArtifact) -> Result<(ArtifactHeader, Vec<u8>), CacheError> {
        let gzip = |e: std::io::Error| CacheError::Serialization {
            reason: format!("gzip: {e}"),
        };
        let payload = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&artifact.payload).map_err(gzip)?;
            encoder.finish().map_err(gzip)?
        } else {
            artifact.payload.clone()
        };

        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            cairn_version: CAIRN_VERSION.to_string(),
            checksum: ContentHash::from_bytes(&payload),
            schema: artifact.schema.clone(),
            created_at_ms: Utc::now().timestamp_millis(),
            compressed: self.compress,
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, header_config()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);
        Ok((header, output))
    }

    /// Reads and validates only the header of the artifact at `path`.
    pub fn read_header(path: &Path) -> Result<ArtifactHeader, CacheError> {
        let io = |e: std::io::Error| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = File::open(path).map_err(io)?;
        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)
            .map_err(|_| invalid(path, "truncated header length"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if header_len > MAX_HEADER_LEN {
            return Err(invalid(path, "header too large"));
        }
        let file_len = file.metadata().map_err(io)?.len();
        if 4 + header_len as u64 > file_len {
            return Err(invalid(path, "truncated header"));
        }
        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)
            .map_err(|_| invalid(path, "truncated header"))?;
        decode_header(path, &header_bytes)
    }

    /// Reads the artifact at `path`, validating header and checksum.
    pub fn read_file(path: &Path) -> Result<(ArtifactHeader, StoredArtifact), CacheError> {
        let raw = std::fs::read(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if raw.len() < 4 {
            return Err(invalid(path, "truncated header length"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[..4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if header_len > MAX_HEADER_LEN {
            return Err(invalid(path, "header too large"));
        }
        if raw.len() < 4 + header_len {
            return Err(invalid(path, "truncated header"));
        }
        let header = decode_header(path, &raw[4..4 + header_len])?;

        let stored = &raw[4 + header_len..];
        let actual = ContentHash::from_bytes(stored);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: header.checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        let payload = if header.compressed {
            let mut out = Vec::new();
            GzDecoder::new(stored)
                .read_to_end(&mut out)
                .map_err(|e| CacheError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            out
        } else {
            stored.to_vec()
        };
        let artifact = StoredArtifact::new(header.schema.clone(), payload);
        Ok((header, artifact))
    }

    fn handle(&self, token: Fingerprint, path: &Path, header: &ArtifactHeader) -> ArtifactHandle {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        ArtifactHandle {
            token,
            location: path.display().to_string(),
            schema: header.schema.clone(),
            size,
            created_at: header.created_at(),
        }
    }
}

fn invalid(path: &Path, reason: &str) -> CacheError {
    CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn header_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_HEADER_LEN>()
}

fn decode_header(path: &Path, bytes: &[u8]) -> Result<ArtifactHeader, CacheError> {
    let (header, _): (ArtifactHeader, usize) =
        bincode::serde::decode_from_slice(bytes, header_config())
            .map_err(|e| invalid(path, &e.to_string()))?;
    if header.magic != ARTIFACT_MAGIC {
        return Err(invalid(path, "bad magic bytes"));
    }
    if header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: ARTIFACT_FORMAT_VERSION,
            actual: header.format_version,
        });
    }
    Ok(header)
}

impl StorageBackend for FsBackend {
    fn describe(&self) -> String {
        format!("filesystem at {}", self.root.display())
    }

    fn write(
        &self,
        token: Fingerprint,
        artifact: &StoredArtifact,
    ) -> Result<ArtifactHandle, CacheError> {
        let dir = self.ensure_dir()?;
        let (header, bytes) = self.encode(artifact)?;
        let path = self.artifact_path(token);

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(&bytes).map_err(|e| CacheError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        tmp.as_file().sync_all().map_err(|e| CacheError::Io {
            path: tmp_path,
            source: e,
        })?;
        tmp.persist(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        Ok(self.handle(token, &path, &header))
    }

    fn locate(&self, token: Fingerprint) -> Option<ArtifactHandle> {
        let path = self.artifact_path(token);
        if !path.exists() {
            return None;
        }
        match Self::read_header(&path) {
            Ok(header) => Some(self.handle(token, &path, &header)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                None
            }
        }
    }

    fn read(&self, token: Fingerprint) -> Option<StoredArtifact> {
        let path = self.artifact_path(token);
        if !path.exists() {
            return None;
        }
        match Self::read_file(&path) {
            Ok((_, artifact)) => Some(artifact),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping corrupt artifact");
                None
            }
        }
    }

    fn remove(&self, token: Fingerprint) -> Result<bool, CacheError> {
        let path = self.artifact_path(token);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    fn tokens(&self) -> Result<Vec<Fingerprint>, CacheError> {
        let dir = self.artifact_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let mut tokens = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            if let Some(token) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<Fingerprint>().ok())
            {
                tokens.push(token);
            }
        }
        tokens.sort();
        Ok(tokens)
    }
}
