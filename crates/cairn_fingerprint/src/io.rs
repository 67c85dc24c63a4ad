//! I/O collaborators injected into the fingerprint engine.
//!
//! Probes never reach a filesystem, URL or database directly. They go
//! through the traits here, bundled in a [`ProbeIo`], so fingerprinting can
//! be exercised without live backends.

use crate::error::FingerprintError;
use cairn_config::ProbeConfig;
use cairn_ir::{
    BackendKind, ConnectionIdentity, DatabaseTable, Namespace, NodeId, OpGraph, Schema,
    SourceDescriptor,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConnectorError {
    /// Human-readable description.
    pub message: String,
}

impl ConnectorError {
    /// Creates an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error returned by connector capabilities a backend does not have.
    pub fn unsupported(capability: &str) -> Self {
        Self::new(format!("connector does not support {capability}"))
    }
}

/// Metadata of a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time, whole seconds since the Unix epoch.
    pub modified_secs: i64,
    /// Sub-second part of the modification time.
    pub modified_nanos: u32,
    /// Size in bytes.
    pub size: u64,
    /// Inode number, or 0 where the platform has none.
    pub inode: u64,
}

/// Access to file metadata.
pub trait Filesystem: Send + Sync {
    /// Returns the metadata of `path`, or `None` if nothing exists there.
    fn stat(&self, path: &str) -> std::io::Result<Option<FileStat>>;
}

/// [`Filesystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn stat(&self, path: &str) -> std::io::Result<Option<FileStat>> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_err(std::io::Error::other)?;
        Ok(Some(FileStat {
            modified_secs: modified.as_secs() as i64,
            modified_nanos: modified.subsec_nanos(),
            size: meta.len(),
            inode: inode(&meta),
        }))
    }
}

#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> u64 {
    0
}

/// Headers of a metadata-only HTTP request. Absent headers are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResponse {
    /// `Last-Modified`.
    pub last_modified: Option<String>,
    /// `Content-Length`.
    pub content_length: Option<u64>,
    /// `Content-Type`.
    pub content_type: Option<String>,
}

/// Metadata-only HTTP requests.
pub trait HttpHead: Send + Sync {
    /// Issues a `HEAD` request for `url`.
    fn head(&self, url: &str) -> Result<HeadResponse, ConnectorError>;
}

/// [`HttpHead`] over a blocking `reqwest` client.
pub struct ReqwestHead {
    client: reqwest::blocking::Client,
}

impl ReqwestHead {
    /// Builds a client with the configured timeout and user agent.
    pub fn new(config: &ProbeConfig) -> Result<Self, ConnectorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConnectorError::new(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpHead for ReqwestHead {
    fn head(&self, url: &str) -> Result<HeadResponse, ConnectorError> {
        use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};

        let response = self
            .client
            .head(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConnectorError::new(e.to_string()))?;
        let headers = response.headers();
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(HeadResponse {
            last_modified: header(LAST_MODIFIED),
            content_length: header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
            content_type: header(CONTENT_TYPE),
        })
    }
}

/// Rows returned by a metadata query, each cell rendered as text.
pub type Rows = Vec<Vec<Option<String>>>;

/// A live backend connection, as far as fingerprinting needs one.
///
/// Only `kind` and `identity` are required; every other capability defaults
/// to an "unsupported" error, and a backend supplies those its freshness
/// policy uses.
pub trait Connector: Send + Sync {
    /// The backend kind this connector talks to.
    fn kind(&self) -> BackendKind;

    /// Stable identity of the connection.
    fn identity(&self) -> ConnectionIdentity;

    /// Fetches a table's schema.
    fn schema(&self, name: &str, namespace: &Namespace) -> Result<Schema, ConnectorError> {
        let _ = (name, namespace);
        Err(ConnectorError::unsupported("schema lookup"))
    }

    /// Returns the table's rows as serialized batches, in storage order.
    fn record_batches(&self, table: &DatabaseTable) -> Result<Vec<Vec<u8>>, ConnectorError> {
        let _ = table;
        Err(ConnectorError::unsupported("record batch export"))
    }

    /// Returns the engine's physical plan for scanning the table.
    fn execution_plan(&self, table: &DatabaseTable) -> Result<String, ConnectorError> {
        let _ = table;
        Err(ConnectorError::unsupported("execution plans"))
    }

    /// Runs a metadata query.
    fn query(&self, sql: &str) -> Result<Rows, ConnectorError> {
        let _ = sql;
        Err(ConnectorError::unsupported("metadata queries"))
    }

    /// Resolves a table of a multi-backend session to the native backend
    /// that stores it.
    fn native_source(&self, table: &DatabaseTable) -> Result<DatabaseTable, ConnectorError> {
        let _ = table;
        Err(ConnectorError::unsupported("native source resolution"))
    }

    /// The descriptor tables reached through this connector carry.
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor::new(self.kind(), self.identity())
    }
}

/// The I/O capabilities available to probes.
#[derive(Clone)]
pub struct ProbeIo {
    fs: Arc<dyn Filesystem>,
    http: Arc<dyn HttpHead>,
    connectors: HashMap<ConnectionIdentity, Arc<dyn Connector>>,
}

impl ProbeIo {
    /// Creates a bundle with the given filesystem and HTTP client and no
    /// connectors.
    pub fn new(fs: Arc<dyn Filesystem>, http: Arc<dyn HttpHead>) -> Self {
        Self {
            fs,
            http,
            connectors: HashMap::new(),
        }
    }

    /// Local disk and a real HTTP client configured from `config`.
    pub fn local(config: &ProbeConfig) -> Result<Self, ConnectorError> {
        Ok(Self::new(
            Arc::new(LocalFilesystem),
            Arc::new(ReqwestHead::new(config)?),
        ))
    }

    /// Adds a connector, keyed by its identity.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    /// Adds a connector, replacing any with the same identity.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.identity(), connector);
    }

    /// The filesystem collaborator.
    pub fn fs(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    /// The HTTP collaborator.
    pub fn http(&self) -> &dyn HttpHead {
        self.http.as_ref()
    }

    /// Looks up the connector serving `source`.
    pub fn connector(&self, source: &SourceDescriptor) -> Result<&dyn Connector, FingerprintError> {
        self.connectors
            .get(&source.identity)
            .map(|c| c.as_ref())
            .ok_or_else(|| FingerprintError::Connector {
                identity: source.to_string(),
                message: "no connector registered".to_string(),
            })
    }
}

impl fmt::Debug for ProbeIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeIo")
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Maps a collaborator failure onto the connection it came from.
pub(crate) fn connector_error(source: &SourceDescriptor, err: ConnectorError) -> FingerprintError {
    FingerprintError::Connector {
        identity: source.to_string(),
        message: err.message,
    }
}

/// Adds a table node for `name`, with its schema fetched through `connector`.
pub fn bind_table(
    graph: &mut OpGraph,
    connector: &dyn Connector,
    name: &str,
    namespace: Namespace,
) -> Result<NodeId, FingerprintError> {
    let source = connector.descriptor();
    let schema = connector
        .schema(name, &namespace)
        .map_err(|e| connector_error(&source, e))?;
    Ok(graph.database_table(DatabaseTable {
        name: name.to_string(),
        schema,
        namespace,
        source,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_ir::{DataType, OpKind};

    struct SchemaOnly;

    impl Connector for SchemaOnly {
        fn kind(&self) -> BackendKind {
            BackendKind::Postgres
        }

        fn identity(&self) -> ConnectionIdentity {
            ConnectionIdentity::Network {
                host: "pg".to_string(),
                port: Some(5432),
                database: Some("app".to_string()),
            }
        }

        fn schema(&self, _name: &str, _ns: &Namespace) -> Result<Schema, ConnectorError> {
            Ok(Schema::from_pairs([("id", DataType::Int64)]).unwrap())
        }
    }

    struct NoHttp;

    impl HttpHead for NoHttp {
        fn head(&self, _url: &str) -> Result<HeadResponse, ConnectorError> {
            Err(ConnectorError::new("offline"))
        }
    }

    #[test]
    fn local_stat_of_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let stat = LocalFilesystem
            .stat(path.to_str().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stat.size, 8);
        assert!(stat.modified_secs > 0);
    }

    #[test]
    fn local_stat_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.parquet");
        assert!(LocalFilesystem.stat(path.to_str().unwrap()).unwrap().is_none());
    }

    #[test]
    fn default_capabilities_are_unsupported() {
        let table = DatabaseTable {
            name: "t".to_string(),
            schema: Schema::default(),
            namespace: Namespace::default(),
            source: SchemaOnly.descriptor(),
        };
        let err = SchemaOnly.execution_plan(&table).unwrap_err();
        assert!(err.message.contains("execution plans"));
    }

    #[test]
    fn bind_table_fetches_schema() {
        let mut graph = OpGraph::new();
        let id = bind_table(&mut graph, &SchemaOnly, "users", Namespace::database("public")).unwrap();
        let OpKind::DatabaseTable(table) = graph.get(id).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(table.schema.len(), 1);
        assert_eq!(table.source.kind, BackendKind::Postgres);
    }

    #[test]
    fn connector_lookup_by_identity() {
        let io = ProbeIo::new(Arc::new(LocalFilesystem), Arc::new(NoHttp))
            .with_connector(Arc::new(SchemaOnly));
        assert!(io.connector(&SchemaOnly.descriptor()).is_ok());
        let other = SourceDescriptor::new(BackendKind::DuckDb, ConnectionIdentity::Local(9));
        assert!(matches!(
            io.connector(&other),
            Err(FingerprintError::Connector { .. })
        ));
    }
}
