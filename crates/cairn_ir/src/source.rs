//! Where table-like nodes get their data from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of backend holding a table's data.
///
/// Known kinds are dispatched statically by the normalizers. `Custom` kinds
/// are resolved at runtime through a normalizer registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Dataframe-style tables held in process memory.
    Memory,
    /// An embedded columnar query engine with inspectable physical plans.
    DataFusion,
    /// An embedded analytical database queried through SQL.
    DuckDb,
    /// A networked PostgreSQL server.
    Postgres,
    /// A Snowflake warehouse.
    Snowflake,
    /// A BigQuery project.
    BigQuery,
    /// A Trino coordinator.
    Trino,
    /// A multi-backend session that delegates each table to a native backend.
    Composite,
    /// A pluggable backend registered at runtime.
    Custom(String),
}

impl BackendKind {
    /// Returns the stable lowercase name of the backend kind.
    pub fn name(&self) -> &str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::DataFusion => "datafusion",
            BackendKind::DuckDb => "duckdb",
            BackendKind::Postgres => "postgres",
            BackendKind::Snowflake => "snowflake",
            BackendKind::BigQuery => "bigquery",
            BackendKind::Trino => "trino",
            BackendKind::Composite => "composite",
            BackendKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable description of which connection a table was reached through.
///
/// Connection objects themselves are never hashed; only one of these
/// extracted descriptors is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionIdentity {
    /// A networked server. `port` and `database` are absent for backends
    /// that are identified by host alone.
    Network {
        /// Host name or address.
        host: String,
        /// TCP port, when part of the identity.
        port: Option<u16>,
        /// Database name, when part of the identity.
        database: Option<String>,
    },
    /// An in-process engine, identified by a token unique within the process.
    Local(u64),
    /// A cloud project and dataset pair.
    Project {
        /// Project ID.
        project: String,
        /// Dataset ID.
        dataset: String,
    },
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionIdentity::Network {
                host,
                port,
                database,
            } => {
                f.write_str(host)?;
                if let Some(port) = port {
                    write!(f, ":{port}")?;
                }
                if let Some(db) = database {
                    write!(f, "/{db}")?;
                }
                Ok(())
            }
            ConnectionIdentity::Local(token) => write!(f, "local:{token:x}"),
            ConnectionIdentity::Project { project, dataset } => write!(f, "{project}.{dataset}"),
        }
    }
}

/// Backend kind plus connection identity for a table-like node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Which kind of backend serves the data.
    pub kind: BackendKind,
    /// Which connection of that kind.
    pub identity: ConnectionIdentity,
}

impl SourceDescriptor {
    /// Creates a descriptor.
    pub fn new(kind: BackendKind, identity: ConnectionIdentity) -> Self {
        Self { kind, identity }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.identity)
    }
}

/// Catalog and database qualifying a table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Catalog (or project) name.
    #[serde(default)]
    pub catalog: Option<String>,
    /// Database (or schema/dataset) name.
    #[serde(default)]
    pub database: Option<String>,
}

impl Namespace {
    /// A namespace qualified by database only.
    pub fn database(database: impl Into<String>) -> Self {
        Self {
            catalog: None,
            database: Some(database.into()),
        }
    }

    /// A namespace qualified by catalog and database.
    pub fn qualified(catalog: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            catalog: Some(catalog.into()),
            database: Some(database.into()),
        }
    }

    /// Returns `true` if neither catalog nor database is set.
    pub fn is_empty(&self) -> bool {
        self.catalog.is_none() && self.database.is_none()
    }
}
