//! Freshness probes.
//!
//! A probe returns a small signature of a persisted source's current state.
//! An unchanged source yields an equal signature; a changed source yields a
//! different one with high but not absolute probability. Touching a file
//! without changing its bytes is a false invalidation that probes accept.

use crate::canonical::Canonical;
use crate::error::FingerprintError;
use crate::io::{connector_error, Connector, ProbeIo};
use cairn_common::ContentHash;
use cairn_ir::{BackendKind, ConnectionIdentity, DatabaseTable};

/// URL schemes of object stores, which have no freshness policy yet.
const OBJECT_STORE_SCHEMES: &[&str] = &["s3://", "s3a://", "gs://", "gcs://", "az://", "abfs://"];

/// DuckDB scan operators whose table is defined by DDL over files or storage.
const DUCKDB_DDL_SCANS: &[&str] = &["READ_PARQUET", "READ_CSV", "READ_CSV_AUTO", "SEQ_SCAN", "TABLE_SCAN"];

/// A comparison-ready signature of a source's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Local file metadata.
    File {
        /// Modification time, seconds since the Unix epoch.
        modified_secs: i64,
        /// Sub-second part of the modification time.
        modified_nanos: u32,
        /// Size in bytes.
        size: u64,
        /// Inode number.
        inode: u64,
    },
    /// Remote file headers.
    Http {
        /// `Last-Modified`.
        last_modified: Option<String>,
        /// `Content-Length`.
        content_length: Option<u64>,
        /// `Content-Type`.
        content_type: Option<String>,
    },
    /// Exact content of an in-memory table.
    Content {
        /// One digest per serialized batch, in storage order.
        batches: Vec<ContentHash>,
    },
    /// A query engine's physical plan for a file-backed scan.
    Plan {
        /// The plan text.
        plan: String,
    },
    /// A table registered by name with a streaming provider.
    Registered {
        /// The registered table name.
        name: String,
    },
    /// DDL of a view or table.
    Ddl {
        /// Defining statements, sorted.
        statements: Vec<String>,
    },
    /// Backend-reported approximate row count.
    RowCount {
        /// The count as reported.
        rows: String,
    },
    /// Backend-reported last modification time.
    LastModified {
        /// The timestamp as reported.
        at: String,
    },
}

impl Freshness {
    /// Canonical form of the signature.
    pub fn canonical(&self) -> Canonical {
        match self {
            Freshness::File {
                modified_secs,
                modified_nanos,
                size,
                inode,
            } => Canonical::tagged(
                "file",
                vec![
                    Canonical::Int(*modified_secs),
                    Canonical::UInt(u64::from(*modified_nanos)),
                    Canonical::UInt(*size),
                    Canonical::UInt(*inode),
                ],
            ),
            Freshness::Http {
                last_modified,
                content_length,
                content_type,
            } => Canonical::tagged(
                "http",
                vec![
                    Canonical::opt_str(last_modified.as_deref()),
                    content_length.map_or(Canonical::Null, Canonical::UInt),
                    Canonical::opt_str(content_type.as_deref()),
                ],
            ),
            Freshness::Content { batches } => Canonical::tagged(
                "content",
                batches.iter().copied().map(Canonical::Digest).collect(),
            ),
            Freshness::Plan { plan } => Canonical::tagged("plan", vec![Canonical::str(plan)]),
            Freshness::Registered { name } => {
                Canonical::tagged("registered", vec![Canonical::str(name)])
            }
            Freshness::Ddl { statements } => Canonical::tagged(
                "ddl",
                statements.iter().map(Canonical::str).collect(),
            ),
            Freshness::RowCount { rows } => Canonical::tagged("row_count", vec![Canonical::str(rows)]),
            Freshness::LastModified { at } => {
                Canonical::tagged("last_modified", vec![Canonical::str(at)])
            }
        }
    }
}

/// Probes a local path or URL.
pub fn probe_path(io: &ProbeIo, path: &str) -> Result<Freshness, FingerprintError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        let head = io
            .http()
            .head(path)
            .map_err(|e| FingerprintError::UnreachableSource {
                location: path.to_string(),
                reason: e.message,
            })?;
        tracing::debug!(url = path, ?head, "probed remote file");
        return Ok(Freshness::Http {
            last_modified: head.last_modified,
            content_length: head.content_length,
            content_type: head.content_type,
        });
    }
    if let Some(scheme) = OBJECT_STORE_SCHEMES.iter().find(|s| path.starts_with(**s)) {
        return Err(FingerprintError::UnsupportedSourceKind {
            kind: scheme.trim_end_matches("://").to_string(),
            reason: "object store paths have no freshness policy".to_string(),
        });
    }
    let local = path.strip_prefix("file://").unwrap_or(path);
    let unreachable = |reason: String| FingerprintError::UnreachableSource {
        location: path.to_string(),
        reason,
    };
    let stat = io
        .fs()
        .stat(local)
        .map_err(|e| unreachable(e.to_string()))?
        .ok_or_else(|| unreachable("no such file or directory".to_string()))?;
    tracing::debug!(path = local, ?stat, "probed local file");
    Ok(Freshness::File {
        modified_secs: stat.modified_secs,
        modified_nanos: stat.modified_nanos,
        size: stat.size,
        inode: stat.inode,
    })
}

/// Hashes every batch of an in-memory table.
///
/// Exact but proportional to the table's size: memory-resident data has no
/// cheaper proxy.
pub fn probe_memory(
    connector: &dyn Connector,
    table: &DatabaseTable,
) -> Result<Freshness, FingerprintError> {
    let batches = connector
        .record_batches(table)
        .map_err(|e| connector_error(&table.source, e))?;
    let bytes: usize = batches.iter().map(Vec::len).sum();
    tracing::debug!(table = %table.name, batches = batches.len(), bytes, "hashed in-memory table");
    Ok(Freshness::Content {
        batches: batches.iter().map(|b| ContentHash::from_bytes(b)).collect(),
    })
}

/// Classifies a query engine's plan for scanning `table`.
///
/// File scans yield the plan text, which names the files. In-memory scans
/// fall back to [`probe_memory`]. Streaming providers yield the registered
/// table name. Anything else is unsupported.
pub fn probe_engine_plan(
    connector: &dyn Connector,
    table: &DatabaseTable,
) -> Result<Freshness, FingerprintError> {
    let plan = connector
        .execution_plan(table)
        .map_err(|e| connector_error(&table.source, e))?;
    let head = plan.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    tracing::debug!(table = %table.name, plan = head, "classifying engine plan");

    let is_file_scan = head.starts_with("ParquetExec:")
        || head.starts_with("CsvExec:")
        || (head.starts_with("DataSourceExec:")
            && (head.contains("file_type=parquet") || head.contains("file_type=csv")));
    if is_file_scan {
        return Ok(Freshness::Plan { plan });
    }
    if head.starts_with("MemoryExec:") || head.starts_with("MemorySourceConfig:") {
        return probe_memory(connector, table);
    }
    if head.contains("RecordBatchProviderExec") {
        return Ok(Freshness::Registered {
            name: table.name.clone(),
        });
    }
    Err(FingerprintError::UnsupportedPlanShape {
        backend: table.source.kind.name().to_string(),
        table: table.name.clone(),
        plan: head.to_string(),
    })
}

/// Extracts the scan operator from DuckDB's `EXPLAIN` box rendering: the
/// first box line holding a single upper-case word, e.g. `│ SEQ_SCAN │`.
pub fn duckdb_scan_operator(plan: &str) -> Option<&str> {
    plan.lines()
        .filter(|line| line.contains('│'))
        .map(|line| line.trim().trim_matches('│').trim())
        .find(|inner| {
            !inner.is_empty() && inner.chars().all(|c| c.is_ascii_uppercase() || c == '_')
        })
}

/// Probes a DuckDB table through `EXPLAIN`.
///
/// Arrow scans are in-memory data. File and storage scans yield the
/// defining DDL of the view or table, which captures definitional changes
/// but not changes to the files a view reads.
pub fn probe_duckdb(
    connector: &dyn Connector,
    table: &DatabaseTable,
) -> Result<Freshness, FingerprintError> {
    let explain = format!("EXPLAIN SELECT * FROM {}", quote_ident(&table.name));
    let rows = connector
        .query(&explain)
        .map_err(|e| connector_error(&table.source, e))?;
    let plan = rows
        .first()
        .and_then(|row| row.last())
        .and_then(|cell| cell.as_deref())
        .unwrap_or("");
    let operator = duckdb_scan_operator(plan).ok_or_else(|| FingerprintError::UnsupportedPlanShape {
        backend: "duckdb".to_string(),
        table: table.name.clone(),
        plan: plan.lines().next().unwrap_or("").to_string(),
    })?;
    tracing::debug!(table = %table.name, operator, "duckdb scan operator");

    if operator == "ARROW_SCAN" {
        return probe_memory(connector, table);
    }
    if !DUCKDB_DDL_SCANS.contains(&operator) {
        return Err(FingerprintError::UnsupportedPlanShape {
            backend: "duckdb".to_string(),
            table: table.name.clone(),
            plan: operator.to_string(),
        });
    }
    let name = quote_literal(&table.name);
    let sql = format!(
        "SELECT sql FROM duckdb_views() WHERE view_name = {name} \
         UNION SELECT sql FROM duckdb_tables() WHERE table_name = {name}"
    );
    let rows = connector
        .query(&sql)
        .map_err(|e| connector_error(&table.source, e))?;
    let mut statements: Vec<String> = rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .collect();
    statements.sort();
    Ok(Freshness::Ddl { statements })
}

/// Probes a warehouse table through its backend's metadata tables.
pub fn probe_warehouse(
    connector: &dyn Connector,
    table: &DatabaseTable,
) -> Result<Freshness, FingerprintError> {
    let name = &table.name;
    let ns = &table.namespace;
    let (sql, row_count) = match &table.source.kind {
        BackendKind::Postgres => {
            let qualified = match &ns.database {
                Some(db) => format!("{}.{}", quote_ident(db), quote_ident(name)),
                None => quote_ident(name),
            };
            (
                format!(
                    "SELECT reltuples FROM pg_class WHERE oid = {}::regclass",
                    quote_literal(&qualified)
                ),
                true,
            )
        }
        BackendKind::Snowflake => {
            let catalog = ns
                .catalog
                .as_deref()
                .map(|c| format!("{}.", quote_ident(c)))
                .unwrap_or_default();
            let mut sql = format!(
                "SELECT last_altered FROM {catalog}information_schema.tables WHERE table_name = {}",
                quote_literal(name)
            );
            if let Some(db) = &ns.database {
                sql.push_str(&format!(" AND table_schema = {}", quote_literal(db)));
            }
            (sql, false)
        }
        BackendKind::BigQuery => {
            let (project, dataset) = bigquery_dataset(table)?;
            (
                format!(
                    "SELECT last_modified_time FROM `{project}.{dataset}.__TABLES__` WHERE table_id = {}",
                    quote_literal(name)
                ),
                false,
            )
        }
        other => {
            return Err(FingerprintError::UnsupportedSourceKind {
                kind: other.name().to_string(),
                reason: "backend reports no freshness metadata".to_string(),
            })
        }
    };
    let rows = connector
        .query(&sql)
        .map_err(|e| connector_error(&table.source, e))?;
    let value = rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .ok_or_else(|| FingerprintError::Connector {
            identity: table.source.to_string(),
            message: format!("no freshness metadata for table '{name}'"),
        })?;
    tracing::debug!(table = %name, backend = %table.source.kind, value = %value, "probed warehouse table");
    Ok(if row_count {
        Freshness::RowCount { rows: value }
    } else {
        Freshness::LastModified { at: value }
    })
}

fn bigquery_dataset(table: &DatabaseTable) -> Result<(String, String), FingerprintError> {
    let (id_project, id_dataset) = match &table.source.identity {
        ConnectionIdentity::Project { project, dataset } => (Some(project), Some(dataset)),
        _ => (None, None),
    };
    let project = table.namespace.catalog.as_ref().or(id_project);
    let dataset = table.namespace.database.as_ref().or(id_dataset);
    match (project, dataset) {
        (Some(p), Some(d)) => Ok((p.clone(), d.clone())),
        _ => Err(FingerprintError::Connector {
            identity: table.source.to_string(),
            message: format!("cannot resolve the dataset of table '{}'", table.name),
        }),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
