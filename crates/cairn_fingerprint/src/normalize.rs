//! Node normalizers.
//!
//! Table-like nodes dispatch on node kind, then on backend kind. Built-in
//! backend kinds are matched exhaustively; only [`BackendKind::Custom`]
//! goes through the runtime [`NormalizerRegistry`].

use crate::canonical::{self, Canonical};
use crate::error::FingerprintError;
use crate::io::{connector_error, ProbeIo};
use crate::probe::{self, Freshness};
use crate::structural::read_arg;
use cairn_common::{ContentHash, Fingerprint};
use cairn_ir::{BackendKind, DatabaseTable, OpGraph, OpKind, ReadArg, ReadOp, Schema, UdfCall};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Keyword slots of a read node that may hold its path, in priority order.
pub const READ_PATH_SLOTS: &[&str] = &["path", "source", "source_list"];

/// Normalizer for a pluggable backend kind.
pub trait TableNormalizer: Send + Sync {
    /// Produces the canonical tuple of a table of this backend kind.
    fn normalize(&self, table: &DatabaseTable, io: &ProbeIo) -> Result<Canonical, FingerprintError>;
}

/// Append-only registry of normalizers for [`BackendKind::Custom`] kinds.
///
/// Populated at startup and read concurrently afterwards.
#[derive(Default)]
pub struct NormalizerRegistry {
    entries: RwLock<HashMap<String, Arc<dyn TableNormalizer>>>,
}

impl NormalizerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a normalizer for a custom backend kind.
    ///
    /// Returns `false` and keeps the existing entry if `kind` is already
    /// registered.
    pub fn register(&self, kind: &str, normalizer: Arc<dyn TableNormalizer>) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(kind) {
            tracing::warn!(kind, "normalizer already registered, keeping the first");
            return false;
        }
        entries.insert(kind.to_string(), normalizer);
        true
    }

    /// Looks up the normalizer of a custom backend kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn TableNormalizer>> {
        self.entries.read().get(kind).cloned()
    }

    /// Returns the registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.entries.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Normalizes a backend table: schema, freshness and, for networked
/// warehouses, the connection identity.
pub fn normalize_table(
    table: &DatabaseTable,
    io: &ProbeIo,
    registry: &NormalizerRegistry,
) -> Result<Canonical, FingerprintError> {
    tracing::debug!(table = %table.name, backend = %table.source.kind, "normalizing table");
    match &table.source.kind {
        BackendKind::Memory => {
            let connector = io.connector(&table.source)?;
            let fresh = probe::probe_memory(connector, table)?;
            Ok(local_tuple("memory", table, &fresh))
        }
        BackendKind::DataFusion => {
            let connector = io.connector(&table.source)?;
            let fresh = probe::probe_engine_plan(connector, table)?;
            Ok(local_tuple("datafusion", table, &fresh))
        }
        BackendKind::DuckDb => {
            let connector = io.connector(&table.source)?;
            let fresh = probe::probe_duckdb(connector, table)?;
            Ok(local_tuple("duckdb", table, &fresh))
        }
        BackendKind::Postgres | BackendKind::Snowflake | BackendKind::BigQuery => {
            let connector = io.connector(&table.source)?;
            let fresh = probe::probe_warehouse(connector, table)?;
            Ok(Canonical::tagged(
                table.source.kind.name(),
                vec![
                    Canonical::str(&table.name),
                    canonical::schema(&table.schema),
                    canonical::identity(&table.source),
                    canonical::namespace(&table.namespace),
                    fresh.canonical(),
                ],
            ))
        }
        BackendKind::Trino => Err(FingerprintError::UnsupportedSourceKind {
            kind: "trino".to_string(),
            reason: "backend reports no freshness metadata".to_string(),
        }),
        BackendKind::Composite => {
            let connector = io.connector(&table.source)?;
            let native = connector
                .native_source(table)
                .map_err(|e| connector_error(&table.source, e))?;
            if native.source.kind == BackendKind::Composite {
                let fresh = probe::probe_engine_plan(connector, &native)?;
                Ok(local_tuple("composite", &native, &fresh))
            } else {
                normalize_table(&native, io, registry)
            }
        }
        BackendKind::Custom(kind) => {
            let normalizer =
                registry
                    .get(kind)
                    .ok_or_else(|| FingerprintError::UnsupportedBackend {
                        backend: kind.clone(),
                    })?;
            normalizer.normalize(table, io)
        }
    }
}

fn local_tuple(tag: &str, table: &DatabaseTable, fresh: &Freshness) -> Canonical {
    Canonical::tagged(tag, vec![canonical::schema(&table.schema), fresh.canonical()])
}

/// Returns the read's authoritative path: the first non-empty recognized
/// slot.
pub fn read_path(read: &ReadOp) -> Result<&str, FingerprintError> {
    let shape_error = |reason: String| FingerprintError::UnsupportedReadShape {
        name: read.name.clone(),
        reason,
    };
    for slot in READ_PATH_SLOTS {
        match read.args.get(*slot) {
            Some(ReadArg::Str(s)) if !s.is_empty() => return Ok(s.as_str()),
            Some(ReadArg::StrList(items)) if !items.is_empty() => {
                return Err(shape_error(format!(
                    "'{slot}' lists {} paths; only single paths are supported",
                    items.len()
                )))
            }
            Some(ReadArg::Bool(_) | ReadArg::Int(_)) => {
                return Err(shape_error(format!("'{slot}' is not a path")))
            }
            _ => {}
        }
    }
    Err(shape_error(format!(
        "no path in any of {}",
        READ_PATH_SLOTS.join(", ")
    )))
}

/// Normalizes an external read: method, path, remaining options, declared
/// schema and the path's freshness.
pub fn normalize_read(read: &ReadOp, io: &ProbeIo) -> Result<Canonical, FingerprintError> {
    let path = read_path(read)?;
    let fresh = probe::probe_path(io, path)?;
    let options = read
        .args
        .iter()
        .filter(|(k, _)| !READ_PATH_SLOTS.contains(&k.as_str()))
        .map(|(k, v)| Canonical::Seq(vec![Canonical::str(k), read_arg(v)]))
        .collect();
    Ok(Canonical::tagged(
        "read",
        vec![
            Canonical::str(&read.method),
            Canonical::str(path),
            Canonical::Seq(options),
            canonical::schema(&read.schema),
            fresh.canonical(),
        ],
    ))
}

/// Normalizes a user function: argument types, return type and code digest.
///
/// The display name takes no part. A filter other than the literal `TRUE`
/// is rejected.
pub fn normalize_udf(call: &UdfCall, graph: &OpGraph) -> Result<Canonical, FingerprintError> {
    if let Some(filter) = call.filter {
        let trivial = matches!(graph.get(filter)?, OpKind::Literal { value, .. } if value.is_true());
        if !trivial {
            return Err(FingerprintError::UnsupportedUdfFilter {
                name: call.name.clone(),
            });
        }
    }
    let mut arg_types = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        arg_types.push(canonical::dtype(&graph.dtype_of(*arg)?));
    }
    Ok(Canonical::tagged(
        "udf",
        vec![
            Canonical::str(format!("{:?}", call.kind)),
            Canonical::Seq(arg_types),
            canonical::dtype(&call.return_type),
            Canonical::Digest(ContentHash::from_bytes(call.code.as_bytes())),
        ],
    ))
}

/// Normalizes a remote table from the fingerprint of the computation that
/// produced its data. Only the destination backend kind matters, not the
/// destination connection.
pub fn normalize_remote(schema: &Schema, produced_by: Fingerprint, destination: &BackendKind) -> Canonical {
    Canonical::tagged(
        "remote",
        vec![
            canonical::schema(schema),
            Canonical::Digest(produced_by.hash()),
            Canonical::str(destination.name()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Connector, ConnectorError, FileStat, Filesystem, HeadResponse, HttpHead};
    use cairn_ir::{ConnectionIdentity, DataType, Namespace, ScalarValue, SourceDescriptor, UdfKind};
    use std::collections::BTreeMap;

    struct StaticFs;

    impl Filesystem for StaticFs {
        fn stat(&self, _path: &str) -> std::io::Result<Option<FileStat>> {
            Ok(Some(FileStat {
                modified_secs: 1,
                modified_nanos: 0,
                size: 10,
                inode: 2,
            }))
        }
    }

    struct NoHttp;

    impl HttpHead for NoHttp {
        fn head(&self, _url: &str) -> Result<HeadResponse, ConnectorError> {
            Err(ConnectorError::new("offline"))
        }
    }

    struct Session {
        native: DatabaseTable,
    }

    impl Connector for Session {
        fn kind(&self) -> BackendKind {
            BackendKind::Composite
        }

        fn identity(&self) -> ConnectionIdentity {
            ConnectionIdentity::Local(100)
        }

        fn native_source(&self, _t: &DatabaseTable) -> Result<DatabaseTable, ConnectorError> {
            Ok(self.native.clone())
        }
    }

    struct Warehouse;

    impl Connector for Warehouse {
        fn kind(&self) -> BackendKind {
            BackendKind::Postgres
        }

        fn identity(&self) -> ConnectionIdentity {
            ConnectionIdentity::Local(200)
        }

        fn query(&self, _sql: &str) -> Result<crate::io::Rows, ConnectorError> {
            Ok(vec![vec![Some("42".to_string())]])
        }
    }

    struct Fixed;

    impl TableNormalizer for Fixed {
        fn normalize(&self, table: &DatabaseTable, _io: &ProbeIo) -> Result<Canonical, FingerprintError> {
            Ok(Canonical::tagged("lance", vec![Canonical::str(&table.name)]))
        }
    }

    fn io() -> ProbeIo {
        ProbeIo::new(Arc::new(StaticFs), Arc::new(NoHttp))
    }

    fn table(kind: BackendKind, token: u64) -> DatabaseTable {
        DatabaseTable {
            name: "orders".to_string(),
            schema: Schema::from_pairs([("id", DataType::Int64)]).unwrap(),
            namespace: Namespace::default(),
            source: SourceDescriptor::new(kind, ConnectionIdentity::Local(token)),
        }
    }

    fn read(args: &[(&str, ReadArg)]) -> ReadOp {
        ReadOp {
            name: "penguins".to_string(),
            schema: Schema::default(),
            method: "read_csv".to_string(),
            args: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn read_path_prefers_first_non_empty_slot() {
        let r = read(&[
            ("path", ReadArg::Str(String::new())),
            ("source", ReadArg::Str("data/a.csv".to_string())),
        ]);
        assert_eq!(read_path(&r).unwrap(), "data/a.csv");
    }

    #[test]
    fn read_path_rejects_lists_and_absence() {
        let list = read(&[(
            "source_list",
            ReadArg::StrList(vec!["a.csv".to_string(), "b.csv".to_string()]),
        )]);
        assert!(matches!(
            read_path(&list).unwrap_err(),
            FingerprintError::UnsupportedReadShape { .. }
        ));
        assert!(read_path(&read(&[])).is_err());
    }

    #[test]
    fn read_options_change_tuple() {
        let a = read(&[
            ("path", ReadArg::Str("a.csv".to_string())),
            ("delimiter", ReadArg::Str(",".to_string())),
        ]);
        let b = read(&[
            ("path", ReadArg::Str("a.csv".to_string())),
            ("delimiter", ReadArg::Str(";".to_string())),
        ]);
        assert_ne!(normalize_read(&a, &io()).unwrap(), normalize_read(&b, &io()).unwrap());
    }

    #[test]
    fn trino_is_unsupported() {
        let err = normalize_table(&table(BackendKind::Trino, 1), &io(), &NormalizerRegistry::new())
            .unwrap_err();
        assert!(matches!(err, FingerprintError::UnsupportedSourceKind { .. }));
    }

    #[test]
    fn custom_kind_uses_registry() {
        let registry = NormalizerRegistry::new();
        let t = table(BackendKind::Custom("lance".to_string()), 1);
        assert!(matches!(
            normalize_table(&t, &io(), &registry).unwrap_err(),
            FingerprintError::UnsupportedBackend { .. }
        ));
        assert!(registry.register("lance", Arc::new(Fixed)));
        assert!(!registry.register("lance", Arc::new(Fixed)));
        assert_eq!(registry.kinds(), vec!["lance".to_string()]);
        assert!(normalize_table(&t, &io(), &registry).is_ok());
    }

    #[test]
    fn composite_redispatches_to_native_backend() {
        let native = table(BackendKind::Postgres, 200);
        let io = io()
            .with_connector(Arc::new(Session {
                native: native.clone(),
            }))
            .with_connector(Arc::new(Warehouse));
        let registry = NormalizerRegistry::new();
        let via_session = normalize_table(&table(BackendKind::Composite, 100), &io, &registry).unwrap();
        let direct = normalize_table(&native, &io, &registry).unwrap();
        assert_eq!(via_session, direct);
    }

    #[test]
    fn missing_connector_is_reported() {
        let err = normalize_table(&table(BackendKind::Postgres, 9), &io(), &NormalizerRegistry::new())
            .unwrap_err();
        assert!(matches!(err, FingerprintError::Connector { .. }));
    }

    #[test]
    fn udf_filter_rules() {
        let mut graph = OpGraph::new();
        let t = graph
            .unbound_table("t", Schema::from_pairs([("x", DataType::Float64)]).unwrap())
            .unwrap();
        let x = graph.column(t, "x").unwrap();
        let yes = graph.literal(ScalarValue::Boolean(true)).unwrap();
        let zero = graph.literal(ScalarValue::Float(0.0)).unwrap();
        let positive = graph.binary(cairn_ir::BinaryOp::Gt, x, zero).unwrap();
        let call = |filter| UdfCall {
            kind: UdfKind::Aggregate,
            name: "wavg".to_string(),
            args: vec![x],
            return_type: DataType::Float64,
            code: "def wavg(x): ...".to_string(),
            filter,
        };
        assert!(normalize_udf(&call(None), &graph).is_ok());
        assert!(normalize_udf(&call(Some(yes)), &graph).is_ok());
        assert!(matches!(
            normalize_udf(&call(Some(positive)), &graph).unwrap_err(),
            FingerprintError::UnsupportedUdfFilter { .. }
        ));
    }

    #[test]
    fn remote_ignores_destination_connection() {
        let schema = Schema::default();
        let token = Fingerprint::from_hash(ContentHash::from_bytes(b"producer"));
        let a = normalize_remote(&schema, token, &BackendKind::Postgres);
        let b = normalize_remote(&schema, token, &BackendKind::Postgres);
        let c = normalize_remote(&schema, token, &BackendKind::DuckDb);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
