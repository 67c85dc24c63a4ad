//! The fingerprint engine.

use crate::canonical::Canonical;
use crate::error::FingerprintError;
use crate::io::ProbeIo;
use crate::normalize::{self, NormalizerRegistry};
use crate::render::render_sql;
use crate::structural::StructuralDigests;
use cairn_common::{ContentHash, Fingerprint};
use cairn_ir::{NodeId, OpGraph, OpKind};
use rayon::prelude::*;
use std::collections::HashSet;

/// Computes fingerprints of operation DAGs.
///
/// Holds the probe I/O collaborators and the registry of pluggable
/// normalizers. Stateless otherwise: fingerprinting is safe to run from many
/// threads at once.
pub struct Fingerprinter {
    io: ProbeIo,
    registry: NormalizerRegistry,
}

/// Distinct sources of a subtree, each in pre-order of first appearance.
#[derive(Debug, Default)]
struct Sources {
    reads: Vec<NodeId>,
    tables: Vec<NodeId>,
    udfs: Vec<NodeId>,
}

impl Sources {
    fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.tables.is_empty() && self.udfs.is_empty()
    }
}

impl Fingerprinter {
    /// Creates an engine with an empty normalizer registry.
    pub fn new(io: ProbeIo) -> Self {
        Self::with_registry(io, NormalizerRegistry::new())
    }

    /// Creates an engine with a pre-populated normalizer registry.
    pub fn with_registry(io: ProbeIo, registry: NormalizerRegistry) -> Self {
        Self { io, registry }
    }

    /// The probe I/O collaborators.
    pub fn io(&self) -> &ProbeIo {
        &self.io
    }

    /// The registry of pluggable normalizers.
    pub fn registry(&self) -> &NormalizerRegistry {
        &self.registry
    }

    /// Fingerprints the computation rooted at `root`.
    ///
    /// Cache annotations around `root` or inside the subtree do not affect
    /// the result.
    pub fn fingerprint(&self, graph: &OpGraph, root: NodeId) -> Result<Fingerprint, FingerprintError> {
        let token = self.token(graph, root)?;
        let fingerprint = Fingerprint::from_hash(token.digest()?);
        tracing::debug!(root = %root, %fingerprint, "fingerprinted");
        Ok(fingerprint)
    }

    /// Fingerprints several roots of one graph in parallel. Results are in
    /// the order of `roots`.
    pub fn fingerprint_all(
        &self,
        graph: &OpGraph,
        roots: &[NodeId],
    ) -> Vec<Result<Fingerprint, FingerprintError>> {
        roots
            .par_iter()
            .map(|root| self.fingerprint(graph, *root))
            .collect()
    }

    /// Builds the canonical token of the computation rooted at `root`.
    ///
    /// A computation that reads no external source, references no backend
    /// table and calls no user function is identified by its SQL text alone.
    /// Otherwise the token combines the SQL text with the normalized reads,
    /// tables and functions, each listed once however often it appears.
    pub fn token(&self, graph: &OpGraph, root: NodeId) -> Result<Canonical, FingerprintError> {
        let root = graph.uncached(root)?;
        let mut digests = StructuralDigests::new(graph);
        let sources = self.collect_sources(graph, root, &mut digests)?;
        let sql = render_sql(graph, root)?;

        if sources.is_empty() {
            tracing::trace!(root = %root, sql = %sql, "self-contained computation");
            return Ok(Canonical::tagged("sql", vec![Canonical::Str(sql)]));
        }

        let mut reads = Vec::with_capacity(sources.reads.len());
        for id in &sources.reads {
            if let OpKind::Read(read) = graph.get(*id)? {
                reads.push(normalize::normalize_read(read, &self.io)?);
            }
        }
        let mut tables = Vec::with_capacity(sources.tables.len());
        for id in &sources.tables {
            match graph.get(*id)? {
                OpKind::DatabaseTable(table) => {
                    tables.push(normalize::normalize_table(table, &self.io, &self.registry)?)
                }
                OpKind::RemoteTable(remote) => {
                    let produced_by = self.fingerprint(graph, remote.remote_expr)?;
                    tables.push(normalize::normalize_remote(
                        &remote.schema,
                        produced_by,
                        &remote.source.kind,
                    ));
                }
                _ => {}
            }
        }
        let mut udfs = Vec::with_capacity(sources.udfs.len());
        for id in &sources.udfs {
            if let OpKind::Udf(call) = graph.get(*id)? {
                udfs.push(normalize::normalize_udf(call, graph)?);
            }
        }
        tracing::trace!(
            root = %root,
            reads = reads.len(),
            tables = tables.len(),
            udfs = udfs.len(),
            "computation with external sources"
        );
        Ok(Canonical::tagged(
            "expr",
            vec![
                Canonical::Str(sql),
                Canonical::Seq(reads),
                Canonical::Seq(tables),
                Canonical::Seq(udfs),
            ],
        ))
    }

    /// Walks the subtree once, rejecting placeholders before any probe runs.
    fn collect_sources(
        &self,
        graph: &OpGraph,
        root: NodeId,
        digests: &mut StructuralDigests<'_>,
    ) -> Result<Sources, FingerprintError> {
        let mut sources = Sources::default();
        let mut seen: HashSet<ContentHash> = HashSet::new();
        for id in graph.preorder(root)? {
            let bucket = match graph.get(id)? {
                OpKind::InMemoryTable { name, .. } => {
                    return Err(FingerprintError::UnresolvedPlaceholder { name: name.clone() })
                }
                OpKind::Read(_) => &mut sources.reads,
                OpKind::DatabaseTable(_) | OpKind::RemoteTable(_) => &mut sources.tables,
                OpKind::Udf(_) => &mut sources.udfs,
                _ => continue,
            };
            if seen.insert(digests.digest(id)?) {
                bucket.push(id);
            }
        }
        Ok(sources)
    }
}
