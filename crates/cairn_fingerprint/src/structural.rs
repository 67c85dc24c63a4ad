//! Structural node digests.
//!
//! A structural digest identifies a node by kind, parameters and the
//! structural digests of its children, without touching any source. Two
//! subtrees built independently with the same shape get the same digest, so
//! the digest is the key for deduplicating sources. It says nothing about
//! which occurrence of a relation a column binds to; rendered SQL carries
//! that. Cache annotations are transparent.

use crate::canonical::{self, Canonical};
use crate::error::FingerprintError;
use cairn_common::ContentHash;
use cairn_ir::{NodeId, OpGraph, OpKind, ReadArg};
use std::collections::HashMap;

/// Memoized structural digests over one graph.
pub struct StructuralDigests<'g> {
    graph: &'g OpGraph,
    memo: HashMap<NodeId, ContentHash>,
}

impl<'g> StructuralDigests<'g> {
    /// Creates an empty memo for `graph`.
    pub fn new(graph: &'g OpGraph) -> Self {
        Self {
            graph,
            memo: HashMap::new(),
        }
    }

    /// Returns the structural digest of `id`.
    pub fn digest(&mut self, id: NodeId) -> Result<ContentHash, FingerprintError> {
        if let Some(digest) = self.memo.get(&id) {
            return Ok(*digest);
        }
        let node = self.graph.get(id)?;
        let digest = if let OpKind::Cached { parent } = node {
            self.digest(*parent)?
        } else {
            let params = self.params(node)?;
            let mut children = Vec::new();
            for child in node.children() {
                children.push(Canonical::Digest(self.digest(child)?));
            }
            Canonical::tagged(
                node.kind_name(),
                vec![Canonical::Seq(params), Canonical::Seq(children)],
            )
            .digest()?
        };
        tracing::trace!(node = %id, kind = node.kind_name(), %digest, "structural digest");
        self.memo.insert(id, digest);
        Ok(digest)
    }

    fn params(&mut self, node: &OpKind) -> Result<Vec<Canonical>, FingerprintError> {
        let params = match node {
            OpKind::UnboundTable { name, schema } | OpKind::InMemoryTable { name, schema } => {
                vec![Canonical::str(name), canonical::schema(schema)]
            }
            OpKind::DatabaseTable(table) => vec![
                Canonical::str(&table.name),
                canonical::schema(&table.schema),
                canonical::namespace(&table.namespace),
                canonical::identity(&table.source),
            ],
            OpKind::Read(read) => vec![
                Canonical::str(&read.name),
                Canonical::str(&read.method),
                Canonical::Seq(
                    read.args
                        .iter()
                        .map(|(k, v)| Canonical::Seq(vec![Canonical::str(k), read_arg(v)]))
                        .collect(),
                ),
                canonical::schema(&read.schema),
            ],
            OpKind::RemoteTable(remote) => vec![
                Canonical::str(&remote.name),
                canonical::schema(&remote.schema),
                canonical::identity(&remote.source),
                Canonical::Digest(self.digest(remote.remote_expr)?),
            ],
            OpKind::Artifact(artifact) => vec![Canonical::Digest(artifact.token.hash())],
            OpKind::Filter { .. } | OpKind::Cached { .. } => Vec::new(),
            OpKind::Project { columns, .. } => vec![names(columns)],
            OpKind::Join { kind, .. } => vec![Canonical::str(kind.sql())],
            OpKind::Aggregate {
                groups, metrics, ..
            } => vec![names(groups), names(metrics)],
            OpKind::Sort { keys, .. } => keys.iter().map(|k| Canonical::Bool(k.ascending)).collect(),
            OpKind::Limit { n, offset, .. } => vec![Canonical::UInt(*n), Canonical::UInt(*offset)],
            OpKind::Union { distinct, .. } => vec![Canonical::Bool(*distinct)],
            OpKind::Column { name, dtype, .. } => {
                vec![Canonical::str(name), canonical::dtype(dtype)]
            }
            OpKind::Literal { value, dtype } => {
                vec![canonical::scalar(value), canonical::dtype(dtype)]
            }
            OpKind::Binary { op, dtype, .. } => {
                vec![Canonical::str(op.sql()), canonical::dtype(dtype)]
            }
            OpKind::Unary { op, dtype, .. } => {
                vec![Canonical::str(format!("{op:?}")), canonical::dtype(dtype)]
            }
            OpKind::Agg { func, arg, dtype } => vec![
                Canonical::str(format!("{func:?}")),
                Canonical::Bool(arg.is_some()),
                canonical::dtype(dtype),
            ],
            // Display name excluded.
            OpKind::Udf(call) => vec![
                Canonical::str(format!("{:?}", call.kind)),
                canonical::dtype(&call.return_type),
                Canonical::Digest(ContentHash::from_bytes(call.code.as_bytes())),
                Canonical::Bool(call.filter.is_some()),
            ],
        };
        Ok(params)
    }
}

fn names(columns: &[(String, NodeId)]) -> Canonical {
    Canonical::Seq(columns.iter().map(|(n, _)| Canonical::str(n)).collect())
}

/// Canonical form of a read argument.
pub(crate) fn read_arg(arg: &ReadArg) -> Canonical {
    match arg {
        ReadArg::Bool(b) => Canonical::Bool(*b),
        ReadArg::Int(i) => Canonical::Int(*i),
        ReadArg::Str(s) => Canonical::str(s),
        ReadArg::StrList(items) => Canonical::Seq(items.iter().map(Canonical::str).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_ir::{BinaryOp, DataType, ScalarValue, Schema, UdfCall, UdfKind};

    fn filtered(graph: &mut OpGraph, threshold: i64) -> NodeId {
        let schema = Schema::from_pairs([("x", DataType::Int64)]).unwrap();
        let t = graph.unbound_table("t", schema).unwrap();
        let col = graph.column(t, "x").unwrap();
        let lit = graph.literal(ScalarValue::Int(threshold)).unwrap();
        let pred = graph.binary(BinaryOp::Gt, col, lit).unwrap();
        graph.filter(t, vec![pred]).unwrap()
    }

    #[test]
    fn independent_copies_share_digest() {
        let mut graph = OpGraph::new();
        let a = filtered(&mut graph, 3);
        let b = filtered(&mut graph, 3);
        assert_ne!(a, b);
        let mut digests = StructuralDigests::new(&graph);
        assert_eq!(digests.digest(a).unwrap(), digests.digest(b).unwrap());
    }

    #[test]
    fn parameters_change_digest() {
        let mut graph = OpGraph::new();
        let a = filtered(&mut graph, 3);
        let b = filtered(&mut graph, 4);
        let mut digests = StructuralDigests::new(&graph);
        assert_ne!(digests.digest(a).unwrap(), digests.digest(b).unwrap());
    }

    #[test]
    fn cache_annotation_is_transparent() {
        let mut graph = OpGraph::new();
        let a = filtered(&mut graph, 3);
        let cached = graph.cached(a).unwrap();
        let mut digests = StructuralDigests::new(&graph);
        assert_eq!(digests.digest(a).unwrap(), digests.digest(cached).unwrap());
    }

    #[test]
    fn udf_name_is_ignored_but_code_is_not() {
        let mut graph = OpGraph::new();
        let schema = Schema::from_pairs([("x", DataType::Float64)]).unwrap();
        let t = graph.unbound_table("t", schema).unwrap();
        let x = graph.column(t, "x").unwrap();
        let mut udf = |name: &str, code: &str| {
            graph
                .add(OpKind::Udf(UdfCall {
                    kind: UdfKind::Scalar,
                    name: name.to_string(),
                    args: vec![x],
                    return_type: DataType::Float64,
                    code: code.to_string(),
                    filter: None,
                }))
                .unwrap()
        };
        let f = udf("double", "x * 2");
        let g = udf("twice", "x * 2");
        let h = udf("double", "x + x");
        let mut digests = StructuralDigests::new(&graph);
        assert_eq!(digests.digest(f).unwrap(), digests.digest(g).unwrap());
        assert_ne!(digests.digest(f).unwrap(), digests.digest(h).unwrap());
    }
}
