//! Cache annotations on an operation DAG.
//!
//! An annotation is an [`OpKind::Cached`] node wrapping a relation. It does
//! not change what the relation computes, nor its fingerprint; it only asks
//! the executor to consult the cache for it.

use crate::error::ExecError;
use cairn_common::Fingerprint;
use cairn_fingerprint::Fingerprinter;
use cairn_ir::{NodeId, OpGraph, OpKind};
use std::collections::HashSet;

/// A relation marked for caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotatedSubtree {
    node: NodeId,
    parent: NodeId,
}

impl AnnotatedSubtree {
    /// Views `node` as an annotation, or fails if it is not one.
    pub fn from_node(graph: &OpGraph, node: NodeId) -> Result<Self, ExecError> {
        match graph.get(node)? {
            OpKind::Cached { parent } => Ok(Self {
                node,
                parent: graph.uncached(*parent)?,
            }),
            _ => Err(ExecError::NotAnnotated { node }),
        }
    }

    /// The annotation node itself.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The relation being cached, with any further annotations stripped.
    pub fn parent(&self) -> NodeId {
        self.parent
    }
}

/// Marks `subtree` for caching. Marking an annotation again returns it
/// unchanged.
pub fn mark_cached(graph: &mut OpGraph, subtree: NodeId) -> Result<AnnotatedSubtree, ExecError> {
    if let OpKind::Cached { .. } = graph.get(subtree)? {
        return AnnotatedSubtree::from_node(graph, subtree);
    }
    let node = graph.cached(subtree)?;
    Ok(AnnotatedSubtree {
        node,
        parent: subtree,
    })
}

/// Every annotation reachable from `root`, in pre-order of first appearance.
pub fn cached_nodes(graph: &OpGraph, root: NodeId) -> Result<Vec<AnnotatedSubtree>, ExecError> {
    let mut found = Vec::new();
    for id in graph.preorder(root)? {
        if let OpKind::Cached { .. } = graph.get(id)? {
            found.push(AnnotatedSubtree::from_node(graph, id)?);
        }
    }
    Ok(found)
}

/// Annotations reachable from `root` that are not nested inside another
/// annotation, in pre-order.
pub(crate) fn outermost(graph: &OpGraph, root: NodeId) -> Result<Vec<AnnotatedSubtree>, ExecError> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let OpKind::Cached { .. } = graph.get(id)? {
            found.push(AnnotatedSubtree::from_node(graph, id)?);
            continue;
        }
        let children = graph.children(id)?;
        stack.extend(children.into_iter().rev());
    }
    Ok(found)
}

/// The cache key of an annotated subtree: the fingerprint of the relation it
/// wraps.
pub fn key_of(
    fingerprinter: &Fingerprinter,
    graph: &OpGraph,
    annotated: AnnotatedSubtree,
) -> Result<Fingerprint, ExecError> {
    Ok(fingerprinter.fingerprint(graph, annotated.parent)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_fingerprint::{ConnectorError, FileStat, Filesystem, HeadResponse, HttpHead, ProbeIo};
    use cairn_ir::{BinaryOp, DataType, ScalarValue, Schema};
    use std::sync::Arc;

    struct NoIo;

    impl Filesystem for NoIo {
        fn stat(&self, _path: &str) -> std::io::Result<Option<FileStat>> {
            Ok(None)
        }
    }

    impl HttpHead for NoIo {
        fn head(&self, _url: &str) -> Result<HeadResponse, ConnectorError> {
            Err(ConnectorError::new("offline"))
        }
    }

    fn penguins(graph: &mut OpGraph) -> NodeId {
        let schema =
            Schema::from_pairs([("species", DataType::String), ("mass", DataType::Int64)]).unwrap();
        graph.unbound_table("penguins", schema).unwrap()
    }

    fn heavy(graph: &mut OpGraph, t: NodeId) -> NodeId {
        let mass = graph.column(t, "mass").unwrap();
        let lit = graph.literal(ScalarValue::Int(4000)).unwrap();
        let pred = graph.binary(BinaryOp::Gt, mass, lit).unwrap();
        graph.filter(t, vec![pred]).unwrap()
    }

    #[test]
    fn mark_cached_is_idempotent() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let a = mark_cached(&mut graph, t).unwrap();
        assert_eq!(a.parent(), t);
        let before = graph.len();
        let again = mark_cached(&mut graph, a.node()).unwrap();
        assert_eq!(a, again);
        assert_eq!(graph.len(), before);
    }

    #[test]
    fn from_node_rejects_plain_relations() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        assert!(matches!(
            AnnotatedSubtree::from_node(&graph, t),
            Err(ExecError::NotAnnotated { .. })
        ));
    }

    #[test]
    fn cached_nodes_in_preorder() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let inner = mark_cached(&mut graph, t).unwrap();
        let f = heavy(&mut graph, inner.node());
        let outer = mark_cached(&mut graph, f).unwrap();
        let found = cached_nodes(&graph, outer.node()).unwrap();
        assert_eq!(found, vec![outer, inner]);
        assert_eq!(outermost(&graph, outer.node()).unwrap(), vec![outer]);
        assert_eq!(outermost(&graph, f).unwrap(), vec![inner]);
    }

    #[test]
    fn stacked_annotations_share_parent() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let inner = graph.cached(t).unwrap();
        let outer = graph.cached(inner).unwrap();
        let annotated = AnnotatedSubtree::from_node(&graph, outer).unwrap();
        assert_eq!(annotated.parent(), t);
        assert_eq!(outermost(&graph, outer).unwrap().len(), 1);
    }

    #[test]
    fn key_ignores_annotation() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let f = heavy(&mut graph, t);
        let annotated = mark_cached(&mut graph, f).unwrap();
        let engine = Fingerprinter::new(ProbeIo::new(Arc::new(NoIo), Arc::new(NoIo)));
        assert_eq!(
            key_of(&engine, &graph, annotated).unwrap(),
            engine.fingerprint(&graph, f).unwrap()
        );
    }
}
