//! The operation DAG.

use crate::arena::Arena;
use crate::error::IrError;
use crate::ids::NodeId;
use crate::node::{BinaryOp, DatabaseTable, OpKind, ReadOp, Slot, UnaryOp};
use crate::types::{DataType, Field, Schema};
use crate::value::ScalarValue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Suffix appended to right-side join columns whose names collide.
pub const JOIN_SUFFIX: &str = "_right";

/// An append-only DAG of operation nodes.
///
/// Nodes may only reference nodes allocated before them, so the graph is
/// acyclic by construction. Serializes as the node list in allocation order;
/// deserialization re-validates every reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<OpKind>", into = "Vec<OpKind>")]
pub struct OpGraph {
    nodes: Arena<NodeId, OpKind>,
}

impl OpGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node after checking that every reference points to an earlier
    /// node playing the right role.
    pub fn add(&mut self, node: OpKind) -> Result<NodeId, IrError> {
        let id = self.nodes.next_id();
        self.check_node(id, &node)?;
        Ok(self.nodes.alloc(node))
    }

    fn check_node(&self, id: NodeId, node: &OpKind) -> Result<(), IrError> {
        for child in node.references() {
            if child >= id || !self.nodes.contains(child) {
                return Err(IrError::DanglingChild { node: id, child });
            }
        }
        for (child, slot) in node.slots() {
            let is_relation = self.nodes.get(child).is_relation();
            match slot {
                Slot::Relation if !is_relation => return Err(IrError::NotARelation(child)),
                Slot::Value if is_relation => return Err(IrError::NotAValue(child)),
                _ => {}
            }
        }
        if let OpKind::RemoteTable(remote) = node {
            if !self.nodes.get(remote.remote_expr).is_relation() {
                return Err(IrError::NotARelation(remote.remote_expr));
            }
        }
        Ok(())
    }

    /// Re-checks every node, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), IrError> {
        for (id, node) in self.nodes.iter() {
            self.check_node(id, node)?;
        }
        Ok(())
    }

    /// Returns the node with the given ID.
    pub fn get(&self, id: NodeId) -> Result<&OpKind, IrError> {
        self.nodes.try_get(id).ok_or(IrError::UnknownNode(id))
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over `(id, node)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OpKind)> {
        self.nodes.iter()
    }

    /// Returns the children of a node in canonical order.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>, IrError> {
        Ok(self.get(id)?.children())
    }

    /// Returns every node reachable from `root` (including `root`) in
    /// pre-order of first appearance. Shared nodes are listed once.
    pub fn preorder(&self, root: NodeId) -> Result<Vec<NodeId>, IrError> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = self.get(id)?;
            order.push(id);
            stack.extend(node.children().into_iter().rev());
        }
        Ok(order)
    }

    /// Strips any cache annotations wrapping `id`.
    pub fn uncached(&self, mut id: NodeId) -> Result<NodeId, IrError> {
        while let OpKind::Cached { parent } = self.get(id)? {
            id = *parent;
        }
        Ok(id)
    }

    /// Computes the output schema of a relation.
    pub fn schema_of(&self, id: NodeId) -> Result<Schema, IrError> {
        match self.get(id)? {
            OpKind::UnboundTable { schema, .. } | OpKind::InMemoryTable { schema, .. } => {
                Ok(schema.clone())
            }
            OpKind::DatabaseTable(table) => Ok(table.schema.clone()),
            OpKind::Read(read) => Ok(read.schema.clone()),
            OpKind::RemoteTable(remote) => Ok(remote.schema.clone()),
            OpKind::Artifact(artifact) => Ok(artifact.schema.clone()),
            OpKind::Filter { parent, .. }
            | OpKind::Sort { parent, .. }
            | OpKind::Limit { parent, .. }
            | OpKind::Cached { parent } => self.schema_of(*parent),
            OpKind::Union { left, .. } => self.schema_of(*left),
            OpKind::Project { columns, .. } => self.named_schema(columns.iter()),
            OpKind::Aggregate {
                groups, metrics, ..
            } => self.named_schema(groups.iter().chain(metrics.iter())),
            OpKind::Join {
                kind, left, right, ..
            } => {
                let left_schema = self.schema_of(*left)?;
                if kind.keeps_left_only() {
                    return Ok(left_schema);
                }
                let right_schema = self.schema_of(*right)?;
                let mut fields = left_schema.fields().to_vec();
                for field in right_schema.fields() {
                    let mut field = field.clone();
                    if left_schema.field(&field.name).is_some() {
                        field.name.push_str(JOIN_SUFFIX);
                    }
                    fields.push(field);
                }
                Schema::from_fields(fields)
            }
            _ => Err(IrError::NotARelation(id)),
        }
    }

    fn named_schema<'a>(
        &self,
        columns: impl Iterator<Item = &'a (String, NodeId)>,
    ) -> Result<Schema, IrError> {
        let fields = columns
            .map(|(name, expr)| Ok(Field::new(name.clone(), self.dtype_of(*expr)?)))
            .collect::<Result<Vec<_>, IrError>>()?;
        Schema::from_fields(fields)
    }

    /// Returns the result type of a value expression.
    pub fn dtype_of(&self, id: NodeId) -> Result<DataType, IrError> {
        match self.get(id)? {
            OpKind::Column { dtype, .. }
            | OpKind::Literal { dtype, .. }
            | OpKind::Binary { dtype, .. }
            | OpKind::Unary { dtype, .. }
            | OpKind::Agg { dtype, .. } => Ok(dtype.clone()),
            OpKind::Udf(call) => Ok(call.return_type.clone()),
            _ => Err(IrError::NotAValue(id)),
        }
    }

    /// Returns a copy of the subtree at `root` with every node in
    /// `substitutions` replaced by its mapped node.
    ///
    /// Nothing is mutated: ancestors of a substituted node are re-added as new
    /// nodes, untouched subtrees are shared. Returns `root` itself if no
    /// substitution applies.
    pub fn rewrite(
        &mut self,
        root: NodeId,
        substitutions: &HashMap<NodeId, NodeId>,
    ) -> Result<NodeId, IrError> {
        let mut memo = HashMap::new();
        self.rewrite_node(root, substitutions, &mut memo)
    }

    fn rewrite_node(
        &mut self,
        id: NodeId,
        substitutions: &HashMap<NodeId, NodeId>,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> Result<NodeId, IrError> {
        if let Some(&target) = substitutions.get(&id) {
            return Ok(target);
        }
        if let Some(&done) = memo.get(&id) {
            return Ok(done);
        }
        let node = self.get(id)?.clone();
        let mut mapped = Vec::new();
        for child in node.children() {
            mapped.push(self.rewrite_node(child, substitutions, memo)?);
        }
        let result = if mapped == node.children() {
            id
        } else {
            let mut replacements = mapped.into_iter();
            let rebuilt = node.map_children(|old| replacements.next().unwrap_or(old));
            self.add(rebuilt)?
        };
        memo.insert(id, result);
        Ok(result)
    }

    // --- builders -------------------------------------------------------

    /// Adds an unbound (schema-only) table.
    pub fn unbound_table(
        &mut self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<NodeId, IrError> {
        self.add(OpKind::UnboundTable {
            name: name.into(),
            schema,
        })
    }

    /// Adds a backend table.
    pub fn database_table(&mut self, table: DatabaseTable) -> Result<NodeId, IrError> {
        self.add(OpKind::DatabaseTable(table))
    }

    /// Adds an external read.
    pub fn read(&mut self, read: ReadOp) -> Result<NodeId, IrError> {
        self.add(OpKind::Read(read))
    }

    /// Adds a column of `table`, typed from the table's schema.
    pub fn column(&mut self, table: NodeId, name: &str) -> Result<NodeId, IrError> {
        let schema = self.schema_of(table)?;
        let field = schema.field(name).ok_or_else(|| IrError::UnknownColumn {
            relation: table,
            column: name.to_string(),
        })?;
        let dtype = field.dtype.clone();
        self.add(OpKind::Column {
            table,
            name: name.to_string(),
            dtype,
        })
    }

    /// Adds a literal typed by its value.
    pub fn literal(&mut self, value: ScalarValue) -> Result<NodeId, IrError> {
        let dtype = value.default_dtype();
        self.add(OpKind::Literal { value, dtype })
    }

    /// Adds a binary operator; predicates are boolean, arithmetic takes the
    /// left operand's type.
    pub fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> Result<NodeId, IrError> {
        let dtype = if op.is_predicate() {
            DataType::Boolean
        } else {
            self.dtype_of(left)?
        };
        self.add(OpKind::Binary {
            op,
            left,
            right,
            dtype,
        })
    }

    /// Adds a unary operator.
    pub fn unary(&mut self, op: UnaryOp, arg: NodeId) -> Result<NodeId, IrError> {
        let dtype = match op {
            UnaryOp::Neg => self.dtype_of(arg)?,
            UnaryOp::Not | UnaryOp::IsNull | UnaryOp::IsNotNull => DataType::Boolean,
        };
        self.add(OpKind::Unary { op, arg, dtype })
    }

    /// Adds a filter.
    pub fn filter(&mut self, parent: NodeId, predicates: Vec<NodeId>) -> Result<NodeId, IrError> {
        self.add(OpKind::Filter { parent, predicates })
    }

    /// Adds a projection of named expressions.
    pub fn project(
        &mut self,
        parent: NodeId,
        columns: Vec<(String, NodeId)>,
    ) -> Result<NodeId, IrError> {
        self.add(OpKind::Project { parent, columns })
    }

    /// Adds a projection keeping the named columns of `parent` as they are.
    pub fn select(&mut self, parent: NodeId, names: &[&str]) -> Result<NodeId, IrError> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            columns.push((name.to_string(), self.column(parent, name)?));
        }
        self.project(parent, columns)
    }

    /// Adds a cache annotation over `parent`.
    pub fn cached(&mut self, parent: NodeId) -> Result<NodeId, IrError> {
        self.add(OpKind::Cached { parent })
    }
}

impl TryFrom<Vec<OpKind>> for OpGraph {
    type Error = IrError;

    fn try_from(nodes: Vec<OpKind>) -> Result<Self, Self::Error> {
        let mut graph = OpGraph::new();
        for node in nodes {
            graph.add(node)?;
        }
        Ok(graph)
    }
}

impl From<OpGraph> for Vec<OpKind> {
    fn from(graph: OpGraph) -> Self {
        graph.nodes.iter().map(|(_, node)| node.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::JoinKind;

    fn penguins(graph: &mut OpGraph) -> NodeId {
        let schema = Schema::from_pairs([
            ("species", DataType::String),
            ("bill_length_mm", DataType::Float64),
        ])
        .unwrap();
        graph.unbound_table("penguins", schema).unwrap()
    }

    #[test]
    fn add_rejects_forward_reference() {
        let mut graph = OpGraph::new();
        let err = graph
            .add(OpKind::Cached {
                parent: NodeId::from_raw(0),
            })
            .unwrap_err();
        assert_eq!(
            err,
            IrError::DanglingChild {
                node: NodeId::from_raw(0),
                child: NodeId::from_raw(0)
            }
        );
    }

    #[test]
    fn add_checks_roles() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let lit = graph.literal(ScalarValue::Int(1)).unwrap();
        assert_eq!(
            graph.filter(lit, vec![]).unwrap_err(),
            IrError::NotARelation(lit)
        );
        assert_eq!(graph.filter(t, vec![t]).unwrap_err(), IrError::NotAValue(t));
    }

    #[test]
    fn column_types_from_schema() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let col = graph.column(t, "bill_length_mm").unwrap();
        assert_eq!(graph.dtype_of(col).unwrap(), DataType::Float64);
        assert!(matches!(
            graph.column(t, "flipper").unwrap_err(),
            IrError::UnknownColumn { .. }
        ));
    }

    #[test]
    fn preorder_lists_shared_nodes_once() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let join = graph
            .add(OpKind::Join {
                kind: JoinKind::Inner,
                left: t,
                right: t,
                predicates: vec![],
            })
            .unwrap();
        assert_eq!(graph.preorder(join).unwrap(), vec![join, t]);
    }

    #[test]
    fn preorder_visits_left_before_right() {
        let mut graph = OpGraph::new();
        let a = penguins(&mut graph);
        let b = graph.unbound_table("islands", Schema::default()).unwrap();
        let union = graph
            .add(OpKind::Union {
                left: b,
                right: a,
                distinct: false,
            })
            .unwrap();
        assert_eq!(graph.preorder(union).unwrap(), vec![union, b, a]);
    }

    #[test]
    fn join_suffixes_colliding_columns() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let join = graph
            .add(OpKind::Join {
                kind: JoinKind::Left,
                left: t,
                right: t,
                predicates: vec![],
            })
            .unwrap();
        let schema = graph.schema_of(join).unwrap();
        assert_eq!(
            schema.names().collect::<Vec<_>>(),
            vec![
                "species",
                "bill_length_mm",
                "species_right",
                "bill_length_mm_right"
            ]
        );
    }

    #[test]
    fn select_and_uncached() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let sel = graph.select(t, &["species"]).unwrap();
        let cached = graph.cached(sel).unwrap();
        let twice = graph.cached(cached).unwrap();
        assert_eq!(graph.uncached(twice).unwrap(), sel);
        assert_eq!(graph.schema_of(twice).unwrap().len(), 1);
    }

    #[test]
    fn rewrite_is_copy_on_write() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let col = graph.column(t, "bill_length_mm").unwrap();
        let lit = graph.literal(ScalarValue::Float(40.0)).unwrap();
        let pred = graph.binary(BinaryOp::Gt, col, lit).unwrap();
        let filtered = graph.filter(t, vec![pred]).unwrap();
        let limited = graph
            .add(OpKind::Limit {
                parent: filtered,
                n: 5,
                offset: 0,
            })
            .unwrap();
        let before = graph.len();

        let replacement = graph
            .unbound_table("snapshot", graph.schema_of(filtered).unwrap())
            .unwrap();
        let subs = HashMap::from([(filtered, replacement)]);
        let new_root = graph.rewrite(limited, &subs).unwrap();

        assert_ne!(new_root, limited);
        assert_eq!(graph.children(new_root).unwrap(), vec![replacement]);
        assert_eq!(graph.children(limited).unwrap(), vec![filtered]);
        assert_eq!(graph.len(), before + 2);

        let untouched = graph.rewrite(limited, &HashMap::new()).unwrap();
        assert_eq!(untouched, limited);
    }

    #[test]
    fn serde_revalidates() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        graph.cached(t).unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        let back: OpGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);

        let bad = r#"[{"node":"cached","parent":3}]"#;
        assert!(serde_json::from_str::<OpGraph>(bad).is_err());
    }
}
