//! Canonical SQL rendering.
//!
//! The rendered text is the cheap half of a fingerprint. It depends only on
//! structure: every FROM item gets its own alias `t0`, `t1`, ... numbered in
//! rendering order, and a column renders against the alias its table got in
//! the nearest enclosing query, or inside the subquery it flows out of. Two
//! structurally equal inputs of one join therefore stay distinguishable,
//! while a shared node and an identical copy render the same way. Cache
//! annotations render as their parent. User functions render under a name
//! derived from their code, never their display name.

use crate::error::FingerprintError;
use cairn_common::ContentHash;
use cairn_ir::{AggFunc, IrError, Namespace, NodeId, OpGraph, OpKind, ScalarValue, UnaryOp};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the relation at `root` as canonical SQL.
pub fn render_sql(graph: &OpGraph, root: NodeId) -> Result<String, FingerprintError> {
    let mut renderer = Renderer {
        graph,
        next_alias: 0,
        scopes: Vec::new(),
    };
    renderer.query(root)
}

/// The alias a relation is visible under in one query.
#[derive(Clone, Copy)]
struct Binding {
    alias: usize,
    /// `false` if the relation is only visible through a subquery.
    direct: bool,
}

type Scope = HashMap<NodeId, Binding>;

struct Renderer<'g> {
    graph: &'g OpGraph,
    next_alias: usize,
    /// Relations visible to each query being rendered, innermost last.
    scopes: Vec<Scope>,
}

impl Renderer<'_> {
    /// Binds `id` to a new alias in the current query. A relation appearing
    /// twice keeps its first direct alias for column references.
    fn bind(&mut self, id: NodeId) -> usize {
        let alias = self.next_alias;
        self.next_alias += 1;
        if let Some(scope) = self.scopes.last_mut() {
            let binding = scope.entry(id).or_insert(Binding {
                alias,
                direct: true,
            });
            if !binding.direct {
                *binding = Binding {
                    alias,
                    direct: true,
                };
            }
        }
        alias
    }

    /// Makes the relations of a subquery visible to the current query under
    /// their inner aliases, below any direct binding.
    fn inherit(&mut self, inner: Scope) {
        if let Some(scope) = self.scopes.last_mut() {
            for (id, binding) in inner {
                scope.entry(id).or_insert(Binding {
                    alias: binding.alias,
                    direct: false,
                });
            }
        }
    }

    /// Resolves the alias a column of `table` refers to, innermost query
    /// first.
    fn resolve(&mut self, table: NodeId) -> Result<String, FingerprintError> {
        let table = self.graph.uncached(table)?;
        let bound = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&table).map(|b| b.alias));
        let alias = match bound {
            Some(alias) => alias,
            None => self.bind(table),
        };
        Ok(format!("t{alias}"))
    }

    fn query(&mut self, id: NodeId) -> Result<String, FingerprintError> {
        Ok(self.scoped_query(id)?.0)
    }

    fn scoped_query(&mut self, id: NodeId) -> Result<(String, Scope), FingerprintError> {
        self.scopes.push(Scope::new());
        let sql = self.query_body(id);
        let scope = self.scopes.pop().unwrap_or_default();
        Ok((sql?, scope))
    }

    fn query_body(&mut self, id: NodeId) -> Result<String, FingerprintError> {
        let id = self.graph.uncached(id)?;
        let node = self.graph.get(id)?;
        let sql = match node {
            OpKind::UnboundTable { .. }
            | OpKind::DatabaseTable(_)
            | OpKind::InMemoryTable { .. }
            | OpKind::Read(_)
            | OpKind::RemoteTable(_)
            | OpKind::Artifact(_) => format!("SELECT * FROM {}", self.from_item(id)?),
            OpKind::Filter { parent, predicates } => {
                let from = self.from_item(*parent)?;
                let preds = self.conjunction(predicates)?;
                format!("SELECT * FROM {from} WHERE {preds}")
            }
            OpKind::Project { parent, columns } => {
                let from = self.from_item(*parent)?;
                let select = self.named_list(columns)?;
                format!("SELECT {select} FROM {from}")
            }
            OpKind::Join {
                kind,
                left,
                right,
                predicates,
            } => {
                let left = self.from_item(*left)?;
                let right = self.from_item(*right)?;
                let mut sql = format!("SELECT * FROM {left} {} {right}", kind.sql());
                if !predicates.is_empty() {
                    let preds = self.conjunction(predicates)?;
                    write!(sql, " ON {preds}").ok();
                }
                sql
            }
            OpKind::Aggregate {
                parent,
                groups,
                metrics,
            } => {
                let from = self.from_item(*parent)?;
                let all: Vec<_> = groups.iter().chain(metrics.iter()).cloned().collect();
                let select = self.named_list(&all)?;
                let mut sql = format!("SELECT {select} FROM {from}");
                if !groups.is_empty() {
                    let keys = (1..=groups.len())
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(sql, " GROUP BY {keys}").ok();
                }
                sql
            }
            OpKind::Sort { parent, keys } => {
                let from = self.from_item(*parent)?;
                let mut order = Vec::with_capacity(keys.len());
                for key in keys {
                    let dir = if key.ascending { "ASC" } else { "DESC" };
                    order.push(format!("{} {dir}", self.value(key.expr)?));
                }
                format!("SELECT * FROM {from} ORDER BY {}", order.join(", "))
            }
            OpKind::Limit { parent, n, offset } => {
                let from = self.from_item(*parent)?;
                let mut sql = format!("SELECT * FROM {from} LIMIT {n}");
                if *offset > 0 {
                    write!(sql, " OFFSET {offset}").ok();
                }
                sql
            }
            OpKind::Union {
                left,
                right,
                distinct,
            } => {
                let left = self.query(*left)?;
                let right = self.query(*right)?;
                let op = if *distinct { "UNION" } else { "UNION ALL" };
                format!("({left}) {op} ({right})")
            }
            _ => return Err(IrError::NotARelation(id).into()),
        };
        Ok(sql)
    }

    fn from_item(&mut self, id: NodeId) -> Result<String, FingerprintError> {
        let id = self.graph.uncached(id)?;
        let alias = self.bind(id);
        let node = self.graph.get(id)?;
        let item = match node {
            OpKind::UnboundTable { name, .. } | OpKind::InMemoryTable { name, .. } => ident(name),
            OpKind::DatabaseTable(table) => qualified(&table.namespace, &table.name),
            OpKind::Read(read) => ident(&read.name),
            OpKind::RemoteTable(remote) => ident(&remote.name),
            OpKind::Artifact(artifact) => ident(&format!("artifact_{}", artifact.token)),
            _ => {
                let (sql, inner) = self.scoped_query(id)?;
                self.inherit(inner);
                format!("({sql})")
            }
        };
        Ok(format!("{item} AS t{alias}"))
    }

    fn conjunction(&mut self, predicates: &[NodeId]) -> Result<String, FingerprintError> {
        let mut parts = Vec::with_capacity(predicates.len());
        for pred in predicates {
            parts.push(self.value(*pred)?);
        }
        Ok(parts.join(" AND "))
    }

    fn named_list(&mut self, columns: &[(String, NodeId)]) -> Result<String, FingerprintError> {
        let mut parts = Vec::with_capacity(columns.len());
        for (name, expr) in columns {
            parts.push(format!("{} AS {}", self.value(*expr)?, ident(name)));
        }
        Ok(parts.join(", "))
    }

    fn value(&mut self, id: NodeId) -> Result<String, FingerprintError> {
        let node = self.graph.get(id)?;
        let sql = match node {
            OpKind::Column { table, name, .. } => {
                format!("{}.{}", self.resolve(*table)?, ident(name))
            }
            OpKind::Literal { value, dtype } => {
                let lit = literal(value);
                if *dtype == value.default_dtype() {
                    lit
                } else {
                    format!("CAST({lit} AS {dtype})")
                }
            }
            OpKind::Binary {
                op, left, right, ..
            } => {
                let left = self.value(*left)?;
                let right = self.value(*right)?;
                format!("({left} {} {right})", op.sql())
            }
            OpKind::Unary { op, arg, .. } => {
                let arg = self.value(*arg)?;
                match op {
                    UnaryOp::Not => format!("(NOT {arg})"),
                    UnaryOp::Neg => format!("(-{arg})"),
                    UnaryOp::IsNull => format!("({arg} IS NULL)"),
                    UnaryOp::IsNotNull => format!("({arg} IS NOT NULL)"),
                }
            }
            OpKind::Agg { func, arg, .. } => match (func, arg) {
                (AggFunc::Count, None) => "COUNT(*)".to_string(),
                (AggFunc::CountDistinct, Some(arg)) => {
                    format!("COUNT(DISTINCT {})", self.value(*arg)?)
                }
                (func, Some(arg)) => format!("{}({})", func.sql(), self.value(*arg)?),
                (func, None) => format!("{}(*)", func.sql()),
            },
            OpKind::Udf(call) => {
                let code = ContentHash::from_bytes(call.code.as_bytes()).to_string();
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    args.push(self.value(*arg)?);
                }
                let mut sql = format!("udf_{}({})", &code[..16], args.join(", "));
                if let Some(filter) = call.filter {
                    write!(sql, " FILTER (WHERE {})", self.value(filter)?).ok();
                }
                sql
            }
            _ => return Err(IrError::NotAValue(id).into()),
        };
        Ok(sql)
    }
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(namespace: &Namespace, name: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(catalog) = &namespace.catalog {
        parts.push(ident(catalog));
    }
    if let Some(database) = &namespace.database {
        parts.push(ident(database));
    }
    parts.push(ident(name));
    parts.join(".")
}

fn literal(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Null => "NULL".to_string(),
        ScalarValue::Boolean(true) => "TRUE".to_string(),
        ScalarValue::Boolean(false) => "FALSE".to_string(),
        ScalarValue::Int(i) => i.to_string(),
        ScalarValue::Float(f) => format!("{f:?}"),
        ScalarValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        ScalarValue::Binary(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                write!(hex, "{b:02x}").ok();
            }
            hex.push('\'');
            hex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_ir::{BinaryOp, DataType, JoinKind, Schema};

    fn render(graph: &OpGraph, root: NodeId) -> String {
        render_sql(graph, root).unwrap()
    }

    fn penguins(graph: &mut OpGraph) -> NodeId {
        let schema = Schema::from_pairs([
            ("species", DataType::String),
            ("bill_length_mm", DataType::Float64),
        ])
        .unwrap();
        graph.unbound_table("penguins", schema).unwrap()
    }

    #[test]
    fn filter_renders_where_clause() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let col = graph.column(t, "species").unwrap();
        let lit = graph
            .literal(ScalarValue::String("Adelie".to_string()))
            .unwrap();
        let pred = graph.binary(BinaryOp::Eq, col, lit).unwrap();
        let f = graph.filter(t, vec![pred]).unwrap();
        assert_eq!(
            render(&graph, f),
            r#"SELECT * FROM "penguins" AS t0 WHERE (t0."species" = 'Adelie')"#
        );
    }

    #[test]
    fn projection_over_subquery_gets_new_alias() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let lim = graph
            .add(OpKind::Limit {
                parent: t,
                n: 3,
                offset: 0,
            })
            .unwrap();
        let sel = graph.select(lim, &["species"]).unwrap();
        assert_eq!(
            render(&graph, sel),
            r#"SELECT t0."species" AS "species" FROM (SELECT * FROM "penguins" AS t1 LIMIT 3) AS t0"#
        );
    }

    #[test]
    fn shared_and_copied_tables_render_alike() {
        let mut shared = OpGraph::new();
        let t = penguins(&mut shared);
        let join = shared
            .add(OpKind::Join {
                kind: JoinKind::Cross,
                left: t,
                right: t,
                predicates: vec![],
            })
            .unwrap();

        let mut copied = OpGraph::new();
        let a = penguins(&mut copied);
        let b = penguins(&mut copied);
        let join2 = copied
            .add(OpKind::Join {
                kind: JoinKind::Cross,
                left: a,
                right: b,
                predicates: vec![],
            })
            .unwrap();

        assert_eq!(render(&shared, join), render(&copied, join2));
    }

    fn self_join(graph: &mut OpGraph, left_col: &str, right_col: &str, swap: bool) -> NodeId {
        let schema = Schema::from_pairs([("id", DataType::Int64), ("mgr", DataType::Int64)]).unwrap();
        let a = graph.unbound_table("emp", schema.clone()).unwrap();
        let b = graph.unbound_table("emp", schema).unwrap();
        let (x, y) = if swap { (b, a) } else { (a, b) };
        let lhs = graph.column(x, left_col).unwrap();
        let rhs = graph.column(y, right_col).unwrap();
        let pred = graph.binary(BinaryOp::Eq, lhs, rhs).unwrap();
        graph
            .add(OpKind::Join {
                kind: JoinKind::Semi,
                left: a,
                right: b,
                predicates: vec![pred],
            })
            .unwrap()
    }

    #[test]
    fn equal_join_inputs_get_distinct_aliases() {
        let mut graph = OpGraph::new();
        let has_manager = self_join(&mut graph, "mgr", "id", false);
        let manages = self_join(&mut graph, "mgr", "id", true);
        assert_eq!(
            render(&graph, has_manager),
            r#"SELECT * FROM "emp" AS t0 LEFT SEMI JOIN "emp" AS t1 ON (t0."mgr" = t1."id")"#
        );
        assert_eq!(
            render(&graph, manages),
            r#"SELECT * FROM "emp" AS t0 LEFT SEMI JOIN "emp" AS t1 ON (t1."mgr" = t0."id")"#
        );
    }

    #[test]
    fn columns_through_a_join_keep_their_side() {
        let schema = Schema::from_pairs([("id", DataType::Int64), ("mgr", DataType::Int64)]).unwrap();
        let mut graph = OpGraph::new();
        let a = graph.unbound_table("emp", schema.clone()).unwrap();
        let b = graph.unbound_table("emp", schema).unwrap();
        let join = graph
            .add(OpKind::Join {
                kind: JoinKind::Inner,
                left: a,
                right: b,
                predicates: Vec::new(),
            })
            .unwrap();
        let left_id = graph.column(a, "id").unwrap();
        let right_id = graph.column(b, "id").unwrap();
        let left = graph.project(join, vec![("id".to_string(), left_id)]).unwrap();
        let right = graph.project(join, vec![("id".to_string(), right_id)]).unwrap();

        let sql = render(&graph, left);
        assert!(sql.starts_with(r#"SELECT t1."id" AS "id" FROM ("#), "{sql}");
        assert_ne!(sql, render(&graph, right));
    }

    #[test]
    fn cached_renders_as_parent() {
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let cached = graph.cached(t).unwrap();
        assert_eq!(render(&graph, cached), render(&graph, t));
    }

    #[test]
    fn qualified_names_and_quoting() {
        assert_eq!(
            qualified(&Namespace::qualified("wh", "public"), "odd\"name"),
            r#""wh"."public"."odd""name""#
        );
        assert_eq!(literal(&ScalarValue::String("it's".to_string())), "'it''s'");
        assert_eq!(literal(&ScalarValue::Binary(vec![0xab, 0x01])), "X'ab01'");
        assert_eq!(literal(&ScalarValue::Float(40.0)), "40.0");
    }

    #[test]
    fn value_root_is_rejected() {
        let mut graph = OpGraph::new();
        let lit = graph.literal(ScalarValue::Int(1)).unwrap();
        assert!(render_sql(&graph, lit).is_err());
    }
}
