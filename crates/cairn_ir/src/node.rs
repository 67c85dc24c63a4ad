//! Operation node kinds.
//!
//! Every node is either a *relation* (produces rows) or a *value* (a scalar
//! expression evaluated against relations). Child references are [`NodeId`]s
//! into the owning [`OpGraph`](crate::OpGraph); a node never owns its children.

use crate::ids::NodeId;
use crate::source::{Namespace, SourceDescriptor};
use crate::types::{DataType, Schema};
use crate::value::ScalarValue;
use cairn_common::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A table living in a backend reachable through a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseTable {
    /// Table name within its namespace.
    pub name: String,
    /// Declared schema.
    pub schema: Schema,
    /// Catalog and database qualifying the name.
    #[serde(default)]
    pub namespace: Namespace,
    /// Backend kind and connection the table is reached through.
    pub source: SourceDescriptor,
}

/// One argument value of an external read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadArg {
    /// A boolean option.
    Bool(bool),
    /// An integer option.
    Int(i64),
    /// A single string, typically a path or URL.
    Str(String),
    /// A list of strings, typically several paths.
    StrList(Vec<String>),
}

impl ReadArg {
    /// Returns the string if this is a non-empty [`ReadArg::Str`].
    pub fn as_path(&self) -> Option<&str> {
        match self {
            ReadArg::Str(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

/// A "read this path/URL with this schema" node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOp {
    /// Name the read is registered under.
    pub name: String,
    /// Declared schema of the rows read.
    pub schema: Schema,
    /// Reader method, e.g. `read_parquet` or `read_csv`.
    pub method: String,
    /// Keyword arguments passed to the reader.
    #[serde(default)]
    pub args: BTreeMap<String, ReadArg>,
}

/// A relation whose data was produced elsewhere and now lives behind
/// another backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTable {
    /// Table name at the destination.
    pub name: String,
    /// Schema of the moved data.
    pub schema: Schema,
    /// Destination backend and connection.
    pub source: SourceDescriptor,
    /// Root of the sub-computation that produced the data.
    ///
    /// This is a reference, not a child: evaluating the remote table never
    /// evaluates the producing computation again.
    pub remote_expr: NodeId,
}

/// A materialized cache artifact standing in for a subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Fingerprint the artifact was stored under.
    pub token: Fingerprint,
    /// Backend-specific location of the artifact.
    pub location: String,
    /// Schema of the materialized rows.
    pub schema: Schema,
}

/// Whether a user function maps rows or reduces groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UdfKind {
    /// One output per input row.
    Scalar,
    /// One output per group.
    Aggregate,
}

/// A call to a user-defined function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfCall {
    /// Scalar or aggregate.
    pub kind: UdfKind,
    /// Display name. Renaming a function does not change what it computes.
    pub name: String,
    /// Argument expressions in declared order.
    pub args: Vec<NodeId>,
    /// Declared return type.
    pub return_type: DataType,
    /// The function's code, or any token that changes whenever its code does.
    pub code: String,
    /// Optional row filter for aggregate functions.
    #[serde(default)]
    pub filter: Option<NodeId>,
}

/// Join flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Matching rows only.
    Inner,
    /// All left rows.
    Left,
    /// All right rows.
    Right,
    /// All rows from both sides.
    Outer,
    /// Left rows with at least one match.
    Semi,
    /// Left rows with no match.
    Anti,
    /// Cartesian product.
    Cross,
}

impl JoinKind {
    /// SQL keyword for the join.
    pub fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT OUTER JOIN",
            JoinKind::Right => "RIGHT OUTER JOIN",
            JoinKind::Outer => "FULL OUTER JOIN",
            JoinKind::Semi => "LEFT SEMI JOIN",
            JoinKind::Anti => "LEFT ANTI JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }

    /// Returns `true` if only left-side columns survive the join.
    pub fn keeps_left_only(self) -> bool {
        matches!(self, JoinKind::Semi | JoinKind::Anti)
    }
}

/// Binary scalar operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

impl BinaryOp {
    /// SQL spelling of the operator.
    pub fn sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    /// Returns `true` for comparisons and boolean connectives.
    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

/// Unary scalar operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Boolean negation.
    Not,
    /// Arithmetic negation.
    Neg,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
}

/// Built-in aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    /// Row count, or non-null count with an argument.
    Count,
    /// Distinct non-null count.
    CountDistinct,
    /// Sum.
    Sum,
    /// Arithmetic mean.
    Mean,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

impl AggFunc {
    /// SQL function name.
    pub fn sql(self) -> &'static str {
        match self {
            AggFunc::Count | AggFunc::CountDistinct => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Mean => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// One ordering key of a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    /// Value expression to order by.
    pub expr: NodeId,
    /// Ascending if `true`.
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// The role a child reference plays for its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The child must be a relation.
    Relation,
    /// The child must be a value expression.
    Value,
}

/// An immutable operation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum OpKind {
    /// A named table with a schema but no backing data. Fully self-contained.
    UnboundTable {
        /// Table name.
        name: String,
        /// Declared schema.
        schema: Schema,
    },
    /// A table in a live backend.
    DatabaseTable(DatabaseTable),
    /// A substitution point for an in-memory table that has not been bound
    /// to a backend yet. Must be resolved before fingerprinting.
    InMemoryTable {
        /// Placeholder name.
        name: String,
        /// Declared schema.
        schema: Schema,
    },
    /// An external read of a path, URL or source list.
    Read(ReadOp),
    /// Data produced by another computation, now stored in another backend.
    RemoteTable(RemoteTable),
    /// A materialized cache artifact.
    Artifact(ArtifactRef),
    /// Rows of `parent` satisfying all predicates.
    Filter {
        /// Input relation.
        parent: NodeId,
        /// Conjunctive predicates.
        predicates: Vec<NodeId>,
    },
    /// Named value expressions evaluated over `parent`.
    Project {
        /// Input relation.
        parent: NodeId,
        /// Output columns in order.
        columns: Vec<(String, NodeId)>,
    },
    /// A join of two relations.
    Join {
        /// Join flavor.
        kind: JoinKind,
        /// Left input.
        left: NodeId,
        /// Right input.
        right: NodeId,
        /// Conjunctive join predicates.
        predicates: Vec<NodeId>,
    },
    /// Grouped aggregation.
    Aggregate {
        /// Input relation.
        parent: NodeId,
        /// Named grouping keys.
        groups: Vec<(String, NodeId)>,
        /// Named aggregate expressions.
        metrics: Vec<(String, NodeId)>,
    },
    /// Ordering.
    Sort {
        /// Input relation.
        parent: NodeId,
        /// Ordering keys, most significant first.
        keys: Vec<SortKey>,
    },
    /// Row limit with offset.
    Limit {
        /// Input relation.
        parent: NodeId,
        /// Maximum number of rows.
        n: u64,
        /// Rows to skip first.
        #[serde(default)]
        offset: u64,
    },
    /// Set union of two relations with the same schema.
    Union {
        /// Left input.
        left: NodeId,
        /// Right input.
        right: NodeId,
        /// `UNION` if `true`, `UNION ALL` otherwise.
        #[serde(default)]
        distinct: bool,
    },
    /// Cache annotation: `parent`'s result should come from the cache.
    Cached {
        /// The annotated subtree.
        parent: NodeId,
    },
    /// A column of a relation.
    Column {
        /// The relation the column belongs to.
        table: NodeId,
        /// Column name.
        name: String,
        /// Column type.
        dtype: DataType,
    },
    /// A literal value.
    Literal {
        /// The value.
        value: ScalarValue,
        /// Declared type.
        dtype: DataType,
    },
    /// A binary operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: NodeId,
        /// Right operand.
        right: NodeId,
        /// Result type.
        dtype: DataType,
    },
    /// A unary operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        arg: NodeId,
        /// Result type.
        dtype: DataType,
    },
    /// A built-in aggregate.
    Agg {
        /// Aggregate function.
        func: AggFunc,
        /// Argument; `None` only for `COUNT(*)`.
        #[serde(default)]
        arg: Option<NodeId>,
        /// Result type.
        dtype: DataType,
    },
    /// A user-defined function call.
    Udf(UdfCall),
}

impl OpKind {
    /// Returns `true` if the node produces rows.
    pub fn is_relation(&self) -> bool {
        !matches!(
            self,
            OpKind::Column { .. }
                | OpKind::Literal { .. }
                | OpKind::Binary { .. }
                | OpKind::Unary { .. }
                | OpKind::Agg { .. }
                | OpKind::Udf(_)
        )
    }

    /// Returns the stable tag naming this node kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            OpKind::UnboundTable { .. } => "unbound_table",
            OpKind::DatabaseTable(_) => "database_table",
            OpKind::InMemoryTable { .. } => "in_memory_table",
            OpKind::Read(_) => "read",
            OpKind::RemoteTable(_) => "remote_table",
            OpKind::Artifact(_) => "artifact",
            OpKind::Filter { .. } => "filter",
            OpKind::Project { .. } => "project",
            OpKind::Join { .. } => "join",
            OpKind::Aggregate { .. } => "aggregate",
            OpKind::Sort { .. } => "sort",
            OpKind::Limit { .. } => "limit",
            OpKind::Union { .. } => "union",
            OpKind::Cached { .. } => "cached",
            OpKind::Column { .. } => "column",
            OpKind::Literal { .. } => "literal",
            OpKind::Binary { .. } => "binary",
            OpKind::Unary { .. } => "unary",
            OpKind::Agg { .. } => "agg",
            OpKind::Udf(_) => "udf",
        }
    }

    /// Returns the children with the role each must play, in canonical order.
    ///
    /// A [`RemoteTable`]'s `remote_expr` is not a child.
    pub fn slots(&self) -> Vec<(NodeId, Slot)> {
        use Slot::{Relation, Value};
        match self {
            OpKind::UnboundTable { .. }
            | OpKind::DatabaseTable(_)
            | OpKind::InMemoryTable { .. }
            | OpKind::Read(_)
            | OpKind::RemoteTable(_)
            | OpKind::Artifact(_)
            | OpKind::Literal { .. } => Vec::new(),
            OpKind::Filter { parent, predicates } => std::iter::once((*parent, Relation))
                .chain(predicates.iter().map(|p| (*p, Value)))
                .collect(),
            OpKind::Project { parent, columns } => std::iter::once((*parent, Relation))
                .chain(columns.iter().map(|(_, c)| (*c, Value)))
                .collect(),
            OpKind::Join {
                left,
                right,
                predicates,
                ..
            } => [(*left, Relation), (*right, Relation)]
                .into_iter()
                .chain(predicates.iter().map(|p| (*p, Value)))
                .collect(),
            OpKind::Aggregate {
                parent,
                groups,
                metrics,
            } => std::iter::once((*parent, Relation))
                .chain(groups.iter().map(|(_, g)| (*g, Value)))
                .chain(metrics.iter().map(|(_, m)| (*m, Value)))
                .collect(),
            OpKind::Sort { parent, keys } => std::iter::once((*parent, Relation))
                .chain(keys.iter().map(|k| (k.expr, Value)))
                .collect(),
            OpKind::Limit { parent, .. } | OpKind::Cached { parent } => vec![(*parent, Relation)],
            OpKind::Union { left, right, .. } => vec![(*left, Relation), (*right, Relation)],
            OpKind::Column { table, .. } => vec![(*table, Relation)],
            OpKind::Binary { left, right, .. } => vec![(*left, Value), (*right, Value)],
            OpKind::Unary { arg, .. } => vec![(*arg, Value)],
            OpKind::Agg { arg, .. } => arg.iter().map(|a| (*a, Value)).collect(),
            OpKind::Udf(call) => call
                .args
                .iter()
                .chain(call.filter.iter())
                .map(|a| (*a, Value))
                .collect(),
        }
    }

    /// Returns the children in canonical order.
    pub fn children(&self) -> Vec<NodeId> {
        self.slots().into_iter().map(|(id, _)| id).collect()
    }

    /// Returns a copy of this node with every child replaced by `f(child)`.
    ///
    /// `remote_expr` references are left untouched.
    pub fn map_children(&self, mut f: impl FnMut(NodeId) -> NodeId) -> OpKind {
        let mut node = self.clone();
        match &mut node {
            OpKind::UnboundTable { .. }
            | OpKind::DatabaseTable(_)
            | OpKind::InMemoryTable { .. }
            | OpKind::Read(_)
            | OpKind::RemoteTable(_)
            | OpKind::Artifact(_)
            | OpKind::Literal { .. } => {}
            OpKind::Filter { parent, predicates } => {
                *parent = f(*parent);
                predicates.iter_mut().for_each(|p| *p = f(*p));
            }
            OpKind::Project { parent, columns } => {
                *parent = f(*parent);
                columns.iter_mut().for_each(|(_, c)| *c = f(*c));
            }
            OpKind::Join {
                left,
                right,
                predicates,
                ..
            } => {
                *left = f(*left);
                *right = f(*right);
                predicates.iter_mut().for_each(|p| *p = f(*p));
            }
            OpKind::Aggregate {
                parent,
                groups,
                metrics,
            } => {
                *parent = f(*parent);
                groups.iter_mut().for_each(|(_, g)| *g = f(*g));
                metrics.iter_mut().for_each(|(_, m)| *m = f(*m));
            }
            OpKind::Sort { parent, keys } => {
                *parent = f(*parent);
                keys.iter_mut().for_each(|k| k.expr = f(k.expr));
            }
            OpKind::Limit { parent, .. } | OpKind::Cached { parent } => *parent = f(*parent),
            OpKind::Union { left, right, .. } | OpKind::Binary { left, right, .. } => {
                *left = f(*left);
                *right = f(*right);
            }
            OpKind::Column { table, .. } => *table = f(*table),
            OpKind::Unary { arg, .. } => *arg = f(*arg),
            OpKind::Agg { arg, .. } => {
                if let Some(a) = arg {
                    *a = f(*a);
                }
            }
            OpKind::Udf(call) => {
                call.args.iter_mut().for_each(|a| *a = f(*a));
                if let Some(filter) = &mut call.filter {
                    *filter = f(*filter);
                }
            }
        }
        node
    }

    /// Returns every node ID this node refers to, children or not.
    pub fn references(&self) -> Vec<NodeId> {
        let mut refs = self.children();
        if let OpKind::RemoteTable(remote) = self {
            refs.push(remote.remote_expr);
        }
        refs
    }
}
