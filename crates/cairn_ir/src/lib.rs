//! Operation DAG model for Cairn computations.
//!
//! A computation is an [`OpGraph`]: an append-only arena of immutable
//! [`OpKind`] nodes addressed by [`NodeId`]. Children always precede their
//! parents in the arena, so every graph is acyclic by construction, and a
//! node may be shared by any number of parents.
//!
//! Relations (tables, reads, filters, joins, ...) and value expressions
//! (columns, literals, operators, user functions) live in the same arena.

#![warn(missing_docs)]

pub mod arena;
pub mod error;
pub mod graph;
pub mod ids;
pub mod node;
pub mod source;
pub mod types;
pub mod value;

pub use arena::{Arena, ArenaId};
pub use error::IrError;
pub use graph::OpGraph;
pub use ids::NodeId;
pub use node::{
    AggFunc, ArtifactRef, BinaryOp, DatabaseTable, JoinKind, OpKind, ReadArg, ReadOp,
    RemoteTable, Slot, SortKey, UdfCall, UdfKind, UnaryOp,
};
pub use source::{BackendKind, ConnectionIdentity, Namespace, SourceDescriptor};
pub use types::{DataType, Field, Schema};
pub use value::ScalarValue;
