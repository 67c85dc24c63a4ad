//! Errors raised while building or validating an operation graph.

use crate::ids::NodeId;

/// Errors produced by [`OpGraph`](crate::OpGraph) construction and queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    /// A node referenced an ID that has not been allocated before it.
    #[error("node {node} references {child}, which is not an earlier node")]
    DanglingChild {
        /// The node being added or validated.
        node: NodeId,
        /// The offending child reference.
        child: NodeId,
    },

    /// An ID does not exist in the graph.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A relation was expected (table, filter, join, ...) but a value was found.
    #[error("node {0} is not a relation")]
    NotARelation(NodeId),

    /// A value expression was expected but a relation was found.
    #[error("node {0} is not a value expression")]
    NotAValue(NodeId),

    /// A column name is not part of the relation's schema.
    #[error("relation {relation} has no column '{column}'")]
    UnknownColumn {
        /// The relation that was searched.
        relation: NodeId,
        /// The missing column name.
        column: String,
    },

    /// A schema contains the same column name twice.
    #[error("duplicate column '{0}' in schema")]
    DuplicateColumn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_child_display() {
        let err = IrError::DanglingChild {
            node: NodeId::from_raw(2),
            child: NodeId::from_raw(9),
        };
        assert_eq!(
            err.to_string(),
            "node #2 references #9, which is not an earlier node"
        );
    }

    #[test]
    fn unknown_column_display() {
        let err = IrError::UnknownColumn {
            relation: NodeId::from_raw(0),
            column: "bill_length".to_string(),
        };
        assert!(err.to_string().contains("bill_length"));
    }
}
