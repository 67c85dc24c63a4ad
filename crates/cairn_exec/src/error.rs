//! Error types for cache-aware execution.

use cairn_cache::CacheError;
use cairn_fingerprint::FingerprintError;
use cairn_ir::{IrError, NodeId};

/// A failure reported by an execution engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{engine}: {message}")]
pub struct EngineError {
    /// Name of the engine that failed.
    pub engine: String,
    /// The engine's error message.
    pub message: String,
}

impl EngineError {
    /// Creates an engine error.
    pub fn new(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while executing a DAG through the cache.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The node is not a cache annotation.
    #[error("node {node} is not a cache annotation")]
    NotAnnotated {
        /// The offending node.
        node: NodeId,
    },

    /// Fingerprinting an annotated subtree failed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// The cache store failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The DAG was malformed or could not be rewritten.
    #[error(transparent)]
    Graph(#[from] IrError),

    /// The engine failed to evaluate the DAG.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
