//! Error types for fingerprinting.

use cairn_ir::IrError;

/// Errors raised while normalizing or fingerprinting a computation.
///
/// None of these are retried internally. Only [`UnreachableSource`] is
/// worth retrying at the caller's discretion; everything else will fail the
/// same way again for the same graph.
///
/// [`UnreachableSource`]: FingerprintError::UnreachableSource
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The source kind has no freshness policy.
    #[error("unsupported source kind '{kind}': {reason}")]
    UnsupportedSourceKind {
        /// The backend kind or path scheme.
        kind: String,
        /// Why it cannot be fingerprinted.
        reason: String,
    },

    /// No normalizer is registered for a pluggable backend kind.
    #[error("no normalizer registered for backend '{backend}'")]
    UnsupportedBackend {
        /// The backend kind name.
        backend: String,
    },

    /// A read node's arguments do not name exactly one path.
    #[error("unsupported read shape for '{name}': {reason}")]
    UnsupportedReadShape {
        /// The read node's name.
        name: String,
        /// What is wrong with the arguments.
        reason: String,
    },

    /// A query engine reported a scan the probes do not understand.
    #[error("unsupported {backend} plan for table '{table}': {plan}")]
    UnsupportedPlanShape {
        /// The backend that produced the plan.
        backend: String,
        /// The table being scanned.
        table: String,
        /// The offending plan line or operator.
        plan: String,
    },

    /// An aggregate user function carries a non-trivial filter.
    #[error("user function '{name}' has a filter argument, which is not supported")]
    UnsupportedUdfFilter {
        /// The function's display name.
        name: String,
    },

    /// A probe could not reach its source.
    #[error("source '{location}' is unreachable: {reason}")]
    UnreachableSource {
        /// Path, URL or table that was probed.
        location: String,
        /// The underlying failure.
        reason: String,
    },

    /// The graph still contains an in-memory placeholder.
    #[error("in-memory placeholder '{name}' must be resolved before fingerprinting")]
    UnresolvedPlaceholder {
        /// The placeholder's name.
        name: String,
    },

    /// A backend connector is missing or reported a failure.
    #[error("connector {identity}: {message}")]
    Connector {
        /// The connection the failure belongs to.
        identity: String,
        /// The connector's message.
        message: String,
    },

    /// The graph is malformed.
    #[error(transparent)]
    Graph(#[from] IrError),

    /// A canonical tuple could not be encoded.
    #[error("canonical encoding failed: {reason}")]
    Encoding {
        /// Description of the encoding failure.
        reason: String,
    },
}

impl FingerprintError {
    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FingerprintError::UnreachableSource { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_ir::NodeId;

    #[test]
    fn only_unreachable_is_transient() {
        let unreachable = FingerprintError::UnreachableSource {
            location: "https://example.com/penguins.csv".to_string(),
            reason: "timed out".to_string(),
        };
        assert!(unreachable.is_transient());
        let placeholder = FingerprintError::UnresolvedPlaceholder {
            name: "df".to_string(),
        };
        assert!(!placeholder.is_transient());
    }

    #[test]
    fn plan_shape_display() {
        let err = FingerprintError::UnsupportedPlanShape {
            backend: "duckdb".to_string(),
            table: "events".to_string(),
            plan: "PARQUET_SCAN_V2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported duckdb plan for table 'events': PARQUET_SCAN_V2"
        );
    }

    #[test]
    fn graph_errors_convert() {
        let err: FingerprintError = IrError::UnknownNode(NodeId::from_raw(4)).into();
        assert_eq!(err.to_string(), "unknown node #4");
    }
}
