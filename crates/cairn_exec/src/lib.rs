//! Cache-aware execution of operation DAGs.
//!
//! Subtrees marked with [`mark_cached`] are looked up in a
//! [`CacheStore`](cairn_cache::CacheStore) by fingerprint before the engine
//! sees them. A hit replaces the subtree with an artifact leaf; a miss runs
//! the subtree once, stores the result, and then substitutes it.

#![warn(missing_docs)]

pub mod annotated;
pub mod error;
pub mod executor;

pub use annotated::{cached_nodes, key_of, mark_cached, AnnotatedSubtree};
pub use error::{EngineError, ExecError};
pub use executor::{CachingExecutor, Engine, Execution};
