//! Fingerprinting of operation DAGs.
//!
//! A [`Fingerprinter`] turns the computation rooted at a node into a
//! deterministic [`Fingerprint`](cairn_common::Fingerprint). Self-contained
//! computations are identified by their canonical SQL text alone. Anything
//! touching a persisted source also folds in that source's freshness
//! signature, obtained through the injected [`ProbeIo`] collaborators.
//!
//! Layers, leaves first:
//!
//! - [`probe`]: per-source freshness signatures
//! - [`normalize`]: per-node canonical tuples, with a runtime registry for
//!   pluggable backend kinds
//! - [`engine`]: the DAG walk, deduplication and final digest

#![warn(missing_docs)]

pub mod canonical;
pub mod engine;
pub mod error;
pub mod io;
pub mod normalize;
pub mod probe;
pub mod render;
pub mod structural;

pub use canonical::Canonical;
pub use engine::Fingerprinter;
pub use error::FingerprintError;
pub use io::{
    bind_table, Connector, ConnectorError, FileStat, Filesystem, HeadResponse, HttpHead,
    LocalFilesystem, ProbeIo, ReqwestHead, Rows,
};
pub use normalize::{NormalizerRegistry, TableNormalizer};
pub use probe::Freshness;
pub use structural::StructuralDigests;
