//! Shared foundational types used across the Cairn workspace.
//!
//! This crate provides the XXH3-128 content hash used for artifact checksums
//! and canonical-tuple digests, and the [`Fingerprint`] token that addresses
//! entries in the cache store.

#![warn(missing_docs)]

pub mod fingerprint;
pub mod hash;

pub use fingerprint::{Fingerprint, ParseFingerprintError};
pub use hash::ContentHash;
