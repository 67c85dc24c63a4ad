//! Parsing and validation of `cairn.toml` configuration files.
//!
//! This crate reads the workspace configuration and produces a strongly-typed
//! [`CairnConfig`] describing where the cache lives and how freshness probes
//! reach remote sources.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
