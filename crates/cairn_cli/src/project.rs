//! Shared helpers for CLI commands: project root resolution, configuration
//! and plan files.

use std::path::{Path, PathBuf};

use cairn_config::{CairnConfig, CONFIG_FILE};
use cairn_ir::{NodeId, OpGraph};
use serde::Deserialize;

use crate::GlobalArgs;

/// A serialized computation plan: the DAG and the roots to evaluate.
#[derive(Debug, Deserialize)]
pub struct PlanFile {
    /// Nodes in dependency order; a node refers to earlier nodes by index.
    pub nodes: OpGraph,
    /// Roots of interest.
    pub roots: Vec<NodeId>,
}

/// Walks up from `start` looking for the nearest directory containing
/// `cairn.toml`. Returns `start` itself if none is found.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return current;
        }
        if !current.pop() {
            return start.to_path_buf();
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `cairn.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else if p.is_dir() {
            Ok(p)
        } else {
            Err(format!("config path not found: {config_path}").into())
        }
    } else {
        let cwd = std::env::current_dir()?;
        Ok(find_project_root(&cwd))
    }
}

/// Loads the project configuration selected by the global args.
pub fn load_project_config(global: &GlobalArgs) -> Result<CairnConfig, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    tracing::debug!(dir = %project_dir.display(), "loading configuration");
    Ok(cairn_config::load_config(&project_dir)?)
}

/// Reads and validates a JSON plan file.
pub fn load_plan(path: &Path) -> Result<PlanFile, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read plan {}: {e}", path.display()))?;
    let plan: PlanFile = serde_json::from_str(&content)
        .map_err(|e| format!("invalid plan {}: {e}", path.display()))?;
    for root in &plan.roots {
        plan.nodes.get(*root)?;
    }
    Ok(plan)
}
