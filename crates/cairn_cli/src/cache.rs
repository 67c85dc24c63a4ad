//! `cairn cache`: list, summarize and prune the artifact cache.

use cairn_cache::{CacheEntry, CacheManifest, CacheStore, CAIRN_VERSION};
use cairn_common::Fingerprint;
use chrono::{Duration, Utc};

use crate::project::load_project_config;
use crate::{CacheAction, GlobalArgs, ReportFormat};

/// Runs a `cairn cache` action against the configured cache directory.
pub fn run(action: &CacheAction, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_project_config(global)?;
    let dir = config.cache.dir.clone();

    match action {
        CacheAction::Ls { format } => {
            let store = CacheStore::open(&dir, config.cache.compress);
            let entries = store.entries();
            match format {
                ReportFormat::Text => {
                    for line in render_entries(&entries) {
                        println!("{line}");
                    }
                }
                ReportFormat::Json => println!("{}", entries_json(&entries)?),
            }
        }
        CacheAction::Status => {
            // `open` discards an incompatible manifest.
            let manifest = CacheManifest::load(&dir);
            let store = CacheStore::open(&dir, config.cache.compress);
            let on_disk = store.backend().tokens()?.len();
            for line in render_status(&dir.display().to_string(), manifest.as_ref(), on_disk) {
                println!("{line}");
            }
        }
        CacheAction::Gc { older_than_days } => {
            let store = CacheStore::open(&dir, config.cache.compress);
            let mut removed = store.prune_orphans()?;
            if let Some(days) = older_than_days {
                let cutoff = Utc::now() - Duration::days(i64::from(*days));
                removed += store.evict_older_than(cutoff)?;
            }
            if !global.quiet {
                eprintln!("     Removed {removed} artifact(s) from {}", dir.display());
            }
        }
    }
    Ok(0)
}

fn render_entries(entries: &[(Fingerprint, CacheEntry)]) -> Vec<String> {
    entries
        .iter()
        .map(|(token, entry)| {
            format!(
                "{token}  {:>10}  {}  {}",
                entry.size,
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.schema
            )
        })
        .collect()
}

fn entries_json(entries: &[(Fingerprint, CacheEntry)]) -> Result<String, serde_json::Error> {
    let values: Vec<serde_json::Value> = entries
        .iter()
        .map(|(token, entry)| {
            serde_json::json!({
                "fingerprint": token.to_hex(),
                "location": entry.location,
                "size": entry.size,
                "created_at": entry.created_at.to_rfc3339(),
                "schema": entry.schema.to_string(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&values)
}

fn render_status(dir: &str, manifest: Option<&CacheManifest>, on_disk: usize) -> Vec<String> {
    let mut lines = vec![format!("cache directory: {dir}")];
    match manifest {
        None => lines.push("manifest: none".to_string()),
        Some(m) if !m.is_compatible(CAIRN_VERSION) => lines.push(format!(
            "manifest: written by cairn {}, incompatible with {CAIRN_VERSION}",
            m.cairn_version
        )),
        Some(m) => {
            lines.push(format!("manifest: cairn {}", m.cairn_version));
            lines.push(format!("recorded artifacts: {}", m.entries.len()));
            lines.push(format!("recorded size: {} bytes", m.total_size()));
        }
    }
    lines.push(format!("artifact files: {on_disk}"));
    lines
}
