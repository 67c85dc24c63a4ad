//! `cairn fingerprint`: print the fingerprints of a plan's roots.
//!
//! Local and HTTP reads are probed directly. Backend tables need a live
//! connector, which only an embedding program can register, so plans that
//! reference them fail with a connector error.

use std::path::Path;

use cairn_common::Fingerprint;
use cairn_fingerprint::{FingerprintError, Fingerprinter, ProbeIo};
use cairn_ir::NodeId;

use crate::project::{load_plan, load_project_config};
use crate::{FingerprintArgs, GlobalArgs, ReportFormat};

/// Runs the `cairn fingerprint` command.
///
/// Returns exit code 0 if every root was fingerprinted, 1 otherwise.
pub fn run(args: &FingerprintArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_project_config(global)?;
    let plan = load_plan(Path::new(&args.plan))?;

    let roots = match args.root {
        Some(raw) => {
            let root = NodeId::from_raw(raw);
            plan.nodes.get(root)?;
            vec![root]
        }
        None => plan.roots.clone(),
    };
    if roots.is_empty() {
        if !global.quiet {
            eprintln!("warning: plan {} has no roots", args.plan);
        }
        return Ok(0);
    }

    let engine = Fingerprinter::new(ProbeIo::local(&config.probe)?);
    let results = engine.fingerprint_all(&plan.nodes, &roots);
    let failures = results.iter().filter(|r| r.is_err()).count();

    match args.format {
        ReportFormat::Text => {
            for line in render_text(&roots, &results) {
                println!("{line}");
            }
        }
        ReportFormat::Json => {
            println!("{}", render_json(&roots, &results)?);
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

fn render_text(roots: &[NodeId], results: &[Result<Fingerprint, FingerprintError>]) -> Vec<String> {
    roots
        .iter()
        .zip(results)
        .map(|(root, result)| match result {
            Ok(token) => format!("{root}\t{token}"),
            Err(e) if e.is_transient() => format!("{root}\terror (transient): {e}"),
            Err(e) => format!("{root}\terror: {e}"),
        })
        .collect()
}

fn render_json(
    roots: &[NodeId],
    results: &[Result<Fingerprint, FingerprintError>],
) -> Result<String, serde_json::Error> {
    let entries: Vec<serde_json::Value> = roots
        .iter()
        .zip(results)
        .map(|(root, result)| match result {
            Ok(token) => serde_json::json!({
                "root": root.as_raw(),
                "fingerprint": token.to_hex(),
            }),
            Err(e) => serde_json::json!({
                "root": root.as_raw(),
                "error": e.to_string(),
                "transient": e.is_transient(),
            }),
        })
        .collect();
    serde_json::to_string_pretty(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_common::ContentHash;

    fn results() -> (Vec<NodeId>, Vec<Result<Fingerprint, FingerprintError>>) {
        let token = Fingerprint::from_hash(ContentHash::from_bytes(b"q"));
        (
            vec![NodeId::from_raw(1), NodeId::from_raw(4)],
            vec![
                Ok(token),
                Err(FingerprintError::UnreachableSource {
                    location: "data/missing.csv".to_string(),
                    reason: "no such file".to_string(),
                }),
            ],
        )
    }

    #[test]
    fn text_lines_per_root() {
        let (roots, results) = results();
        let lines = render_text(&roots, &results);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("#1\t"));
        assert_eq!(lines[0].len(), "#1\t".len() + 32);
        assert!(lines[1].contains("transient"));
        assert!(lines[1].contains("data/missing.csv"));
    }

    #[test]
    fn json_report() {
        let (roots, results) = results();
        let json = render_json(&roots, &results).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["root"], 1);
        assert_eq!(parsed[0]["fingerprint"].as_str().unwrap().len(), 32);
        assert_eq!(parsed[1]["transient"], true);
    }

    #[test]
    fn run_fingerprints_local_plan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cairn.toml"), "").unwrap();
        std::fs::write(dir.path().join("penguins.csv"), "species\nAdelie\n").unwrap();
        let plan = serde_json::json!({
            "nodes": [
                {"node": "read", "name": "penguins", "method": "read_csv",
                 "schema": [{"name": "species", "dtype": "string"}],
                 "args": {"path": dir.path().join("penguins.csv").display().to_string()}},
                {"node": "limit", "parent": 0, "n": 5}
            ],
            "roots": [1]
        });
        let plan_path = dir.path().join("plan.json");
        std::fs::write(&plan_path, plan.to_string()).unwrap();

        let args = FingerprintArgs {
            plan: plan_path.display().to_string(),
            root: None,
            format: ReportFormat::Json,
        };
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(dir.path().display().to_string()),
        };
        assert_eq!(run(&args, &global).unwrap(), 0);
    }
}
