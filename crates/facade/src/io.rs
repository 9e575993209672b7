//! JSON files in and out of the pipeline.
//!
//! Baselines live in one directory as `<query-id>.json`, each holding a
//! serialized [`QueryResult`]. Outputs are written as pretty JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use telemetry_dp_core::{DpError, NoisedResult, QueryResult, Result};

use crate::config::PipelineConfig;
use crate::pipeline::{Baselines, Evaluated, SweepReport};

/// Path of a query's baseline inside `dir`.
pub fn baseline_path(dir: &Path, query_id: &str) -> PathBuf {
    dir.join(format!("{query_id}.json"))
}

/// Parse one baseline table.
pub fn parse_baseline(content: &str) -> Result<QueryResult> {
    serde_json::from_str(content).map_err(|e| DpError::input(format!("malformed baseline: {e}")))
}

/// Read the baseline of every configured query.
pub fn read_baselines(dir: &Path, config: &PipelineConfig) -> Result<Baselines> {
    config
        .queries
        .iter()
        .map(|q| {
            let path = baseline_path(dir, &q.id);
            let content = fs::read_to_string(&path).map_err(|e| {
                DpError::config(format!("cannot read baseline {}: {e}", path.display()))
            })?;
            let table = parse_baseline(&content).map_err(|e| {
                DpError::input(format!("{}: {e}", path.display()))
            })?;
            Ok((q.id.clone(), table))
        })
        .collect()
}

/// Write any serializable value as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            DpError::config(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| DpError::input(format!("cannot serialize {}: {e}", path.display())))?;
    fs::write(path, body)
        .map_err(|e| DpError::config(format!("cannot write {}: {e}", path.display())))
}

/// File name of one noised result.
pub fn noised_file_name(n: &NoisedResult) -> String {
    format!("{}_{}_eps{}.json", n.query_id, n.mechanism, n.budget.epsilon)
}

/// Write noised tables, metrics and failures of a pass under `dir`.
pub fn write_evaluated(dir: &Path, evaluated: &Evaluated) -> Result<()> {
    for n in &evaluated.noised {
        write_json(&dir.join("noised").join(noised_file_name(n)), n)?;
    }
    write_json(&dir.join("metrics.json"), &evaluated.records)?;
    write_json(&dir.join("failures.json"), &evaluated.failures)
}

/// Write a sweep report under `dir`.
pub fn write_sweep(dir: &Path, report: &SweepReport) -> Result<()> {
    write_evaluated(dir, &report.evaluated)?;
    write_json(&dir.join("selected.json"), &report.selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_dp_core::{Epsilon, MechanismKind, PrivacyBudget};

    #[test]
    fn parses_baseline_json() {
        let t = parse_baseline(
            r#"{
                "columns": [
                    {"name": "os", "kind": "identifier"},
                    {"name": "number_of_systems", "kind": "numeric-additive"}
                ],
                "rows": [["win11", 120], ["win10", null]]
            }"#,
        )
        .unwrap();
        assert_eq!(t.len(), 2);
        assert!(parse_baseline(r#"{"columns": [{"name": "n", "kind": "rank"}], "rows": [[1, 2]]}"#)
            .is_err());
    }

    #[test]
    fn noised_file_names_mark_the_sentinel() {
        let t = parse_baseline(r#"{"columns": [], "rows": []}"#).unwrap();
        let n = NoisedResult {
            query_id: "q1".into(),
            mechanism: MechanismKind::Gaussian,
            budget: PrivacyBudget::approximate(Epsilon::INFINITY, 1e-6).unwrap(),
            result: t,
        };
        assert_eq!(noised_file_name(&n), "q1_gaussian_epsinf.json");
    }
}
