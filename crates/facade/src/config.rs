//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! mechanism = ["laplace", "gaussian"]
//! epsilons = [0.1, 1.0, 10.0, "inf"]
//! delta = 1e-6
//! seed = 42
//!
//! [accuracy_threshold]
//! tvd = 0.10
//!
//! [[queries]]
//! id = "browser_share"
//! shape = { shape = "percentage_distribution", share_column = "percent" }
//! sensitivity = { percent = { kind = "percentage", min_population = 100 } }
//! partitions = [{ layout = "down_column", column = "percent" }]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use telemetry_dp_core::{
    budgets_for, default_epsilons, validate_delta, DpError, Epsilon, MechanismKind,
    PercentagePartition, PostProcessor, PrivacyBudget, Result, SensitivityModel,
    SensitivityScope, SensitivitySpec, DEFAULT_DELTA,
};
use telemetry_dp_eval::{AccuracyThresholds, AnalyticalShape, Metric, MetricSelector, SelectionMode};

/// Exploratory sweep or production run at one budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Iterate every configured epsilon and evaluate.
    #[default]
    Sweep,
    /// Noise once at [`PipelineConfig::epsilon`].
    #[serde(alias = "single-epsilon")]
    SingleEpsilon,
}

/// One query handled by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Query identifier; baselines are looked up by it.
    pub id: String,
    /// How analysts read the query.
    pub shape: AnalyticalShape,
    /// Declared aggregation per numeric column.
    #[serde(default)]
    pub sensitivity: SensitivitySpec,
    /// Column groups that must sum to 100.
    #[serde(default)]
    pub partitions: Vec<PercentagePartition>,
}

/// Everything a run needs besides the baseline tables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Mechanisms to run.
    #[serde(
        alias = "mechanism",
        default = "default_mechanisms",
        deserialize_with = "one_or_many"
    )]
    pub mechanisms: Vec<MechanismKind>,
    /// Epsilon grid for sweeps.
    #[serde(default = "default_epsilons")]
    pub epsilons: Vec<Epsilon>,
    /// Delta for the Gaussian mechanism.
    #[serde(default = "default_delta")]
    pub delta: f64,
    /// Root seed for noise streams.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Accuracy threshold per metric family.
    #[serde(default, alias = "accuracy_threshold")]
    pub thresholds: AccuracyThresholds,
    /// Sweep or single-epsilon run.
    #[serde(default)]
    pub mode: RunMode,
    /// Budget for single-epsilon runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<Epsilon>,
    /// Per-query or global epsilon selection.
    #[serde(default)]
    pub selection: SelectionMode,
    /// Per-column or joint sensitivity calibration.
    #[serde(default)]
    pub sensitivity_scope: SensitivityScope,
    /// Clamp ratio columns at zero after noising.
    #[serde(default = "default_true")]
    pub clamp_ratio_columns: bool,
    /// Queries to process.
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

fn default_mechanisms() -> Vec<MechanismKind> {
    vec![MechanismKind::Laplace, MechanismKind::Gaussian]
}

fn default_delta() -> f64 {
    DEFAULT_DELTA
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<MechanismKind>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(MechanismKind),
        Many(Vec<MechanismKind>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(kind) => vec![kind],
        OneOrMany::Many(kinds) => kinds,
    })
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mechanisms: default_mechanisms(),
            epsilons: default_epsilons(),
            delta: DEFAULT_DELTA,
            seed: default_seed(),
            thresholds: AccuracyThresholds::default(),
            mode: RunMode::default(),
            epsilon: None,
            selection: SelectionMode::default(),
            sensitivity_scope: SensitivityScope::default(),
            clamp_ratio_columns: true,
            queries: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DpError::config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DpError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check everything that does not need the baseline tables.
    pub fn validate(&self) -> Result<()> {
        if self.mechanisms.is_empty() {
            return Err(DpError::config("at least one mechanism is required"));
        }
        let distinct: BTreeSet<_> = self.mechanisms.iter().collect();
        if distinct.len() != self.mechanisms.len() {
            return Err(DpError::config("mechanisms are listed more than once"));
        }
        if self.epsilons.is_empty() {
            return Err(DpError::config("the epsilon grid is empty"));
        }
        if self.mechanisms.contains(&MechanismKind::Gaussian) {
            validate_delta(self.delta)?;
        }
        self.thresholds.validate()?;
        if self.mode == RunMode::SingleEpsilon && self.epsilon.is_none() {
            return Err(DpError::config(
                "single_epsilon mode needs an `epsilon` value",
            ));
        }

        let mut ids = BTreeSet::new();
        for query in &self.queries {
            if query.id.trim().is_empty() {
                return Err(DpError::config("query ids must not be empty"));
            }
            if !ids.insert(query.id.as_str()) {
                return Err(DpError::config(format!(
                    "query `{}` is configured twice",
                    query.id
                )));
            }
            for column in query.sensitivity.columns() {
                query.sensitivity.sensitivity(column).map_err(|e| {
                    DpError::config(format!("query `{}`: {e}", query.id))
                })?;
            }
            self.post_processor(query)
                .check_partitions()
                .map_err(|e| DpError::config(format!("query `{}`: {e}", query.id)))?;
        }
        Ok(())
    }

    /// Budgets of the sweep grid for one mechanism.
    pub fn budgets(&self, kind: MechanismKind) -> Result<Vec<PrivacyBudget>> {
        budgets_for(kind, &self.epsilons, self.delta)
    }

    /// Budget at one epsilon for one mechanism.
    pub fn budget_at(&self, kind: MechanismKind, epsilon: Epsilon) -> Result<PrivacyBudget> {
        PrivacyBudget::for_mechanism(kind, epsilon, self.delta)
    }

    /// Configured query by id.
    pub fn query(&self, id: &str) -> Option<&QuerySpec> {
        self.queries.iter().find(|q| q.id == id)
    }

    /// Sensitivity model for the configured scope.
    pub fn sensitivity_model(&self) -> SensitivityModel {
        SensitivityModel::new(self.sensitivity_scope)
    }

    /// Post-processor for one query.
    pub fn post_processor(&self, query: &QuerySpec) -> PostProcessor {
        PostProcessor::new(query.partitions.clone())
            .with_clamp_ratio_columns(self.clamp_ratio_columns)
    }

    /// (query id, primary metric) for every query, in configuration order.
    pub fn selection_targets(&self) -> Vec<(String, Metric)> {
        let selector = MetricSelector;
        self.queries
            .iter()
            .map(|q| (q.id.clone(), selector.primary(&q.shape)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_dp_core::AggregationKind;

    const SAMPLE: &str = r#"
mechanism = "laplace"
epsilons = [0.1, 1.0, 10.0, "inf"]
seed = 7

[accuracy_threshold]
tvd = 0.05

[[queries]]
id = "browser_share"
shape = { shape = "percentage_distribution", share_column = "percent" }
sensitivity = { percent = { kind = "percentage", min_population = 100 } }
partitions = [{ layout = "down_column", column = "percent" }]
"#;

    #[test]
    fn parses_sample() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.mechanisms, vec![MechanismKind::Laplace]);
        assert_eq!(cfg.epsilons.len(), 4);
        assert!(!cfg.epsilons[3].is_finite());
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.delta, DEFAULT_DELTA);
        assert_eq!(cfg.thresholds.tvd, 0.05);
        assert_eq!(cfg.thresholds.iou, 0.8);
        assert!(cfg.clamp_ratio_columns);
        let q = cfg.query("browser_share").unwrap();
        assert_eq!(
            q.sensitivity.aggregation("percent"),
            Some(&AggregationKind::Percentage {
                min_population: 100.0
            })
        );
        assert_eq!(
            cfg.selection_targets(),
            vec![("browser_share".to_owned(), Metric::Tvd)]
        );
    }

    #[test]
    fn defaults_cover_both_mechanisms_and_full_grid() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.epsilons.len(), 11);
        assert_eq!(cfg.budgets(MechanismKind::Gaussian).unwrap().len(), 11);
    }

    #[test]
    fn rejects_bad_configuration() {
        for doc in [
            "mechanism = []",
            "mechanism = [\"laplace\", \"laplace\"]",
            "epsilons = []",
            "epsilons = [0.0]",
            "delta = 1.5",
            "mode = \"single_epsilon\"",
            "[accuracy_threshold]\ntvd = 2.0",
            "[[queries]]\nid = \"a\"\nshape = { shape = \"ranking\", value_column = \"n\" }\n\
             [[queries]]\nid = \"a\"\nshape = { shape = \"ranking\", value_column = \"n\" }",
            "[[queries]]\nid = \"a\"\nshape = { shape = \"ranking\", value_column = \"n\" }\n\
             sensitivity = { n = { kind = \"sum\", max_contribution = -1 } }",
            "[[queries]]\nid = \"a\"\nshape = { shape = \"percentage_distribution\", share_column = \"a\" }\n\
             partitions = [{ layout = \"across_columns\", columns = [\"a\", \"b\"] }, \
             { layout = \"down_column\", column = \"a\" }]",
        ] {
            let err = PipelineConfig::from_toml_str(doc).unwrap_err();
            assert!(
                matches!(err, DpError::Configuration { .. }),
                "accepted {doc:?}"
            );
        }
    }

    #[test]
    fn delta_is_ignored_without_gaussian() {
        assert!(PipelineConfig::from_toml_str("mechanism = \"laplace\"\ndelta = 2.0").is_ok());
    }

    #[test]
    fn single_epsilon_mode() {
        let cfg =
            PipelineConfig::from_toml_str("mode = \"single-epsilon\"\nepsilon = 2.0").unwrap();
        assert_eq!(cfg.mode, RunMode::SingleEpsilon);
        assert_eq!(cfg.epsilon, Some(Epsilon::new(2.0).unwrap()));
    }
}
