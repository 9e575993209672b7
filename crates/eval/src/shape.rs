//! Analytical shapes of queries and the metrics that judge them.

use std::fmt;

use serde::{Deserialize, Serialize};
use telemetry_dp_core::{DpError, QueryResult, Result};

use crate::metrics::DEFAULT_TOP_K;

/// What an analyst does with a query's output.
///
/// Single-column shapes skip rows that are null on either side. Within a
/// multi-dimensional row a null share counts as zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AnalyticalShape {
    /// Spot groups whose value stands out from the rest.
    AnomalousGroups {
        /// Column scored with z-scores.
        value_column: String,
        /// Groups with a z-score strictly above this are flagged.
        #[serde(default)]
        z_threshold: f64,
    },
    /// Read off how a population splits across groups.
    PercentageDistribution {
        /// Share (or count) column forming the distribution.
        share_column: String,
    },
    /// Order groups by a value.
    Ranking {
        /// Column the ranking is computed from.
        value_column: String,
        /// Depth of the auxiliary top-k comparison.
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    /// Pick the leading candidate within each group.
    WinnerPerGroup {
        /// Column naming the candidate (browser, OS, ...).
        candidate_column: String,
        /// Column the winner maximizes.
        value_column: String,
    },
    /// Compare per-row distributions over several columns.
    MultiDimensionalDistribution {
        /// Columns forming each row's distribution.
        columns: Vec<String>,
    },
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl AnalyticalShape {
    /// Columns the shape reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::AnomalousGroups { value_column, .. } | Self::Ranking { value_column, .. } => {
                vec![value_column.as_str()]
            }
            Self::PercentageDistribution { share_column } => vec![share_column.as_str()],
            Self::WinnerPerGroup {
                candidate_column,
                value_column,
            } => vec![candidate_column.as_str(), value_column.as_str()],
            Self::MultiDimensionalDistribution { columns } => {
                columns.iter().map(String::as_str).collect()
            }
        }
    }

    /// Check the shape against a baseline's column manifest.
    pub fn validate(&self, baseline: &QueryResult) -> Result<()> {
        if let Self::MultiDimensionalDistribution { columns } = self {
            if columns.is_empty() {
                return Err(DpError::config("distribution shape lists no columns"));
            }
        }
        if let Self::Ranking { top_k: 0, .. } = self {
            return Err(DpError::config("ranking top_k must be at least 1"));
        }
        for name in self.columns() {
            let idx = baseline.require_column(name)?;
            let kind = baseline.columns()[idx].kind;
            let is_candidate = match self {
                Self::WinnerPerGroup {
                    candidate_column, ..
                } => candidate_column == name,
                _ => false,
            };
            if is_candidate {
                if !kind.is_key() {
                    return Err(DpError::config(format!(
                        "candidate column `{name}` must be an identifier or categorical column"
                    )));
                }
            } else if !kind.is_noised() {
                return Err(DpError::config(format!(
                    "metric column `{name}` must be numeric"
                )));
            }
        }
        Ok(())
    }
}

/// Whether larger or smaller metric values mean better accuracy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Larger values are better (IoU, tau, top-1).
    HigherIsBetter,
    /// Smaller values are better (distances, divergences).
    LowerIsBetter,
}

impl Direction {
    /// Whether `value` meets `threshold`. NaN never does.
    pub fn satisfies(self, value: f64, threshold: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self {
            Self::HigherIsBetter => value >= threshold,
            Self::LowerIsBetter => value <= threshold,
        }
    }
}

/// A named accuracy metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// IoU of z-score-flagged groups.
    Iou,
    /// L-infinity distance between z-score vectors.
    ZScoreLinf,
    /// Groups flagged in the baseline.
    FlaggedBaseline,
    /// Groups flagged in the noised result.
    FlaggedNoised,
    /// Total variation distance.
    Tvd,
    /// Mean absolute error in percentage points.
    Mae,
    /// Kendall's tau-b.
    KendallTau,
    /// Top-k overlap accuracy.
    TopKOverlap,
    /// Top-1 accuracy per group.
    Top1,
    /// Mean KL divergence over rows.
    KlMean,
    /// Largest per-row KL divergence.
    KlMax,
}

impl Metric {
    /// Stable snake-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Iou => "iou",
            Self::ZScoreLinf => "z_score_linf",
            Self::FlaggedBaseline => "flagged_baseline",
            Self::FlaggedNoised => "flagged_noised",
            Self::Tvd => "tvd",
            Self::Mae => "mae",
            Self::KendallTau => "kendall_tau",
            Self::TopKOverlap => "top_k_overlap",
            Self::Top1 => "top1",
            Self::KlMean => "kl_mean",
            Self::KlMax => "kl_max",
        }
    }

    /// Which way is better. Flag counts carry no threshold.
    pub fn direction(self) -> Direction {
        match self {
            Self::Iou | Self::KendallTau | Self::TopKOverlap | Self::Top1 => {
                Direction::HigherIsBetter
            }
            Self::ZScoreLinf
            | Self::FlaggedBaseline
            | Self::FlaggedNoised
            | Self::Tvd
            | Self::Mae
            | Self::KlMean
            | Self::KlMax => Direction::LowerIsBetter,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps shapes to their primary and auxiliary metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricSelector;

impl MetricSelector {
    /// The metric thresholds are checked against.
    pub fn primary(&self, shape: &AnalyticalShape) -> Metric {
        match shape {
            AnalyticalShape::AnomalousGroups { .. } => Metric::Iou,
            AnalyticalShape::PercentageDistribution { .. } => Metric::Tvd,
            AnalyticalShape::Ranking { .. } => Metric::KendallTau,
            AnalyticalShape::WinnerPerGroup { .. } => Metric::Top1,
            AnalyticalShape::MultiDimensionalDistribution { .. } => Metric::KlMean,
        }
    }

    /// Every metric reported for a shape, primary first.
    pub fn metrics(&self, shape: &AnalyticalShape) -> Vec<Metric> {
        match shape {
            AnalyticalShape::AnomalousGroups { .. } => vec![
                Metric::Iou,
                Metric::ZScoreLinf,
                Metric::FlaggedBaseline,
                Metric::FlaggedNoised,
            ],
            AnalyticalShape::PercentageDistribution { .. } => vec![Metric::Tvd, Metric::Mae],
            AnalyticalShape::Ranking { .. } => vec![Metric::KendallTau, Metric::TopKOverlap],
            AnalyticalShape::WinnerPerGroup { .. } => vec![Metric::Top1],
            AnalyticalShape::MultiDimensionalDistribution { .. } => {
                vec![Metric::KlMean, Metric::KlMax]
            }
        }
    }
}

/// Accuracy threshold per primary metric family.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyThresholds {
    /// Minimum IoU for anomaly queries.
    pub iou: f64,
    /// Maximum TVD for percentage distributions.
    pub tvd: f64,
    /// Minimum Kendall tau for rankings.
    pub kendall_tau: f64,
    /// Minimum top-1 accuracy for winner queries.
    pub top1: f64,
    /// Maximum mean KL divergence for multi-dimensional distributions.
    pub kl: f64,
}

impl Default for AccuracyThresholds {
    fn default() -> Self {
        Self {
            iou: 0.8,
            tvd: 0.10,
            kendall_tau: 0.8,
            top1: 0.9,
            kl: 0.05,
        }
    }
}

impl AccuracyThresholds {
    /// Threshold for a primary metric, `None` for auxiliary ones.
    pub fn threshold_for(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Iou => Some(self.iou),
            Metric::Tvd => Some(self.tvd),
            Metric::KendallTau => Some(self.kendall_tau),
            Metric::Top1 => Some(self.top1),
            Metric::KlMean => Some(self.kl),
            _ => None,
        }
    }

    /// Reject thresholds outside their metric's range.
    pub fn validate(&self) -> Result<()> {
        let unit = [("iou", self.iou), ("tvd", self.tvd), ("top1", self.top1)];
        for (name, v) in unit {
            if !(0.0..=1.0).contains(&v) {
                return Err(DpError::config(format!(
                    "{name} threshold must be in [0, 1], got {v}"
                )));
            }
        }
        if !(-1.0..=1.0).contains(&self.kendall_tau) {
            return Err(DpError::config(format!(
                "kendall_tau threshold must be in [-1, 1], got {}",
                self.kendall_tau
            )));
        }
        if !self.kl.is_finite() || self.kl < 0.0 {
            return Err(DpError::config(format!(
                "kl threshold must be non-negative, got {}",
                self.kl
            )));
        }
        Ok(())
    }
}
