//! Accuracy evaluation for noised query results.
//!
//! Every query declares an [`AnalyticalShape`]. The [`MetricSelector`] maps
//! it to a primary metric, the [`EvaluationEngine`] scores each noised result
//! against its baseline, and the [`EpsilonSelector`] turns the resulting
//! [`MetricRecord`]s into a budget choice.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod metrics;
pub mod selector;
pub mod shape;

pub use engine::{check_alignment, EvaluationEngine, MetricRecord};
pub use metrics::{
    flagged, iou, kendall_tau_b, kl_divergence, linf_distance, mean_absolute_error,
    top1_accuracy, top_k_indices, top_k_overlap, total_variation_distance, z_scores,
    DEFAULT_TOP_K, KL_FLOOR,
};
pub use selector::{select, EpsilonSelector, SelectedEpsilon, SelectionMode};
pub use shape::{AccuracyThresholds, AnalyticalShape, Direction, Metric, MetricSelector};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        AccuracyThresholds, AnalyticalShape, Direction, EpsilonSelector, EvaluationEngine,
        Metric, MetricRecord, MetricSelector, SelectedEpsilon, SelectionMode,
    };
}
