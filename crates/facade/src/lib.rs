//! Facade crate re-exporting stable APIs and running the two-phase pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod io;
pub mod pipeline;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use telemetry_dp_core as core;
pub use telemetry_dp_eval as eval;
pub use telemetry_dp_prng as prng;

pub use config::{PipelineConfig, QuerySpec, RunMode};
pub use telemetry_dp_core::{
    AggregationKind, Column, ColumnKind, DpError, Epsilon, EpsilonSweepRunner, MechanismKind,
    NoisedResult, PercentagePartition, PrivacyBudget, QueryResult, Result, SeededSource,
    SensitivityScope, SensitivitySpec, Value,
};
pub use telemetry_dp_eval::{
    AccuracyThresholds, AnalyticalShape, EpsilonSelector, EvaluationEngine, Metric,
    MetricRecord, SelectedEpsilon, SelectionMode,
};
pub use io::{read_baselines, write_evaluated, write_json, write_sweep};
pub use pipeline::{Baselines, Evaluated, Pipeline, RunOutput, SweepReport, TripleFailure};
pub use telemetry_dp_prng::PrngKey;

/// Convenience prelude covering the pipeline and its building blocks.
pub mod prelude {
    pub use crate::config::{PipelineConfig, QuerySpec, RunMode};
    pub use crate::pipeline::{Baselines, Evaluated, Pipeline, RunOutput, SweepReport};
    pub use telemetry_dp_core::prelude::*;
    pub use telemetry_dp_eval::prelude::*;
    pub use telemetry_dp_prng::prelude::*;
}
