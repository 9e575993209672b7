//! Core differential-privacy primitives for telemetry aggregates.
//!
//! This crate holds the mechanism layer: typed query results, privacy
//! budgets, the sensitivity model, Laplace and Gaussian noise, per-task
//! noise sources, the epsilon sweep and output post-processing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod error;
pub mod noise;
pub mod postprocess;
pub mod sensitivity;
pub mod source;
pub mod sweep;
pub mod table;

pub use budget::{
    budgets_for, default_epsilons, validate_delta, Epsilon, MechanismKind, PrivacyBudget,
    DEFAULT_DELTA, DEFAULT_EPSILONS,
};
pub use error::{DpError, Result};
pub use noise::{
    gaussian_sigma, laplace_scale, GaussianMechanism, LaplaceMechanism, Mechanism,
    NoiseMechanism,
};
pub use postprocess::{clamp_non_negative, PercentagePartition, PostProcessor, PERCENT_TOTAL};
pub use sensitivity::{
    AggregationKind, ColumnSensitivity, Norm, SensitivityModel, SensitivityScope,
    SensitivitySpec,
};
pub use source::{EntropySource, NoiseCoordinates, NoiseSource, SeededSource};
pub use sweep::{EpsilonSweepRunner, NoisedResult};
pub use table::{Column, ColumnKind, QueryResult, RowKey, Value};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        budgets_for, default_epsilons, AggregationKind, Column, ColumnKind, DpError,
        EntropySource, Epsilon, EpsilonSweepRunner, GaussianMechanism, LaplaceMechanism,
        Mechanism, MechanismKind, NoiseMechanism, NoiseSource, NoisedResult,
        PercentagePartition, PostProcessor, PrivacyBudget, QueryResult, Result, SeededSource,
        SensitivityModel, SensitivityScope, SensitivitySpec, Value,
    };
}
