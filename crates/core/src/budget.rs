//! Privacy budgets and the epsilon grid.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DpError, Result};

/// Default delta for the Gaussian mechanism.
pub const DEFAULT_DELTA: f64 = 1e-6;

/// Epsilon grid used for exploratory sweeps, strongest privacy first.
pub const DEFAULT_EPSILONS: [f64; 11] = [
    0.01,
    0.05,
    0.1,
    0.5,
    1.0,
    2.0,
    5.0,
    10.0,
    20.0,
    50.0,
    f64::INFINITY,
];

/// A privacy-loss parameter. Positive and possibly infinite.
///
/// Infinity is the "no noise" sentinel: mechanisms return their input unchanged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Epsilon(f64);

impl Epsilon {
    /// The no-noise sentinel.
    pub const INFINITY: Self = Self(f64::INFINITY);

    /// Validate and wrap an epsilon value.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value <= 0.0 {
            return Err(DpError::config(format!(
                "epsilon must be positive, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Raw value.
    pub fn value(self) -> f64 {
        self.0
    }

    /// Whether this is a real budget rather than the sentinel.
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// Total order, with the sentinel last.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Epsilon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_finite() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("inf")
        }
    }
}

impl FromStr for Epsilon {
    type Err = DpError;

    /// Parses a positive number or `inf`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inf" | "infinity" | "+inf" => Ok(Self::INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|_| DpError::config(format!("invalid epsilon `{s}`")))
                .and_then(Self::new),
        }
    }
}

impl Serialize for Epsilon {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.is_finite() {
            serializer.serialize_f64(self.0)
        } else {
            serializer.serialize_str("inf")
        }
    }
}

struct EpsilonVisitor;

impl<'de> Visitor<'de> for EpsilonVisitor {
    type Value = Epsilon;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a positive number or \"inf\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Epsilon, E> {
        Epsilon::new(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Epsilon, E> {
        self.visit_f64(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Epsilon, E> {
        self.visit_f64(v as f64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Epsilon, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Epsilon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(EpsilonVisitor)
    }
}

/// The default exploratory grid.
pub fn default_epsilons() -> Vec<Epsilon> {
    DEFAULT_EPSILONS.iter().map(|&e| Epsilon(e)).collect()
}

/// Noise mechanism family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismKind {
    /// Pure epsilon-DP Laplace mechanism.
    Laplace,
    /// (epsilon, delta)-DP Gaussian mechanism.
    Gaussian,
}

impl MechanismKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Laplace => "laplace",
            Self::Gaussian => "gaussian",
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An (epsilon, delta) pair. Delta is only present for the Gaussian mechanism.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudget {
    /// Privacy-loss parameter.
    pub epsilon: Epsilon,
    /// Failure probability for approximate DP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl PrivacyBudget {
    /// Pure epsilon-DP budget.
    pub fn pure(epsilon: Epsilon) -> Self {
        Self {
            epsilon,
            delta: None,
        }
    }

    /// Approximate (epsilon, delta)-DP budget.
    pub fn approximate(epsilon: Epsilon, delta: f64) -> Result<Self> {
        validate_delta(delta)?;
        Ok(Self {
            epsilon,
            delta: Some(delta),
        })
    }

    /// Budget shaped for a mechanism: delta is attached only for Gaussian.
    pub fn for_mechanism(kind: MechanismKind, epsilon: Epsilon, delta: f64) -> Result<Self> {
        match kind {
            MechanismKind::Laplace => Ok(Self::pure(epsilon)),
            MechanismKind::Gaussian => Self::approximate(epsilon, delta),
        }
    }

    /// Whether this budget is the no-noise sentinel.
    pub fn is_unbounded(&self) -> bool {
        !self.epsilon.is_finite()
    }
}

impl fmt::Display for PrivacyBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.delta {
            Some(d) => write!(f, "(eps={}, delta={d:.1e})", self.epsilon),
            None => write!(f, "(eps={})", self.epsilon),
        }
    }
}

/// Check that delta lies strictly inside (0, 1).
pub fn validate_delta(delta: f64) -> Result<()> {
    if !delta.is_finite() || delta <= 0.0 || delta >= 1.0 {
        return Err(DpError::config(format!(
            "delta must be in (0, 1), got {delta}"
        )));
    }
    Ok(())
}

/// One budget per epsilon for the given mechanism.
pub fn budgets_for(
    kind: MechanismKind,
    epsilons: &[Epsilon],
    delta: f64,
) -> Result<Vec<PrivacyBudget>> {
    epsilons
        .iter()
        .map(|&eps| PrivacyBudget::for_mechanism(kind, eps, delta))
        .collect()
}
