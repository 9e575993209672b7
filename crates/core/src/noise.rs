//! Noise mechanisms for differential privacy.

use rand::RngCore;
use rand_distr::{Distribution, Exp, Normal};

use crate::budget::{validate_delta, MechanismKind, PrivacyBudget};
use crate::error::{DpError, Result};
use crate::sensitivity::Norm;

/// Laplace scale `b = sensitivity / epsilon`. Zero for the infinite sentinel.
pub fn laplace_scale(sensitivity: f64, epsilon: f64) -> Result<f64> {
    check_inputs(sensitivity, epsilon)?;
    if epsilon.is_infinite() {
        return Ok(0.0);
    }
    Ok(sensitivity / epsilon)
}

/// Gaussian standard deviation `sensitivity * sqrt(2 ln(1.25 / delta)) / epsilon`.
pub fn gaussian_sigma(sensitivity: f64, epsilon: f64, delta: f64) -> Result<f64> {
    check_inputs(sensitivity, epsilon)?;
    validate_delta(delta)?;
    if epsilon.is_infinite() {
        return Ok(0.0);
    }
    Ok(sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon)
}

fn check_inputs(sensitivity: f64, epsilon: f64) -> Result<()> {
    if !sensitivity.is_finite() || sensitivity <= 0.0 {
        return Err(DpError::config(format!(
            "sensitivity must be positive and finite, got {sensitivity}"
        )));
    }
    if epsilon.is_nan() || epsilon <= 0.0 {
        return Err(DpError::config(format!(
            "epsilon must be positive, got {epsilon}"
        )));
    }
    Ok(())
}

/// A calibrated additive-noise mechanism.
///
/// Calibration ([`NoiseMechanism::noise_scale`]) is kept apart from drawing
/// ([`NoiseMechanism::perturb`]) so the random source can be swapped without
/// touching the privacy arithmetic.
pub trait NoiseMechanism: Send + Sync {
    /// Mechanism family.
    fn kind(&self) -> MechanismKind;

    /// Norm the mechanism's guarantee is stated in.
    fn sensitivity_norm(&self) -> Norm;

    /// Noise scale for a sensitivity and budget.
    fn noise_scale(&self, sensitivity: f64, budget: &PrivacyBudget) -> Result<f64>;

    /// Add one noise draw at `scale` to `value`.
    fn perturb(&self, value: f64, scale: f64, rng: &mut dyn RngCore) -> f64;

    /// Noise a single value. The infinite budget returns `value` unchanged.
    fn sample(
        &self,
        value: f64,
        sensitivity: f64,
        budget: &PrivacyBudget,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        let scale = self.noise_scale(sensitivity, budget)?;
        if scale == 0.0 {
            return Ok(value);
        }
        Ok(self.perturb(value, scale, rng))
    }
}

/// Laplace mechanism (pure epsilon-DP under L1 sensitivity).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaplaceMechanism;

impl NoiseMechanism for LaplaceMechanism {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Laplace
    }

    fn sensitivity_norm(&self) -> Norm {
        Norm::L1
    }

    fn noise_scale(&self, sensitivity: f64, budget: &PrivacyBudget) -> Result<f64> {
        laplace_scale(sensitivity, budget.epsilon.value())
    }

    fn perturb(&self, value: f64, scale: f64, rng: &mut dyn RngCore) -> f64 {
        // Laplace noise can be sampled as the difference of two exponentials.
        match Exp::new(1.0 / scale) {
            Ok(dist) => value + (dist.sample(rng) - dist.sample(rng)),
            Err(_) => value,
        }
    }
}

/// Gaussian mechanism ((epsilon, delta)-DP under L2 sensitivity).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GaussianMechanism;

impl NoiseMechanism for GaussianMechanism {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Gaussian
    }

    fn sensitivity_norm(&self) -> Norm {
        Norm::L2
    }

    fn noise_scale(&self, sensitivity: f64, budget: &PrivacyBudget) -> Result<f64> {
        let delta = budget
            .delta
            .ok_or_else(|| DpError::config("the Gaussian mechanism requires a delta"))?;
        gaussian_sigma(sensitivity, budget.epsilon.value(), delta)
    }

    fn perturb(&self, value: f64, scale: f64, rng: &mut dyn RngCore) -> f64 {
        match Normal::new(0.0, scale) {
            Ok(dist) => value + dist.sample(rng),
            Err(_) => value,
        }
    }
}

/// Mechanism chosen by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mechanism {
    /// Laplace.
    Laplace(LaplaceMechanism),
    /// Gaussian.
    Gaussian(GaussianMechanism),
}

impl Mechanism {
    /// Mechanism for a configured kind.
    pub fn from_kind(kind: MechanismKind) -> Self {
        match kind {
            MechanismKind::Laplace => Self::Laplace(LaplaceMechanism),
            MechanismKind::Gaussian => Self::Gaussian(GaussianMechanism),
        }
    }

    fn inner(&self) -> &dyn NoiseMechanism {
        match self {
            Self::Laplace(m) => m as &dyn NoiseMechanism,
            Self::Gaussian(m) => m as &dyn NoiseMechanism,
        }
    }
}

impl NoiseMechanism for Mechanism {
    fn kind(&self) -> MechanismKind {
        self.inner().kind()
    }

    fn sensitivity_norm(&self) -> Norm {
        self.inner().sensitivity_norm()
    }

    fn noise_scale(&self, sensitivity: f64, budget: &PrivacyBudget) -> Result<f64> {
        self.inner().noise_scale(sensitivity, budget)
    }

    fn perturb(&self, value: f64, scale: f64, rng: &mut dyn RngCore) -> f64 {
        self.inner().perturb(value, scale, rng)
    }
}
