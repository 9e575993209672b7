//! Random sources for noise draws.
//!
//! Every (query, column, epsilon, mechanism) combination gets its own stream.
//! [`SeededSource`] derives that stream from a fixed seed so evaluation runs
//! replay bit-for-bit regardless of scheduling. It is a reproducibility mode,
//! not a privacy feature: a deployment releasing data should use
//! [`EntropySource`], which the mechanisms accept unchanged.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use telemetry_dp_prng::PrngKey;

use crate::budget::{Epsilon, MechanismKind};

/// Identifies one independent noise stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseCoordinates<'a> {
    /// Query identifier.
    pub query: &'a str,
    /// Column name.
    pub column: &'a str,
    /// Budget epsilon.
    pub epsilon: Epsilon,
    /// Mechanism family.
    pub mechanism: MechanismKind,
}

/// Supplier of per-coordinate random streams.
pub trait NoiseSource: Send + Sync {
    /// Open the stream for one coordinate tuple.
    fn stream(&self, coords: &NoiseCoordinates<'_>) -> Box<dyn RngCore + Send>;

    /// Whether repeated calls with the same coordinates yield the same stream.
    fn is_reproducible(&self) -> bool;
}

/// Deterministic source keyed by a seed and the task coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeededSource {
    root: PrngKey,
}

impl SeededSource {
    /// Create a source from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            root: PrngKey::new(seed),
        }
    }

    /// Key for one coordinate tuple.
    pub fn key_for(&self, coords: &NoiseCoordinates<'_>) -> PrngKey {
        self.root
            .fold_in_str(coords.mechanism.as_str())
            .fold_in_str(coords.query)
            .fold_in_str(coords.column)
            .fold_in(coords.epsilon.value().to_bits())
    }
}

impl NoiseSource for SeededSource {
    fn stream(&self, coords: &NoiseCoordinates<'_>) -> Box<dyn RngCore + Send> {
        Box::new(self.key_for(coords).stream())
    }

    fn is_reproducible(&self) -> bool {
        true
    }
}

/// Non-reproducible source seeded from operating-system entropy per stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntropySource;

impl NoiseSource for EntropySource {
    fn stream(&self, _coords: &NoiseCoordinates<'_>) -> Box<dyn RngCore + Send> {
        Box::new(StdRng::from_entropy())
    }

    fn is_reproducible(&self) -> bool {
        false
    }
}
