//! Noise calibration for the Gaussian and Laplace mechanisms.
//!
//! Given an L2 sensitivity and a per-round `(ε, δ)` target, computes the scale
//! of the noise distribution each participant adds after clipping:
//!
//! | Mechanism | Scale |
//! |-----------|-------|
//! | Gaussian  | `σ = Δ · sqrt(2 ln(1.25/δ)) / ε` |
//! | Laplace   | `b = Δ / ε` (δ ignored) |
//!
//! Calibration is a pure function of its inputs, so identical inputs always
//! give a bit-identical scale.

use rand::Rng;
use rand_distr::{Distribution, Normal, Open01};
use serde::{Deserialize, Serialize};

use crate::error::QoraError;

/// Differential-privacy noise mechanism, selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Gaussian mechanism, `(ε, δ)`-DP
    #[default]
    Gaussian,
    /// Laplace mechanism, pure `ε`-DP
    Laplace,
}

impl Mechanism {
    /// Compute the noise scale for one round.
    ///
    /// # Errors
    ///
    /// [`QoraError::InvalidPrivacyParameters`] if `target_epsilon <= 0`,
    /// `target_delta < 0`, the sensitivity is negative, any input is not
    /// finite, or (Gaussian only) `target_delta` is not in `(0, 1)`.
    pub fn calibrate(
        self,
        sensitivity: f64,
        target_epsilon: f64,
        target_delta: f64,
    ) -> Result<NoiseScale, QoraError> {
        if !sensitivity.is_finite() || sensitivity < 0.0 {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "sensitivity must be finite and non-negative, got {}",
                sensitivity
            )));
        }
        if !target_epsilon.is_finite() || target_epsilon <= 0.0 {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "epsilon must be positive, got {}",
                target_epsilon
            )));
        }
        if !target_delta.is_finite() || target_delta < 0.0 {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "delta must be non-negative, got {}",
                target_delta
            )));
        }

        let scale = match self {
            Mechanism::Gaussian => {
                if target_delta == 0.0 || target_delta >= 1.0 {
                    return Err(QoraError::InvalidPrivacyParameters(format!(
                        "gaussian mechanism needs delta in (0, 1), got {}",
                        target_delta
                    )));
                }
                sensitivity * (2.0 * (1.25 / target_delta).ln()).sqrt() / target_epsilon
            }
            Mechanism::Laplace => sensitivity / target_epsilon,
        };

        Ok(NoiseScale {
            mechanism: self,
            scale,
        })
    }
}

/// Calibrated noise parameter: Gaussian standard deviation or Laplace scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseScale {
    /// Mechanism the scale was calibrated for.
    pub mechanism: Mechanism,
    /// σ for Gaussian, b for Laplace.
    pub scale: f64,
}

impl NoiseScale {
    /// A scale that adds no noise (for tests and non-private baselines).
    pub fn zero(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            scale: 0.0,
        }
    }

    /// Draw one noise sample from the injected random source.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.scale == 0.0 {
            return 0.0;
        }
        match self.mechanism {
            Mechanism::Gaussian => match Normal::new(0.0, self.scale) {
                Ok(normal) => normal.sample(rng),
                Err(_) => 0.0,
            },
            Mechanism::Laplace => {
                // Inverse CDF: -b * sign(u) * ln(1 - 2|u|), u in (-0.5, 0.5).
                // The interval must stay open or ln(0) yields infinite noise.
                let u: f64 = rng.sample::<f64, _>(Open01) - 0.5;
                -self.scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
            }
        }
    }
}
