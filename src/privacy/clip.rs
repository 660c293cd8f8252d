//! Clip-then-noise privatization of a participant's local update.
//!
//! The order matters: calibration assumes an input with bounded L2 norm, so
//! the update is clipped to `policy.threshold` first and that threshold is the
//! sensitivity handed to [`Mechanism::calibrate`](super::Mechanism::calibrate).

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::calibrator::NoiseScale;
use crate::math::norms::clip_to_norm;

/// Norm used for clipping. Only L2 is supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormKind {
    /// Euclidean norm
    #[default]
    L2,
}

/// Clipping configuration attached to a round; read-only once the round starts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClippingPolicy {
    /// Maximum norm of a clipped update.
    pub threshold: f64,
    /// Norm used to measure updates.
    #[serde(default)]
    pub norm: NormKind,
}

impl ClippingPolicy {
    /// L2 clipping at `threshold`.
    pub fn l2(threshold: f64) -> Self {
        Self {
            threshold,
            norm: NormKind::L2,
        }
    }

    /// Sensitivity of a clipped update, i.e. the clipping bound.
    pub fn sensitivity(&self) -> f64 {
        self.threshold
    }
}

/// Clip `update` to the policy's norm bound. Never increases the norm.
pub fn clip(update: &Array1<f64>, policy: &ClippingPolicy) -> Array1<f64> {
    let mut clipped = update.to_vec();
    match policy.norm {
        NormKind::L2 => {
            clip_to_norm(&mut clipped, policy.threshold);
        }
    }
    Array1::from(clipped)
}

/// Clip, then add independent per-coordinate noise drawn from `rng`.
///
/// The same seed reproduces the same output.
pub fn apply<R: Rng + ?Sized>(
    update: &Array1<f64>,
    policy: &ClippingPolicy,
    scale: &NoiseScale,
    rng: &mut R,
) -> Array1<f64> {
    let mut out = clip(update, policy);
    out.mapv_inplace(|x| x + scale.sample(rng));
    out
}
