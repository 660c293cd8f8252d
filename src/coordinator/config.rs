//! Round parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QoraError;
use crate::privacy::{ClippingPolicy, CompositionStrategy, Mechanism, NoiseScale};
use crate::secagg::{default_threshold, max_threshold};

fn default_learning_rate() -> f64 {
    1.0
}

/// Configuration shared by every round a coordinator runs.
///
/// Fixed for the lifetime of the coordinator; each round reads it unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Minimum committed (and submitting) participants for a round to proceed.
    pub min_clients: usize,
    /// Collection deadline, measured from the broadcast.
    pub round_timeout_ms: u64,
    /// Deadline for survivors to return shares of dropped participants.
    pub share_recovery_timeout_ms: u64,
    /// L2 bound applied to every local update before noise.
    pub clipping_threshold: f64,
    /// Noise mechanism.
    pub mechanism: Mechanism,
    /// Per-round epsilon.
    pub epsilon_per_round: f64,
    /// Per-round delta. Not charged under the Laplace mechanism.
    pub delta_per_round: f64,
    /// Cumulative epsilon ceiling.
    pub epsilon_ceiling: f64,
    /// Cumulative delta ceiling.
    pub delta_ceiling: f64,
    /// Deadline for commit replies; defaults to `round_timeout_ms`.
    #[serde(default)]
    pub commit_timeout_ms: Option<u64>,
    /// Participants sampled per round; all registered participants when unset.
    #[serde(default)]
    pub clients_per_round: Option<usize>,
    /// Shares needed to recover a dropout; `⌈n/2⌉ + 1` when unset.
    #[serde(default)]
    pub share_threshold: Option<usize>,
    /// Step size applied to the averaged update.
    #[serde(default = "default_learning_rate")]
    pub server_learning_rate: f64,
    /// Budget composition rule.
    #[serde(default)]
    pub composition: CompositionStrategy,
    /// Seed for participant sampling; fresh entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            min_clients: 3,
            round_timeout_ms: 30_000,
            share_recovery_timeout_ms: 5_000,
            clipping_threshold: 1.0,
            mechanism: Mechanism::Gaussian,
            epsilon_per_round: 0.1,
            delta_per_round: 1e-6,
            epsilon_ceiling: 1.0,
            delta_ceiling: 1e-5,
            commit_timeout_ms: None,
            clients_per_round: None,
            share_threshold: None,
            server_learning_rate: default_learning_rate(),
            composition: CompositionStrategy::Basic,
            seed: None,
        }
    }
}

impl RoundConfig {
    /// Check every field and calibrate the per-round noise scale.
    ///
    /// # Errors
    ///
    /// [`QoraError::InvalidConfig`] for structural problems and
    /// [`QoraError::InvalidPrivacyParameters`] for privacy parameters the
    /// mechanism cannot satisfy.
    pub fn validate(&self) -> Result<NoiseScale, QoraError> {
        if self.min_clients < 2 {
            return Err(QoraError::InvalidConfig(format!(
                "min_clients must be at least 2 for masking, got {}",
                self.min_clients
            )));
        }
        if self.round_timeout_ms == 0 || self.share_recovery_timeout_ms == 0 {
            return Err(QoraError::InvalidConfig("timeouts must be positive".to_string()));
        }
        if self.commit_timeout_ms == Some(0) {
            return Err(QoraError::InvalidConfig("commit timeout must be positive".to_string()));
        }
        if let Some(k) = self.clients_per_round {
            if k < self.min_clients {
                return Err(QoraError::InvalidConfig(format!(
                    "clients_per_round {} below min_clients {}",
                    k, self.min_clients
                )));
            }
        }
        if self.share_threshold == Some(0) {
            return Err(QoraError::InvalidConfig("share threshold must be positive".to_string()));
        }
        if !self.clipping_threshold.is_finite() || self.clipping_threshold <= 0.0 {
            return Err(QoraError::InvalidConfig(format!(
                "clipping threshold must be positive, got {}",
                self.clipping_threshold
            )));
        }
        if !self.server_learning_rate.is_finite() || self.server_learning_rate <= 0.0 {
            return Err(QoraError::InvalidConfig(format!(
                "server learning rate must be positive, got {}",
                self.server_learning_rate
            )));
        }
        if self.epsilon_per_round > self.epsilon_ceiling {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "epsilon per round {} exceeds ceiling {}",
                self.epsilon_per_round, self.epsilon_ceiling
            )));
        }
        let (_, round_delta) = self.round_charge();
        if round_delta > self.delta_ceiling {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "delta per round {} exceeds ceiling {}",
                round_delta, self.delta_ceiling
            )));
        }

        self.mechanism.calibrate(
            self.clipping_policy().sensitivity(),
            self.epsilon_per_round,
            self.delta_per_round,
        )
    }

    /// Clipping policy published with every round.
    pub fn clipping_policy(&self) -> ClippingPolicy {
        ClippingPolicy::l2(self.clipping_threshold)
    }

    /// `(ε, δ)` charged for one committed round.
    pub fn round_charge(&self) -> (f64, f64) {
        match self.mechanism {
            Mechanism::Gaussian => (self.epsilon_per_round, self.delta_per_round),
            Mechanism::Laplace => (self.epsilon_per_round, 0.0),
        }
    }

    /// Share threshold for `n` committed participants, capped so that the
    /// peers of a single dropout can still reach it.
    pub fn threshold_for(&self, n: usize) -> usize {
        self.share_threshold
            .unwrap_or_else(|| default_threshold(n))
            .min(max_threshold(n))
    }

    /// Collection deadline.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// Share recovery deadline.
    pub fn share_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.share_recovery_timeout_ms)
    }

    /// Commit deadline.
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms.unwrap_or(self.round_timeout_ms))
    }
}
