//! Cumulative privacy-budget accounting across rounds.
//!
//! [`PrivacyBudgetAccountant::charge`] is the only mutator. It composes the
//! new round with the full charge history under the configured
//! [`CompositionStrategy`] and commits only if the result stays within the
//! ceiling. Spent budget can never be returned: there is no rollback.

use serde::{Deserialize, Serialize};

use crate::error::QoraError;

/// Relative slack for float rounding when comparing totals to the ceiling.
/// Ten charges of 0.1 against a ceiling of 1.0 must all fit.
const CEILING_TOLERANCE: f64 = 1e-9;

/// Rule for combining per-round `(ε, δ)` into a cumulative guarantee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositionStrategy {
    /// Sequential composition: ε and δ add up.
    #[default]
    Basic,
    /// Advanced composition (heterogeneous form), never looser than `Basic`:
    ///
    /// `ε = min(Σεᵢ, sqrt(2 ln(1/δ')·Σεᵢ²) + Σεᵢ(e^εᵢ − 1))`, `δ = Σδᵢ + δ'`
    Advanced {
        /// Extra failure probability δ' traded for the tighter ε bound.
        delta_slack: f64,
    },
}

impl CompositionStrategy {
    /// Total `(ε, δ)` of a sequence of charges.
    pub fn compose(&self, charges: &[BudgetCharge]) -> (f64, f64) {
        if charges.is_empty() {
            return (0.0, 0.0);
        }
        let eps_sum: f64 = charges.iter().map(|c| c.epsilon).sum();
        let delta_sum: f64 = charges.iter().map(|c| c.delta).sum();

        match *self {
            CompositionStrategy::Basic => (eps_sum, delta_sum),
            CompositionStrategy::Advanced { delta_slack } => {
                let eps_sq: f64 = charges.iter().map(|c| c.epsilon * c.epsilon).sum();
                let drift: f64 = charges.iter().map(|c| c.epsilon * c.epsilon.exp_m1()).sum();
                let advanced = (2.0 * (1.0 / delta_slack).ln() * eps_sq).sqrt() + drift;
                (eps_sum.min(advanced), delta_sum + delta_slack)
            }
        }
    }

    fn validate(&self) -> Result<(), QoraError> {
        match *self {
            CompositionStrategy::Basic => Ok(()),
            CompositionStrategy::Advanced { delta_slack } => {
                if delta_slack.is_finite() && delta_slack > 0.0 && delta_slack < 1.0 {
                    Ok(())
                } else {
                    Err(QoraError::InvalidPrivacyParameters(format!(
                        "advanced composition needs delta_slack in (0, 1), got {}",
                        delta_slack
                    )))
                }
            }
        }
    }
}

/// One committed per-round expenditure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetCharge {
    /// Position in the charge history (0-indexed).
    pub sequence: usize,
    /// Epsilon charged.
    pub epsilon: f64,
    /// Delta charged.
    pub delta: f64,
}

/// Cumulative spend, ceiling, and the append-only charge history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudgetState {
    epsilon_spent: f64,
    delta_spent: f64,
    epsilon_max: f64,
    delta_max: f64,
    history: Vec<BudgetCharge>,
}

impl PrivacyBudgetState {
    /// Epsilon spent so far.
    pub fn epsilon_spent(&self) -> f64 {
        self.epsilon_spent
    }

    /// Delta spent so far.
    pub fn delta_spent(&self) -> f64 {
        self.delta_spent
    }

    /// Declared epsilon ceiling.
    pub fn epsilon_max(&self) -> f64 {
        self.epsilon_max
    }

    /// Declared delta ceiling.
    pub fn delta_max(&self) -> f64 {
        self.delta_max
    }

    /// Every committed charge, oldest first.
    pub fn history(&self) -> &[BudgetCharge] {
        &self.history
    }
}

/// Snapshot of budget consumption for operators.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyReport {
    /// Epsilon spent so far.
    pub epsilon_spent: f64,
    /// Delta spent so far.
    pub delta_spent: f64,
    /// Epsilon still available.
    pub epsilon_remaining: f64,
    /// Delta still available.
    pub delta_remaining: f64,
    /// Epsilon ceiling.
    pub epsilon_max: f64,
    /// Delta ceiling.
    pub delta_max: f64,
    /// Number of charged rounds.
    pub rounds_charged: usize,
}

/// Tracks cumulative `(ε, δ)` against a fixed ceiling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrivacyBudgetAccountant {
    state: PrivacyBudgetState,
    strategy: CompositionStrategy,
}

impl PrivacyBudgetAccountant {
    /// Create an accountant with the given ceiling.
    ///
    /// # Errors
    ///
    /// [`QoraError::InvalidPrivacyParameters`] if a ceiling is negative or not
    /// finite, or the strategy's own parameters are out of range.
    pub fn new(
        epsilon_max: f64,
        delta_max: f64,
        strategy: CompositionStrategy,
    ) -> Result<Self, QoraError> {
        if !epsilon_max.is_finite() || epsilon_max < 0.0 {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "epsilon ceiling must be finite and non-negative, got {}",
                epsilon_max
            )));
        }
        if !delta_max.is_finite() || !(0.0..1.0).contains(&delta_max) {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "delta ceiling must be in [0, 1), got {}",
                delta_max
            )));
        }
        strategy.validate()?;

        Ok(Self {
            state: PrivacyBudgetState {
                epsilon_spent: 0.0,
                delta_spent: 0.0,
                epsilon_max,
                delta_max,
                history: Vec::new(),
            },
            strategy,
        })
    }

    /// Charge one round. Atomic: on error nothing is recorded.
    ///
    /// # Errors
    ///
    /// - [`QoraError::BudgetExhausted`] if the composed total would exceed
    ///   either ceiling.
    /// - [`QoraError::InvalidPrivacyParameters`] for negative or non-finite
    ///   charges.
    pub fn charge(
        &mut self,
        round_epsilon: f64,
        round_delta: f64,
    ) -> Result<PrivacyBudgetState, QoraError> {
        if !round_epsilon.is_finite() || round_epsilon < 0.0 {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "round epsilon must be finite and non-negative, got {}",
                round_epsilon
            )));
        }
        if !round_delta.is_finite() || round_delta < 0.0 {
            return Err(QoraError::InvalidPrivacyParameters(format!(
                "round delta must be finite and non-negative, got {}",
                round_delta
            )));
        }

        let charge = BudgetCharge {
            sequence: self.state.history.len(),
            epsilon: round_epsilon,
            delta: round_delta,
        };
        let mut candidate = self.state.history.clone();
        candidate.push(charge);
        let (eps_total, delta_total) = self.strategy.compose(&candidate);

        if !within(eps_total, self.state.epsilon_max) || !within(delta_total, self.state.delta_max)
        {
            return Err(QoraError::BudgetExhausted {
                epsilon_spent: self.state.epsilon_spent,
                delta_spent: self.state.delta_spent,
                epsilon_requested: round_epsilon,
                delta_requested: round_delta,
            });
        }

        self.state.history = candidate;
        self.state.epsilon_spent = eps_total
            .min(self.state.epsilon_max)
            .max(self.state.epsilon_spent);
        self.state.delta_spent = delta_total
            .min(self.state.delta_max)
            .max(self.state.delta_spent);
        Ok(self.state.clone())
    }

    /// Remaining `(ε, δ)` before the ceiling.
    pub fn remaining(&self) -> (f64, f64) {
        (
            (self.state.epsilon_max - self.state.epsilon_spent).max(0.0),
            (self.state.delta_max - self.state.delta_spent).max(0.0),
        )
    }

    /// Current state (read-only).
    pub fn state(&self) -> &PrivacyBudgetState {
        &self.state
    }

    /// Composition rule in use.
    pub fn strategy(&self) -> CompositionStrategy {
        self.strategy
    }

    /// Summary for operators and status endpoints.
    pub fn report(&self) -> PrivacyReport {
        let (epsilon_remaining, delta_remaining) = self.remaining();
        PrivacyReport {
            epsilon_spent: self.state.epsilon_spent,
            delta_spent: self.state.delta_spent,
            epsilon_remaining,
            delta_remaining,
            epsilon_max: self.state.epsilon_max,
            delta_max: self.state.delta_max,
            rounds_charged: self.state.history.len(),
        }
    }
}

fn within(total: f64, max: f64) -> bool {
    total <= max || total - max <= max * CEILING_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_charges_accumulate() {
        let mut acc = PrivacyBudgetAccountant::new(1.0, 1e-5, CompositionStrategy::Basic).unwrap();
        let state = acc.charge(0.25, 1e-6).unwrap();
        assert_eq!(state.epsilon_spent(), 0.25);
        assert_eq!(state.delta_spent(), 1e-6);
        assert_eq!(state.history().len(), 1);

        acc.charge(0.25, 1e-6).unwrap();
        let (eps_left, delta_left) = acc.remaining();
        assert!((eps_left - 0.5).abs() < 1e-12);
        assert!((delta_left - 8e-6).abs() < 1e-18);
    }

    #[test]
    fn test_ten_tenths_fit_exactly() {
        let mut acc = PrivacyBudgetAccountant::new(1.0, 1.0e-3, CompositionStrategy::Basic).unwrap();
        for i in 0..10 {
            assert!(acc.charge(0.1, 1e-6).is_ok(), "charge {} should fit", i);
        }
        assert!(acc.state().epsilon_spent() <= 1.0);
        assert!(matches!(
            acc.charge(0.1, 1e-6),
            Err(QoraError::BudgetExhausted { .. })
        ));
    }

    #[test]
    fn test_failed_charge_is_not_applied() {
        let mut acc = PrivacyBudgetAccountant::new(0.5, 1e-5, CompositionStrategy::Basic).unwrap();
        acc.charge(0.4, 0.0).unwrap();
        let before = acc.state().clone();

        let err = acc.charge(0.2, 0.0).unwrap_err();
        assert!(matches!(err, QoraError::BudgetExhausted { .. }));
        assert_eq!(acc.state(), &before);
    }

    #[test]
    fn test_delta_ceiling_enforced() {
        let mut acc = PrivacyBudgetAccountant::new(10.0, 1e-6, CompositionStrategy::Basic).unwrap();
        acc.charge(0.1, 1e-6).unwrap();
        assert!(acc.charge(0.1, 1e-6).is_err());
    }

    #[test]
    fn test_rejects_negative_charge() {
        let mut acc = PrivacyBudgetAccountant::new(1.0, 1e-5, CompositionStrategy::Basic).unwrap();
        assert!(matches!(
            acc.charge(-0.1, 0.0),
            Err(QoraError::InvalidPrivacyParameters(_))
        ));
        assert!(acc.charge(0.1, f64::NAN).is_err());
        assert!(acc.state().history().is_empty());
    }

    #[test]
    fn test_rejects_bad_ceiling() {
        assert!(PrivacyBudgetAccountant::new(-1.0, 0.0, CompositionStrategy::Basic).is_err());
        assert!(PrivacyBudgetAccountant::new(1.0, 1.0, CompositionStrategy::Basic).is_err());
        assert!(PrivacyBudgetAccountant::new(
            1.0,
            0.1,
            CompositionStrategy::Advanced { delta_slack: 0.0 }
        )
        .is_err());
    }

    #[test]
    fn test_advanced_tighter_for_many_small_rounds() {
        let charges: Vec<BudgetCharge> = (0..1000)
            .map(|i| BudgetCharge {
                sequence: i,
                epsilon: 0.01,
                delta: 0.0,
            })
            .collect();
        let (basic_eps, _) = CompositionStrategy::Basic.compose(&charges);
        let (adv_eps, adv_delta) =
            CompositionStrategy::Advanced { delta_slack: 1e-6 }.compose(&charges);

        assert!((basic_eps - 10.0).abs() < 1e-9);
        assert!(adv_eps < basic_eps, "advanced {} >= basic {}", adv_eps, basic_eps);
        assert!((adv_delta - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_advanced_never_looser_than_basic() {
        let charges = vec![BudgetCharge {
            sequence: 0,
            epsilon: 2.0,
            delta: 1e-7,
        }];
        let (basic_eps, _) = CompositionStrategy::Basic.compose(&charges);
        let (adv_eps, _) = CompositionStrategy::Advanced { delta_slack: 1e-6 }.compose(&charges);
        assert_eq!(adv_eps, basic_eps);
    }

    #[test]
    fn test_report_and_serde() {
        let mut acc = PrivacyBudgetAccountant::new(2.0, 1e-5, CompositionStrategy::Basic).unwrap();
        acc.charge(0.5, 1e-6).unwrap();

        let report = acc.report();
        assert_eq!(report.rounds_charged, 1);
        assert!((report.epsilon_remaining - 1.5).abs() < 1e-12);

        let json = serde_json::to_string(&acc).unwrap();
        let restored: PrivacyBudgetAccountant = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.state(), acc.state());
        assert_eq!(restored.strategy(), CompositionStrategy::Basic);
    }
}
