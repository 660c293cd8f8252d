//! Append-only log of round outcomes.
//!
//! One [`RoundRecord`] per completed or aborted round. Records are never
//! edited after they are appended, and together with the latest snapshot
//! they are enough to resume a stopped coordinator.

use serde::{Deserialize, Serialize};

use crate::privacy::NoiseScale;
use crate::types::ParticipantId;

/// Why a round ended without an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Fewer than `min_clients` committed or submitted
    InsufficientParticipants,
    /// A dropout's mask could not be reconstructed
    AggregationUnrecoverable,
    /// Operator cancelled before aggregation
    Cancelled,
}

/// How a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Budget charged and update applied
    Completed,
    /// No charge, no update; the coordinator may retry
    Aborted(AbortReason),
    /// Charge refused; update discarded and the coordinator halted
    BudgetExhausted,
}

/// Metadata for a single round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number (1-based).
    pub round_number: u64,
    /// Participants that committed to the round.
    pub participants: Vec<ParticipantId>,
    /// Committed participants that did not submit.
    pub dropouts: Vec<ParticipantId>,
    /// Noise scale announced for the round.
    pub noise_scale: NoiseScale,
    /// Epsilon charged (zero unless completed).
    pub epsilon_charged: f64,
    /// Delta charged (zero unless completed).
    pub delta_charged: f64,
    /// Version of the global parameters after the round.
    pub parameters_version: u64,
    /// Outcome.
    pub outcome: RoundOutcome,
}

impl RoundRecord {
    /// Whether the round charged the budget and applied its update.
    pub fn is_completed(&self) -> bool {
        self.outcome == RoundOutcome::Completed
    }
}

/// Append-only log of rounds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoundLog {
    records: Vec<RoundRecord>,
}

impl RoundLog {
    /// Create a new, empty log.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Rebuild a log from persisted records.
    pub fn from_records(records: Vec<RoundRecord>) -> Self {
        Self { records }
    }

    /// Append a record.
    pub fn push(&mut self, record: RoundRecord) {
        self.records.push(record);
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    /// Most recent record.
    pub fn last(&self) -> Option<&RoundRecord> {
        self.records.last()
    }

    /// Number of rounds that completed.
    pub fn completed(&self) -> usize {
        self.records.iter().filter(|r| r.is_completed()).count()
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::Mechanism;

    fn record(round_number: u64, outcome: RoundOutcome) -> RoundRecord {
        RoundRecord {
            round_number,
            participants: vec!["a".into(), "b".into(), "c".into()],
            dropouts: vec!["c".into()],
            noise_scale: NoiseScale::zero(Mechanism::Gaussian),
            epsilon_charged: 0.1,
            delta_charged: 1e-6,
            parameters_version: round_number,
            outcome,
        }
    }

    #[test]
    fn test_round_log_push_and_len() {
        let mut log = RoundLog::new();
        assert!(log.is_empty());

        log.push(record(1, RoundOutcome::Completed));
        log.push(record(2, RoundOutcome::Aborted(AbortReason::Cancelled)));

        assert_eq!(log.len(), 2);
        assert_eq!(log.completed(), 1);
        assert_eq!(log.last().map(|r| r.round_number), Some(2));
    }

    #[test]
    fn test_round_record_serde() {
        let entry = record(3, RoundOutcome::Aborted(AbortReason::AggregationUnrecoverable));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""outcome":{"status":"aborted","reason":"aggregation_unrecoverable"}"#));
        let restored: RoundRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_unit_outcome_serde() {
        let json = serde_json::to_string(&RoundOutcome::BudgetExhausted).unwrap();
        assert_eq!(json, r#"{"status":"budget_exhausted"}"#);
    }
}
