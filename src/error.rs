//! Error types for qora-secagg

use thiserror::Error;

use crate::coordinator::state::RoundPhase;
use crate::types::ParticipantId;

/// All possible errors in qora-secagg
#[derive(Error, Debug)]
pub enum QoraError {
    /// Too few participants committed to (or submitted in) a round
    #[error("Insufficient participants: need {needed}, got {actual}")]
    InsufficientParticipants {
        /// Minimum required participants
        needed: usize,
        /// Participants actually available
        actual: usize,
    },

    /// Dropout recovery could not gather a share quorum
    #[error("Aggregation unrecoverable: {available}/{threshold} shares for dropped participant {participant}")]
    AggregationUnrecoverable {
        /// The dropped participant whose mask could not be removed
        participant: ParticipantId,
        /// Shares that were actually recovered
        available: usize,
        /// Shares required for reconstruction
        threshold: usize,
    },

    /// Charging a round would exceed the declared privacy ceiling
    #[error(
        "Privacy budget exhausted: spent (ε={epsilon_spent}, δ={delta_spent}), \
         requested (ε={epsilon_requested}, δ={delta_requested})"
    )]
    BudgetExhausted {
        /// Epsilon already spent
        epsilon_spent: f64,
        /// Delta already spent
        delta_spent: f64,
        /// Epsilon requested by the rejected charge
        epsilon_requested: f64,
        /// Delta requested by the rejected charge
        delta_requested: f64,
    },

    /// Privacy parameters are out of range
    #[error("Invalid privacy parameters: {0}")]
    InvalidPrivacyParameters(String),

    /// Round configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Vector length does not match the model dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected vector length
        expected: usize,
        /// Received vector length
        actual: usize,
    },

    /// Message from a participant outside the round's committed set
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    /// A participant submitted twice in the same round
    #[error("Duplicate submission from {0}")]
    DuplicateSubmission(ParticipantId),

    /// Submission arrived after collection closed
    #[error("Late submission from {0}")]
    LateSubmission(ParticipantId),

    /// Message tagged with a different round number
    #[error("Round mismatch: expected {expected}, got {actual}")]
    RoundMismatch {
        /// Round currently in progress
        expected: u64,
        /// Round carried by the message
        actual: u64,
    },

    /// Secret share is malformed or inconsistent
    #[error("Invalid share: {0}")]
    InvalidShare(String),

    /// Cancellation requested in a phase that must run to completion
    #[error("Cancellation rejected during {0:?}")]
    CancellationRejected(RoundPhase),

    /// Cancellation requested while no round is running
    #[error("No active round")]
    NoActiveRound,

    /// Coordinator has exhausted its budget and accepts no further rounds
    #[error("Coordinator halted: privacy budget exhausted")]
    Halted,

    /// Coordinator was shut down
    #[error("Coordinator stopped")]
    Stopped,

    /// The local training collaborator failed
    #[error("Local trainer failed: {0}")]
    Trainer(String),

    /// Reading or writing persisted state failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Encoding or decoding persisted state failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QoraError {
    /// Whether the error ends the coordinator's ability to run rounds.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QoraError::BudgetExhausted { .. } | QoraError::Halted | QoraError::Stopped
        )
    }
}
