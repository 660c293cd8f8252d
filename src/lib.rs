//! # Qora-SecAgg: Quorum-Oriented Secure Aggregation for Federated Learning
//!
//! Coordination and privacy core of a federated-learning system. Each round,
//! participants clip and noise their local updates, hide them behind
//! pairwise additive masks, and the coordinator learns only their average.
//! A privacy accountant bounds the cumulative `(ε, δ)` across rounds.
//!
//! ## Building Blocks
//!
//! - [`privacy`] - Noise calibration, clip-then-noise, budget accounting
//! - [`secagg`] - Pairwise masking with Shamir-based dropout recovery
//! - [`coordinator`] - Round state machine, messages, persistence
//! - [`participant`] - Participant task around a [`LocalTrainer`]
//!
//! ## High-Level API
//!
//! Create a [`RoundCoordinator`], [`connect`](RoundCoordinator::connect) one
//! [`Participant`] per client, spawn each participant's
//! [`run`](Participant::run) loop, then call
//! [`run_round`](RoundCoordinator::run_round) until the budget runs out.

#![deny(missing_docs)]

pub mod coordinator;
pub mod error;
pub mod math;
pub mod participant;
pub mod privacy;
pub mod secagg;
pub mod types;

// Re-exports
pub use coordinator::{
    AbortReason, CoordinatorStatus, RoundConfig, RoundControl, RoundCoordinator, RoundOutcome,
    RoundPhase, RoundRecord, SnapshotStore,
};
pub use error::QoraError;
pub use participant::{LocalTrainer, Participant};
pub use privacy::{
    ClippingPolicy, CompositionStrategy, Mechanism, NoiseScale, PrivacyBudgetAccountant,
};
pub use secagg::{MaskingClient, SecureAggregationSession};
pub use types::{GlobalParameters, ParticipantId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
