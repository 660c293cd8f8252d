//! Messages exchanged between the coordinator and participants.
//!
//! The channel carrying them is assumed to be authenticated and private;
//! in-process it is a pair of `tokio::sync::mpsc` channels.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::record::RoundOutcome;
use crate::privacy::{ClippingPolicy, NoiseScale};
use crate::secagg::{
    ParticipantContribution, PublicKeys, RecoveryRequest, Share, ShareBundle, ShareKind,
};
use crate::types::{GlobalParameters, ParticipantId};

/// Everything a participant needs to compute and mask its contribution.
///
/// Built once per round and kept until the round closes, so sending it again
/// is harmless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundAnnouncement {
    /// Round number.
    pub round_number: u64,
    /// Parameter snapshot to train against.
    pub global_parameters: Arc<GlobalParameters>,
    /// Clipping applied before noise.
    pub clipping_policy: ClippingPolicy,
    /// Noise each participant adds after clipping.
    pub noise: NoiseScale,
    /// Collection deadline, milliseconds since the Unix epoch.
    pub deadline_unix_ms: u64,
    /// Committed participants and their round keys, in id order.
    pub roster: Vec<(ParticipantId, PublicKeys)>,
    /// Shares needed to recover a dropout.
    pub threshold: usize,
}

/// Coordinator → participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CoordinatorMessage {
    /// Invitation to join a round; answered with [`ParticipantMessage::Commit`].
    CommitRequest {
        /// Round number.
        round_number: u64,
    },
    /// Round parameters for the committed set.
    RoundAnnouncement(RoundAnnouncement),
    /// Request for the shares this participant holds: mask keys of
    /// dropouts, self-mask seeds of submitters.
    ShareRequest {
        /// Round number.
        round_number: u64,
        /// One entry per share to decrypt.
        requests: Vec<RecoveryRequest>,
    },
    /// Round finished; per-round secrets can be dropped.
    RoundClosed {
        /// Round number.
        round_number: u64,
        /// How it ended.
        outcome: RoundOutcome,
    },
    /// Coordinator is shutting down.
    Shutdown,
}

/// Participant → coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParticipantMessage {
    /// Agreement to join a round, with fresh round keys.
    Commit {
        /// Round number.
        round_number: u64,
        /// Sender.
        participant_id: ParticipantId,
        /// Public round keys.
        public_keys: PublicKeys,
    },
    /// Encrypted shares of the sender's mask key and self-mask seed.
    ShareBundle(ShareBundle),
    /// Masked update.
    MaskedContribution(ParticipantContribution),
    /// Decrypted share of another participant's secret.
    SeedShare {
        /// Round number.
        round_number: u64,
        /// Sender (the share holder).
        participant_id: ParticipantId,
        /// Participant the share belongs to.
        seed_share_for: ParticipantId,
        /// Which of its secrets.
        kind: ShareKind,
        /// The share.
        share: Share,
    },
}

impl ParticipantMessage {
    /// Round the message belongs to.
    pub fn round_number(&self) -> u64 {
        match self {
            ParticipantMessage::Commit { round_number, .. }
            | ParticipantMessage::SeedShare { round_number, .. } => *round_number,
            ParticipantMessage::ShareBundle(bundle) => bundle.round_number,
            ParticipantMessage::MaskedContribution(c) => c.round_number,
        }
    }

    /// Participant that sent the message.
    pub fn sender(&self) -> &ParticipantId {
        match self {
            ParticipantMessage::Commit { participant_id, .. }
            | ParticipantMessage::SeedShare { participant_id, .. } => participant_id,
            ParticipantMessage::ShareBundle(bundle) => &bundle.from,
            ParticipantMessage::MaskedContribution(c) => &c.participant_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ParticipantMessage::Commit { .. } => "commit",
            ParticipantMessage::ShareBundle(_) => "share_bundle",
            ParticipantMessage::MaskedContribution(_) => "masked_contribution",
            ParticipantMessage::SeedShare { .. } => "seed_share",
        }
    }
}
