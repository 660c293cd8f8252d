//! Secure aggregation by double masking with threshold dropout recovery.
//!
//! Every contribution carries pairwise masks, which cancel in the sum, and a
//! self-mask, which the coordinator removes only for participants that
//! submitted in time. Both secrets are Shamir-shared, and a survivor reveals
//! at most one of the two for any participant. The coordinator therefore
//! learns the sum of the contributions and nothing about a single vector,
//! including one that arrives after its sender was declared a dropout.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`keys`] | X25519 round keys, seed derivation, share encryption |
//! | [`masking`] | ChaCha20 mask expansion and sign convention |
//! | [`shamir`] | Threshold sharing of the round secrets |
//! | [`client`] | Participant half of one round |
//! | [`session`] | Coordinator half: collection, dropout resolution, unmasking |

pub mod client;
pub mod keys;
pub mod masking;
pub mod session;
pub mod shamir;

pub use client::MaskingClient;
pub use keys::PublicKeys;
pub use session::{AggregateOutcome, CollectionSummary, SecureAggregationSession};
pub use shamir::Share;

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

/// A masked update vector, consumed once by the round's session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantContribution {
    /// Round the contribution belongs to.
    pub round_number: u64,
    /// Submitting participant.
    pub participant_id: ParticipantId,
    /// Clipped, noised, and masked update in the fixed-point ring.
    pub masked_contribution: Vec<I32F32>,
}

/// Which of a participant's two round secrets a share belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareKind {
    /// Mask key; revealed only for dropouts, to cancel their pairwise masks.
    MaskKey,
    /// Self-mask seed; revealed only for submitters, to strip their self-mask.
    SelfMask,
}

/// One share the coordinator asks a survivor to open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Participant whose secret the share belongs to.
    pub target: ParticipantId,
    /// Which secret.
    pub kind: ShareKind,
    /// Ciphertext the holder received from `target`.
    pub ciphertext: Vec<u8>,
}

/// Shares of both round secrets, encrypted together for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShare {
    /// Recipient who can decrypt it.
    pub to: ParticipantId,
    /// Keystream-encrypted [`Share`] bytes.
    pub ciphertext: Vec<u8>,
}

/// Every share a participant distributes for one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareBundle {
    /// Round the shares belong to.
    pub round_number: u64,
    /// Participant whose secret was shared.
    pub from: ParticipantId,
    /// One encrypted share pair per roster member, the sender included.
    pub shares: Vec<EncryptedShare>,
}

/// Default recovery threshold for `n` committed participants: `⌈n/2⌉ + 1`,
/// capped at [`max_threshold`].
pub fn default_threshold(n: usize) -> usize {
    (n.div_ceil(2) + 1).min(max_threshold(n))
}

/// Largest usable threshold for `n` participants. A dropout's mask key is
/// held by its `n - 1` peers only, so a larger threshold could never recover
/// one. Two-member rounds keep `2`, since one survivor is never enough.
pub fn max_threshold(n: usize) -> usize {
    if n <= 2 {
        n
    } else {
        n - 1
    }
}

/// Shamir x-coordinate of `id` within a roster (1-based position).
pub(crate) fn share_index<'a, I>(roster: I, id: &ParticipantId) -> Option<u32>
where
    I: IntoIterator<Item = &'a ParticipantId>,
{
    roster
        .into_iter()
        .position(|p| p == id)
        .and_then(|pos| u32::try_from(pos + 1).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold() {
        assert_eq!(default_threshold(2), 2);
        assert_eq!(default_threshold(3), 2);
        assert_eq!(default_threshold(4), 3);
        assert_eq!(default_threshold(5), 4);
        assert_eq!(default_threshold(10), 6);
    }

    #[test]
    fn test_max_threshold_leaves_room_for_a_dropout() {
        assert_eq!(max_threshold(2), 2);
        assert_eq!(max_threshold(3), 2);
        assert_eq!(max_threshold(4), 3);
        for n in 3..20 {
            assert!(default_threshold(n) <= n - 1, "n = {}", n);
        }
    }

    #[test]
    fn test_share_index_is_one_based() {
        let roster: Vec<ParticipantId> = ["a", "b", "c"].iter().map(|s| (*s).into()).collect();
        assert_eq!(share_index(&roster, &"a".into()), Some(1));
        assert_eq!(share_index(&roster, &"c".into()), Some(3));
        assert_eq!(share_index(&roster, &"z".into()), None);
    }
}
