//! Per-round key material and seed derivation.
//!
//! Each participant generates two ephemeral X25519 key pairs per round, plus
//! a random self-mask seed:
//!
//! - the **mask** key, whose pairwise agreements seed the additive masks and
//!   whose secret is Shamir-shared for dropout recovery;
//! - the **cipher** key, whose pairwise agreements encrypt those shares in
//!   transit through the coordinator;
//! - the **self-mask** seed, expanded into a mask only its owner adds. It is
//!   Shamir-shared too and committed to by hash at commit time.
//!
//! Keeping the keys separate means reconstructing a dropped participant's
//! mask key never exposes the shares other participants sent to it.

use rand::{CryptoRng, RngCore};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::ParticipantId;

const MASK_DOMAIN: &[u8] = b"qora-secagg/v1/mask";
const SHARE_DOMAIN: &[u8] = b"qora-secagg/v1/share";
const SELF_MASK_DOMAIN: &[u8] = b"qora-secagg/v1/self-mask";
const COMMIT_DOMAIN: &[u8] = b"qora-secagg/v1/self-mask-commit";

/// Public half of a participant's round keys, advertised at commit time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    /// X25519 public key for mask agreement.
    pub mask: [u8; 32],
    /// X25519 public key for share encryption.
    pub cipher: [u8; 32],
    /// Hash commitment to the self-mask seed.
    pub self_mask: [u8; 32],
}

/// Ephemeral secrets for one round. The X25519 secrets are zeroized on
/// drop and the self-mask seed is cleared.
pub struct RoundSecrets {
    round: u64,
    owner: ParticipantId,
    mask: StaticSecret,
    cipher: StaticSecret,
    self_mask: [u8; 32],
}

impl RoundSecrets {
    /// Generate fresh secrets for `owner` in `round`.
    pub fn generate<R: RngCore + CryptoRng>(owner: ParticipantId, round: u64, rng: &mut R) -> Self {
        let mut mask = [0u8; 32];
        let mut cipher = [0u8; 32];
        let mut self_mask = [0u8; 32];
        rng.fill_bytes(&mut mask);
        rng.fill_bytes(&mut cipher);
        rng.fill_bytes(&mut self_mask);
        Self {
            round,
            owner,
            mask: StaticSecret::from(mask),
            cipher: StaticSecret::from(cipher),
            self_mask,
        }
    }

    /// Public keys to advertise.
    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            mask: *PublicKey::from(&self.mask).as_bytes(),
            cipher: *PublicKey::from(&self.cipher).as_bytes(),
            self_mask: self_mask_commitment(&self.self_mask, self.round, &self.owner),
        }
    }

    /// Raw self-mask seed, input to Shamir sharing and mask expansion.
    pub(crate) fn self_mask_bytes(&self) -> [u8; 32] {
        self.self_mask
    }

    /// Raw mask secret, input to Shamir sharing.
    pub(crate) fn mask_secret_bytes(&self) -> [u8; 32] {
        self.mask.to_bytes()
    }

    pub(crate) fn mask_secret(&self) -> &StaticSecret {
        &self.mask
    }

    pub(crate) fn cipher_secret(&self) -> &StaticSecret {
        &self.cipher
    }
}

/// Mask seed shared by `me` and `peer` for `round`.
///
/// Symmetric: both sides of the pair derive the same seed.
pub fn mask_seed(
    secret: &StaticSecret,
    peer_mask_key: &[u8; 32],
    round: u64,
    me: &ParticipantId,
    peer: &ParticipantId,
) -> [u8; 32] {
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_mask_key));
    let (lo, hi) = if me <= peer { (me, peer) } else { (peer, me) };
    derive(MASK_DOMAIN, round, lo, hi, shared.as_bytes())
}

/// Keystream key for a share sent from `from` to `to`.
///
/// Directional, so the two shares exchanged within a pair never reuse a
/// keystream.
pub fn share_key(
    secret: &StaticSecret,
    peer_cipher_key: &[u8; 32],
    round: u64,
    from: &ParticipantId,
    to: &ParticipantId,
) -> [u8; 32] {
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_cipher_key));
    derive(SHARE_DOMAIN, round, from, to, shared.as_bytes())
}

fn derive(
    domain: &[u8],
    round: u64,
    first: &ParticipantId,
    second: &ParticipantId,
    shared: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(round.to_le_bytes());
    hasher.update((first.as_bytes().len() as u64).to_le_bytes());
    hasher.update(first.as_bytes());
    hasher.update((second.as_bytes().len() as u64).to_le_bytes());
    hasher.update(second.as_bytes());
    hasher.update(shared);
    hasher.finalize().into()
}

/// PRG seed of `owner`'s self-mask for `round`.
pub fn self_mask_seed(seed: &[u8; 32], round: u64, owner: &ParticipantId) -> [u8; 32] {
    derive(SELF_MASK_DOMAIN, round, owner, owner, seed)
}

/// Commitment to a self-mask seed, checked after reconstruction.
pub fn self_mask_commitment(seed: &[u8; 32], round: u64, owner: &ParticipantId) -> [u8; 32] {
    derive(COMMIT_DOMAIN, round, owner, owner, seed)
}

impl Drop for RoundSecrets {
    fn drop(&mut self) {
        self.self_mask.fill(0);
    }
}

/// XOR `data` with a ChaCha20 keystream keyed by `key`. Its own inverse.
pub fn apply_keystream(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
    let mut stream = vec![0u8; data.len()];
    ChaCha20Rng::from_seed(*key).fill_bytes(&mut stream);
    data.iter().zip(stream.iter()).map(|(d, k)| d ^ k).collect()
}
