//! Participant side of one secure-aggregation round.

use std::collections::BTreeMap;

use fixed::types::I32F32;
use rand::{CryptoRng, RngCore};

use super::keys::{
    apply_keystream, mask_seed, self_mask_seed, share_key, PublicKeys, RoundSecrets,
};
use super::masking::{apply_mask, expand_mask, MaskSign};
use super::shamir::{self, Share, SHARE_BYTES};
use super::{share_index, EncryptedShare, ShareBundle, ShareKind};
use crate::error::QoraError;
use crate::math::fixed_point::encode;
use crate::types::ParticipantId;

/// Per-round masking state held by a participant.
///
/// Dropped when the round closes, which zeroizes the round secrets.
pub struct MaskingClient {
    id: ParticipantId,
    round: u64,
    secrets: RoundSecrets,
    roster: BTreeMap<ParticipantId, PublicKeys>,
    /// Which secret has been revealed for each target, at most one each.
    revealed: BTreeMap<ParticipantId, ShareKind>,
}

impl MaskingClient {
    /// Fresh round keys for `id`.
    pub fn new<R: RngCore + CryptoRng>(id: ParticipantId, round: u64, rng: &mut R) -> Self {
        Self {
            secrets: RoundSecrets::generate(id.clone(), round, rng),
            id,
            round,
            roster: BTreeMap::new(),
            revealed: BTreeMap::new(),
        }
    }

    /// Owner of this client.
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Round the keys belong to.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Public keys to advertise at commit time.
    pub fn public_keys(&self) -> PublicKeys {
        self.secrets.public_keys()
    }

    /// Install the committed roster published by the coordinator.
    ///
    /// # Errors
    ///
    /// [`QoraError::InvalidConfig`] if the roster omits this participant,
    /// carries the wrong keys for it, or has fewer than two members.
    pub fn set_roster(&mut self, roster: &[(ParticipantId, PublicKeys)]) -> Result<(), QoraError> {
        let roster: BTreeMap<ParticipantId, PublicKeys> = roster.iter().cloned().collect();
        match roster.get(&self.id) {
            Some(keys) if *keys == self.public_keys() => {}
            Some(_) => {
                return Err(QoraError::InvalidConfig(format!(
                    "roster carries foreign keys for {}",
                    self.id
                )))
            }
            None => {
                return Err(QoraError::InvalidConfig(format!(
                    "{} is not in the round roster",
                    self.id
                )))
            }
        }
        if roster.len() < 2 {
            return Err(QoraError::InvalidConfig(
                "masking needs at least two participants".to_string(),
            ));
        }
        self.roster = roster;
        Ok(())
    }

    fn peers(&self) -> impl Iterator<Item = (&ParticipantId, &PublicKeys)> {
        self.roster.iter().filter(move |(id, _)| **id != self.id)
    }

    /// Shamir-share the mask key and the self-mask seed to every roster
    /// member, this one included. Each recipient gets both shares under one
    /// ciphertext; its own pair comes back through the coordinator only if
    /// its self-mask has to be removed.
    pub fn share_bundle<R: RngCore + CryptoRng>(
        &self,
        threshold: usize,
        rng: &mut R,
    ) -> Result<ShareBundle, QoraError> {
        if self.roster.is_empty() {
            return Err(QoraError::InvalidConfig(
                "roster must be set before sharing".to_string(),
            ));
        }
        let indices: Vec<u32> = (1..=self.roster.len())
            .map(|i| {
                u32::try_from(i)
                    .map_err(|_| QoraError::InvalidConfig("roster too large".to_string()))
            })
            .collect::<Result<_, _>>()?;

        let key_shares = shamir::split(&self.secrets.mask_secret_bytes(), &indices, threshold, rng)?;
        let self_shares = shamir::split(&self.secrets.self_mask_bytes(), &indices, threshold, rng)?;

        let sealed = self
            .roster
            .iter()
            .zip(key_shares.iter().zip(self_shares.iter()))
            .map(|((to, keys), (key_share, self_share))| {
                let key = share_key(
                    self.secrets.cipher_secret(),
                    &keys.cipher,
                    self.round,
                    &self.id,
                    to,
                );
                let mut plain = key_share.to_bytes();
                plain.extend_from_slice(&self_share.to_bytes());
                EncryptedShare {
                    to: to.clone(),
                    ciphertext: apply_keystream(&key, &plain),
                }
            })
            .collect();

        Ok(ShareBundle {
            round_number: self.round,
            from: self.id.clone(),
            shares: sealed,
        })
    }

    /// Encode `values`, add the self-mask and apply every pairwise mask.
    pub fn mask(&self, values: &[f64]) -> Result<Vec<I32F32>, QoraError> {
        if self.roster.is_empty() {
            return Err(QoraError::InvalidConfig(
                "roster must be set before masking".to_string(),
            ));
        }
        let mut masked = encode(values);
        let own = self_mask_seed(&self.secrets.self_mask_bytes(), self.round, &self.id);
        let own_mask = expand_mask(&own, masked.len());
        apply_mask(&mut masked, &own_mask, MaskSign::Add);
        for (peer, keys) in self.peers() {
            let seed = mask_seed(
                self.secrets.mask_secret(),
                &keys.mask,
                self.round,
                &self.id,
                peer,
            );
            let mask = expand_mask(&seed, masked.len());
            apply_mask(&mut masked, &mask, MaskSign::for_pair(&self.id, peer));
        }
        Ok(masked)
    }

    /// Decrypt the share of `target`'s `kind` secret held by this
    /// participant.
    ///
    /// At most one kind is ever revealed per target: the mask key of a
    /// submitter together with its self-mask seed would unmask its vector.
    /// The own mask key is never revealed, since this participant is alive.
    pub fn reveal_share(
        &mut self,
        target: &ParticipantId,
        kind: ShareKind,
        ciphertext: &[u8],
    ) -> Result<Share, QoraError> {
        if kind == ShareKind::MaskKey && *target == self.id {
            return Err(QoraError::InvalidShare(
                "refusing to reveal a share of own mask key".to_string(),
            ));
        }
        if let Some(&earlier) = self.revealed.get(target) {
            if earlier != kind {
                return Err(QoraError::InvalidShare(format!(
                    "already revealed the {:?} share of {}",
                    earlier, target
                )));
            }
        }
        let keys = self
            .roster
            .get(target)
            .ok_or_else(|| QoraError::UnknownParticipant(target.clone()))?;
        let key = share_key(
            self.secrets.cipher_secret(),
            &keys.cipher,
            self.round,
            target,
            &self.id,
        );
        let plain = apply_keystream(&key, ciphertext);
        if plain.len() != 2 * SHARE_BYTES {
            return Err(QoraError::InvalidShare(format!(
                "share pair from {} has {} bytes",
                target,
                plain.len()
            )));
        }
        let (key_bytes, self_bytes) = plain.split_at(SHARE_BYTES);
        let share = match kind {
            ShareKind::MaskKey => Share::from_bytes(key_bytes)?,
            ShareKind::SelfMask => Share::from_bytes(self_bytes)?,
        };

        let expected = share_index(self.roster.keys(), &self.id);
        if Some(share.index) != expected {
            return Err(QoraError::InvalidShare(format!(
                "share from {} addressed to index {}, expected {:?}",
                target, share.index, expected
            )));
        }
        self.revealed.insert(target.clone(), kind);
        Ok(share)
    }
}
