//! Coordinator side of one secure-aggregation round.
//!
//! Lifecycle: `new` → (`accept_shares` | `submit`)* → `close_collection` →
//! `recovery_requests` / `accept_recovered_share`* → `resolve`.
//!
//! Once collection closes no contribution is accepted, so the masked sum
//! can't change after reconstruction has started. Recovery asks for the
//! mask key of each dropout and the self-mask seed of each submitter, never
//! both for one participant.

use std::collections::{BTreeMap, BTreeSet};

use fixed::types::I32F32;
use ndarray::Array1;
use rayon::prelude::*;
use tracing::{debug, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use super::keys::{mask_seed, self_mask_commitment, self_mask_seed, PublicKeys};
use super::masking::{expand_mask, remove_mask, MaskSign};
use super::shamir::{self, Share, SHARE_BYTES};
use super::{
    max_threshold, share_index, ParticipantContribution, RecoveryRequest, ShareBundle, ShareKind,
};
use crate::error::QoraError;
use crate::math::fixed_point::{decode, wrapping_add_assign};
use crate::types::ParticipantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionPhase {
    Collecting,
    Resolving,
}

/// Who submitted and who dropped, fixed when collection closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Participants whose masked contribution arrived in time.
    pub submitters: Vec<ParticipantId>,
    /// Committed participants that did not submit.
    pub dropouts: Vec<ParticipantId>,
}

/// Result of a successful unmasking.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateOutcome {
    /// Exact sum of the submitters' (privatized) updates.
    pub sum: Array1<f64>,
    /// `sum / contributors.len()`.
    pub average: Array1<f64>,
    /// Participants included in the sum.
    pub contributors: Vec<ParticipantId>,
    /// Participants whose pairwise masks were reconstructed and removed.
    pub dropouts: Vec<ParticipantId>,
}

/// Collects masked contributions for one round and unmasks their sum.
pub struct SecureAggregationSession {
    round: u64,
    dimension: usize,
    threshold: usize,
    phase: SessionPhase,
    roster: BTreeMap<ParticipantId, PublicKeys>,
    /// sender -> recipient -> ciphertext
    shares: BTreeMap<ParticipantId, BTreeMap<ParticipantId, Vec<u8>>>,
    contributions: BTreeMap<ParticipantId, Vec<I32F32>>,
    dropouts: BTreeSet<ParticipantId>,
    /// target -> holder -> decrypted share of the target's
    /// [`ShareKind`] secret (mask key for dropouts, self-mask for submitters)
    recovered: BTreeMap<ParticipantId, BTreeMap<ParticipantId, Share>>,
}

impl SecureAggregationSession {
    /// Open a session over the committed roster.
    ///
    /// # Errors
    ///
    /// - [`QoraError::InsufficientParticipants`] for fewer than two members.
    /// - [`QoraError::InvalidConfig`] for a zero dimension or a threshold
    ///   outside `1..=max_threshold(roster.len())`.
    pub fn new(
        round: u64,
        dimension: usize,
        roster: BTreeMap<ParticipantId, PublicKeys>,
        threshold: usize,
    ) -> Result<Self, QoraError> {
        if roster.len() < 2 {
            return Err(QoraError::InsufficientParticipants {
                needed: 2,
                actual: roster.len(),
            });
        }
        if dimension == 0 {
            return Err(QoraError::InvalidConfig("model dimension must be positive".to_string()));
        }
        let max = max_threshold(roster.len());
        if threshold == 0 || threshold > max {
            return Err(QoraError::InvalidConfig(format!(
                "share threshold {} outside 1..={} for {} participants",
                threshold,
                max,
                roster.len()
            )));
        }
        Ok(Self {
            round,
            dimension,
            threshold,
            phase: SessionPhase::Collecting,
            roster,
            shares: BTreeMap::new(),
            contributions: BTreeMap::new(),
            dropouts: BTreeSet::new(),
            recovered: BTreeMap::new(),
        })
    }

    /// Round number.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Shares needed to reconstruct a dropout's secret.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Committed participants and their public keys.
    pub fn roster(&self) -> &BTreeMap<ParticipantId, PublicKeys> {
        &self.roster
    }

    /// Roster as a list, for broadcasting.
    pub fn roster_list(&self) -> Vec<(ParticipantId, PublicKeys)> {
        self.roster.iter().map(|(id, keys)| (id.clone(), *keys)).collect()
    }

    /// Number of contributions received so far.
    pub fn submitted_count(&self) -> usize {
        self.contributions.len()
    }

    /// Whether every committed participant has submitted.
    pub fn is_complete(&self) -> bool {
        self.contributions.len() == self.roster.len()
    }

    fn check_round(&self, round: u64) -> Result<(), QoraError> {
        if round != self.round {
            return Err(QoraError::RoundMismatch {
                expected: self.round,
                actual: round,
            });
        }
        Ok(())
    }

    fn check_member(&self, id: &ParticipantId) -> Result<(), QoraError> {
        if !self.roster.contains_key(id) {
            return Err(QoraError::UnknownParticipant(id.clone()));
        }
        Ok(())
    }

    /// Store a participant's encrypted shares for later relay.
    ///
    /// The bundle must hold exactly one share pair per roster member.
    pub fn accept_shares(&mut self, bundle: ShareBundle) -> Result<(), QoraError> {
        self.check_round(bundle.round_number)?;
        self.check_member(&bundle.from)?;
        if self.phase != SessionPhase::Collecting {
            return Err(QoraError::LateSubmission(bundle.from));
        }
        if self.shares.contains_key(&bundle.from) {
            return Err(QoraError::DuplicateSubmission(bundle.from));
        }

        let mut by_recipient = BTreeMap::new();
        for share in bundle.shares {
            self.check_member(&share.to)?;
            if share.ciphertext.len() != 2 * SHARE_BYTES {
                return Err(QoraError::InvalidShare(format!(
                    "{} sent a {}-byte share pair",
                    bundle.from,
                    share.ciphertext.len()
                )));
            }
            if by_recipient.insert(share.to.clone(), share.ciphertext).is_some() {
                return Err(QoraError::InvalidShare(format!(
                    "{} sent two shares to {}",
                    bundle.from, share.to
                )));
            }
        }
        if by_recipient.len() != self.roster.len() {
            return Err(QoraError::InvalidShare(format!(
                "{} shared with {} of {} members",
                bundle.from,
                by_recipient.len(),
                self.roster.len()
            )));
        }
        debug!(round = self.round, from = %bundle.from, shares = by_recipient.len(), "accepted share bundle");
        self.shares.insert(bundle.from, by_recipient);
        Ok(())
    }

    /// Accept one masked contribution.
    ///
    /// # Errors
    ///
    /// Wrong round, non-member, duplicate, wrong dimension,
    /// [`QoraError::InvalidShare`] if the sender has not shared its secrets
    /// yet (its self-mask could never be removed), or
    /// [`QoraError::LateSubmission`] once collection has closed.
    pub fn submit(&mut self, contribution: ParticipantContribution) -> Result<(), QoraError> {
        self.check_round(contribution.round_number)?;
        self.check_member(&contribution.participant_id)?;
        if self.phase != SessionPhase::Collecting {
            return Err(QoraError::LateSubmission(contribution.participant_id));
        }
        if !self.shares.contains_key(&contribution.participant_id) {
            return Err(QoraError::InvalidShare(format!(
                "contribution from {} before its share bundle",
                contribution.participant_id
            )));
        }
        if self.contributions.contains_key(&contribution.participant_id) {
            return Err(QoraError::DuplicateSubmission(contribution.participant_id));
        }
        if contribution.masked_contribution.len() != self.dimension {
            return Err(QoraError::DimensionMismatch {
                expected: self.dimension,
                actual: contribution.masked_contribution.len(),
            });
        }
        self.contributions
            .insert(contribution.participant_id, contribution.masked_contribution);
        Ok(())
    }

    /// Stop accepting contributions; everyone who has not submitted is a dropout.
    pub fn close_collection(&mut self) -> CollectionSummary {
        self.phase = SessionPhase::Resolving;
        self.dropouts = self
            .roster
            .keys()
            .filter(|id| !self.contributions.contains_key(*id))
            .cloned()
            .collect();
        CollectionSummary {
            submitters: self.contributions.keys().cloned().collect(),
            dropouts: self.dropouts.iter().cloned().collect(),
        }
    }

    /// The one secret of `target` that may be reconstructed, once
    /// collection has closed.
    pub fn recoverable_kind(&self, target: &ParticipantId) -> Option<ShareKind> {
        if self.phase != SessionPhase::Resolving || !self.roster.contains_key(target) {
            None
        } else if self.dropouts.contains(target) {
            Some(ShareKind::MaskKey)
        } else {
            Some(ShareKind::SelfMask)
        }
    }

    /// Share requests to fan out, grouped by surviving holder.
    ///
    /// Every survivor is asked for its share of each dropout's mask key and
    /// of each submitter's self-mask seed, its own included.
    pub fn recovery_requests(&self) -> BTreeMap<ParticipantId, Vec<RecoveryRequest>> {
        let mut requests: BTreeMap<ParticipantId, Vec<RecoveryRequest>> = BTreeMap::new();
        for target in self.roster.keys() {
            let Some(kind) = self.recoverable_kind(target) else {
                continue;
            };
            let Some(sent) = self.shares.get(target) else {
                warn!(round = self.round, participant = %target, "dropout never distributed shares");
                continue;
            };
            for (holder, ciphertext) in sent {
                if self.contributions.contains_key(holder) {
                    requests.entry(holder.clone()).or_default().push(RecoveryRequest {
                        target: target.clone(),
                        kind,
                        ciphertext: ciphertext.clone(),
                    });
                }
            }
        }
        requests
    }

    /// Record a survivor's decrypted share of `target`'s `kind` secret.
    ///
    /// # Errors
    ///
    /// [`QoraError::InvalidShare`] before collection closes, for the kind
    /// that must stay hidden, or for a share at the wrong index.
    pub fn accept_recovered_share(
        &mut self,
        holder: &ParticipantId,
        target: &ParticipantId,
        kind: ShareKind,
        share: Share,
    ) -> Result<(), QoraError> {
        if self.phase != SessionPhase::Resolving {
            return Err(QoraError::InvalidShare(
                "share recovery before collection closed".to_string(),
            ));
        }
        match self.recoverable_kind(target) {
            Some(allowed) if allowed == kind => {}
            Some(allowed) => {
                return Err(QoraError::InvalidShare(format!(
                    "{:?} share of {} refused, only {:?} is recoverable",
                    kind, target, allowed
                )))
            }
            None => return Err(QoraError::UnknownParticipant(target.clone())),
        }
        if !self.contributions.contains_key(holder) {
            return Err(QoraError::UnknownParticipant(holder.clone()));
        }
        let expected = share_index(self.roster.keys(), holder);
        if Some(share.index) != expected {
            return Err(QoraError::InvalidShare(format!(
                "{} returned share index {}, expected {:?}",
                holder, share.index, expected
            )));
        }
        let held = self.recovered.entry(target.clone()).or_default();
        if held.contains_key(holder) {
            return Err(QoraError::DuplicateSubmission(holder.clone()));
        }
        held.insert(holder.clone(), share);
        Ok(())
    }

    /// Whether every roster member has at least `threshold` recovered shares.
    pub fn recovery_complete(&self) -> bool {
        self.roster
            .keys()
            .all(|id| self.recovered_count(id) >= self.threshold)
    }

    /// Shares recovered so far for `target`.
    pub fn recovered_count(&self, target: &ParticipantId) -> usize {
        self.recovered.get(target).map_or(0, BTreeMap::len)
    }

    /// Remove dropout and self masks and unmask the average. Consumes the
    /// session, so contributions and mask material do not outlive the round.
    ///
    /// # Errors
    ///
    /// - [`QoraError::AggregationUnrecoverable`] if any participant has fewer
    ///   than `threshold` recovered shares, or its shares don't reconstruct
    ///   the key or commitment it advertised.
    /// - [`QoraError::InsufficientParticipants`] if nothing was submitted.
    pub fn resolve(mut self) -> Result<AggregateOutcome, QoraError> {
        if self.phase == SessionPhase::Collecting {
            self.close_collection();
        }
        if self.contributions.is_empty() {
            return Err(QoraError::InsufficientParticipants {
                needed: 1,
                actual: 0,
            });
        }

        let mut sum = vec![I32F32::ZERO; self.dimension];
        for masked in self.contributions.values() {
            wrapping_add_assign(&mut sum, masked);
        }

        let survivors: Vec<&ParticipantId> = self.contributions.keys().collect();
        for dropout in &self.dropouts {
            let secret = self.reconstruct_mask_key(dropout)?;
            let corrections: Vec<(MaskSign, Vec<I32F32>)> = survivors
                .par_iter()
                .map(|&survivor| {
                    let seed = mask_seed(
                        &secret,
                        &self.roster[survivor].mask,
                        self.round,
                        dropout,
                        survivor,
                    );
                    (
                        MaskSign::for_pair(survivor, dropout),
                        expand_mask(&seed, self.dimension),
                    )
                })
                .collect();
            for (sign, mask) in &corrections {
                remove_mask(&mut sum, mask, *sign);
            }
            debug!(round = self.round, participant = %dropout, "removed dropout masks");
        }

        let self_masks = survivors
            .par_iter()
            .map(|&survivor| {
                let seed = self.reconstruct_self_mask(survivor)?;
                Ok(expand_mask(
                    &self_mask_seed(&seed, self.round, survivor),
                    self.dimension,
                ))
            })
            .collect::<Result<Vec<Vec<I32F32>>, QoraError>>()?;
        for mask in &self_masks {
            remove_mask(&mut sum, mask, MaskSign::Add);
        }

        let contributors: Vec<ParticipantId> = self.contributions.keys().cloned().collect();
        let sum = Array1::from(decode(&sum));
        let average = &sum / contributors.len() as f64;
        Ok(AggregateOutcome {
            sum,
            average,
            contributors,
            dropouts: self.dropouts.iter().cloned().collect(),
        })
    }

    fn reconstruct(&self, target: &ParticipantId) -> Result<[u8; 32], QoraError> {
        let shares: Vec<Share> = self
            .recovered
            .get(target)
            .map(|held| held.values().cloned().collect())
            .unwrap_or_default();
        if shares.len() < self.threshold {
            return Err(self.unrecoverable(target, shares.len()));
        }
        shamir::reconstruct(&shares, self.threshold)
            .map_err(|_| self.unrecoverable(target, shares.len()))
    }

    fn unrecoverable(&self, target: &ParticipantId, available: usize) -> QoraError {
        QoraError::AggregationUnrecoverable {
            participant: target.clone(),
            available,
            threshold: self.threshold,
        }
    }

    fn reconstruct_mask_key(&self, dropout: &ParticipantId) -> Result<StaticSecret, QoraError> {
        let secret = StaticSecret::from(self.reconstruct(dropout)?);
        if PublicKey::from(&secret).as_bytes() != &self.roster[dropout].mask {
            warn!(round = self.round, participant = %dropout, "reconstructed key does not match advertised key");
            return Err(self.unrecoverable(dropout, self.recovered_count(dropout)));
        }
        Ok(secret)
    }

    fn reconstruct_self_mask(&self, survivor: &ParticipantId) -> Result<[u8; 32], QoraError> {
        let seed = self.reconstruct(survivor)?;
        if self_mask_commitment(&seed, self.round, survivor) != self.roster[survivor].self_mask {
            warn!(round = self.round, participant = %survivor, "reconstructed self-mask does not match commitment");
            return Err(self.unrecoverable(survivor, self.recovered_count(survivor)));
        }
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::fixed_point::encode;
    use crate::secagg::MaskingClient;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Round {
        clients: Vec<MaskingClient>,
        session: SecureAggregationSession,
        rng: StdRng,
    }

    fn setup(names: &[&str], threshold: usize, dimension: usize) -> Round {
        let mut rng = StdRng::seed_from_u64(99);
        let mut clients: Vec<MaskingClient> = names
            .iter()
            .map(|n| MaskingClient::new((*n).into(), 4, &mut rng))
            .collect();
        let roster: BTreeMap<ParticipantId, PublicKeys> = clients
            .iter()
            .map(|c| (c.id().clone(), c.public_keys()))
            .collect();
        let session = SecureAggregationSession::new(4, dimension, roster, threshold).unwrap();
        let list = session.roster_list();
        for c in clients.iter_mut() {
            c.set_roster(&list).unwrap();
        }
        Round {
            clients,
            session,
            rng,
        }
    }

    fn masked(round: &Round, idx: usize, values: &[f64]) -> ParticipantContribution {
        let c = &round.clients[idx];
        ParticipantContribution {
            round_number: 4,
            participant_id: c.id().clone(),
            masked_contribution: c.mask(values).unwrap(),
        }
    }

    fn contribute(round: &mut Round, idx: usize, values: &[f64]) {
        let contribution = masked(round, idx, values);
        round.session.submit(contribution).unwrap();
    }

    fn share(round: &mut Round, idx: usize) {
        let threshold = round.session.threshold();
        let bundle = round.clients[idx].share_bundle(threshold, &mut round.rng).unwrap();
        round.session.accept_shares(bundle).unwrap();
    }

    fn distribute_shares(round: &mut Round) {
        for i in 0..round.clients.len() {
            share(round, i);
        }
    }

    fn answer_requests(round: &mut Round) {
        let requests = round.session.recovery_requests();
        for (holder, asks) in requests {
            let client = round.clients.iter_mut().find(|c| *c.id() == holder).unwrap();
            for req in asks {
                let share = client.reveal_share(&req.target, req.kind, &req.ciphertext).unwrap();
                round
                    .session
                    .accept_recovered_share(&holder, &req.target, req.kind, share)
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_full_participation_unmasks_average() {
        let mut round = setup(&["a", "b", "c"], 2, 2);
        distribute_shares(&mut round);
        contribute(&mut round, 0, &[1.0, 2.0]);
        contribute(&mut round, 1, &[3.0, 4.0]);
        contribute(&mut round, 2, &[5.0, 6.0]);
        assert!(round.session.is_complete());

        let summary = round.session.close_collection();
        assert!(summary.dropouts.is_empty());
        let requests = round.session.recovery_requests();
        assert_eq!(requests.len(), 3);
        assert!(requests
            .values()
            .flatten()
            .all(|req| req.kind == ShareKind::SelfMask));

        answer_requests(&mut round);
        assert!(round.session.recovery_complete());
        let outcome = round.session.resolve().unwrap();
        assert!((outcome.average[0] - 3.0).abs() < 1e-9);
        assert!((outcome.average[1] - 4.0).abs() < 1e-9);
        assert_eq!(outcome.contributors.len(), 3);
    }

    #[test]
    fn test_single_dropout_recovered() {
        let mut round = setup(&["a", "b", "c", "d"], 3, 3);
        distribute_shares(&mut round);
        contribute(&mut round, 0, &[1.0, 0.0, -1.0]);
        contribute(&mut round, 1, &[2.0, 0.5, 0.0]);
        contribute(&mut round, 3, &[0.0, 0.5, 4.0]);

        let summary = round.session.close_collection();
        assert_eq!(summary.dropouts, vec![ParticipantId::from("c")]);
        assert_eq!(
            round.session.recoverable_kind(&"c".into()),
            Some(ShareKind::MaskKey)
        );
        answer_requests(&mut round);
        assert_eq!(round.session.recovered_count(&"c".into()), 3);
        assert_eq!(round.session.recovered_count(&"a".into()), 3);

        let outcome = round.session.resolve().unwrap();
        let expected = [3.0, 1.0, 3.0];
        for (got, want) in outcome.sum.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9, "{} vs {}", got, want);
        }
        assert!((outcome.average[0] - 1.0).abs() < 1e-9);
        assert_eq!(outcome.dropouts, vec![ParticipantId::from("c")]);
    }

    #[test]
    fn test_late_vector_hidden_after_mask_key_recovery() {
        let mut round = setup(&["a", "b", "c"], 2, 3);
        distribute_shares(&mut round);
        contribute(&mut round, 0, &[1.0, 1.0, 1.0]);
        contribute(&mut round, 1, &[2.0, 2.0, 2.0]);
        let input = [0.25, -3.0, 7.5];
        let late = masked(&round, 2, &input);

        round.session.close_collection();
        answer_requests(&mut round);

        // Everything the coordinator holds about c: its mask key
        let c: ParticipantId = "c".into();
        let shares: Vec<Share> = round.session.recovered[&c].values().cloned().collect();
        let key = StaticSecret::from(shamir::reconstruct(&shares, 2).unwrap());
        assert_eq!(PublicKey::from(&key).as_bytes(), &round.session.roster[&c].mask);

        let mut stripped = late.masked_contribution.clone();
        for peer in ["a", "b"] {
            let peer = ParticipantId::from(peer);
            let seed = mask_seed(&key, &round.session.roster[&peer].mask, 4, &c, &peer);
            remove_mask(&mut stripped, &expand_mask(&seed, 3), MaskSign::for_pair(&c, &peer));
        }
        assert_ne!(stripped, encode(&input));

        // and the self-mask shares stay out of reach
        let bundle_share = round.session.shares[&c][&ParticipantId::from("a")].clone();
        assert!(round.clients[0]
            .reveal_share(&c, ShareKind::SelfMask, &bundle_share)
            .is_err());
        let forged = round.session.recovered[&c][&ParticipantId::from("a")].clone();
        assert!(matches!(
            round.session.accept_recovered_share(&"a".into(), &c, ShareKind::SelfMask, forged),
            Err(QoraError::InvalidShare(_))
        ));
        assert!(matches!(
            round.session.submit(late),
            Err(QoraError::LateSubmission(_))
        ));

        let outcome = round.session.resolve().unwrap();
        assert!((outcome.sum[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_shares_unrecoverable() {
        let mut round = setup(&["a", "b", "c", "d"], 3, 1);
        distribute_shares(&mut round);
        contribute(&mut round, 0, &[1.0]);
        contribute(&mut round, 1, &[1.0]);

        round.session.close_collection();
        answer_requests(&mut round);
        assert!(!round.session.recovery_complete());

        match round.session.resolve() {
            Err(QoraError::AggregationUnrecoverable {
                participant,
                available,
                threshold,
            }) => {
                assert_eq!(participant, ParticipantId::from("c"));
                assert_eq!(available, 2);
                assert_eq!(threshold, 3);
            }
            other => panic!("expected unrecoverable, got {:?}", other.map(|o| o.sum)),
        }
    }

    #[test]
    fn test_dropout_without_shares_unrecoverable() {
        let mut round = setup(&["a", "b", "c"], 2, 1);
        share(&mut round, 0);
        share(&mut round, 1);
        contribute(&mut round, 0, &[1.0]);
        contribute(&mut round, 1, &[1.0]);
        round.session.close_collection();
        assert!(round
            .session
            .recovery_requests()
            .values()
            .flatten()
            .all(|req| req.target != ParticipantId::from("c")));
        answer_requests(&mut round);
        assert!(matches!(
            round.session.resolve(),
            Err(QoraError::AggregationUnrecoverable { available: 0, .. })
        ));
    }

    #[test]
    fn test_contribution_requires_share_bundle() {
        let mut round = setup(&["a", "b", "c"], 2, 1);
        let early = masked(&round, 0, &[1.0]);
        assert!(matches!(
            round.session.submit(early.clone()),
            Err(QoraError::InvalidShare(_))
        ));
        share(&mut round, 0);
        round.session.submit(early).unwrap();
    }

    #[test]
    fn test_bundle_must_cover_roster() {
        let mut round = setup(&["a", "b", "c"], 2, 1);
        let mut bundle = round.clients[0].share_bundle(2, &mut round.rng).unwrap();
        bundle.shares.pop();
        assert!(matches!(
            round.session.accept_shares(bundle),
            Err(QoraError::InvalidShare(_))
        ));
    }

    #[test]
    fn test_late_submission_rejected() {
        let mut round = setup(&["a", "b"], 2, 1);
        distribute_shares(&mut round);
        contribute(&mut round, 0, &[1.0]);
        round.session.close_collection();

        let late = masked(&round, 1, &[2.0]);
        assert!(matches!(
            round.session.submit(late),
            Err(QoraError::LateSubmission(_))
        ));
    }

    #[test]
    fn test_submission_validation() {
        let mut round = setup(&["a", "b"], 2, 2);
        distribute_shares(&mut round);
        let wrong_round = ParticipantContribution {
            round_number: 5,
            ..masked(&round, 0, &[0.0, 0.0])
        };
        let wrong_dim = masked(&round, 0, &[0.0]);
        let stranger = ParticipantContribution {
            round_number: 4,
            participant_id: "mallory".into(),
            masked_contribution: vec![I32F32::ZERO; 2],
        };
        assert!(matches!(
            round.session.submit(wrong_round),
            Err(QoraError::RoundMismatch { .. })
        ));
        assert!(matches!(
            round.session.submit(wrong_dim),
            Err(QoraError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            round.session.submit(stranger),
            Err(QoraError::UnknownParticipant(_))
        ));

        contribute(&mut round, 0, &[1.0, 1.0]);
        let again = masked(&round, 0, &[1.0, 1.0]);
        assert!(matches!(
            round.session.submit(again),
            Err(QoraError::DuplicateSubmission(_))
        ));
    }

    #[test]
    fn test_rejects_bad_construction() {
        let mut rng = StdRng::seed_from_u64(1);
        let clients: Vec<MaskingClient> = ["a", "b", "c"]
            .iter()
            .map(|n| MaskingClient::new((*n).into(), 1, &mut rng))
            .collect();
        let roster = |k: usize| -> BTreeMap<ParticipantId, PublicKeys> {
            clients[..k]
                .iter()
                .map(|c| (c.id().clone(), c.public_keys()))
                .collect()
        };
        assert!(SecureAggregationSession::new(1, 1, roster(1), 1).is_err());
        assert!(SecureAggregationSession::new(1, 1, roster(2), 3).is_err());
        assert!(SecureAggregationSession::new(1, 0, roster(2), 2).is_err());
        assert!(SecureAggregationSession::new(1, 1, roster(2), 2).is_ok());

        // three members must survive one dropout
        assert!(SecureAggregationSession::new(1, 1, roster(3), 3).is_err());
        assert!(SecureAggregationSession::new(1, 1, roster(3), 2).is_ok());
    }
}
