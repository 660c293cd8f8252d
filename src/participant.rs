//! Participant side of the round protocol.
//!
//! A [`Participant`] wraps a [`LocalTrainer`] and answers coordinator
//! messages. [`Participant::handle`] is the synchronous core and
//! [`Participant::run`] drives it over a channel pair as an independent task.

use ndarray::Array1;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::coordinator::{CoordinatorMessage, ParticipantMessage, RoundAnnouncement};
use crate::error::QoraError;
use crate::privacy::clip;
use crate::secagg::{MaskingClient, ParticipantContribution, RecoveryRequest};
use crate::types::{GlobalParameters, ParticipantId};

/// Produces a local update from the current global parameters.
///
/// The model and its training loop live outside this crate; this is the only
/// thing the protocol needs from them.
pub trait LocalTrainer: Send {
    /// Compute an update vector with the same dimension as `parameters`.
    fn compute_update(&mut self, parameters: &GlobalParameters) -> Result<Vec<f64>, QoraError>;
}

impl<F> LocalTrainer for F
where
    F: FnMut(&GlobalParameters) -> Result<Vec<f64>, QoraError> + Send,
{
    fn compute_update(&mut self, parameters: &GlobalParameters) -> Result<Vec<f64>, QoraError> {
        self(parameters)
    }
}

/// A federated-learning participant.
pub struct Participant<T> {
    id: ParticipantId,
    trainer: T,
    rng: StdRng,
    round: Option<MaskingClient>,
}

impl<T: LocalTrainer> Participant<T> {
    /// Participant `id` drawing keys and noise from `rng`.
    pub fn new(id: ParticipantId, trainer: T, rng: StdRng) -> Self {
        Self {
            id,
            trainer,
            rng,
            round: None,
        }
    }

    /// Participant id.
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Round this participant currently holds secrets for.
    pub fn active_round(&self) -> Option<u64> {
        self.round.as_ref().map(MaskingClient::round)
    }

    /// React to one coordinator message.
    pub fn handle(&mut self, msg: CoordinatorMessage) -> Vec<ParticipantMessage> {
        match msg {
            CoordinatorMessage::CommitRequest { round_number } => {
                let client = MaskingClient::new(self.id.clone(), round_number, &mut self.rng);
                let public_keys = client.public_keys();
                self.round = Some(client);
                debug!(participant = %self.id, round = round_number, "committing");
                vec![ParticipantMessage::Commit {
                    round_number,
                    participant_id: self.id.clone(),
                    public_keys,
                }]
            }
            CoordinatorMessage::RoundAnnouncement(announcement) => self.contribute(&announcement),
            CoordinatorMessage::ShareRequest {
                round_number,
                requests,
            } => self.reveal(round_number, requests),
            CoordinatorMessage::RoundClosed { round_number, outcome } => {
                if self.active_round() == Some(round_number) {
                    debug!(participant = %self.id, round = round_number, outcome = ?outcome, "round closed");
                    self.round = None;
                }
                Vec::new()
            }
            CoordinatorMessage::Shutdown => {
                self.round = None;
                Vec::new()
            }
        }
    }

    fn contribute(&mut self, announcement: &RoundAnnouncement) -> Vec<ParticipantMessage> {
        let round = announcement.round_number;
        let Some(client) = self.round.as_mut().filter(|c| c.round() == round) else {
            warn!(participant = %self.id, round, "announcement for a round not committed to");
            return Vec::new();
        };
        if let Err(e) = client.set_roster(&announcement.roster) {
            warn!(participant = %self.id, round, error = %e, "roster rejected");
            return Vec::new();
        }
        let bundle = match client.share_bundle(announcement.threshold, &mut self.rng) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(participant = %self.id, round, error = %e, "share distribution failed");
                return Vec::new();
            }
        };
        let mut out = vec![ParticipantMessage::ShareBundle(bundle)];

        let params = &announcement.global_parameters;
        let update = match self.trainer.compute_update(params) {
            Ok(update) if update.len() == params.dimension() => update,
            Ok(update) => {
                warn!(
                    participant = %self.id,
                    round,
                    expected = params.dimension(),
                    actual = update.len(),
                    "update has wrong dimension; dropping out"
                );
                return out;
            }
            Err(e) => {
                warn!(participant = %self.id, round, error = %e, "local training failed; dropping out");
                return out;
            }
        };

        let privatized = clip::apply(
            &Array1::from(update),
            &announcement.clipping_policy,
            &announcement.noise,
            &mut self.rng,
        );
        match client.mask(&privatized.to_vec()) {
            Ok(masked_contribution) => {
                out.push(ParticipantMessage::MaskedContribution(ParticipantContribution {
                    round_number: round,
                    participant_id: self.id.clone(),
                    masked_contribution,
                }));
            }
            Err(e) => warn!(participant = %self.id, round, error = %e, "masking failed"),
        }
        out
    }

    fn reveal(&mut self, round: u64, requests: Vec<RecoveryRequest>) -> Vec<ParticipantMessage> {
        let Some(client) = self.round.as_mut().filter(|c| c.round() == round) else {
            warn!(participant = %self.id, round, "share request for an unknown round");
            return Vec::new();
        };
        let mut out = Vec::with_capacity(requests.len());
        for req in requests {
            match client.reveal_share(&req.target, req.kind, &req.ciphertext) {
                Ok(share) => out.push(ParticipantMessage::SeedShare {
                    round_number: round,
                    participant_id: self.id.clone(),
                    seed_share_for: req.target,
                    kind: req.kind,
                    share,
                }),
                Err(e) => {
                    warn!(participant = %self.id, round, target = %req.target, kind = ?req.kind, error = %e, "share not revealed");
                }
            }
        }
        out
    }

    /// Serve the coordinator until it shuts down or either channel closes.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<CoordinatorMessage>,
        outbox: mpsc::Sender<ParticipantMessage>,
    ) {
        while let Some(msg) = inbox.recv().await {
            let shutdown = matches!(msg, CoordinatorMessage::Shutdown);
            for reply in self.handle(msg) {
                if outbox.send(reply).await.is_err() {
                    debug!(participant = %self.id, "coordinator gone");
                    return;
                }
            }
            if shutdown {
                debug!(participant = %self.id, "shutdown received");
                return;
            }
        }
    }
}
