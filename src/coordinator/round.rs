//! The round driver.
//!
//! [`RoundCoordinator::run_round`] walks one round through
//! `Selecting → Broadcasting → Collecting → Aggregating → Committing`.
//! Global parameters, the accountant and the round log are touched only in
//! `Committing`; every earlier exit leaves them as they were.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::config::RoundConfig;
use super::messages::{CoordinatorMessage, ParticipantMessage, RoundAnnouncement};
use super::record::{AbortReason, RoundLog, RoundOutcome, RoundRecord};
use super::state::{CoordinatorStatus, RoundControl, RoundPhase};
use super::store::{CoordinatorSnapshot, SnapshotStore};
use crate::error::QoraError;
use crate::privacy::{NoiseScale, PrivacyBudgetAccountant, PrivacyReport};
use crate::secagg::{AggregateOutcome, PublicKeys, SecureAggregationSession};
use crate::types::{GlobalParameters, ParticipantId};

/// Buffer size of every coordinator and participant channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// Operator-facing summary of a coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorReport {
    /// Lifecycle status.
    pub status: CoordinatorStatus,
    /// Number the next round will take.
    pub next_round: u64,
    /// Connected participants.
    pub registered: usize,
    /// Version of the current global parameters.
    pub parameters_version: u64,
    /// Budget consumption.
    pub privacy: PrivacyReport,
    /// Per-round noise scale.
    pub noise: NoiseScale,
    /// Rounds in the log, including aborted ones.
    pub rounds_recorded: usize,
    /// Rounds that completed.
    pub rounds_completed: usize,
}

enum Ending {
    Unmasked(AggregateOutcome),
    Aborted(AbortReason),
}

#[derive(Default)]
struct Progress {
    selected: Vec<ParticipantId>,
    committed: Vec<ParticipantId>,
    dropouts: Vec<ParticipantId>,
}

/// Drives federated rounds over connected participants.
pub struct RoundCoordinator {
    config: RoundConfig,
    noise: NoiseScale,
    parameters: Arc<GlobalParameters>,
    accountant: PrivacyBudgetAccountant,
    log: RoundLog,
    next_round: u64,
    halted: bool,
    stopped: bool,
    control: RoundControl,
    participants: BTreeMap<ParticipantId, mpsc::Sender<CoordinatorMessage>>,
    inbox_tx: mpsc::Sender<ParticipantMessage>,
    inbox: mpsc::Receiver<ParticipantMessage>,
    rng: StdRng,
    store: Option<SnapshotStore>,
    announcement: Option<RoundAnnouncement>,
}

impl RoundCoordinator {
    /// Create a coordinator starting from `initial` parameters.
    ///
    /// # Errors
    ///
    /// Configuration and privacy-parameter errors from
    /// [`RoundConfig::validate`], or [`QoraError::InvalidConfig`] for an
    /// empty parameter vector.
    pub fn new(config: RoundConfig, initial: GlobalParameters) -> Result<Self, QoraError> {
        let accountant = PrivacyBudgetAccountant::new(
            config.epsilon_ceiling,
            config.delta_ceiling,
            config.composition,
        )?;
        Self::build(config, initial, accountant)
    }

    fn build(
        config: RoundConfig,
        parameters: GlobalParameters,
        accountant: PrivacyBudgetAccountant,
    ) -> Result<Self, QoraError> {
        let noise = config.validate()?;
        if parameters.dimension() == 0 {
            return Err(QoraError::InvalidConfig(
                "global parameters must not be empty".to_string(),
            ));
        }
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let (inbox_tx, inbox) = mpsc::channel(CHANNEL_CAPACITY);

        Ok(Self {
            config,
            noise,
            parameters: Arc::new(parameters),
            accountant,
            log: RoundLog::new(),
            next_round: 1,
            halted: false,
            stopped: false,
            control: RoundControl::new(),
            participants: BTreeMap::new(),
            inbox_tx,
            inbox,
            rng,
            store: None,
            announcement: None,
        })
    }

    /// Persist every round to `store`, starting with a snapshot of the
    /// current state.
    pub fn with_store(mut self, store: SnapshotStore) -> Result<Self, QoraError> {
        store.save_snapshot(&self.snapshot())?;
        self.store = Some(store);
        Ok(self)
    }

    /// Rebuild a stopped coordinator from its store.
    ///
    /// The budget ceiling and composition rule come from the snapshot, not
    /// from `config`: the guarantee declared when the budget was first spent
    /// can't be loosened by a restart. A halted coordinator resumes halted.
    ///
    /// Completed rounds in the log that the snapshot has not charged yet are
    /// charged again, and a trailing `BudgetExhausted` record halts.
    pub fn resume(config: RoundConfig, store: SnapshotStore) -> Result<Self, QoraError> {
        let snapshot = store.load_snapshot()?.ok_or_else(|| {
            QoraError::Persistence(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no coordinator snapshot in {}", store.dir().display()),
            ))
        })?;
        let records = store.load_records()?;

        let state = snapshot.accountant.state();
        if state.epsilon_max() != config.epsilon_ceiling || state.delta_max() != config.delta_ceiling
        {
            warn!(
                epsilon_max = state.epsilon_max(),
                delta_max = state.delta_max(),
                "configured ceiling differs from persisted budget; keeping persisted"
            );
        }

        let mut coordinator = Self::build(config, snapshot.parameters, snapshot.accountant)?;
        let after_log = records.last().map_or(1, |r| r.round_number + 1);
        coordinator.next_round = snapshot.next_round.max(after_log);
        coordinator.halted = snapshot.halted
            || records
                .last()
                .is_some_and(|r| r.outcome == RoundOutcome::BudgetExhausted);
        coordinator.replay_charges(&records);
        coordinator.log = RoundLog::from_records(records);
        if coordinator.halted && !snapshot.halted {
            warn!("round log ends in budget exhaustion; resuming halted");
        }
        store.save_snapshot(&coordinator.snapshot())?;
        coordinator.store = Some(store);

        info!(
            next_round = coordinator.next_round,
            rounds = coordinator.log.len(),
            halted = coordinator.halted,
            "coordinator resumed"
        );
        Ok(coordinator)
    }

    /// Charge completed rounds the snapshot missed, oldest first.
    fn replay_charges(&mut self, records: &[RoundRecord]) {
        let completed: Vec<&RoundRecord> = records
            .iter()
            .filter(|r| r.outcome == RoundOutcome::Completed)
            .collect();
        let charged = self.accountant.state().history().len();
        let Some(missed) = completed.get(charged..).filter(|m| !m.is_empty()) else {
            return;
        };
        warn!(
            rounds = missed.len(),
            "snapshot behind the round log; replaying charges"
        );
        for record in missed {
            if record.parameters_version > self.parameters.round_number() {
                warn!(
                    round = record.round_number,
                    "update of this round is not in the snapshot; parameters stay at version {}",
                    self.parameters.round_number()
                );
            }
            if let Err(e) = self
                .accountant
                .charge(record.epsilon_charged, record.delta_charged)
            {
                error!(round = record.round_number, error = %e, "replayed charge refused; halting");
                self.halted = true;
                return;
            }
        }
    }

    /// Register a participant and return its ends of the channel pair.
    ///
    /// Connecting an id again replaces its previous channel.
    pub fn connect(
        &mut self,
        id: ParticipantId,
    ) -> (
        mpsc::Receiver<CoordinatorMessage>,
        mpsc::Sender<ParticipantMessage>,
    ) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        if self.participants.insert(id.clone(), tx).is_some() {
            info!(participant = %id, "participant reconnected");
        } else {
            debug!(participant = %id, "participant registered");
        }
        (rx, self.inbox_tx.clone())
    }

    /// Forget a participant. Returns whether it was connected.
    pub fn disconnect(&mut self, id: &ParticipantId) -> bool {
        self.participants.remove(id).is_some()
    }

    /// Handle for watching the phase and cancelling rounds.
    pub fn control(&self) -> RoundControl {
        self.control.clone()
    }

    /// Lifecycle status.
    pub fn status(&self) -> CoordinatorStatus {
        if self.stopped {
            CoordinatorStatus::Stopped
        } else if self.halted {
            CoordinatorStatus::Halted
        } else {
            match self.control.phase() {
                RoundPhase::Idle => CoordinatorStatus::Idle,
                phase => CoordinatorStatus::Running(phase),
            }
        }
    }

    /// Current global parameters.
    pub fn global_parameters(&self) -> Arc<GlobalParameters> {
        Arc::clone(&self.parameters)
    }

    /// Privacy accountant (read-only).
    pub fn accountant(&self) -> &PrivacyBudgetAccountant {
        &self.accountant
    }

    /// Every recorded round, oldest first.
    pub fn records(&self) -> &[RoundRecord] {
        self.log.records()
    }

    /// Configuration in use.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Per-round noise scale.
    pub fn noise_scale(&self) -> NoiseScale {
        self.noise
    }

    /// Number the next round will take.
    pub fn next_round(&self) -> u64 {
        self.next_round
    }

    /// Summary for operators.
    pub fn report(&self) -> CoordinatorReport {
        CoordinatorReport {
            status: self.status(),
            next_round: self.next_round,
            registered: self.participants.len(),
            parameters_version: self.parameters.round_number(),
            privacy: self.accountant.report(),
            noise: self.noise,
            rounds_recorded: self.log.len(),
            rounds_completed: self.log.completed(),
        }
    }

    /// Run one round to its end.
    ///
    /// Completed and aborted rounds both return `Ok` with their record; an
    /// abort charges nothing and changes no parameters.
    ///
    /// # Errors
    ///
    /// - [`QoraError::BudgetExhausted`] if the round's charge was refused. The
    ///   update is discarded and the coordinator is halted.
    /// - [`QoraError::Halted`] or [`QoraError::Stopped`] if no round may run.
    pub async fn run_round(&mut self) -> Result<RoundRecord, QoraError> {
        if self.stopped {
            return Err(QoraError::Stopped);
        }
        if self.halted {
            return Err(QoraError::Halted);
        }

        let round = self.next_round;
        self.next_round += 1;
        self.control.begin();
        info!(round, registered = self.participants.len(), "round started");

        let mut progress = Progress::default();
        let result = match self.drive(round, &mut progress).await {
            Ok(ending) => self.conclude(round, &progress, ending),
            Err(e) => {
                error!(round, error = %e, "round failed");
                self.control.abort();
                Err(e)
            }
        };
        self.announcement = None;

        if let Some(outcome) = self
            .log
            .last()
            .filter(|r| r.round_number == round)
            .map(|r| r.outcome)
        {
            for id in &progress.selected {
                self.send(
                    id,
                    CoordinatorMessage::RoundClosed {
                        round_number: round,
                        outcome,
                    },
                );
            }
        }
        self.control.finish();
        result
    }

    /// Shut down: notify participants and persist the current state.
    pub fn stop(&mut self) -> Result<(), QoraError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        for id in self.participants.keys() {
            self.send(id, CoordinatorMessage::Shutdown);
        }
        if let Some(store) = &self.store {
            store.save_snapshot(&self.snapshot())?;
        }
        info!(next_round = self.next_round, "coordinator stopped");
        Ok(())
    }

    async fn drive(&mut self, round: u64, progress: &mut Progress) -> Result<Ending, QoraError> {
        let control = self.control.clone();
        let min_clients = self.config.min_clients;

        // Selecting
        let selected = self.select();
        progress.selected = selected.iter().cloned().collect();
        if selected.len() < min_clients {
            warn!(round, available = selected.len(), needed = min_clients, "not enough participants");
            return Ok(Ending::Aborted(AbortReason::InsufficientParticipants));
        }
        for id in &selected {
            self.send(id, CoordinatorMessage::CommitRequest { round_number: round });
        }
        let Some(committed) = self.collect_commits(round, &selected, &control).await else {
            return Ok(Ending::Aborted(AbortReason::Cancelled));
        };
        progress.committed = committed.keys().cloned().collect();
        if committed.len() < min_clients {
            warn!(round, committed = committed.len(), needed = min_clients, "not enough commits");
            return Ok(Ending::Aborted(AbortReason::InsufficientParticipants));
        }

        // Broadcasting
        if !control.advance(RoundPhase::Broadcasting) {
            return Ok(Ending::Aborted(AbortReason::Cancelled));
        }
        let threshold = self.config.threshold_for(committed.len());
        let mut session =
            SecureAggregationSession::new(round, self.parameters.dimension(), committed, threshold)?;
        let timeout = self.config.round_timeout();
        let deadline = Instant::now() + timeout;
        self.announcement = Some(RoundAnnouncement {
            round_number: round,
            global_parameters: Arc::clone(&self.parameters),
            clipping_policy: self.config.clipping_policy(),
            noise: self.noise,
            deadline_unix_ms: unix_ms_after(timeout),
            roster: session.roster_list(),
            threshold,
        });
        for id in &progress.committed {
            self.republish(id);
        }
        info!(round, participants = progress.committed.len(), threshold, "round announced");

        // Collecting
        if !control.advance(RoundPhase::Collecting) {
            return Ok(Ending::Aborted(AbortReason::Cancelled));
        }
        if !self.collect_contributions(&mut session, deadline, &control).await {
            return Ok(Ending::Aborted(AbortReason::Cancelled));
        }
        let summary = session.close_collection();
        progress.dropouts = summary.dropouts.clone();
        if summary.submitters.len() < min_clients {
            warn!(
                round,
                submitted = summary.submitters.len(),
                needed = min_clients,
                "not enough contributions"
            );
            return Ok(Ending::Aborted(AbortReason::InsufficientParticipants));
        }

        // Aggregating
        if !control.advance(RoundPhase::Aggregating) {
            return Ok(Ending::Aborted(AbortReason::Cancelled));
        }
        self.recover_shares(&mut session, &summary.dropouts).await;
        match session.resolve() {
            Ok(outcome) => Ok(Ending::Unmasked(outcome)),
            Err(QoraError::AggregationUnrecoverable {
                participant,
                available,
                threshold,
            }) => {
                warn!(round, participant = %participant, available, threshold, "dropout mask unrecoverable");
                Ok(Ending::Aborted(AbortReason::AggregationUnrecoverable))
            }
            Err(e) => Err(e),
        }
    }

    fn select(&mut self) -> BTreeSet<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .participants
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        if let Some(k) = self.config.clients_per_round {
            if k < ids.len() {
                ids.shuffle(&mut self.rng);
                ids.truncate(k);
            }
        }
        ids.into_iter().collect()
    }

    async fn collect_commits(
        &mut self,
        round: u64,
        selected: &BTreeSet<ParticipantId>,
        control: &RoundControl,
    ) -> Option<BTreeMap<ParticipantId, PublicKeys>> {
        let mut committed = BTreeMap::new();
        let sleep = sleep_until(Instant::now() + self.config.commit_timeout());
        tokio::pin!(sleep);

        while committed.len() < selected.len() {
            tokio::select! {
                biased;
                _ = control.cancelled() => return None,
                _ = &mut sleep => {
                    warn!(round, committed = committed.len(), selected = selected.len(), "commit deadline passed");
                    break;
                }
                msg = self.inbox.recv() => match msg {
                    Some(ParticipantMessage::Commit { round_number, participant_id, public_keys })
                        if round_number == round && selected.contains(&participant_id) =>
                    {
                        debug!(round, participant = %participant_id, "commit received");
                        committed.insert(participant_id, public_keys);
                    }
                    Some(other) => discard(round, &other),
                    None => break,
                }
            }
        }
        Some(committed)
    }

    /// Returns false if the round was cancelled.
    async fn collect_contributions(
        &mut self,
        session: &mut SecureAggregationSession,
        deadline: Instant,
        control: &RoundControl,
    ) -> bool {
        let round = session.round();
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);

        while !session.is_complete() {
            tokio::select! {
                biased;
                _ = control.cancelled() => return false,
                _ = &mut sleep => {
                    warn!(
                        round,
                        submitted = session.submitted_count(),
                        expected = session.roster().len(),
                        "collection deadline passed"
                    );
                    break;
                }
                msg = self.inbox.recv() => match msg {
                    Some(msg) if msg.round_number() != round => discard(round, &msg),
                    Some(ParticipantMessage::ShareBundle(bundle)) => {
                        let from = bundle.from.clone();
                        if let Err(e) = session.accept_shares(bundle) {
                            warn!(round, participant = %from, error = %e, "share bundle rejected");
                        }
                    }
                    Some(ParticipantMessage::MaskedContribution(contribution)) => {
                        let from = contribution.participant_id.clone();
                        match session.submit(contribution) {
                            Ok(()) => debug!(round, participant = %from, "contribution accepted"),
                            Err(e) => warn!(round, participant = %from, error = %e, "contribution rejected"),
                        }
                    }
                    Some(ParticipantMessage::Commit { participant_id, .. })
                        if session.roster().contains_key(&participant_id) =>
                    {
                        debug!(round, participant = %participant_id, "republishing announcement");
                        self.republish(&participant_id);
                    }
                    Some(other) => discard(round, &other),
                    None => break,
                }
            }
        }
        true
    }

    async fn recover_shares(
        &mut self,
        session: &mut SecureAggregationSession,
        dropouts: &[ParticipantId],
    ) {
        let round = session.round();
        let requests = session.recovery_requests();
        let expected: usize = requests.values().map(Vec::len).sum();
        info!(round, dropouts = dropouts.len(), requests = expected, "recovering masks");

        for (holder, asks) in requests {
            self.send(
                &holder,
                CoordinatorMessage::ShareRequest {
                    round_number: round,
                    requests: asks,
                },
            );
        }

        let sleep = sleep_until(Instant::now() + self.config.share_recovery_timeout());
        tokio::pin!(sleep);
        let mut answered = 0;
        while answered < expected && !session.recovery_complete() {
            tokio::select! {
                biased;
                _ = &mut sleep => {
                    warn!(round, answered, expected, "share recovery deadline passed");
                    break;
                }
                msg = self.inbox.recv() => match msg {
                    Some(ParticipantMessage::SeedShare { round_number, participant_id, seed_share_for, kind, share })
                        if round_number == round =>
                    {
                        answered += 1;
                        if let Err(e) = session.accept_recovered_share(&participant_id, &seed_share_for, kind, share) {
                            warn!(round, participant = %participant_id, error = %e, "share rejected");
                        }
                    }
                    Some(other) => discard(round, &other),
                    None => break,
                }
            }
        }
    }

    fn conclude(
        &mut self,
        round: u64,
        progress: &Progress,
        ending: Ending,
    ) -> Result<RoundRecord, QoraError> {
        let outcome = match ending {
            Ending::Aborted(reason) => {
                self.control.abort();
                warn!(round, reason = ?reason, "round aborted");
                let record = self.record(round, progress, RoundOutcome::Aborted(reason), (0.0, 0.0));
                return self.settle(record);
            }
            Ending::Unmasked(outcome) => outcome,
        };

        self.control.enter(RoundPhase::Committing);
        let next = self.parameters.with_update(
            &outcome.average,
            self.config.server_learning_rate,
            round,
        )?;
        let (epsilon, delta) = self.config.round_charge();

        match self.accountant.charge(epsilon, delta) {
            Ok(state) => {
                self.parameters = Arc::new(next);
                info!(
                    round,
                    contributors = outcome.contributors.len(),
                    dropouts = outcome.dropouts.len(),
                    epsilon = state.epsilon_spent(),
                    delta = state.delta_spent(),
                    "round committed"
                );
                let record = self.record(round, progress, RoundOutcome::Completed, (epsilon, delta));
                self.settle(record)
            }
            Err(err @ QoraError::BudgetExhausted { .. }) => {
                error!(round, error = %err, "privacy budget exhausted; update discarded, halting");
                self.halted = true;
                let record = self.record(round, progress, RoundOutcome::BudgetExhausted, (0.0, 0.0));
                self.settle(record)?;
                Err(err)
            }
            Err(e) => Err(e),
        }
    }

    fn record(
        &self,
        round: u64,
        progress: &Progress,
        outcome: RoundOutcome,
        (epsilon_charged, delta_charged): (f64, f64),
    ) -> RoundRecord {
        RoundRecord {
            round_number: round,
            participants: progress.committed.clone(),
            dropouts: progress.dropouts.clone(),
            noise_scale: self.noise,
            epsilon_charged,
            delta_charged,
            parameters_version: self.parameters.round_number(),
            outcome,
        }
    }

    // The snapshot is the commit point: a crash before the append loses
    // only the log line, never a charge.
    fn settle(&mut self, record: RoundRecord) -> Result<RoundRecord, QoraError> {
        self.log.push(record.clone());
        if let Some(store) = &self.store {
            store.save_snapshot(&self.snapshot())?;
            store.append_record(&record)?;
        }
        Ok(record)
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            parameters: (*self.parameters).clone(),
            accountant: self.accountant.clone(),
            next_round: self.next_round,
            halted: self.halted,
        }
    }

    fn republish(&self, id: &ParticipantId) -> bool {
        match &self.announcement {
            Some(announcement) => self.send(
                id,
                CoordinatorMessage::RoundAnnouncement(announcement.clone()),
            ),
            None => false,
        }
    }

    fn send(&self, id: &ParticipantId, msg: CoordinatorMessage) -> bool {
        match self.participants.get(id) {
            Some(tx) => match tx.try_send(msg) {
                Ok(()) => true,
                Err(e) => {
                    warn!(participant = %id, error = %e, "message not delivered");
                    false
                }
            },
            None => {
                warn!(participant = %id, "participant not connected");
                false
            }
        }
    }
}

fn discard(round: u64, msg: &ParticipantMessage) {
    warn!(
        round,
        message_round = msg.round_number(),
        kind = msg.kind(),
        from = %msg.sender(),
        "discarding unexpected message"
    );
}

fn unix_ms_after(timeout: Duration) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from((now + timeout).as_millis()).unwrap_or(u64::MAX)
}
