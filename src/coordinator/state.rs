//! Round phases and the operator's cancellation handle.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::QoraError;

/// Phase of the round currently in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No round running
    Idle,
    /// Sampling participants and collecting commits
    Selecting,
    /// Publishing the round announcement
    Broadcasting,
    /// Accepting shares and masked contributions
    Collecting,
    /// Recovering dropout masks and unmasking
    Aggregating,
    /// Charging the budget and applying the update
    Committing,
    /// Round ended without an update
    Aborted,
}

impl RoundPhase {
    /// Whether an operator may still cancel the round.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            RoundPhase::Selecting | RoundPhase::Broadcasting | RoundPhase::Collecting
        )
    }
}

/// Coordinator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "phase", rename_all = "snake_case")]
pub enum CoordinatorStatus {
    /// Ready to start a round
    Idle,
    /// A round is in progress
    Running(RoundPhase),
    /// Budget exhausted; read-only from now on
    Halted,
    /// Shut down by the operator; resumable from the persisted store
    Stopped,
}

#[derive(Debug)]
struct ControlState {
    phase: RoundPhase,
    cancel_requested: bool,
}

#[derive(Debug)]
struct ControlInner {
    state: Mutex<ControlState>,
    notify: Notify,
}

/// Shared handle for observing the round phase and requesting cancellation.
///
/// Cloning is cheap; every clone refers to the same coordinator.
#[derive(Clone, Debug)]
pub struct RoundControl {
    inner: Arc<ControlInner>,
}

impl Default for RoundControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundControl {
    /// Handle for a coordinator with no round running.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(ControlState {
                    phase: RoundPhase::Idle,
                    cancel_requested: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.inner.state.lock().phase
    }

    /// Ask the running round to abort.
    ///
    /// # Errors
    ///
    /// - [`QoraError::CancellationRejected`] once the round has reached
    ///   aggregation, which must run to completion.
    /// - [`QoraError::NoActiveRound`] if nothing is running.
    pub fn request_cancel(&self) -> Result<(), QoraError> {
        let mut state = self.inner.state.lock();
        let phase = state.phase;
        match phase {
            _ if phase.is_cancellable() => {
                state.cancel_requested = true;
                drop(state);
                self.inner.notify.notify_one();
                Ok(())
            }
            RoundPhase::Aggregating | RoundPhase::Committing => {
                Err(QoraError::CancellationRejected(phase))
            }
            _ => Err(QoraError::NoActiveRound),
        }
    }

    /// Whether cancellation has been requested for the current round.
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.state.lock().cancel_requested
    }

    /// Resolves once cancellation is requested.
    pub(crate) async fn cancelled(&self) {
        loop {
            if self.is_cancel_requested() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }

    pub(crate) fn begin(&self) {
        let mut state = self.inner.state.lock();
        state.phase = RoundPhase::Selecting;
        state.cancel_requested = false;
    }

    /// Move to `next` unless cancellation got there first. Checking and
    /// moving happen under one lock, so a cancel either lands before the
    /// transition or is judged against the new phase.
    pub(crate) fn advance(&self, next: RoundPhase) -> bool {
        let mut state = self.inner.state.lock();
        if state.cancel_requested {
            return false;
        }
        state.phase = next;
        true
    }

    /// Unconditional move, for phases that cancellation can no longer reach.
    pub(crate) fn enter(&self, next: RoundPhase) {
        self.inner.state.lock().phase = next;
    }

    pub(crate) fn abort(&self) {
        self.inner.state.lock().phase = RoundPhase::Aborted;
    }

    pub(crate) fn finish(&self) {
        let mut state = self.inner.state.lock();
        state.phase = RoundPhase::Idle;
        state.cancel_requested = false;
    }
}
