//! Round coordination: the state machine that ties participant selection,
//! secure aggregation and privacy accounting together.
//!
//! ```text
//! Idle → Selecting → Broadcasting → Collecting → Aggregating → Committing → Idle
//!            │            │              │             │
//!            └────────────┴──────────────┴─────────────┴──→ Aborted
//! ```
//!
//! `Halted` (budget exhausted) and `Stopped` (operator shutdown) are
//! terminal for the coordinator; see [`CoordinatorStatus`].

pub mod config;
pub mod messages;
pub mod record;
pub mod round;
pub mod state;
pub mod store;

pub use config::RoundConfig;
pub use messages::{CoordinatorMessage, ParticipantMessage, RoundAnnouncement};
pub use record::{AbortReason, RoundLog, RoundOutcome, RoundRecord};
pub use round::{CoordinatorReport, RoundCoordinator, CHANNEL_CAPACITY};
pub use state::{CoordinatorStatus, RoundControl, RoundPhase};
pub use store::{CoordinatorSnapshot, SnapshotStore};
