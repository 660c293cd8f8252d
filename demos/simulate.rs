//! Simulated federation: a handful of participants fit a shared linear
//! target until the privacy budget runs out.
//!
//! ```text
//! RUST_LOG=info cargo run --example simulate
//! ```

use qora_secagg::error::QoraError;
use qora_secagg::{
    GlobalParameters, Participant, RoundConfig, RoundCoordinator, RoundOutcome,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PARTICIPANTS: usize = 8;
const DIMENSION: usize = 4;

#[tokio::main]
async fn main() -> Result<(), QoraError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RoundConfig {
        min_clients: 4,
        round_timeout_ms: 2_000,
        share_recovery_timeout_ms: 1_000,
        clipping_threshold: 1.0,
        epsilon_per_round: 0.5,
        delta_per_round: 1e-6,
        epsilon_ceiling: 8.0,
        delta_ceiling: 1e-4,
        server_learning_rate: 0.5,
        seed: Some(2024),
        ..RoundConfig::default()
    };
    let mut coordinator = RoundCoordinator::new(config, GlobalParameters::new(vec![0.0; DIMENSION]))?;

    let target: Vec<f64> = (0..DIMENSION).map(|i| i as f64 * 0.25).collect();
    for i in 0..PARTICIPANTS {
        let id = format!("device-{:02}", i);
        let mut local = StdRng::seed_from_u64(i as u64);
        let target = target.clone();
        // One in eight devices is flaky and skips a round now and then
        let flaky = i % 8 == 7;
        let trainer = move |params: &GlobalParameters| -> Result<Vec<f64>, QoraError> {
            if flaky && local.gen_bool(0.3) {
                return Err(QoraError::Trainer("battery saver".to_string()));
            }
            Ok(params
                .values()
                .iter()
                .zip(&target)
                .map(|(p, t)| (t - p) + local.gen_range(-0.05..0.05))
                .collect())
        };
        let (inbox, outbox) = coordinator.connect(id.as_str().into());
        let participant = Participant::new(id.into(), trainer, StdRng::seed_from_u64(100 + i as u64));
        tokio::spawn(participant.run(inbox, outbox));
    }

    loop {
        match coordinator.run_round().await {
            Ok(record) => {
                let params = coordinator.global_parameters();
                info!(
                    round = record.round_number,
                    outcome = ?record.outcome,
                    dropouts = record.dropouts.len(),
                    params = ?params.values().to_vec(),
                    "round finished"
                );
                if record.outcome != RoundOutcome::Completed {
                    warn!(round = record.round_number, "round did not complete");
                }
            }
            Err(QoraError::BudgetExhausted { .. }) => {
                info!("privacy budget exhausted");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    let report = coordinator.report();
    info!(
        rounds_completed = report.rounds_completed,
        epsilon_spent = report.privacy.epsilon_spent,
        delta_spent = report.privacy.delta_spent,
        "federation halted"
    );
    coordinator.stop()
}
