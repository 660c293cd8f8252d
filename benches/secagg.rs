use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use ndarray::Array1;
use qora_secagg::privacy::clip::apply;
use qora_secagg::secagg::{MaskingClient, ParticipantContribution, PublicKeys};
use qora_secagg::{ClippingPolicy, Mechanism, ParticipantId, SecureAggregationSession};
use rand::rngs::StdRng;
use rand::SeedableRng;

const ROUND: u64 = 1;

fn clients(n: usize, rng: &mut StdRng) -> Vec<MaskingClient> {
    let mut clients: Vec<MaskingClient> = (0..n)
        .map(|i| MaskingClient::new(ParticipantId::new(format!("c{:03}", i)), ROUND, rng))
        .collect();
    let roster: Vec<(ParticipantId, PublicKeys)> = clients
        .iter()
        .map(|c| (c.id().clone(), c.public_keys()))
        .collect();
    for client in clients.iter_mut() {
        client.set_roster(&roster).unwrap();
    }
    clients
}

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask");
    let mut rng = StdRng::seed_from_u64(7);

    for &n_clients in &[10, 50] {
        for &n_params in &[1_000usize, 100_000] {
            let clients = clients(n_clients, &mut rng);
            let values: Vec<f64> = (0..n_params).map(|j| (j as f64).sin()).collect();
            let id = format!("{}c_{}p", n_clients, n_params);

            group.bench_with_input(BenchmarkId::new("mask", &id), &values, |b, values| {
                b.iter(|| clients[0].mask(values).unwrap())
            });
        }
    }
    group.finish();
}

/// A session with the last client dropped and every share already
/// recovered, ready to resolve.
fn recovered_session(n_clients: usize, n_params: usize, seed: u64) -> SecureAggregationSession {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut clients = clients(n_clients, &mut rng);
    let threshold = n_clients / 2 + 1;
    let roster: BTreeMap<ParticipantId, PublicKeys> = clients
        .iter()
        .map(|c| (c.id().clone(), c.public_keys()))
        .collect();
    let mut session = SecureAggregationSession::new(ROUND, n_params, roster, threshold).unwrap();
    for client in clients.iter_mut() {
        session
            .accept_shares(client.share_bundle(threshold, &mut rng).unwrap())
            .unwrap();
    }
    let values: Vec<f64> = (0..n_params).map(|j| (j as f64).cos()).collect();
    for c in &clients[..n_clients - 1] {
        session
            .submit(ParticipantContribution {
                round_number: ROUND,
                participant_id: c.id().clone(),
                masked_contribution: c.mask(&values).unwrap(),
            })
            .unwrap();
    }
    session.close_collection();
    for (holder, asks) in session.recovery_requests() {
        let client = clients.iter_mut().find(|c| *c.id() == holder).unwrap();
        for req in asks {
            let share = client
                .reveal_share(&req.target, req.kind, &req.ciphertext)
                .unwrap();
            session
                .accept_recovered_share(&holder, &req.target, req.kind, share)
                .unwrap();
        }
    }
    session
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    group.sample_size(10);

    for &n_clients in &[10, 30] {
        for &n_params in &[1_000usize, 10_000] {
            let id = format!("{}c_{}p", n_clients, n_params);
            group.bench_function(BenchmarkId::new("one_dropout", &id), |b| {
                b.iter_batched(
                    || recovered_session(n_clients, n_params, 11),
                    |session| session.resolve().unwrap(),
                    BatchSize::LargeInput,
                )
            });
        }
    }
    group.finish();
}

fn bench_clip_and_privatize(c: &mut Criterion) {
    let mut group = c.benchmark_group("clip_and_privatize");
    let policy = ClippingPolicy::l2(1.0);
    let scale = Mechanism::Gaussian.calibrate(1.0, 0.5, 1e-5).unwrap();

    for &n_params in &[1_000usize, 100_000, 1_000_000] {
        let update = Array1::from_shape_fn(n_params, |j| (j as f64).sin());
        group.bench_with_input(BenchmarkId::new("gaussian", n_params), &update, |b, update| {
            let mut rng = StdRng::seed_from_u64(3);
            b.iter(|| apply(update, &policy, &scale, &mut rng))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_masking, bench_resolve, bench_clip_and_privatize);
criterion_main!(benches);
