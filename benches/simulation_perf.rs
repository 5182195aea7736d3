
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use casevac::arrivals::ArrivalGrid;
use casevac::flow::FlowCounters;
use casevac::hemorrhage::HemorrhageModel;
use casevac::simulation::{CancellationToken, Progress, RunOptions};
use casevac::types::{InjuryMechanism, Triage};
use casevac::warfare;

use fixtures::{LARGE, MEDIUM, SMALL, build_flow_engine, build_simulation, make_config};

// ── Group 1 (arrivals): inverse-CDF sampling over the intensity grid ─────────

fn bench_arrivals(c: &mut Criterion) {
    let mut group = c.benchmark_group("arrivals");
    let profile = warfare::resolve(&make_config(&LARGE)).expect("bench scenario resolves");
    let grid = ArrivalGrid::new(&profile.curve).expect("grid has mass");
    for &n in &[100usize, 1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || ChaCha20Rng::seed_from_u64(42),
                |mut rng| grid.generate(n, &mut rng),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

// ── Group 2 (flow_single): one trajectory per triage level ───────────────────

fn bench_flow_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("flow_single");
    let engine = build_flow_engine();
    let config = make_config(&SMALL);
    let hemorrhage = HemorrhageModel::from_config(&config.hemorrhage).expect("default hemorrhage config");
    for triage in Triage::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(triage), &triage, |b, &triage| {
            b.iter_batched(
                || {
                    let mut rng = ChaCha20Rng::seed_from_u64(42);
                    let profile = hemorrhage
                        .assign(InjuryMechanism::Penetrating, triage, &mut rng)
                        .expect("wound bands are well formed");
                    (profile, rng)
                },
                |(profile, mut rng)| {
                    let mut counters = FlowCounters::default();
                    engine.run(triage, profile, &mut counters, &mut rng)
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

// ── Group 3 (full_run): end-to-end generation ────────────────────────────────

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_run");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        group.throughput(Throughput::Elements(scenario.patients as u64));
        let sim = build_simulation(scenario);
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| sim.run(&RunOptions::default()).expect("bench run succeeds"))
        });
    }
    group.finish();
}

// ── Group 4 (batch_size): streaming overhead at fixed population ─────────────

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size");
    group.sample_size(20);
    let sim = build_simulation(&MEDIUM);
    group.throughput(Throughput::Elements(MEDIUM.patients as u64));
    for &batch_size in &[1usize, 16, 256, 4_096] {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &batch_size| {
            let options = RunOptions { batch_size, ..RunOptions::default() };
            b.iter(|| {
                let mut emitted = 0usize;
                sim.run_batched(&options, &CancellationToken::new(), &Progress::new(), |batch| emitted += batch.len())
                    .expect("bench run succeeds");
                emitted
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_arrivals, bench_flow_single, bench_full_run, bench_batch_size);
criterion_main!(benches);
