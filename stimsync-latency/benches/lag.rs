use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stimsync_core::SyncTrace;
use stimsync_latency::{calculate_lag, estimate};

fn traces(n: usize, delay: usize) -> (SyncTrace, SyncTrace) {
    let mut rng = StdRng::seed_from_u64(11);
    let bits: Vec<f64> = (0..n + delay)
        .map(|_| if rng.random_bool(0.5) { 1.0 } else { 0.0 })
        .collect();
    let display_ts: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 / 120.0).collect();
    let tracker_ts: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 / 120.0 + 0.002).collect();
    (
        SyncTrace::new(display_ts, bits[delay..].to_vec()),
        SyncTrace::new(tracker_ts, bits[..n].to_vec()),
    )
}

pub fn bench_lag(c: &mut Criterion) {
    let mut g = c.benchmark_group("lag");
    g.sample_size(20);

    let (display, tracker) = traces(2400, 4);
    g.bench_function("calculate_lag_1200", |b| {
        b.iter(|| calculate_lag(black_box(&display.states[..1200]), black_box(&tracker.states[..1200])))
    });
    g.bench_function("estimate_20s", |b| {
        b.iter(|| estimate(black_box(&display), black_box(&tracker), 5.0, 8))
    });

    g.finish();
}

criterion_group!(benches, bench_lag);
criterion_main!(benches);
