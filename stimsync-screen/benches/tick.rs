use serde_json::{Map, Value, json};
use stimsync_core::StimulusProgram;
use stimsync_screen::{ScreenConfig, ScreenRuntime};
use stimsync_timing::ManualClock;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

fn harness(programs: &[(&str, Value)]) -> ScreenRuntime<StimulusProgram, ManualClock> {
    let mut rt = ScreenRuntime::new(&ScreenConfig::default(), ManualClock::new(0.0));
    for (name, config) in programs {
        let config: Map<String, Value> = config.as_object().cloned().unwrap_or_default();
        rt.load(name, true, &config).unwrap();
    }
    rt.start(0.0);
    rt
}

pub fn bench_tick(c: &mut Criterion) {
    let mut g = c.benchmark_group("tick");
    g.sample_size(40);

    g.bench_function("sine_grating", |b| {
        b.iter_batched(
            || harness(&[("SineGrating", json!({"rate": 30.0}))]),
            |mut rt| {
                for i in 0..120 {
                    black_box(rt.tick(i as f64 / 120.0));
                }
            },
            BatchSize::SmallInput,
        )
    });

    g.bench_function("random_grid_and_patch", |b| {
        b.iter_batched(
            || {
                harness(&[
                    ("RandomGrid", json!({"update_rate": 120.0})),
                    (
                        "MovingPatch",
                        json!({"trajectory": {"x": [[0.0, 0.0], [2.0, 180.0]]}}),
                    ),
                ])
            },
            |mut rt| {
                for i in 0..120 {
                    black_box(rt.tick(i as f64 / 120.0));
                }
            },
            BatchSize::SmallInput,
        )
    });

    g.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
