//! Loop Build Performance Benchmark
//!
//! Measures how long arming a vamp and leaving it cost on a full-rate song.
//!
//! **Goal:** A 30 second vamp at 44.1kHz stereo builds well inside one
//! monitor tick budget of the background worker
//! **Target:** Exit patch build < 1 ms (it runs on the monitor task)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Instant;
use vamp_common::config::EngineConfig;
use vamp_common::timing::seconds_to_ticks;
use vamp_common::FadeCurve;
use vamp_engine::audio::Track;
use vamp_engine::exit_patch::ExitPatchBuilder;
use vamp_engine::loop_sound::LoopSoundBuilder;
use vamp_engine::region::LoopRegion;

const RATE: u32 = 44_100;

/// Three minutes of stereo audio
fn song() -> Track {
    let frames = RATE as usize * 180;
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / RATE as f32;
        samples.push((2.0 * std::f32::consts::PI * 220.0 * t).sin() * 0.5);
        samples.push((2.0 * std::f32::consts::PI * 330.0 * t).sin() * 0.5);
    }
    Track::new("bench", "bench.wav", samples, RATE, 2).unwrap()
}

fn region(loop_in: f64, loop_out: f64) -> LoopRegion {
    LoopRegion::new(
        "Bench",
        seconds_to_ticks(loop_in),
        seconds_to_ticks(loop_out),
        &EngineConfig::default(),
    )
}

fn bench_loop_build(c: &mut Criterion) {
    let track = song();
    let mut group = c.benchmark_group("loop_build");
    group.sample_size(20);

    for seconds in [4.0, 30.0, 120.0] {
        let region = region(30.0, 30.0 + seconds);
        let builder = LoopSoundBuilder::new(FadeCurve::SCurve, 500);

        group.bench_function(BenchmarkId::new("vamp_seconds", seconds as u32), |b| {
            b.iter(|| {
                let start = Instant::now();
                let buffer = builder.build(&track, &region, 1).unwrap();
                black_box(buffer.frames());

                let realtime_factor = seconds / start.elapsed().as_secs_f64();
                if realtime_factor < 100.0 {
                    eprintln!(
                        "WARNING: {}s vamp built at {:.1}x realtime (below 100x)",
                        seconds, realtime_factor
                    );
                }
            });
        });
    }

    group.finish();
}

fn bench_exit_patch(c: &mut Criterion) {
    let track = song();
    let config = EngineConfig::default();
    let region = region(30.0, 60.0);
    let buffer = LoopSoundBuilder::from_config(&config)
        .build(&track, &region, 1)
        .unwrap();
    let settings = region.exit_settings(&config);

    let mut group = c.benchmark_group("exit_patch");

    for (name, curve) in [
        ("linear", FadeCurve::Linear),
        ("s_curve", FadeCurve::SCurve),
        ("equal_power", FadeCurve::EqualPower),
    ] {
        let builder = ExitPatchBuilder::new(curve);

        group.bench_function(BenchmarkId::new("at_boundary", name), |b| {
            b.iter(|| black_box(builder.build(&buffer, &track, &settings).unwrap()));
        });

        group.bench_function(BenchmarkId::new("mid_cycle", name), |b| {
            b.iter(|| {
                black_box(
                    builder
                        .build_at(&buffer, &track, &settings, buffer.frames() / 2)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_loop_build, bench_exit_patch);
criterion_main!(benches);
