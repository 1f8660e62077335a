//! Benchmarks for the region step loop.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use veles::prelude::*;

fn sequence_frames(cols: usize, window: usize) -> Vec<Vec<u8>> {
    let steps = cols / window;
    (0..steps)
        .map(|w| {
            let mut bits = vec![0u8; cols];
            for i in w * window..(w + 1) * window {
                bits[i] = 1;
            }
            bits
        })
        .collect()
}

fn bench_hardcoded_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("hardcoded_step");

    for &cols in &[64usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(cols), &cols, |b, &cols| {
            let mut region = Region::new(RegionParams {
                input_width: cols,
                input_height: 1,
                hardcoded_spatial: true,
                cells_per_col: 4,
                seg_active_threshold: 3,
                new_synapse_count: 5,
                temporal_learning: true,
                ..Default::default()
            })
            .unwrap();
            let frames = sequence_frames(cols, cols / 8);
            let mut step = 0usize;

            b.iter(|| {
                region.set_input(&frames[step % frames.len()]).unwrap();
                region.run_once();
                step += 1;
                black_box(region.iterations())
            });
        });
    }

    group.finish();
}

fn bench_trained_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("trained_step");
    group.sample_size(20);

    group.bench_function("32x32_input_16x16_grid", |b| {
        let mut region = Region::new(RegionParams {
            input_width: 32,
            input_height: 32,
            col_grid_width: 16,
            col_grid_height: 16,
            pct_input_per_col: 0.1,
            pct_min_overlap: 0.05,
            pct_local_activity: 0.1,
            cells_per_col: 4,
            seg_active_threshold: 3,
            new_synapse_count: 5,
            spatial_learning: true,
            temporal_learning: true,
            ..Default::default()
        })
        .unwrap();
        let frames = sequence_frames(1024, 64);
        let mut step = 0usize;

        b.iter(|| {
            region.set_input(&frames[step % frames.len()]).unwrap();
            region.run_once();
            step += 1;
            black_box(region.iterations())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_hardcoded_step, bench_trained_step);
criterion_main!(benches);
