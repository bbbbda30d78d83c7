//! Benchmarks for kernel generation and parameter validation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use symbolic::NumericType;
use tilegen_gpu::{generate, validate, GemmParams, GemmVariant, Tiling};

fn tilings() -> Vec<(&'static str, Tiling)> {
    vec![
        ("default", Tiling::default()),
        (
            "vector4",
            Tiling {
                vector_width: 4,
                local_size: [16, 16],
                kl: 64,
                register_tile: [8, 1, 8],
                local_fetch: [4, 64],
                ..Tiling::default()
            },
        ),
        (
            "split-depth",
            Tiling {
                depth: 8,
                ..Tiling::default()
            },
        ),
    ]
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    for (name, tiling) in tilings() {
        for variant in GemmVariant::ALL {
            let params = GemmParams::new(variant, tiling);
            group.bench_with_input(BenchmarkId::new(name, variant), &params, |b, params| {
                b.iter(|| generate(black_box(params), NumericType::Float32, "_bench"))
            });
        }
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    // Sweep a small grid of candidate tilings, as an autotuner would.
    let mut candidates = Vec::new();
    for vw in [1, 2, 4] {
        for ls in [4, 8, 16] {
            for kl in [4, 8, 16, 32] {
                for ks in [1, 2, 4] {
                    candidates.push(GemmParams::nn(Tiling {
                        vector_width: vw,
                        local_size: [ls, ls],
                        kl,
                        register_tile: [2 * vw, ks, 2 * vw],
                        local_fetch: [ls, ls],
                        ..Tiling::default()
                    }));
                }
            }
        }
    }
    c.bench_function("validate_sweep", |b| {
        b.iter(|| {
            candidates
                .iter()
                .filter(|p| validate(black_box(p)).is_ok())
                .count()
        })
    });
}

criterion_group!(benches, bench_generate, bench_validate);
criterion_main!(benches);
