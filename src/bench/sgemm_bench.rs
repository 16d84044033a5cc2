use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sgemm::blocked::packed::gemm_packed;
use sgemm::threaded::nocopy::dispatch;
use sgemm::{ExecutionContext, GemmProblem, IsaTier, Transpose, sgemm};

const THREADS: usize = 4;

fn operands(m: usize, n: usize, k: usize) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let a = (0..m * k).map(|i| (i % 100) as f32 * 0.01).collect();
    let b = (0..k * n).map(|i| (i % 100) as f32 * 0.01).collect();
    (a, b, vec![0.0; m * n])
}

fn bench_shapes(c: &mut Criterion) {
    let tier = IsaTier::detect();
    let ctx = ExecutionContext::with_threads(THREADS).unwrap();
    let mut group = c.benchmark_group("sgemm_shapes");

    // Square, skinny-m, deep-k
    let shapes = [(256, 256, 256), (512, 512, 512), (16, 2048, 512), (64, 64, 8192)];

    for &(m, n, k) in &shapes {
        group.throughput(Throughput::Elements((2 * m * n * k) as u64));
        let label = format!("{m}x{n}x{k}");
        let (a, b, mut out) = operands(m, n, k);

        group.bench_with_input(BenchmarkId::new("auto", &label), &label, |bi, _| {
            bi.iter(|| {
                let p = GemmProblem::new(m, n, k, &a, m, &b, k, &mut out, m);
                sgemm(&ctx, THREADS, black_box(p), None).unwrap();
            })
        });

        if tier == IsaTier::Scalar {
            continue;
        }

        group.bench_with_input(BenchmarkId::new("nocopy", &label), &label, |bi, _| {
            bi.iter(|| {
                let p = GemmProblem::new(m, n, k, &a, m, &b, k, &mut out, m);
                dispatch(tier, THREADS, &ctx, black_box(p), None).unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("packed", &label), &label, |bi, _| {
            bi.iter(|| {
                let p = GemmProblem::new(m, n, k, &a, m, &b, k, &mut out, m);
                gemm_packed(tier, THREADS, &ctx, black_box(p)).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_transposes(c: &mut Criterion) {
    let ctx = ExecutionContext::with_threads(THREADS).unwrap();
    let mut group = c.benchmark_group("sgemm_transposes");
    let (m, n, k) = (384, 384, 384);
    let (a, b, mut out) = operands(m, n, k);
    let bias = vec![0.5f32; m];
    group.throughput(Throughput::Elements((2 * m * n * k) as u64));

    for (ta, tb) in [
        (Transpose::N, Transpose::N),
        (Transpose::T, Transpose::N),
        (Transpose::N, Transpose::T),
        (Transpose::T, Transpose::T),
    ] {
        let label = format!("{ta}{tb}");
        group.bench_with_input(BenchmarkId::new("bias_beta0", &label), &label, |bi, _| {
            bi.iter(|| {
                let p = GemmProblem::new(m, n, k, &a, k, &b, k, &mut out, m)
                    .trans_a(ta)
                    .trans_b(tb)
                    .bias(&bias);
                sgemm(&ctx, THREADS, black_box(p), None).unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_shapes, bench_transposes);
criterion_main!(benches);
