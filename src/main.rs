//! Benchmark runner for the SGEMM paths.
//!
//! `RUST_LOG=sgemm=debug` shows the thread goal, path and plan per call.

use sgemm::blocked::packed::gemm_packed;
use sgemm::threaded::nocopy::dispatch;
use sgemm::{ExecutionContext, GemmConfig, GemmProblem, IsaTier, ref_gemm, sgemm};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const THREADS: usize = 4;

fn main() -> sgemm::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== SGEMM Benchmark ===\n");

    let config = GemmConfig::from_env()?;
    let tier = IsaTier::active(&config);
    let ctx = ExecutionContext::with_threads(THREADS)?.with_config(config);

    println!("CPU tier: {} (detected {})\n", tier, IsaTier::detect());

    // Square, skinny and deep-k shapes: each favours a different split.
    let shapes = [(256, 256, 256), (512, 512, 512), (1024, 1024, 1024), (16, 4096, 512), (64, 64, 16384)];
    let iterations = 3;
    let mut all_results = Vec::new();

    for &(m, n, k) in &shapes {
        println!("Shape: {}×{}×{}", m, n, k);
        println!("{}", "-".repeat(56));

        let a: Vec<f32> = (0..m * k).map(|i| (i % 100) as f32 * 0.01).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 100) as f32 * 0.01).collect();

        let mut results: Vec<(&str, (f64, f64))> = vec![(
            "Reference",
            bench_fn(&a, &b, m, n, k, iterations, ref_gemm),
        )];

        if tier != IsaTier::Scalar {
            results.push((
                "No-copy",
                bench_fn(&a, &b, m, n, k, iterations, |p| dispatch(tier, 1, &ctx, p, None)),
            ));
            results.push((
                "No-copy MT",
                bench_fn(&a, &b, m, n, k, iterations, |p| dispatch(tier, THREADS, &ctx, p, None)),
            ));
            results.push((
                "Packed",
                bench_fn(&a, &b, m, n, k, iterations, |p| gemm_packed(tier, 1, &ctx, p)),
            ));
            results.push((
                "Packed MT",
                bench_fn(&a, &b, m, n, k, iterations, |p| gemm_packed(tier, THREADS, &ctx, p)),
            ));
        }
        results.push((
            "sgemm (auto)",
            bench_fn(&a, &b, m, n, k, iterations, |p| sgemm(&ctx, THREADS, p, None)),
        ));

        let baseline_time = results[0].1.0;
        for (i, (name, (time_ms, gflops))) in results.iter().enumerate() {
            let speedup = baseline_time / time_ms;
            println!(
                "{}. {:14} {:9.2} ms  {:7.2} GFLOPS  ({:.1}×)",
                i + 1,
                name,
                time_ms,
                gflops,
                speedup
            );
        }
        println!();

        all_results.push(((m, n, k), results));
    }

    print_summary_table(&all_results);
    Ok(())
}

/// Average time (ms) and GFLOPS of `f` over `iterations` runs after one warmup.
///
/// A run that fails is reported and counted as zero throughput.
fn bench_fn<F>(a: &[f32], b: &[f32], m: usize, n: usize, k: usize, iterations: usize, f: F) -> (f64, f64)
where
    F: Fn(GemmProblem<'_>) -> sgemm::Result<()>,
{
    // Warmup
    let mut c = vec![0.0; m * n];
    if let Err(err) = f(GemmProblem::new(m, n, k, a, m, b, k, &mut c, m)) {
        println!("   failed: {err}");
        return (f64::INFINITY, 0.0);
    }

    let mut total = 0.0;
    for _ in 0..iterations {
        let mut c = vec![0.0; m * n];
        let start = Instant::now();
        let problem = GemmProblem::new(m, n, k, a, m, b, k, &mut c, m);
        if f(problem).is_err() {
            return (f64::INFINITY, 0.0);
        }
        total += start.elapsed().as_secs_f64();
    }

    let avg = total / iterations as f64;
    let gflops = 2.0 * (m * n * k) as f64 / avg / 1e9;
    (avg * 1000.0, gflops)
}

#[allow(clippy::type_complexity)]
fn print_summary_table(all_results: &[((usize, usize, usize), Vec<(&str, (f64, f64))>)]) {
    println!("\n{}", "=".repeat(90));
    println!("SUMMARY (GFLOPS)");
    println!("{}", "=".repeat(90));

    print!("\n{:<16}", "Method");
    for ((m, n, k), _) in all_results {
        print!(" {:>14}", format!("{m}×{n}×{k}"));
    }
    println!();
    println!("{}", "-".repeat(90));

    let num_methods = all_results[0].1.len();
    for method_idx in 0..num_methods {
        print!("{:<16}", all_results[0].1[method_idx].0);
        for (_, results) in all_results {
            print!(" {:>14.2}", results[method_idx].1.1);
        }
        println!();
    }

    println!("{}", "=".repeat(90));
    println!("\nGFLOPS = 2·m·n·k / time. Higher is better.\n");
}
