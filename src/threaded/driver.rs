//! Top-level threaded SGEMM: thread goal, path choice, dispatch.

use tracing::debug;

use super::nocopy;
use crate::blocked::packed::gemm_packed;
use crate::config::GemmConfig;
use crate::context::{ExecutionContext, resolve_thread_count};
use crate::error::{GemmError, Result};
use crate::isa::IsaTier;
use crate::kernels::KernelTable;
use crate::matrix::reference::ref_gemm;
use crate::matrix::{GemmProblem, PackMode};

/// Below this many rows or columns packing never amortizes.
const SKINNY_DIM: usize = 16;

/// Which implementation a call runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmPath {
    Reference,
    NoCopy,
    Packed,
}

/// `C := alpha * op(A) * op(B) + beta * C (+ bias)` with up to `nthrs`
/// threads from `ctx`.
///
/// The thread count adapts to the problem size: small problems run on
/// fewer threads (or the caller's thread alone) because the fan-out costs
/// more than it saves. Calls made from a rayon worker thread, or through a
/// nested context, never fan out again.
///
/// `workspace` is optional scratch for K-split partial sums; a short or
/// missing one is replaced by an internal allocation.
///
/// # Errors
///
/// [`GemmError::InvalidArgument`] for inconsistent shapes or strides and
/// [`GemmError::Unimplemented`] for pre-packed operands. A call the tier's
/// no-copy kernels cannot cover runs on the packed path instead of failing.
pub fn sgemm(
    ctx: &ExecutionContext,
    nthrs: usize,
    problem: GemmProblem<'_>,
    workspace: Option<&mut [f32]>,
) -> Result<()> {
    problem.validate()?;
    if problem.pack != PackMode::None {
        return Err(GemmError::Unimplemented("packed GEMM"));
    }

    let config = ctx.config();
    let tier = IsaTier::active(config);
    let goal = resolve_thread_count(adjust_thread_goal(nthrs, &problem, config), ctx);
    let path = choose_path(tier, &problem, config);

    debug!(
        m = problem.m,
        n = problem.n,
        k = problem.k,
        trans_a = %problem.trans_a,
        trans_b = %problem.trans_b,
        requested = nthrs,
        goal,
        %tier,
        ?path,
        "sgemm"
    );

    match path {
        GemmPath::Reference => ref_gemm(problem),
        GemmPath::NoCopy => nocopy::dispatch(tier, goal, ctx, problem, workspace),
        GemmPath::Packed => gemm_packed(tier, goal, ctx, problem),
    }
}

/// Threads worth using: at least `min_work_per_thread` multiply-adds each,
/// never more than requested, never zero.
pub fn adjust_thread_goal(nthrs: usize, problem: &GemmProblem<'_>, config: &GemmConfig) -> usize {
    if problem.is_degenerate() {
        return 1;
    }
    let by_work = (problem.work() / config.min_work_per_thread.max(1)).max(1);
    nthrs.min(by_work).max(1)
}

/// Picks the implementation for `problem` on `tier`.
///
/// Small and skinny problems go no-copy unless the tier lacks one of the
/// kernels the call needs; the packed path takes those.
pub fn choose_path(tier: IsaTier, problem: &GemmProblem<'_>, config: &GemmConfig) -> GemmPath {
    let small = problem.work() <= config.nocopy_max_work || problem.m.min(problem.n) < SKINNY_DIM;
    if tier == IsaTier::Scalar {
        GemmPath::Reference
    } else if small && nocopy_covers(tier, problem) {
        GemmPath::NoCopy
    } else {
        GemmPath::Packed
    }
}

fn nocopy_covers(tier: IsaTier, problem: &GemmProblem<'_>) -> bool {
    problem.is_degenerate()
        || KernelTable::for_tier(tier).is_some_and(|table| {
            table.covers(problem.trans_a, problem.trans_b, problem.beta, problem.bias.is_some())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use crate::matrix::Transpose;
    use approx::assert_abs_diff_eq;

    fn problem<'a>(m: usize, n: usize, k: usize, a: &'a [f32], b: &'a [f32], c: &'a mut [f32]) -> GemmProblem<'a> {
        GemmProblem::new(m, n, k, a, m.max(1), b, k.max(1), c, m.max(1))
    }

    #[test]
    fn test_thread_goal_scales_with_work() {
        let config = GemmConfig {
            min_work_per_thread: 1000,
            ..GemmConfig::default()
        };
        let a = vec![0.0; 100 * 100];
        let b = vec![0.0; 100 * 100];
        let mut c = vec![0.0; 100 * 100];

        // 10 * 10 * 10 = 1000 multiply-adds: one thread's worth.
        let p = problem(10, 10, 10, &a, &b, &mut c);
        assert_eq!(adjust_thread_goal(8, &p, &config), 1);

        // 20 * 10 * 10 = 2000: two threads.
        let p = problem(20, 10, 10, &a, &b, &mut c);
        assert_eq!(adjust_thread_goal(8, &p, &config), 2);

        // Plenty of work: capped by the request.
        let p = problem(100, 100, 100, &a, &b, &mut c);
        assert_eq!(adjust_thread_goal(8, &p, &config), 8);
        assert_eq!(adjust_thread_goal(0, &p, &config), 1);

        let p = problem(100, 100, 0, &a, &b, &mut c);
        assert_eq!(adjust_thread_goal(8, &p, &config), 1);
    }

    #[test]
    fn test_path_choice() {
        let config = GemmConfig {
            nocopy_max_work: 64 * 64 * 64,
            ..GemmConfig::default()
        };
        let a = vec![0.0; 256 * 256];
        let b = vec![0.0; 256 * 256];
        let mut c = vec![0.0; 256 * 256];

        let p = problem(64, 64, 64, &a, &b, &mut c);
        assert_eq!(choose_path(IsaTier::Avx2, &p, &config), GemmPath::NoCopy);
        assert_eq!(choose_path(IsaTier::Scalar, &p, &config), GemmPath::Reference);

        let p = problem(256, 256, 256, &a, &b, &mut c);
        assert_eq!(choose_path(IsaTier::Avx512, &p, &config), GemmPath::Packed);

        // Skinny output stays on the no-copy path however deep k is.
        let p = problem(8, 256, 256, &a, &b, &mut c);
        assert_eq!(choose_path(IsaTier::Avx512, &p, &config), GemmPath::NoCopy);
    }

    #[test]
    fn test_missing_fused_bias_kernel_takes_packed_path() {
        let config = GemmConfig::default();
        let a = vec![0.0; 32 * 32];
        let b = vec![0.0; 32 * 32];
        let bias = vec![1.0; 32];
        let mut c = vec![0.0; 32 * 32];

        // AVX2 only fuses the bias with beta == 0.
        let p = problem(32, 32, 32, &a, &b, &mut c).beta(1.0).bias(&bias);
        assert_eq!(choose_path(IsaTier::Avx2, &p, &config), GemmPath::Packed);
        assert_eq!(choose_path(IsaTier::Avx512, &p, &config), GemmPath::NoCopy);

        let p = problem(32, 32, 32, &a, &b, &mut c).beta(0.0).bias(&bias);
        assert_eq!(choose_path(IsaTier::Avx2, &p, &config), GemmPath::NoCopy);

        // Beta-only calls need no kernel at all.
        let p = problem(32, 32, 0, &a, &b, &mut c).beta(1.0).bias(&bias);
        assert_eq!(choose_path(IsaTier::Avx2, &p, &config), GemmPath::NoCopy);
    }

    #[test]
    fn test_sgemm_all_paths_agree() {
        let (m, n, k) = (80, 72, 90);
        let a: Vec<f32> = (0..m * k).map(|i| ((i * 13) % 29) as f32 * 0.1 - 1.4).collect();
        let b: Vec<f32> = (0..k * n).map(|i| ((i * 7) % 23) as f32 * 0.1 - 1.1).collect();
        let bias: Vec<f32> = (0..m).map(|i| i as f32 * 0.5).collect();
        let c0: Vec<f32> = (0..m * n).map(|i| (i % 5) as f32).collect();

        let mut expected = c0.clone();
        let p = GemmProblem::new(m, n, k, &a, k, &b, k, &mut expected, m)
            .trans_a(Transpose::T)
            .alpha(2.0)
            .beta(0.0)
            .bias(&bias);
        ref_gemm(p).unwrap();

        let pool_ctx = ExecutionContext::with_threads(4).unwrap();
        for nocopy_max_work in [0, usize::MAX] {
            let config = GemmConfig {
                min_work_per_thread: 1,
                nocopy_max_work,
                ..GemmConfig::default()
            };
            let ctx = pool_ctx.clone().with_config(config);

            let mut got = c0.clone();
            let p = GemmProblem::new(m, n, k, &a, k, &b, k, &mut got, m)
                .trans_a(Transpose::T)
                .alpha(2.0)
                .beta(0.0)
                .bias(&bias);
            sgemm(&ctx, 4, p, None).unwrap();

            for (e, g) in expected.iter().zip(&got) {
                assert_abs_diff_eq!(*e, *g, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_packed_request_is_unimplemented() {
        let ctx = ExecutionContext::serial();
        let a = vec![1.0; 4];
        let b = vec![1.0; 4];
        let mut c = vec![0.0; 4];
        let p = problem(2, 2, 2, &a, &b, &mut c).pack(PackMode::PackA);

        let result = sgemm(&ctx, 1, p, None);
        assert_eq!(Status::from_result(&result), Status::Unimplemented);
        assert_eq!(c, vec![0.0; 4]);
    }

    #[test]
    fn test_invalid_stride_is_rejected() {
        let ctx = ExecutionContext::serial();
        let a = vec![1.0; 4];
        let b = vec![1.0; 4];
        let mut c = vec![0.0; 4];
        let p = GemmProblem::new(2, 2, 2, &a, 1, &b, 2, &mut c, 2);

        let err = sgemm(&ctx, 1, p, None).unwrap_err();
        assert!(matches!(err, GemmError::InvalidArgument { name: "a", .. }));
        assert_eq!(err.status(), Status::RuntimeError);
    }
}
