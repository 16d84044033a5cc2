//! Per-ISA no-copy driver and the dispatcher that picks one.

use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::debug;

use super::blocking::{ThreadPlan, TileConfig, block_range, blocking};
use super::kernel_driver::{Tile, run_tile};
use crate::context::{ExecutionContext, resolve_thread_count};
use crate::error::{GemmError, Result};
use crate::isa::IsaTier;
use crate::kernels::KernelTable;
use crate::matrix::reference::ref_gemm;
use crate::matrix::{GemmProblem, PackMode};

/// Runs the no-copy kernels of one ISA tier, threaded over a 3-D grid.
#[derive(Debug, Clone, Copy)]
pub struct NoCopyDriver<'t> {
    table: &'t KernelTable,
    tiles: TileConfig,
}

impl NoCopyDriver<'static> {
    /// Driver over the shared kernel table of `tier` (`None` for `Scalar`).
    pub fn for_tier(tier: IsaTier) -> Option<Self> {
        KernelTable::for_tier(tier).map(NoCopyDriver::new)
    }
}

impl<'t> NoCopyDriver<'t> {
    pub fn new(table: &'t KernelTable) -> Self {
        Self {
            table,
            tiles: TileConfig::for_tier(table.tier()),
        }
    }

    pub fn with_tiles(mut self, tiles: TileConfig) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn tiles(&self) -> &TileConfig {
        &self.tiles
    }

    /// Whether this driver can run `problem` on this CPU.
    pub fn supports(&self, problem: &GemmProblem<'_>) -> bool {
        problem.pack == PackMode::None && self.table.tier().is_available()
    }

    /// The plan `run` would use for `problem` with `nthrs` requested threads.
    pub fn plan(&self, nthrs: usize, ctx: &ExecutionContext, problem: &GemmProblem<'_>) -> ThreadPlan {
        let nthr = if problem.is_degenerate() {
            1
        } else {
            resolve_thread_count(nthrs, ctx)
        };
        blocking(problem.m, problem.n, problem.k, nthr, &self.tiles)
    }

    /// Computes `problem` with up to `nthrs` threads from `ctx`.
    ///
    /// `workspace` receives K-split partial sums when it is large enough
    /// (see [`ThreadPlan::workspace_len`]); otherwise scratch is allocated.
    pub fn run(
        &self,
        nthrs: usize,
        ctx: &ExecutionContext,
        mut problem: GemmProblem<'_>,
        workspace: Option<&mut [f32]>,
    ) -> Result<()> {
        problem.validate()?;
        if !self.supports(&problem) {
            debug!(tier = %self.table.tier(), "no-copy path unsupported, using reference gemm");
            return ref_gemm(problem);
        }

        let plan = self.plan(nthrs, ctx, &problem);
        let tile = Tile::from_problem(&mut problem);

        let pool = match ctx.pool() {
            Some(pool) if plan.nthr > 1 && plan.grid_size() > 1 => pool,
            _ => {
                // SAFETY: the tile spans the validated problem, owned by this call.
                return unsafe { run_tile(self.table, &self.tiles, tile) };
            }
        };

        debug!(
            tier = %self.table.tier(),
            m = tile.m,
            n = tile.n,
            k = tile.k,
            nthr = plan.nthr,
            grid = ?(plan.nthr_m, plan.nthr_n, plan.nthr_k),
            blocks = ?(plan.block_m, plan.block_n, plan.block_k),
            "no-copy fan-out"
        );
        self.fan_out(pool, &plan, tile, workspace)
    }

    fn fan_out(
        &self,
        pool: &ThreadPool,
        plan: &ThreadPlan,
        tile: Tile,
        workspace: Option<&mut [f32]>,
    ) -> Result<()> {
        let needed = plan.workspace_len();
        let mut owned = Vec::new();
        let scratch: &mut [f32] = match workspace {
            Some(ws) if ws.len() >= needed => &mut ws[..needed],
            _ => {
                owned.resize(needed, 0.0);
                owned.as_mut_slice()
            }
        };

        // Worker ithr with ithr_k > 0 gets partial buffer ithr - nthr_m*nthr_n.
        let mn = plan.nthr_m * plan.nthr_n;
        let mut slots: Vec<Option<&mut [f32]>> = (0..plan.nthr).map(|_| None).collect();
        if needed > 0 {
            for (idx, chunk) in scratch.chunks_mut(plan.partial_len()).enumerate() {
                slots[mn + idx] = Some(chunk);
            }
        }

        let results: Vec<Result<()>> = pool.install(|| {
            slots
                .into_par_iter()
                .with_max_len(1)
                .enumerate()
                .map(|(ithr, partial)| self.worker(ithr, plan, tile, partial))
                .collect()
        });
        results.into_iter().collect::<Result<()>>()?;

        if plan.nthr_k > 1 {
            let partials: &[f32] = scratch;
            pool.install(|| {
                (0..mn)
                    .into_par_iter()
                    .for_each(|cell| reduce_partials(plan, tile, partials, cell));
            });
        }
        Ok(())
    }

    fn worker(
        &self,
        ithr: usize,
        plan: &ThreadPlan,
        tile: Tile,
        partial: Option<&mut [f32]>,
    ) -> Result<()> {
        let Some((im, in_, ik)) = plan.coords(ithr) else {
            return Ok(());
        };
        let (i0, mb) = block_range(im, plan.block_m, tile.m);
        let (j0, nb) = block_range(in_, plan.block_n, tile.n);
        let (p0, kb) = block_range(ik, plan.block_k, tile.k);
        if mb == 0 || nb == 0 || kb == 0 {
            return Ok(());
        }

        let mut sub = tile.slice(i0, j0, p0, mb, nb, kb);
        if ik > 0 {
            // Partial sums start cold; beta and bias belong to the ik == 0 worker.
            let buf = partial.ok_or_else(|| {
                GemmError::invalid("workspace", format!("no partial buffer for worker {ithr}"))
            })?;
            sub.c = buf.as_mut_ptr();
            sub.ldc = plan.block_m;
            sub.beta = 0.0;
            sub.bias = std::ptr::null();
        }

        // SAFETY: grid cells are disjoint in C, and each K-split worker owns
        // its partial buffer.
        unsafe { run_tile(self.table, &self.tiles, sub) }
    }
}

/// Adds the K-split partial sums of grid cell `cell` into C, in ascending
/// `ithr_k` order.
fn reduce_partials(plan: &ThreadPlan, tile: Tile, partials: &[f32], cell: usize) {
    let im = cell % plan.nthr_m;
    let in_ = cell / plan.nthr_m;
    let (i0, mb) = block_range(im, plan.block_m, tile.m);
    let (j0, nb) = block_range(in_, plan.block_n, tile.n);
    let mn = plan.nthr_m * plan.nthr_n;
    let ld = plan.block_m;

    for ik in 1..plan.nthr_k {
        let (_, kb) = block_range(ik, plan.block_k, tile.k);
        if mb == 0 || nb == 0 || kb == 0 {
            continue;
        }
        let start = ((ik - 1) * mn + cell) * plan.partial_len();
        let buf = &partials[start..start + plan.partial_len()];

        for j in 0..nb {
            // SAFETY: cell (im, in_) is written by this task alone.
            let col = unsafe {
                std::slice::from_raw_parts_mut(tile.c.add(i0 + (j0 + j) * tile.ldc), mb)
            };
            for (cij, p) in col.iter_mut().zip(&buf[j * ld..j * ld + mb]) {
                *cij += p;
            }
        }
    }
}

/// Runs `problem` on the no-copy driver for `tier`, or the reference GEMM
/// when the tier has no kernels.
pub fn dispatch(
    tier: IsaTier,
    nthrs: usize,
    ctx: &ExecutionContext,
    problem: GemmProblem<'_>,
    workspace: Option<&mut [f32]>,
) -> Result<()> {
    match NoCopyDriver::for_tier(tier) {
        Some(driver) => driver.run(nthrs, ctx, problem, workspace),
        None => ref_gemm(problem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{BetaClass, KernelKey};
    use crate::matrix::Transpose;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn driver() -> Option<NoCopyDriver<'static>> {
        let driver = NoCopyDriver::for_tier(IsaTier::detect());
        if driver.is_none() {
            println!("Skipping - no AVX2/AVX-512");
        }
        driver
    }

    fn random(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_mn_split_is_bit_exact() {
        let Some(driver) = driver() else { return };
        let ctx = ExecutionContext::with_threads(6).unwrap();
        let (m, n, k) = (150, 70, 90);

        for (ta, tb) in [
            (Transpose::N, Transpose::N),
            (Transpose::T, Transpose::N),
            (Transpose::N, Transpose::T),
            (Transpose::T, Transpose::T),
        ] {
            let a = random(m * k, 1);
            let b = random(k * n, 2);
            let c0 = random(m * n, 3);
            let lda = if ta == Transpose::N { m } else { k };
            let ldb = if tb == Transpose::N { k } else { n };

            let mut serial = c0.clone();
            let p = GemmProblem::new(m, n, k, &a, lda, &b, ldb, &mut serial, m)
                .trans_a(ta)
                .trans_b(tb)
                .alpha(0.5)
                .beta(0.25);
            driver.run(1, &ctx, p, None).unwrap();

            let mut split = c0.clone();
            let p = GemmProblem::new(m, n, k, &a, lda, &b, ldb, &mut split, m)
                .trans_a(ta)
                .trans_b(tb)
                .alpha(0.5)
                .beta(0.25);
            let plan = driver.plan(6, &ctx, &p);
            assert_eq!(plan.nthr_k, 1);
            assert!(plan.nthr_m * plan.nthr_n > 1);
            driver.run(6, &ctx, p, None).unwrap();

            let serial_bits: Vec<u32> = serial.iter().map(|x| x.to_bits()).collect();
            let split_bits: Vec<u32> = split.iter().map(|x| x.to_bits()).collect();
            assert_eq!(serial_bits, split_bits, "({ta}, {tb})");
        }
    }

    #[test]
    fn test_k_split_matches_serial() {
        let Some(driver) = driver() else { return };
        let ctx = ExecutionContext::with_threads(4).unwrap();
        let (m, n, k) = (16, 8, 4096);
        let a = random(m * k, 4);
        let b = random(k * n, 5);
        let bias = random(m, 6);
        let c0 = random(m * n, 7);

        let mut serial = c0.clone();
        let p = GemmProblem::new(m, n, k, &a, m, &b, k, &mut serial, m).bias(&bias);
        driver.run(1, &ctx, p, None).unwrap();

        let mut split = c0.clone();
        let p = GemmProblem::new(m, n, k, &a, m, &b, k, &mut split, m).bias(&bias);
        let plan = driver.plan(4, &ctx, &p);
        assert!(plan.nthr_k > 1, "expected a K split, got {plan:?}");
        driver.run(4, &ctx, p, None).unwrap();

        for (s, t) in serial.iter().zip(&split) {
            assert_abs_diff_eq!(*s, *t, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_k_split_uses_caller_workspace() {
        let Some(driver) = driver() else { return };
        let ctx = ExecutionContext::with_threads(4).unwrap();
        let (m, n, k) = (16, 8, 4096);
        let a = random(m * k, 8);
        let b = random(k * n, 9);

        let mut expected = vec![0.0; m * n];
        ref_gemm(GemmProblem::new(m, n, k, &a, m, &b, k, &mut expected, m).beta(0.0)).unwrap();

        let mut c = vec![f32::NAN; m * n];
        let p = GemmProblem::new(m, n, k, &a, m, &b, k, &mut c, m);
        let needed = driver.plan(4, &ctx, &p).workspace_len();
        assert!(needed > 0);

        let mut workspace = vec![f32::NAN; needed + 5];
        driver.run(4, &ctx, p, Some(&mut workspace)).unwrap();

        for (e, g) in expected.iter().zip(&c) {
            assert_abs_diff_eq!(*e, *g, epsilon = 1e-3);
        }
        assert!(workspace[..needed].iter().all(|x| x.is_finite()));
        assert!(workspace[needed..].iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_nested_call_runs_serially() {
        let Some(driver) = driver() else { return };
        let ctx = ExecutionContext::with_threads(4).unwrap();
        let inner = ctx.nested();

        let a = vec![1.0; 128 * 128];
        let b = vec![1.0; 128 * 128];
        let mut c = vec![0.0; 128 * 128];
        let p = GemmProblem::new(128, 128, 128, &a, 128, &b, 128, &mut c, 128);
        assert_eq!(driver.plan(8, &inner, &p).nthr, 1);

        driver.run(8, &inner, p, None).unwrap();
        assert!(c.iter().all(|&x| x == 128.0));
    }

    #[test]
    fn test_worker_error_propagates() {
        let Some(driver) = driver() else { return };
        let key = KernelKey::new(Transpose::N, Transpose::N, BetaClass::One, false);
        let table = driver.table.clone().without(key);
        let driver = NoCopyDriver::new(&table);
        let ctx = ExecutionContext::with_threads(4).unwrap();

        let a = vec![1.0; 128 * 128];
        let b = vec![1.0; 128 * 128];
        let mut c = vec![0.0; 128 * 128];
        let p = GemmProblem::new(128, 128, 128, &a, 128, &b, 128, &mut c, 128);

        let err = driver.run(4, &ctx, p, None).unwrap_err();
        assert!(matches!(err, GemmError::KernelUnavailable { key: k } if k == key));
    }

    #[test]
    fn test_avx2_bias_with_beta_one_is_unavailable() {
        if !IsaTier::Avx2.is_available() {
            println!("Skipping - no AVX2");
            return;
        }
        let driver = NoCopyDriver::for_tier(IsaTier::Avx2).unwrap();
        let ctx = ExecutionContext::serial();
        let a = vec![1.0; 32 * 32];
        let b = vec![1.0; 32 * 32];
        let bias = vec![1.0; 32];
        let mut c = vec![0.0; 32 * 32];
        let p = GemmProblem::new(32, 32, 32, &a, 32, &b, 32, &mut c, 32).beta(1.0).bias(&bias);

        let key = KernelKey::new(Transpose::N, Transpose::N, BetaClass::One, true);
        let err = driver.run(1, &ctx, p, None).unwrap_err();
        assert!(matches!(err, GemmError::KernelUnavailable { key: k } if k == key));
    }

    #[test]
    fn test_packing_falls_back_to_reference() {
        let Some(driver) = driver() else { return };
        let ctx = ExecutionContext::serial();
        let a = vec![1.0; 4];
        let b = vec![1.0; 4];
        let mut c = vec![0.0; 4];
        let p = GemmProblem::new(2, 2, 2, &a, 2, &b, 2, &mut c, 2).pack(PackMode::PackB);

        assert!(!driver.supports(&p));
        let err = driver.run(1, &ctx, p, None).unwrap_err();
        assert!(matches!(err, GemmError::Unimplemented(_)));
    }

    #[test]
    fn test_dispatch_scalar_uses_reference() {
        let ctx = ExecutionContext::serial();
        let a = vec![1.0, 2.0];
        let b = vec![3.0];
        let mut c = vec![0.0, 0.0];
        let p = GemmProblem::new(2, 1, 1, &a, 2, &b, 1, &mut c, 2);

        dispatch(IsaTier::Scalar, 4, &ctx, p, None).unwrap();
        assert_eq!(c, vec![3.0, 6.0]);
    }
}
