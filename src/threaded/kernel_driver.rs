//! Single-threaded no-copy driver: runs one tile on the calling thread.

use std::ptr;

use tracing::trace;

use super::blocking::{TileConfig, sweep_step};
use crate::error::{GemmError, Result};
use crate::kernels::{KernelCall, KernelKey, KernelTable};
use crate::matrix::reference::scale_column;
use crate::matrix::{GemmProblem, Transpose};

/// Raw view of a (sub-)problem: shape, scalars and offset operand pointers
/// with the caller's strides.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tile {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub beta: f32,
    pub a: *const f32,
    pub lda: usize,
    pub b: *const f32,
    pub ldb: usize,
    pub c: *mut f32,
    pub ldc: usize,
    pub bias: *const f32,
}

// SAFETY: a Tile is only handed to workers whose C ranges (and partial
// buffers) are disjoint; A, B and bias are only read.
unsafe impl Send for Tile {}
unsafe impl Sync for Tile {}

impl Tile {
    pub fn from_problem(problem: &mut GemmProblem<'_>) -> Self {
        Self {
            trans_a: problem.trans_a,
            trans_b: problem.trans_b,
            m: problem.m,
            n: problem.n,
            k: problem.k,
            alpha: problem.alpha,
            beta: problem.beta,
            a: problem.a.as_ptr(),
            lda: problem.lda,
            b: problem.b.as_ptr(),
            ldb: problem.ldb,
            c: problem.c.as_mut_ptr(),
            ldc: problem.ldc,
            bias: problem.bias.map_or(ptr::null(), |bias| bias.as_ptr()),
        }
    }

    /// The `m × n × k` sub-problem starting at row `i0`, column `j0` and
    /// k-index `p0`.
    pub fn slice(&self, i0: usize, j0: usize, p0: usize, m: usize, n: usize, k: usize) -> Self {
        let a_off = match self.trans_a {
            Transpose::N => i0 + p0 * self.lda,
            Transpose::T => p0 + i0 * self.lda,
        };
        let b_off = match self.trans_b {
            Transpose::N => p0 + j0 * self.ldb,
            Transpose::T => j0 + p0 * self.ldb,
        };
        Self {
            m,
            n,
            k,
            a: self.a.wrapping_add(a_off),
            b: self.b.wrapping_add(b_off),
            c: self.c.wrapping_add(i0 + j0 * self.ldc),
            bias: if self.bias.is_null() {
                self.bias
            } else {
                self.bias.wrapping_add(i0)
            },
            ..*self
        }
    }

    fn has_bias(&self) -> bool {
        !self.bias.is_null()
    }
}

/// Computes `tile` with kernels from `table`, on this thread only.
///
/// Empty tiles are a no-op; `k == 0` or `alpha == 0` only scales C by beta
/// (exact zeros for `beta == 0`). Otherwise K is swept in cache blocks: the
/// first block applies the caller's beta and bias, later blocks accumulate
/// with `beta = 1`, so both happen once per element.
///
/// # Safety
///
/// The pointers in `tile` must be valid for the tile's extents and strides,
/// no other thread may touch its C range while this runs, and the CPU must
/// support `table.tier()`.
pub(crate) unsafe fn run_tile(table: &KernelTable, tiles: &TileConfig, tile: Tile) -> Result<()> {
    if tile.m == 0 || tile.n == 0 {
        return Ok(());
    }

    if tile.k == 0 || tile.alpha == 0.0 {
        for j in 0..tile.n {
            // SAFETY: column j of the tile is m valid, exclusively owned elements.
            let col = unsafe { std::slice::from_raw_parts_mut(tile.c.add(j * tile.ldc), tile.m) };
            scale_column(col, tile.beta);
        }
        mark_initialized(&tile);
        return Ok(());
    }

    let [lead_key, one_key, zero_key] =
        KernelKey::driver_keys(tile.trans_a, tile.trans_b, tile.beta, tile.has_bias());

    let leading = table
        .select(lead_key)
        .ok_or(GemmError::KernelUnavailable { key: lead_key })?;
    let accumulate = table
        .select(one_key)
        .ok_or(GemmError::KernelUnavailable { key: one_key })?;
    let cold = table
        .select(zero_key)
        .ok_or(GemmError::KernelUnavailable { key: zero_key })?;

    let overwrite = tile.beta == 0.0 && !tile.has_bias();

    let mut p0 = 0;
    while p0 < tile.k {
        let kb = sweep_step(tile.k - p0, tiles.sweep_k);
        let first = p0 == 0;

        let mut i0 = 0;
        while i0 < tile.m {
            let mb = sweep_step(tile.m - i0, tiles.sweep_m);

            let mut j0 = 0;
            while j0 < tile.n {
                let nb = sweep_step(tile.n - j0, tiles.sweep_n);
                let block = tile.slice(i0, j0, p0, mb, nb, kb);

                let (kernel, beta) = match (first, overwrite) {
                    (true, true) => (cold, 0.0),
                    (true, false) => (leading, tile.beta),
                    (false, _) => (accumulate, 1.0),
                };
                let call = KernelCall {
                    m: mb,
                    n: nb,
                    k: kb,
                    alpha: tile.alpha,
                    a: block.a,
                    lda: block.lda,
                    b: block.b,
                    ldb: block.ldb,
                    beta,
                    c: block.c,
                    ldc: block.ldc,
                    bias: if first { block.bias } else { ptr::null() },
                };
                // SAFETY: `block` lies inside `tile`, which the caller vouches for.
                unsafe { kernel(&call) };

                j0 += nb;
            }
            i0 += mb;
        }
        p0 += kb;
    }

    mark_initialized(&tile);
    Ok(())
}

/// Records that every element of the tile's C range has been written.
///
/// Bookkeeping for memory-checking tools; it has no numerical effect.
fn mark_initialized(tile: &Tile) {
    trace!(
        c = ?tile.c,
        rows = tile.m,
        cols = tile.n,
        ldc = tile.ldc,
        "c range initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::IsaTier;
    use crate::kernels::BetaClass;
    use crate::matrix::reference::ref_gemm;
    use approx::assert_abs_diff_eq;

    fn table() -> Option<&'static KernelTable> {
        let tier = IsaTier::detect();
        if tier == IsaTier::Scalar {
            println!("Skipping - no AVX2/AVX-512");
            return None;
        }
        KernelTable::for_tier(tier)
    }

    fn run(table: &KernelTable, problem: &mut GemmProblem<'_>) -> Result<()> {
        let tiles = TileConfig::for_tier(table.tier());
        unsafe { run_tile(table, &tiles, Tile::from_problem(problem)) }
    }

    #[test]
    fn test_empty_tile_leaves_c_untouched() {
        let table = KernelTable::empty(IsaTier::Avx2);
        let a = vec![1.0; 4];
        let b = vec![1.0; 4];
        let mut c = vec![f32::NAN, 7.0, -0.0, f32::INFINITY];
        let before: Vec<u32> = c.iter().map(|x| x.to_bits()).collect();

        let mut p = GemmProblem::new(0, 2, 2, &a, 1, &b, 2, &mut c, 2).beta(0.0);
        run(&table, &mut p).unwrap();
        let mut p = GemmProblem::new(2, 0, 2, &a, 2, &b, 2, &mut c, 2).beta(0.0);
        run(&table, &mut p).unwrap();

        let after: Vec<u32> = c.iter().map(|x| x.to_bits()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_zero_k_with_zero_beta_clears_non_finite() {
        // No kernel is needed on this path, so an empty table must do.
        let table = KernelTable::empty(IsaTier::Avx2);
        let mut c = vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 3.0, 5.0, 9.0];

        let mut p = GemmProblem::new(2, 2, 0, &[], 2, &[], 1, &mut c, 3).beta(0.0);
        run(&table, &mut p).unwrap();

        assert_eq!(c[..2], [0.0, 0.0]);
        assert_eq!(c[3..5], [0.0, 0.0]);
        assert!(c[2] == f32::NEG_INFINITY && c[5] == 9.0, "padding touched");
    }

    #[test]
    fn test_zero_alpha_scales_by_beta() {
        let table = KernelTable::empty(IsaTier::Avx2);
        let a = vec![f32::NAN; 4];
        let b = vec![f32::NAN; 4];
        let mut c = vec![1.0, -2.0, 3.0, 4.0];

        let mut p = GemmProblem::new(2, 2, 2, &a, 2, &b, 2, &mut c, 2)
            .alpha(0.0)
            .beta(-1.5);
        run(&table, &mut p).unwrap();

        assert_eq!(c, vec![-1.5, 3.0, -4.5, -6.0]);
    }

    #[test]
    fn test_missing_kernel_is_an_error() {
        let Some(full) = table() else { return };
        let a = vec![1.0; 16];
        let b = vec![1.0; 16];

        for missing in [BetaClass::Other, BetaClass::One, BetaClass::Zero] {
            let key = KernelKey::new(Transpose::N, Transpose::N, missing, false);
            let table = full.clone().without(key);
            let mut c = vec![0.0; 16];
            let mut p = GemmProblem::new(4, 4, 4, &a, 4, &b, 4, &mut c, 4).beta(0.5);

            match run(&table, &mut p) {
                Err(GemmError::KernelUnavailable { key: k }) => assert_eq!(k, key),
                other => panic!("expected KernelUnavailable for {key}, got {other:?}"),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build<'a>(
        m: usize,
        n: usize,
        k: usize,
        trans_a: Transpose,
        a: &'a [f32],
        lda: usize,
        b: &'a [f32],
        c: &'a mut [f32],
        beta: f32,
        bias: Option<&'a [f32]>,
    ) -> GemmProblem<'a> {
        let mut p = GemmProblem::new(m, n, k, a, lda, b, k, c, m)
            .trans_a(trans_a)
            .alpha(1.5)
            .beta(beta);
        p.bias = bias;
        p
    }

    #[test]
    fn test_multi_block_sweep_matches_reference() {
        let Some(table) = table() else { return };
        // Small sweep blocks force several K, M and N blocks.
        let tiles = TileConfig {
            sweep_m: 8,
            sweep_n: 3,
            sweep_k: 5,
            ..TileConfig::for_tier(table.tier())
        };
        let (m, n, k) = (37, 11, 29);
        let a: Vec<f32> = (0..m * k).map(|i| ((i * 5) % 17) as f32 * 0.125 - 1.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| ((i * 3) % 19) as f32 * 0.25 - 2.0).collect();
        let bias: Vec<f32> = (0..m).map(|i| i as f32).collect();
        let c0: Vec<f32> = (0..m * n).map(|i| (i % 9) as f32).collect();

        for trans_a in [Transpose::N, Transpose::T] {
            // AVX2 only has fused bias with beta == 0
            for (beta, with_bias) in [(0.0, true), (0.0, false), (1.0, false), (0.75, false)] {
                let lda = if trans_a == Transpose::N { m } else { k };
                let row_bias = with_bias.then_some(bias.as_slice());
                let mut expected = c0.clone();
                let mut got = c0.clone();

                ref_gemm(build(m, n, k, trans_a, &a, lda, &b, &mut expected, beta, row_bias)).unwrap();
                let mut p = build(m, n, k, trans_a, &a, lda, &b, &mut got, beta, row_bias);
                unsafe { run_tile(table, &tiles, Tile::from_problem(&mut p)) }.unwrap();

                for (e, g) in expected.iter().zip(&got) {
                    assert_abs_diff_eq!(*e, *g, epsilon = 1e-3);
                }
            }
        }
    }
}
