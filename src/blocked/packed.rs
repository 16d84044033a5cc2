//! Copy-based blocked GEMM using the packed microkernels.

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::context::{ExecutionContext, resolve_thread_count};
use crate::error::{GemmError, Result};
use crate::isa::IsaTier;
use crate::kernels::Microkernel;
use crate::kernels::kernel_8x4::Avx2Tile;
use crate::kernels::kernel_16x8::Avx512Tile;
use crate::matrix::problem::required_len;
use crate::matrix::reference::{ref_gemm, scale_column};
use crate::matrix::{GemmProblem, PackMode, Transpose};

/// K-dimension cache block.
const KC: usize = 256;
/// M-dimension cache block (a multiple of every MR).
const MC: usize = 128;

/// One operand as stored by the caller.
#[derive(Clone, Copy)]
struct Operand<'a> {
    data: &'a [f32],
    ld: usize,
    trans: Transpose,
}

impl Operand<'_> {
    /// Element (row, col) of op(X).
    #[inline(always)]
    fn at(&self, row: usize, col: usize) -> f32 {
        match self.trans {
            Transpose::N => self.data[row + col * self.ld],
            Transpose::T => self.data[col + row * self.ld],
        }
    }
}

/// Cache-blocked GEMM: packs op(A) and op(B) into contiguous panels and
/// feeds them to the tier's register-tile microkernel.
///
/// Packing costs O(mk + kn) copies, so this only pays off for problems
/// large in every dimension. C is scaled by beta (and the bias added) once
/// up front; the blocked loops then only accumulate `alpha * A*B`.
///
/// With more than one thread, the columns of C are split into disjoint
/// chunks, one per worker.
pub fn gemm_packed(
    tier: IsaTier,
    nthrs: usize,
    ctx: &ExecutionContext,
    problem: GemmProblem<'_>,
) -> Result<()> {
    problem.validate()?;
    if problem.pack != PackMode::None {
        return Err(GemmError::Unimplemented("packed GEMM"));
    }

    match tier {
        IsaTier::Avx512 if tier.is_available() => run::<Avx512Tile>(nthrs, ctx, problem),
        IsaTier::Avx2 if tier.is_available() => run::<Avx2Tile>(nthrs, ctx, problem),
        _ => ref_gemm(problem),
    }
}

fn run<K: Microkernel>(nthrs: usize, ctx: &ExecutionContext, problem: GemmProblem<'_>) -> Result<()> {
    let GemmProblem {
        trans_a,
        trans_b,
        m,
        n,
        k,
        alpha,
        beta,
        a,
        lda,
        b,
        ldb,
        c,
        ldc,
        bias,
        ..
    } = problem;

    if m == 0 || n == 0 {
        return Ok(());
    }

    let c = &mut c[..required_len(m, n, ldc)];
    let skip_product = k == 0 || alpha == 0.0;
    for j in 0..n {
        let col = &mut c[j * ldc..j * ldc + m];
        scale_column(col, beta);
        if skip_product {
            continue;
        }
        if let Some(bias) = bias {
            for (cij, bi) in col.iter_mut().zip(bias) {
                *cij += bi;
            }
        }
    }
    if skip_product {
        return Ok(());
    }

    let a = Operand {
        data: a,
        ld: lda,
        trans: trans_a,
    };
    let b = Operand {
        data: b,
        ld: ldb,
        trans: trans_b,
    };

    let nthr = resolve_thread_count(nthrs, ctx).min(n.div_ceil(K::NR));
    let pool = match ctx.pool() {
        Some(pool) if nthr > 1 => pool,
        _ => {
            // SAFETY: the tier was checked by the caller.
            unsafe { gemm_block::<K>(m, n, k, alpha, a, b, 0, c, ldc) };
            return Ok(());
        }
    };

    // Whole NR panels per chunk, so only the last chunk has a ragged edge.
    let cols_per_thread = n.div_ceil(nthr).next_multiple_of(K::NR);
    debug!(m, n, k, nthr, cols_per_thread, mr = K::MR, nr = K::NR, "packed fan-out");

    pool.install(|| {
        c.par_chunks_mut(ldc * cols_per_thread)
            .enumerate()
            .for_each(|(idx, chunk)| {
                let j0 = idx * cols_per_thread;
                let cols = cols_per_thread.min(n - j0);
                // SAFETY: as above; chunks are disjoint column ranges of C.
                unsafe { gemm_block::<K>(m, cols, k, alpha, a, b, j0, chunk, ldc) };
            });
    });
    Ok(())
}

/// `C[:, 0..n] += alpha * op(A) * op(B)[:, j0..j0+n]`.
///
/// # Safety
///
/// The CPU must support `K`'s ISA.
#[allow(clippy::too_many_arguments)]
unsafe fn gemm_block<K: Microkernel>(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: Operand<'_>,
    b: Operand<'_>,
    j0: usize,
    c: &mut [f32],
    ldc: usize,
) {
    let kc = k.min(KC);
    let mc = m.min(MC).next_multiple_of(K::MR);

    let mut a_panel = vec![0.0; mc * kc];
    let mut b_panel = vec![0.0; K::NR * kc];
    let mut acc = vec![0.0; K::MR * K::NR];

    for kk in (0..k).step_by(kc) {
        let k_block = kc.min(k - kk);

        for ii in (0..m).step_by(mc) {
            let m_block = mc.min(m - ii);
            pack_a_panel::<K>(&a, &mut a_panel, ii, kk, m_block, k_block);

            for jj in (0..n).step_by(K::NR) {
                let n_block = K::NR.min(n - jj);
                pack_b_panel::<K>(&b, &mut b_panel, j0 + jj, kk, n_block, k_block);

                for ir in (0..m_block).step_by(K::MR) {
                    let m_tile = K::MR.min(m_block - ir);
                    // SAFETY: the panels hold k_block * MR and k_block * NR
                    // values, and acc holds MR * NR.
                    unsafe {
                        K::compute(
                            k_block,
                            a_panel.as_ptr().add(ir * k_block),
                            b_panel.as_ptr(),
                            acc.as_mut_ptr(),
                        );
                    }

                    for j in 0..n_block {
                        let col = &mut c[(jj + j) * ldc + ii + ir..][..m_tile];
                        for (cij, v) in col.iter_mut().zip(&acc[j * K::MR..]) {
                            *cij = alpha.mul_add(*v, *cij);
                        }
                    }
                }
            }
            trace!(kk, ii, k_block, m_block, "packed block done");
        }
    }
}

/// Packs rows `i0..i0+m_block` of op(A), k-slice `p0..p0+k_block`, into
/// MR-row panels: panel `r` holds `a_panel[r*MR*k_block + p*MR + i]`.
/// Rows past `m_block` in the last panel are zero.
fn pack_a_panel<K: Microkernel>(
    a: &Operand<'_>,
    a_panel: &mut [f32],
    i0: usize,
    p0: usize,
    m_block: usize,
    k_block: usize,
) {
    for ir in (0..m_block).step_by(K::MR) {
        let rows = K::MR.min(m_block - ir);
        let panel = &mut a_panel[ir * k_block..(ir + K::MR) * k_block];
        for p in 0..k_block {
            let out = &mut panel[p * K::MR..(p + 1) * K::MR];
            for (i, v) in out.iter_mut().enumerate() {
                *v = if i < rows { a.at(i0 + ir + i, p0 + p) } else { 0.0 };
            }
        }
    }
}

/// Packs columns `j0..j0+n_block` of op(B), k-slice `p0..p0+k_block`, as
/// `b_panel[p*NR + j]`, zero past `n_block`.
fn pack_b_panel<K: Microkernel>(
    b: &Operand<'_>,
    b_panel: &mut [f32],
    j0: usize,
    p0: usize,
    n_block: usize,
    k_block: usize,
) {
    for p in 0..k_block {
        let out = &mut b_panel[p * K::NR..(p + 1) * K::NR];
        for (j, v) in out.iter_mut().enumerate() {
            *v = if j < n_block { b.at(p0 + p, j0 + j) } else { 0.0 };
        }
    }
}
