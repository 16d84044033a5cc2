//! Thread-grid partitioning for the no-copy path.

use crate::isa::IsaTier;

/// Per-tier granularities.
///
/// `block_*` are the coarse per-thread block sizes used to decide whether M
/// and N alone can feed every thread; `unit_*` are the finest steps a
/// per-thread block is rounded to; `sweep_*` are the cache blocks the
/// single-threaded driver walks inside one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub block_m: usize,
    pub block_n: usize,
    pub block_k: usize,
    pub unit_m: usize,
    pub unit_n: usize,
    pub unit_k: usize,
    pub sweep_m: usize,
    pub sweep_n: usize,
    pub sweep_k: usize,
}

impl TileConfig {
    pub const AVX2: TileConfig = TileConfig {
        block_m: 64,
        block_n: 48,
        block_k: 384,
        unit_m: 16,
        unit_n: 8,
        unit_k: 32,
        sweep_m: 512,
        sweep_n: 48,
        sweep_k: 256,
    };

    pub const AVX512: TileConfig = TileConfig {
        block_m: 96,
        block_n: 64,
        block_k: 256,
        unit_m: 32,
        unit_n: 16,
        unit_k: 32,
        sweep_m: 1024,
        sweep_n: 64,
        sweep_k: 384,
    };

    pub fn for_tier(tier: IsaTier) -> Self {
        match tier {
            IsaTier::Avx512 => Self::AVX512,
            IsaTier::Avx2 | IsaTier::Scalar => Self::AVX2,
        }
    }
}

/// How a problem is spread over a 3-D grid of workers.
///
/// Worker `(im, in, ik)` owns rows `im*block_m..`, columns `in*block_n..`
/// and the k-slice `ik*block_k..`, each clipped to the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPlan {
    /// Threads the plan was made for.
    pub nthr: usize,
    pub nthr_m: usize,
    pub nthr_n: usize,
    pub nthr_k: usize,
    pub block_m: usize,
    pub block_n: usize,
    pub block_k: usize,
}

impl ThreadPlan {
    /// One worker doing the whole problem.
    pub fn serial(m: usize, n: usize, k: usize) -> Self {
        Self {
            nthr: 1,
            nthr_m: 1,
            nthr_n: 1,
            nthr_k: 1,
            block_m: m,
            block_n: n,
            block_k: k,
        }
    }

    /// Workers with a non-empty slice.
    pub fn grid_size(&self) -> usize {
        self.nthr_m * self.nthr_n * self.nthr_k
    }

    /// Grid coordinate of linear worker `ithr`, or `None` if it is idle.
    pub fn coords(&self, ithr: usize) -> Option<(usize, usize, usize)> {
        if ithr >= self.grid_size() {
            return None;
        }
        let im = ithr % self.nthr_m;
        let in_ = (ithr / self.nthr_m) % self.nthr_n;
        let ik = ithr / (self.nthr_m * self.nthr_n);
        Some((im, in_, ik))
    }

    /// Partial-sum buffer elements one K-split worker needs.
    pub fn partial_len(&self) -> usize {
        self.block_m * self.block_n
    }

    /// Scratch elements for all K-split partial sums (zero without a K split).
    pub fn workspace_len(&self) -> usize {
        (self.nthr_k - 1) * self.nthr_m * self.nthr_n * self.partial_len()
    }
}

/// `(start, len)` of block `idx` of size `block` along a dimension of `dim`.
pub fn block_range(idx: usize, block: usize, dim: usize) -> (usize, usize) {
    let start = (idx * block).min(dim);
    let end = (start + block).min(dim);
    (start, end - start)
}

/// Splits `nthrs` threads over the M, N and K axes of an m×n×k problem.
///
/// K is only split when the coarse M×N blocks cannot keep every thread
/// busy. The rest of the budget goes to M and N, using as many threads as
/// possible and, among equal thread counts, the squarest (largest) blocks.
pub fn blocking(m: usize, n: usize, k: usize, nthrs: usize, tiles: &TileConfig) -> ThreadPlan {
    if nthrs <= 1 || m == 0 || n == 0 || k == 0 {
        return ThreadPlan::serial(m, n, k);
    }

    let coarse_mn = m.div_ceil(tiles.block_m) * n.div_ceil(tiles.block_n);
    let mut nthr_k = 1;
    if coarse_mn < nthrs && k >= 2 * tiles.block_k {
        nthr_k = (nthrs / coarse_mn).min(k / tiles.block_k).max(1);
    }

    let (nthr_m, nthr_n) = split_mn(m, n, nthrs / nthr_k, tiles);

    let block_m = round_block(m, nthr_m, tiles.unit_m);
    let block_n = round_block(n, nthr_n, tiles.unit_n);
    let block_k = round_block(k, nthr_k, tiles.unit_k);

    ThreadPlan {
        nthr: nthrs,
        nthr_m: m.div_ceil(block_m),
        nthr_n: n.div_ceil(block_n),
        nthr_k: k.div_ceil(block_k),
        block_m,
        block_n,
        block_k,
    }
}

fn split_mn(m: usize, n: usize, budget: usize, tiles: &TileConfig) -> (usize, usize) {
    let max_m = m.div_ceil(tiles.unit_m).max(1);
    let max_n = n.div_ceil(tiles.unit_n).max(1);

    let mut best = (1, 1);
    let mut best_key = (1, usize::MAX);
    for nthr_m in 1..=budget.min(max_m) {
        let nthr_n = (budget / nthr_m).min(max_n);
        let used = nthr_m * nthr_n;
        let perimeter = m.div_ceil(nthr_m) + n.div_ceil(nthr_n);
        if used > best_key.0 || (used == best_key.0 && perimeter < best_key.1) {
            best = (nthr_m, nthr_n);
            best_key = (used, perimeter);
        }
    }
    best
}

/// Block size for `parts` parts of `dim`, rounded up to `unit`, within `1..=dim`.
fn round_block(dim: usize, parts: usize, unit: usize) -> usize {
    dim.div_ceil(parts).next_multiple_of(unit).min(dim).max(1)
}

/// Next sweep step: a full `block` while at least two remain, otherwise the
/// remainder split in halves so no tiny tail block is left over.
pub fn sweep_step(remaining: usize, block: usize) -> usize {
    if remaining >= 2 * block {
        block
    } else if remaining > block {
        remaining.div_ceil(2)
    } else {
        remaining
    }
}
