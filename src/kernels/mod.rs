//! SIMD kernels and the capability-indexed kernel table.
//!
//! Two families live here:
//! - no-copy kernels (`nocopy`): run directly on the caller's column-major
//!   buffers, one monomorphized entry point per [`KernelKey`]
//! - packed microkernels (`kernel_8x4`, `kernel_16x8`): compute one MR×NR
//!   register tile from packed panels, used by the copy-based path
//!
//! Available microkernels:
//! - `kernel_8x4`: 8×4 tile, AVX2 (4 YMM accumulators)
//! - `kernel_16x8`: 16×8 tile, AVX-512 (8 ZMM accumulators)

pub mod kernel_16x8;
pub mod kernel_8x4;
pub mod nocopy;

use std::fmt;
use std::sync::OnceLock;

use crate::isa::IsaTier;
use crate::matrix::Transpose;

/// Beta categories that need different kernel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BetaClass {
    /// C is overwritten; its old contents (even NaN) are never read.
    Zero,
    /// C is accumulated into unscaled.
    One,
    Other,
}

impl BetaClass {
    pub fn of(beta: f32) -> Self {
        if beta == 0.0 {
            BetaClass::Zero
        } else if beta == 1.0 {
            BetaClass::One
        } else {
            BetaClass::Other
        }
    }

    fn index(self) -> usize {
        match self {
            BetaClass::Zero => 0,
            BetaClass::One => 1,
            BetaClass::Other => 2,
        }
    }
}

/// Which kernel specialization a call needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub beta: BetaClass,
    pub bias: bool,
}

impl KernelKey {
    pub const COUNT: usize = 2 * 2 * 3 * 2;

    pub fn new(trans_a: Transpose, trans_b: Transpose, beta: BetaClass, bias: bool) -> Self {
        Self {
            trans_a,
            trans_b,
            beta,
            bias,
        }
    }

    /// Keys the tile driver needs for one call: the leading kernel (true
    /// beta and bias), the accumulating one (`beta = 1`) and the cold one
    /// (`beta = 0`), in that order.
    pub fn driver_keys(trans_a: Transpose, trans_b: Transpose, beta: f32, bias: bool) -> [KernelKey; 3] {
        [
            KernelKey::new(trans_a, trans_b, BetaClass::of(beta), bias),
            KernelKey::new(trans_a, trans_b, BetaClass::One, false),
            KernelKey::new(trans_a, trans_b, BetaClass::Zero, false),
        ]
    }

    /// Every key, in table order.
    pub fn all() -> impl Iterator<Item = KernelKey> {
        let trans = [Transpose::N, Transpose::T];
        let betas = [BetaClass::Zero, BetaClass::One, BetaClass::Other];
        trans.into_iter().flat_map(move |ta| {
            trans.into_iter().flat_map(move |tb| {
                betas.into_iter().flat_map(move |beta| {
                    [false, true]
                        .into_iter()
                        .map(move |bias| KernelKey::new(ta, tb, beta, bias))
                })
            })
        })
    }

    fn index(self) -> usize {
        let ta = self.trans_a.is_trans() as usize;
        let tb = self.trans_b.is_trans() as usize;
        ((ta * 2 + tb) * 3 + self.beta.index()) * 2 + self.bias as usize
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let beta = match self.beta {
            BetaClass::Zero => "zero",
            BetaClass::One => "one",
            BetaClass::Other => "other",
        };
        write!(
            f,
            "({}, {}, beta={}{})",
            self.trans_a,
            self.trans_b,
            beta,
            if self.bias { ", bias" } else { "" }
        )
    }
}

/// Arguments of one no-copy kernel invocation.
///
/// Computes `C = alpha * op(A) * op(B) + beta * C (+ bias)` on an m×n
/// column-major block of C. Which transposes, beta handling and bias are
/// honoured is baked into the kernel; `beta` is only read by
/// [`BetaClass::Other`] kernels and `bias` only by bias kernels.
#[derive(Debug, Clone, Copy)]
pub struct KernelCall {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub a: *const f32,
    pub lda: usize,
    pub b: *const f32,
    pub ldb: usize,
    pub beta: f32,
    pub c: *mut f32,
    pub ldc: usize,
    pub bias: *const f32,
}

/// Kernel entry point.
///
/// # Safety
///
/// Every pointer in the call must be valid for the extents it describes and
/// the CPU must support the ISA tier the kernel was built for.
pub type KernelFn = unsafe fn(&KernelCall);

/// Immutable mapping from [`KernelKey`] to a kernel, one per ISA tier.
#[derive(Clone)]
pub struct KernelTable {
    tier: IsaTier,
    entries: [Option<KernelFn>; KernelKey::COUNT],
}

impl fmt::Debug for KernelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelTable")
            .field("tier", &self.tier)
            .field("kernels", &self.len())
            .finish()
    }
}

static AVX2_TABLE: OnceLock<KernelTable> = OnceLock::new();
static AVX512_TABLE: OnceLock<KernelTable> = OnceLock::new();

impl KernelTable {
    pub fn empty(tier: IsaTier) -> Self {
        Self {
            tier,
            entries: [None; KernelKey::COUNT],
        }
    }

    /// Shared table for `tier`, built on first use. `Scalar` has none.
    ///
    /// The AVX2 tier has no fused bias kernels except for `beta == 0`.
    pub fn for_tier(tier: IsaTier) -> Option<&'static KernelTable> {
        match tier {
            IsaTier::Scalar => None,
            IsaTier::Avx2 => Some(AVX2_TABLE.get_or_init(|| {
                KernelKey::all()
                    .filter(|key| !key.bias || key.beta == BetaClass::Zero)
                    .fold(KernelTable::empty(tier), |table, key| {
                        table.with_kernel(key, nocopy::kernel_for::<nocopy::Avx2>(key))
                    })
            })),
            IsaTier::Avx512 => Some(AVX512_TABLE.get_or_init(|| {
                KernelKey::all().fold(KernelTable::empty(tier), |table, key| {
                    table.with_kernel(key, nocopy::kernel_for::<nocopy::Avx512>(key))
                })
            })),
        }
    }

    pub fn with_kernel(mut self, key: KernelKey, kernel: KernelFn) -> Self {
        self.entries[key.index()] = Some(kernel);
        self
    }

    pub fn without(mut self, key: KernelKey) -> Self {
        self.entries[key.index()] = None;
        self
    }

    pub fn tier(&self) -> IsaTier {
        self.tier
    }

    /// The kernel for `key`, or `None` if this tier never generated it.
    pub fn select(&self, key: KernelKey) -> Option<KernelFn> {
        self.entries[key.index()]
    }

    /// Whether every kernel in [`KernelKey::driver_keys`] is present.
    pub fn covers(&self, trans_a: Transpose, trans_b: Transpose, beta: f32, bias: bool) -> bool {
        KernelKey::driver_keys(trans_a, trans_b, beta, bias)
            .iter()
            .all(|&key| self.select(key).is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Register-tile microkernel over packed panels.
pub trait Microkernel {
    /// Rows of the register tile.
    const MR: usize;
    /// Columns of the register tile.
    const NR: usize;

    /// Writes the MR×NR product of the packed panels to `acc`
    /// (column-major, leading dimension MR), overwriting it.
    ///
    /// # Safety
    ///
    /// `a_pack` must hold `k * MR` values, `b_pack` `k * NR` values and
    /// `acc` room for `MR * NR`. The CPU must support the kernel's ISA.
    unsafe fn compute(k: usize, a_pack: *const f32, b_pack: *const f32, acc: *mut f32);
}
