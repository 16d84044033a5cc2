//! 8×4 AVX2 microkernel for the packed path.

use super::Microkernel;

/// Computes an 8×4 tile: acc[0:8, 0:4] = A_packed × B_packed
///
/// Keeps 4 YMM registers as accumulators, one per column of the tile (a
/// column of 8 f32 values fills one register). Each step loads 8 values of
/// the packed A column and broadcasts one B value per accumulator.
///
/// # Safety
///
/// Caller must ensure:
/// - CPU supports AVX2 and FMA (checked via `#[target_feature]`)
/// - `a_pack` points to `k * 8` contiguous f32 values (packed A panel)
/// - `b_pack` points to `k * 4` contiguous f32 values (packed B panel)
/// - `acc` points to 32 writable f32 values (column-major, ld = 8)
#[target_feature(enable = "avx2,fma")]
#[allow(clippy::identity_op)]
#[allow(clippy::erasing_op)]
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_8x4_avx2(a_pack: *const f32, b_pack: *const f32, acc: *mut f32, k: usize) {
    use std::arch::x86_64::*;

    let mut c0 = _mm256_setzero_ps();
    let mut c1 = _mm256_setzero_ps();
    let mut c2 = _mm256_setzero_ps();
    let mut c3 = _mm256_setzero_ps();

    // Main loop: for each k, load A once, broadcast B values, FMA into C
    for p in 0..k {
        let a_vec = _mm256_loadu_ps(a_pack.add(p * 8));

        let b0 = _mm256_broadcast_ss(&*b_pack.add(p * 4 + 0));
        let b1 = _mm256_broadcast_ss(&*b_pack.add(p * 4 + 1));
        let b2 = _mm256_broadcast_ss(&*b_pack.add(p * 4 + 2));
        let b3 = _mm256_broadcast_ss(&*b_pack.add(p * 4 + 3));

        c0 = _mm256_fmadd_ps(a_vec, b0, c0);
        c1 = _mm256_fmadd_ps(a_vec, b1, c1);
        c2 = _mm256_fmadd_ps(a_vec, b2, c2);
        c3 = _mm256_fmadd_ps(a_vec, b3, c3);
    }

    _mm256_storeu_ps(acc.add(0 * 8), c0);
    _mm256_storeu_ps(acc.add(1 * 8), c1);
    _mm256_storeu_ps(acc.add(2 * 8), c2);
    _mm256_storeu_ps(acc.add(3 * 8), c3);
}

/// [`kernel_8x4_avx2`] as a [`Microkernel`].
pub struct Avx2Tile;

impl Microkernel for Avx2Tile {
    const MR: usize = 8;
    const NR: usize = 4;

    #[inline]
    unsafe fn compute(k: usize, a_pack: *const f32, b_pack: *const f32, acc: *mut f32) {
        unsafe { kernel_8x4_avx2(a_pack, b_pack, acc, k) }
    }
}
