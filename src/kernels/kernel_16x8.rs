//! 16×8 AVX-512 microkernel for the packed path.

use super::Microkernel;

/// Computes a 16×8 tile: acc[0:16, 0:8] = A_packed × B_packed
///
/// Uses 8 ZMM registers (512-bit) as accumulators, one per tile column.
/// AVX-512 holds 16 f32 values per register, so each step covers 128 output
/// elements with 8 FMAs, which keeps both FMA ports busy on Skylake-X and
/// later.
///
/// # Safety
///
/// Caller must ensure:
/// - CPU supports AVX-512F and FMA (checked via `#[target_feature]`)
/// - `a_pack` points to `k * 16` contiguous f32 values (packed A panel)
/// - `b_pack` points to `k * 8` contiguous f32 values (packed B panel)
/// - `acc` points to 128 writable f32 values (column-major, ld = 16)
#[target_feature(enable = "avx512f,fma")]
#[allow(clippy::identity_op)]
#[allow(clippy::erasing_op)]
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn kernel_16x8_avx512(a_pack: *const f32, b_pack: *const f32, acc: *mut f32, k: usize) {
    use std::arch::x86_64::*;

    // 8 accumulators, one per output column
    let mut c0 = _mm512_setzero_ps();
    let mut c1 = _mm512_setzero_ps();
    let mut c2 = _mm512_setzero_ps();
    let mut c3 = _mm512_setzero_ps();
    let mut c4 = _mm512_setzero_ps();
    let mut c5 = _mm512_setzero_ps();
    let mut c6 = _mm512_setzero_ps();
    let mut c7 = _mm512_setzero_ps();

    for p in 0..k {
        let a_vec = _mm512_loadu_ps(a_pack.add(p * 16));

        c0 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 0)), c0);
        c1 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 1)), c1);
        c2 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 2)), c2);
        c3 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 3)), c3);
        c4 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 4)), c4);
        c5 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 5)), c5);
        c6 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 6)), c6);
        c7 = _mm512_fmadd_ps(a_vec, _mm512_set1_ps(*b_pack.add(p * 8 + 7)), c7);
    }

    _mm512_storeu_ps(acc.add(0 * 16), c0);
    _mm512_storeu_ps(acc.add(1 * 16), c1);
    _mm512_storeu_ps(acc.add(2 * 16), c2);
    _mm512_storeu_ps(acc.add(3 * 16), c3);
    _mm512_storeu_ps(acc.add(4 * 16), c4);
    _mm512_storeu_ps(acc.add(5 * 16), c5);
    _mm512_storeu_ps(acc.add(6 * 16), c6);
    _mm512_storeu_ps(acc.add(7 * 16), c7);
}

/// [`kernel_16x8_avx512`] as a [`Microkernel`].
pub struct Avx512Tile;

impl Microkernel for Avx512Tile {
    const MR: usize = 16;
    const NR: usize = 8;

    #[inline]
    unsafe fn compute(k: usize, a_pack: *const f32, b_pack: *const f32, acc: *mut f32) {
        unsafe { kernel_16x8_avx512(a_pack, b_pack, acc, k) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_16x8_correctness() {
        if !is_x86_feature_detected!("avx512f") || !is_x86_feature_detected!("fma") {
            println!("Skipping - AVX-512 not available");
            return;
        }

        let k = 16;
        let a_pack: Vec<f32> = (0..16 * k).map(|i| (i % 7) as f32).collect();
        let b_pack: Vec<f32> = (0..k * 8).map(|i| (i % 10) as f32).collect();
        let mut acc = vec![0.0; 16 * 8];

        unsafe {
            kernel_16x8_avx512(a_pack.as_ptr(), b_pack.as_ptr(), acc.as_mut_ptr(), k);
        }

        // Naive reference over the packed layouts
        for j in 0..8 {
            for i in 0..16 {
                let mut expected = 0.0;
                for p in 0..k {
                    expected += a_pack[p * 16 + i] * b_pack[p * 8 + j];
                }
                assert_eq!(acc[i + j * 16], expected, "Mismatch at ({}, {})", i, j);
            }
        }
    }
}
