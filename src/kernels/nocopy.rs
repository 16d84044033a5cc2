//! No-copy kernels: GEMM straight off the caller's column-major buffers.
//!
//! One generic body is monomorphized per (transA, transB, beta class, bias)
//! and per ISA; the ISA only supplies the two vector primitives the body is
//! built from. With A not transposed each column of C is updated by axpy
//! over columns of A. With A transposed each element of C is a dot product
//! of a row of op(A) (contiguous in memory) with a column of op(B).
//!
//! Every C element sees the same sequence of fused multiply-adds no matter
//! where the block starts, so splitting a problem along M or N reproduces
//! the serial result bit for bit.

use super::{BetaClass, KernelCall, KernelFn, KernelKey};
use crate::matrix::Transpose;

const BETA_ZERO: u8 = 0;
const BETA_ONE: u8 = 1;
const BETA_OTHER: u8 = 2;

/// Vector primitives one ISA tier provides to the no-copy kernels.
pub trait VectorOps {
    /// `y[i] += alpha * x[i]` for `i < n`.
    ///
    /// # Safety
    ///
    /// `x` and `y` valid for `n` elements; CPU supports the ISA.
    unsafe fn axpy(n: usize, alpha: f32, x: *const f32, y: *mut f32);

    /// `sum(x[i] * y[i])` for `i < n`.
    ///
    /// # Safety
    ///
    /// `x` and `y` valid for `n` elements; CPU supports the ISA.
    unsafe fn dot(n: usize, x: *const f32, y: *const f32) -> f32;

    /// `sum(x[i] * y[i * incy])` for `i < n`.
    ///
    /// # Safety
    ///
    /// `x` valid for `n` elements, `y` for `(n - 1) * incy + 1`.
    #[allow(unsafe_op_in_unsafe_fn)]
    unsafe fn dot_strided(n: usize, x: *const f32, y: *const f32, incy: usize) -> f32 {
        let mut sum = 0.0f32;
        for p in 0..n {
            sum = (*x.add(p)).mul_add(*y.add(p * incy), sum);
        }
        sum
    }
}

/// AVX2 + FMA, 8 lanes.
pub struct Avx2;

/// AVX-512F, 16 lanes.
pub struct Avx512;

impl VectorOps for Avx2 {
    #[inline]
    unsafe fn axpy(n: usize, alpha: f32, x: *const f32, y: *mut f32) {
        unsafe { axpy_avx2(n, alpha, x, y) }
    }

    #[inline]
    unsafe fn dot(n: usize, x: *const f32, y: *const f32) -> f32 {
        unsafe { dot_avx2(n, x, y) }
    }
}

impl VectorOps for Avx512 {
    #[inline]
    unsafe fn axpy(n: usize, alpha: f32, x: *const f32, y: *mut f32) {
        unsafe { axpy_avx512(n, alpha, x, y) }
    }

    #[inline]
    unsafe fn dot(n: usize, x: *const f32, y: *const f32) -> f32 {
        unsafe { dot_avx512(n, x, y) }
    }
}

#[target_feature(enable = "avx2,fma")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn axpy_avx2(n: usize, alpha: f32, x: *const f32, y: *mut f32) {
    use std::arch::x86_64::*;

    let va = _mm256_set1_ps(alpha);
    let mut i = 0;
    while i + 8 <= n {
        let xv = _mm256_loadu_ps(x.add(i));
        let yv = _mm256_loadu_ps(y.add(i));
        _mm256_storeu_ps(y.add(i), _mm256_fmadd_ps(va, xv, yv));
        i += 8;
    }
    // Tail uses a fused op too, so every lane rounds the same way.
    while i < n {
        *y.add(i) = alpha.mul_add(*x.add(i), *y.add(i));
        i += 1;
    }
}

#[target_feature(enable = "avx2,fma")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn dot_avx2(n: usize, x: *const f32, y: *const f32) -> f32 {
    use std::arch::x86_64::*;

    let mut acc = _mm256_setzero_ps();
    let mut i = 0;
    while i + 8 <= n {
        acc = _mm256_fmadd_ps(_mm256_loadu_ps(x.add(i)), _mm256_loadu_ps(y.add(i)), acc);
        i += 8;
    }

    let mut lanes = [0.0f32; 8];
    _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut sum = lanes.iter().sum::<f32>();
    while i < n {
        sum = (*x.add(i)).mul_add(*y.add(i), sum);
        i += 1;
    }
    sum
}

#[target_feature(enable = "avx512f,fma")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn axpy_avx512(n: usize, alpha: f32, x: *const f32, y: *mut f32) {
    use std::arch::x86_64::*;

    let va = _mm512_set1_ps(alpha);
    let mut i = 0;
    while i + 16 <= n {
        let xv = _mm512_loadu_ps(x.add(i));
        let yv = _mm512_loadu_ps(y.add(i));
        _mm512_storeu_ps(y.add(i), _mm512_fmadd_ps(va, xv, yv));
        i += 16;
    }
    while i < n {
        *y.add(i) = alpha.mul_add(*x.add(i), *y.add(i));
        i += 1;
    }
}

#[target_feature(enable = "avx512f,fma")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn dot_avx512(n: usize, x: *const f32, y: *const f32) -> f32 {
    use std::arch::x86_64::*;

    let mut acc = _mm512_setzero_ps();
    let mut i = 0;
    while i + 16 <= n {
        acc = _mm512_fmadd_ps(_mm512_loadu_ps(x.add(i)), _mm512_loadu_ps(y.add(i)), acc);
        i += 16;
    }

    let mut lanes = [0.0f32; 16];
    _mm512_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut sum = lanes.iter().sum::<f32>();
    while i < n {
        sum = (*x.add(i)).mul_add(*y.add(i), sum);
        i += 1;
    }
    sum
}

/// Generic no-copy kernel body.
///
/// # Safety
///
/// See [`KernelFn`].
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn nocopy_kernel<V, const TRANS_A: bool, const TRANS_B: bool, const BETA: u8, const BIAS: bool>(
    call: &KernelCall,
) where
    V: VectorOps,
{
    let KernelCall {
        m,
        n,
        k,
        alpha,
        a,
        lda,
        b,
        ldb,
        beta,
        c,
        ldc,
        bias,
    } = *call;

    for j in 0..n {
        let c_col = c.add(j * ldc);

        if BETA != BETA_ONE || BIAS {
            for i in 0..m {
                let cij = c_col.add(i);
                let mut v = match BETA {
                    BETA_ZERO => 0.0,
                    BETA_ONE => *cij,
                    _ => beta * *cij,
                };
                if BIAS {
                    v += *bias.add(i);
                }
                *cij = v;
            }
        }

        if !TRANS_A {
            for p in 0..k {
                let bpj = if TRANS_B {
                    *b.add(j + p * ldb)
                } else {
                    *b.add(p + j * ldb)
                };
                V::axpy(m, alpha * bpj, a.add(p * lda), c_col);
            }
        } else {
            for i in 0..m {
                let a_row = a.add(i * lda);
                let sum = if TRANS_B {
                    V::dot_strided(k, a_row, b.add(j), ldb)
                } else {
                    V::dot(k, a_row, b.add(j * ldb))
                };
                let cij = c_col.add(i);
                *cij = alpha.mul_add(sum, *cij);
            }
        }
    }
}

/// Entry point for `key` on the ISA `V`.
pub(crate) fn kernel_for<V: VectorOps>(key: KernelKey) -> KernelFn {
    macro_rules! by_beta {
        ($ta:literal, $tb:literal) => {
            match (key.beta, key.bias) {
                (BetaClass::Zero, false) => nocopy_kernel::<V, $ta, $tb, BETA_ZERO, false> as KernelFn,
                (BetaClass::Zero, true) => nocopy_kernel::<V, $ta, $tb, BETA_ZERO, true> as KernelFn,
                (BetaClass::One, false) => nocopy_kernel::<V, $ta, $tb, BETA_ONE, false> as KernelFn,
                (BetaClass::One, true) => nocopy_kernel::<V, $ta, $tb, BETA_ONE, true> as KernelFn,
                (BetaClass::Other, false) => nocopy_kernel::<V, $ta, $tb, BETA_OTHER, false> as KernelFn,
                (BetaClass::Other, true) => nocopy_kernel::<V, $ta, $tb, BETA_OTHER, true> as KernelFn,
            }
        };
    }

    match (key.trans_a, key.trans_b) {
        (Transpose::N, Transpose::N) => by_beta!(false, false),
        (Transpose::N, Transpose::T) => by_beta!(false, true),
        (Transpose::T, Transpose::N) => by_beta!(true, false),
        (Transpose::T, Transpose::T) => by_beta!(true, true),
    }
}
