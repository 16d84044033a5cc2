use crate::error::{GemmError, Result};
use crate::matrix::problem::{GemmProblem, PackMode, Transpose};

/// Reference GEMM: `C := alpha * op(A) * op(B) + beta * C (+ bias)`.
///
/// Column-major j-p-i loop order: for each output column, walk k and
/// stream a column of op(A) into the column of C. When A is not transposed
/// both inner accesses are stride 1, which is the column-major twin of the
/// i-k-j trick for row-major data.
///
/// This is the fallback whenever no SIMD path applies, and the baseline the
/// fast paths are tested against.
pub fn ref_gemm(problem: GemmProblem<'_>) -> Result<()> {
    problem.validate()?;
    if problem.pack != PackMode::None {
        return Err(GemmError::Unimplemented("packed GEMM"));
    }

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

    for j in 0..n {
        let col = &mut c[j * ldc..j * ldc + m];
        scale_column(col, beta);

        if k == 0 || alpha == 0.0 {
            continue;
        }
        if let Some(bias) = bias {
            for (cij, bi) in col.iter_mut().zip(bias) {
                *cij += bi;
            }
        }

        for p in 0..k {
            let bpj = match trans_b {
                Transpose::N => b[p + j * ldb],
                Transpose::T => b[j + p * ldb],
            };
            let scaled = alpha * bpj;
            for (i, cij) in col.iter_mut().enumerate() {
                let aip = match trans_a {
                    Transpose::N => a[i + p * lda],
                    Transpose::T => a[p + i * lda],
                };
                *cij += scaled * aip;
            }
        }
    }
    Ok(())
}

/// `col := beta * col`, writing exact zeros when `beta == 0` so stale NaN or
/// Inf values never survive.
pub fn scale_column(col: &mut [f32], beta: f32) {
    if beta == 0.0 {
        col.fill(0.0);
    } else if beta != 1.0 {
        for x in col.iter_mut() {
            *x *= beta;
        }
    }
}
