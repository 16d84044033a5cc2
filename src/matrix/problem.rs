//! GEMM problem description.
//!
//! All matrices are column-major: element `(i, j)` of a matrix with leading
//! dimension `ld` lives at `i + j * ld`.

use std::fmt;

use crate::error::{GemmError, Result};

/// Whether an operand is used as stored (`N`) or transposed (`T`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    N,
    T,
}

impl Transpose {
    pub fn is_trans(self) -> bool {
        self == Transpose::T
    }
}

impl fmt::Display for Transpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transpose::N => "N",
            Transpose::T => "T",
        })
    }
}

/// Packing requested by the caller. Only `None` computes a product here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackMode {
    #[default]
    None,
    PackA,
    PackB,
}

/// `C := alpha * op(A) * op(B) + beta * C (+ bias)`.
///
/// op(A) is m×k, op(B) is k×n, C is m×n. The optional bias holds one value
/// per row of C.
#[derive(Debug)]
pub struct GemmProblem<'a> {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub beta: f32,
    pub a: &'a [f32],
    pub lda: usize,
    pub b: &'a [f32],
    pub ldb: usize,
    pub c: &'a mut [f32],
    pub ldc: usize,
    pub bias: Option<&'a [f32]>,
    pub pack: PackMode,
}

impl<'a> GemmProblem<'a> {
    /// `C := A * B` with no transposes, `alpha = 1`, `beta = 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        m: usize,
        n: usize,
        k: usize,
        a: &'a [f32],
        lda: usize,
        b: &'a [f32],
        ldb: usize,
        c: &'a mut [f32],
        ldc: usize,
    ) -> Self {
        Self {
            trans_a: Transpose::N,
            trans_b: Transpose::N,
            m,
            n,
            k,
            alpha: 1.0,
            beta: 0.0,
            a,
            lda,
            b,
            ldb,
            c,
            ldc,
            bias: None,
            pack: PackMode::None,
        }
    }

    pub fn trans_a(mut self, trans: Transpose) -> Self {
        self.trans_a = trans;
        self
    }

    pub fn trans_b(mut self, trans: Transpose) -> Self {
        self.trans_b = trans;
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    pub fn bias(mut self, bias: &'a [f32]) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn pack(mut self, pack: PackMode) -> Self {
        self.pack = pack;
        self
    }

    /// Stored shape of A as (rows, cols).
    pub fn a_shape(&self) -> (usize, usize) {
        match self.trans_a {
            Transpose::N => (self.m, self.k),
            Transpose::T => (self.k, self.m),
        }
    }

    /// Stored shape of B as (rows, cols).
    pub fn b_shape(&self) -> (usize, usize) {
        match self.trans_b {
            Transpose::N => (self.k, self.n),
            Transpose::T => (self.n, self.k),
        }
    }

    /// Multiply-adds in the full product.
    pub fn work(&self) -> usize {
        self.m.saturating_mul(self.n).saturating_mul(self.k)
    }

    /// Nothing to compute beyond (at most) scaling C by beta.
    pub fn is_degenerate(&self) -> bool {
        self.m == 0 || self.n == 0 || self.k == 0 || self.alpha == 0.0
    }

    /// Checks leading dimensions and buffer lengths.
    pub fn validate(&self) -> Result<()> {
        let (a_rows, a_cols) = self.a_shape();
        let (b_rows, b_cols) = self.b_shape();

        check_operand("a", self.a.len(), a_rows, a_cols, self.lda)?;
        check_operand("b", self.b.len(), b_rows, b_cols, self.ldb)?;
        check_operand("c", self.c.len(), self.m, self.n, self.ldc)?;

        if let Some(bias) = self.bias {
            if bias.len() < self.m {
                return Err(GemmError::invalid(
                    "bias",
                    format!("expected at least {} elements, got {}", self.m, bias.len()),
                ));
            }
        }
        Ok(())
    }
}

/// Elements a column-major `rows × cols` matrix with stride `ld` spans.
pub fn required_len(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        ld * (cols - 1) + rows
    }
}

fn check_operand(name: &'static str, len: usize, rows: usize, cols: usize, ld: usize) -> Result<()> {
    if ld < rows.max(1) {
        return Err(GemmError::invalid(
            name,
            format!("leading dimension {} is smaller than {} rows", ld, rows.max(1)),
        ));
    }
    let needed = required_len(rows, cols, ld);
    if len < needed {
        return Err(GemmError::invalid(
            name,
            format!("{}x{} with ld={} needs {} elements, got {}", rows, cols, ld, needed, len),
        ));
    }
    Ok(())
}
