//! Problem description and the reference implementation.
//!
//! The reference GEMM is the correctness baseline for every SIMD path and
//! the fallback when none applies.

pub mod problem;
pub mod reference;

pub use problem::{GemmProblem, PackMode, Transpose};
