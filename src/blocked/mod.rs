//! Cache-blocked, copy-based GEMM.
//!
//! Breaks the product into tiles that fit in L1/L2 cache, packs the data
//! for sequential access, then calls the SIMD microkernels for the inner
//! computation. Used for large problems where packing pays for itself.
//!
//! - `packed`: 8×4 AVX2 or 16×8 AVX-512 microkernel, column-chunk threading

pub mod packed;
