//! Multi-threaded GEMM drivers.
//!
//! The top-level [`driver::sgemm`] picks a thread goal and a path; the
//! no-copy path spreads the problem over a 3-D (M, N, K) grid of workers on
//! a rayon pool, each running the single-threaded kernel driver on its
//! tile. Thread counts adapt to the problem size, and calls made from
//! inside a parallel region never fan out again.
//!
//! Modules:
//! - `blocking`: splits threads over M, N and K
//! - `kernel_driver`: runs one tile on the calling thread
//! - `nocopy`: per-ISA fan-out, K-split reduction and dispatch
//! - `driver`: thread goal, path choice and the public entry point

pub mod blocking;
pub mod driver;
mod kernel_driver;
pub mod nocopy;
