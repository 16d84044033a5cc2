//! Threaded, shape-adaptive single-precision GEMM for x86.
//!
//! Computes `C := alpha * op(A) * op(B) + beta * C (+ bias)` on column-major
//! `f32` matrices, where `op(X)` is `X` or `Xᵀ` and the optional bias adds
//! one value per row. The fast parts are the usual ones: SIMD intrinsics,
//! FMA, cache blocking, and a thread split that fits the problem's shape
//! instead of always chopping rows.
//!
//! ## Usage
//!
//! ```
//! use sgemm::{ExecutionContext, GemmProblem, sgemm};
//!
//! let (m, n, k) = (64, 48, 32);
//! let a = vec![1.0f32; m * k];
//! let b = vec![1.0f32; k * n];
//! let mut c = vec![0.0f32; m * n];
//!
//! let ctx = ExecutionContext::with_threads(4)?;
//! let problem = GemmProblem::new(m, n, k, &a, m, &b, k, &mut c, m);
//! sgemm(&ctx, 4, problem, None)?;
//!
//! assert!(c.iter().all(|&x| x == 32.0));
//! # Ok::<(), sgemm::GemmError>(())
//! ```
//!
//! Transposes, scalars and bias are set on the problem:
//!
//! ```
//! use sgemm::{ExecutionContext, GemmProblem, Transpose, sgemm};
//!
//! let a = vec![1.0f32, 2.0, 3.0, 4.0]; // stored 2×2, used as Aᵀ
//! let b = vec![1.0f32, 0.0, 0.0, 1.0];
//! let bias = vec![10.0f32, 20.0];
//! let mut c = vec![1.0f32; 4];
//!
//! let problem = GemmProblem::new(2, 2, 2, &a, 2, &b, 2, &mut c, 2)
//!     .trans_a(Transpose::T)
//!     .beta(0.0)
//!     .bias(&bias);
//! sgemm(&ExecutionContext::serial(), 1, problem, None)?;
//!
//! assert_eq!(c, vec![11.0, 23.0, 12.0, 24.0]);
//! # Ok::<(), sgemm::GemmError>(())
//! ```
//!
//! ## What's inside
//!
//! - No-copy AVX2 / AVX-512 kernels, one per (transA, transB, beta, bias)
//! - 3-D (M, N, K) thread partitioning with a K-split reduction
//! - 8×4 AVX2 and 16×8 AVX-512 packed microkernels for large problems
//! - Scalar reference fallback on CPUs without AVX2

pub mod blocked;
pub mod config;
pub mod context;
pub mod error;
pub mod isa;
pub mod kernels;
pub mod matrix;
pub mod threaded;

pub use config::{ConfigError, GemmConfig};
pub use context::{ExecutionContext, resolve_thread_count};
pub use error::{GemmError, Result, Status};
pub use isa::IsaTier;
pub use kernels::{BetaClass, KernelKey, KernelTable};
pub use matrix::reference::ref_gemm;
pub use matrix::{GemmProblem, PackMode, Transpose};
pub use threaded::blocking::{ThreadPlan, TileConfig, blocking};
pub use threaded::driver::sgemm;
