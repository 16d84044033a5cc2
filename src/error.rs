//! Error and status types shared by every layer of the GEMM path.

use thiserror::Error;

use crate::config::ConfigError;
use crate::kernels::KernelKey;

/// Everything that can make a GEMM call fail.
///
/// Degenerate shapes (`m == 0`, `k == 0`, `alpha == 0`, ...) are not errors;
/// they are defined no-ops or beta-only rewrites.
#[derive(Error, Debug)]
pub enum GemmError {
    /// The active ISA tier never generated this kernel specialization.
    #[error("no kernel available for {key}")]
    KernelUnavailable { key: KernelKey },
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, GemmError>;

/// Coarse outcome of a call, for callers that only need a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    RuntimeError,
    Unimplemented,
}

impl GemmError {
    pub fn status(&self) -> Status {
        match self {
            GemmError::Unimplemented(_) => Status::Unimplemented,
            _ => Status::RuntimeError,
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        GemmError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

impl Status {
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}
