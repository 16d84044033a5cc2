//! Tunables for the threading heuristics.
//!
//! None of these affect numerical results; they only move the point where
//! the driver switches thread counts, ISA tiers or execution paths.

use crate::isa::IsaTier;

pub const ENV_MAX_ISA: &str = "SGEMM_MAX_ISA";
pub const ENV_MIN_WORK_PER_THREAD: &str = "SGEMM_MIN_WORK_PER_THREAD";
pub const ENV_NOCOPY_MAX_WORK: &str = "SGEMM_NOCOPY_MAX_WORK";

/// Errors raised while reading [`GemmConfig`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid ISA tier '{value}' (expected scalar, avx2 or avx512)")]
    InvalidIsa { value: String },
    #[error("invalid value '{value}' for {name}: expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmConfig {
    /// Highest ISA tier the driver may use, even if the CPU has more.
    pub max_isa: IsaTier,
    /// Multiply-adds (`m*n*k`) a thread must get before another one is added.
    pub min_work_per_thread: usize,
    /// Problems up to this many multiply-adds skip packing and go no-copy.
    pub nocopy_max_work: usize,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            max_isa: IsaTier::Avx512,
            min_work_per_thread: 1 << 16,
            nocopy_max_work: 1 << 21,
        }
    }
}

impl GemmConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_ISA) {
            config.max_isa = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MIN_WORK_PER_THREAD) {
            config.min_work_per_thread = parse_positive(ENV_MIN_WORK_PER_THREAD, &value)?;
        }
        if let Some(value) = lookup(ENV_NOCOPY_MAX_WORK) {
            config.nocopy_max_work = parse_positive(ENV_NOCOPY_MAX_WORK, &value)?;
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        }),
    }
}
