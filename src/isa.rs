//! CPU capability tiers.

use std::fmt;
use std::str::FromStr;

use crate::config::{ConfigError, GemmConfig};

/// Instruction-set tier that decides which kernel set is eligible.
///
/// Ordered so that `a <= b` means "everything `a` needs, `b` also has".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsaTier {
    /// No usable SIMD tier; every call goes to the reference path.
    Scalar,
    /// AVX2 + FMA (Haswell and later).
    Avx2,
    /// AVX-512F + FMA (Skylake-X and later).
    Avx512,
}

impl IsaTier {
    /// Highest tier the running CPU supports.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx512f") && is_x86_feature_detected!("fma") {
                return IsaTier::Avx512;
            }
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return IsaTier::Avx2;
            }
        }
        IsaTier::Scalar
    }

    /// Detected tier capped by `config.max_isa`.
    pub fn active(config: &GemmConfig) -> Self {
        Self::detect().min(config.max_isa)
    }

    /// Whether kernels of this tier can run on this CPU.
    pub fn is_available(self) -> bool {
        self <= Self::detect()
    }

    pub fn name(self) -> &'static str {
        match self {
            IsaTier::Scalar => "scalar",
            IsaTier::Avx2 => "avx2",
            IsaTier::Avx512 => "avx512",
        }
    }
}

impl fmt::Display for IsaTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IsaTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" | "none" => Ok(IsaTier::Scalar),
            "avx2" | "avx" => Ok(IsaTier::Avx2),
            "avx512" | "avx-512" | "avx512f" => Ok(IsaTier::Avx512),
            _ => Err(ConfigError::InvalidIsa {
                value: s.to_string(),
            }),
        }
    }
}
