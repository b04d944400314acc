//! Common type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Weight dtype requested for model loading.
///
/// `Auto` defers to the checkpoint's own dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TorchDtype {
    /// Use the dtype stored in the checkpoint.
    #[default]
    Auto,
    /// 32-bit floating point.
    Float32,
    /// 16-bit floating point.
    Float16,
    /// Brain floating point (16-bit).
    BFloat16,
}

impl TorchDtype {
    /// Name understood by the trainer backend.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
        }
    }
}

impl fmt::Display for TorchDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 4-bit quantization data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BnbQuantType {
    /// 4-bit Normal Float.
    #[default]
    Nf4,
    /// 4-bit Floating Point.
    Fp4,
}

/// Which end of a sequence the tokenizer drops when truncating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TruncationSide {
    /// Drop tokens from the start.
    Left,
    /// Drop tokens from the end.
    #[default]
    Right,
}

/// DPO loss variants understood by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DpoLossType {
    /// Standard sigmoid DPO loss.
    #[default]
    Sigmoid,
    /// Hinge loss variant.
    Hinge,
    /// Identity Preference Optimization.
    Ipo,
    /// Robust DPO loss for noisy preferences.
    Robust,
    /// Binary classifier optimization on pairs.
    BcoPair,
}

impl DpoLossType {
    /// Name as written in recipes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sigmoid => "sigmoid",
            Self::Hinge => "hinge",
            Self::Ipo => "ipo",
            Self::Robust => "robust",
            Self::BcoPair => "bco_pair",
        }
    }

    /// Whether label smoothing is meaningful for this loss.
    #[must_use]
    pub const fn supports_label_smoothing(&self) -> bool {
        !matches!(self, Self::Hinge | Self::Ipo)
    }
}

/// Learning rate scheduler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LrSchedulerType {
    /// Constant learning rate.
    Constant,
    /// Linear decay.
    #[default]
    Linear,
    /// Cosine annealing.
    Cosine,
    /// Cosine with restarts.
    CosineWithRestarts,
    /// Polynomial decay.
    Polynomial,
}

/// Process log level, as accepted by training recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Let the library pick; resolves to `info`.
    #[default]
    Passive,
    /// Debug output.
    Debug,
    /// Informational output.
    Info,
    /// Warnings only.
    Warning,
    /// Errors only.
    Error,
    /// Treated as `error`.
    Critical,
}

impl LogLevel {
    /// Directive string for a `tracing` env filter.
    #[must_use]
    pub const fn as_filter(&self) -> &'static str {
        match self {
            Self::Passive | Self::Info => "info",
            Self::Debug => "debug",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}
