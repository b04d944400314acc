//! Direct Preference Optimization (DPO) settings.
//!
//! DPO trains a policy directly on preference pairs, pushing its implicit
//! reward towards the chosen completion:
//! ```text
//! L_DPO = -log(sigmoid(beta * (log_pi(y_w|x) - log_pi(y_l|x)
//!                              - log_pi_ref(y_w|x) + log_pi_ref(y_l|x))))
//! ```
//!
//! The loss itself is computed by the trainer backend. This module carries
//! the settings handed to it and checks that they are coherent.

use reflex_core::{DpoLossType, DpoTrainingArguments, ReflexError, Result, TruncationSide};
use serde::{Deserialize, Serialize};

/// DPO configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpoConfig {
    /// Beta parameter controlling preference strength.
    /// Typical range: 0.1 to 0.5. Default: 0.1
    pub beta: f64,

    /// Loss function type.
    pub loss_type: DpoLossType,

    /// Label smoothing parameter (0.0 to 0.5).
    /// Not compatible with IPO or Hinge loss types.
    pub label_smoothing: f64,

    /// Maximum length of prompt plus completion, in tokens.
    pub max_length: usize,

    /// Maximum length for prompt tokens.
    pub max_prompt_length: usize,

    /// Side dropped when a prompt is too long.
    pub truncation_side: TruncationSide,
}

impl Default for DpoConfig {
    fn default() -> Self {
        Self {
            beta: 0.1,
            loss_type: DpoLossType::Sigmoid,
            label_smoothing: 0.0,
            max_length: 1024,
            max_prompt_length: 512,
            truncation_side: TruncationSide::Left,
        }
    }
}

impl DpoConfig {
    /// Create a new DPO config with the given beta.
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            ..Default::default()
        }
    }

    /// Take the DPO fields of the training arguments.
    pub fn from_args(args: &DpoTrainingArguments) -> Self {
        Self {
            beta: args.beta,
            loss_type: args.loss_type,
            label_smoothing: args.label_smoothing,
            max_length: args.max_length,
            max_prompt_length: args.max_prompt_length,
            truncation_side: TruncationSide::Left,
        }
    }

    /// Set the loss type.
    pub fn with_loss_type(mut self, loss_type: DpoLossType) -> Self {
        self.loss_type = loss_type;
        self
    }

    /// Set label smoothing.
    pub fn with_label_smoothing(mut self, label_smoothing: f64) -> Self {
        self.label_smoothing = label_smoothing;
        self
    }

    /// Maximum completion length left after the prompt budget.
    pub fn max_completion_length(&self) -> usize {
        self.max_length.saturating_sub(self.max_prompt_length)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.beta <= 0.0 {
            return Err(ReflexError::Config("DPO beta must be positive".into()));
        }

        if !(0.0..=0.5).contains(&self.label_smoothing) {
            return Err(ReflexError::Config(format!(
                "label_smoothing must be in [0, 0.5], got {}",
                self.label_smoothing
            )));
        }

        if self.label_smoothing > 0.0 && !self.loss_type.supports_label_smoothing() {
            return Err(ReflexError::Config(
                "Label smoothing is not compatible with IPO or Hinge loss".into(),
            ));
        }

        if self.max_length == 0 {
            return Err(ReflexError::Config("max_length must be positive".into()));
        }

        Ok(())
    }
}
