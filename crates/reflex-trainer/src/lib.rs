//! DPO training orchestration for reflex.
//!
//! This crate provides:
//! - DPO settings and validation
//! - Model loading options (dtype, quantization, attention, PEFT)
//! - Checkpoint discovery
//! - Metrics and trainer state persistence
//! - Training callbacks
//! - The [`PreferenceTrainer`] seam and the external-process backend
//! - The end-to-end [`DpoPipeline`]
//!
//! Gradients are never computed here. The backend program receives a launch
//! manifest and the processed splits, and reports metrics back.
//!
//! ```ignore
//! use reflex_core::Recipe;
//! use reflex_trainer::DpoPipeline;
//!
//! let recipe = Recipe::from_yaml_file("recipes/dpo.yaml")?;
//! let summary = DpoPipeline::new(recipe, "data/reflections.jsonl")?.run().await?;
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod callbacks;
pub mod checkpoint;
pub mod dpo;
pub mod manifest;
pub mod metrics;
pub mod model_init;
pub mod pipeline;

pub use backend::{ExternalTrainer, Phase, PhaseReport, PreferenceTrainer, TrainOutput};
pub use callbacks::{LogEntry, LoggingCallback, MetricsJsonCallback, TrainingCallback};
pub use checkpoint::{detect_checkpoint, last_checkpoint, list_checkpoints, resume_point};
pub use dpo::DpoConfig;
pub use manifest::{LaunchManifest, TokenizerSettings, MANIFEST_FILE};
pub use metrics::{log_metrics, save_metrics, Metrics, TrainerState};
pub use model_init::{
    AttnImplementation, ModelInit, ModelInitKwargs, PeftConfig, QuantizationConfig,
};
pub use pipeline::{restore_use_cache, DpoPipeline, PreparedData, RunSummary, PROCESSED_DATA_DIR};
