//! Launch manifest handed to the trainer backend.

use crate::dpo::DpoConfig;
use crate::model_init::ModelInit;
use reflex_core::{DpoTrainingArguments, Result, TruncationSide};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File name of the manifest inside the output directory.
pub const MANIFEST_FILE: &str = "_reflex_manifest.json";

/// Current manifest layout.
pub const MANIFEST_VERSION: u32 = 1;

/// Tokenizer settings the backend must reproduce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerSettings {
    /// Tokenizer name or path.
    pub name_or_path: String,
    /// Revision on the Hub.
    pub revision: String,
    /// Truncation side.
    pub truncation_side: TruncationSide,
    /// Pad token text.
    pub pad_token: Option<String>,
    /// Effective maximum length.
    pub model_max_length: usize,
    /// Chat template used to render the text fields.
    pub chat_template: String,
}

/// Everything the backend needs for a run.
///
/// The hub token is never written; the backend receives it through the
/// `HF_TOKEN` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchManifest {
    /// Layout version.
    pub format_version: u32,
    /// Processed training split (JSONL).
    pub train_file: PathBuf,
    /// Processed test split (JSONL).
    pub test_file: PathBuf,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Global seed.
    pub seed: u64,
    /// Policy, reference and adapter settings.
    pub model: ModelInit,
    /// Tokenizer settings.
    pub tokenizer: TokenizerSettings,
    /// DPO settings.
    pub dpo: DpoConfig,
    /// Full training arguments.
    pub training: DpoTrainingArguments,
}

impl LaunchManifest {
    /// Path of the manifest for this run.
    pub fn path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE)
    }

    /// Write the manifest into the output directory.
    pub fn write(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.path();
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "Wrote launch manifest");
        Ok(path)
    }
}
