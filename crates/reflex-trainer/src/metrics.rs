//! Metrics logging and persistence.
//!
//! Mirrors the files a Hugging Face trainer leaves in its output directory:
//! `<split>_results.json`, a merged `all_results.json`, and
//! `trainer_state.json`.

use reflex_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Named metric values.
pub type Metrics = BTreeMap<String, Value>;

/// Log metrics for a split, one line per metric.
pub fn log_metrics(split: &str, metrics: &Metrics) {
    tracing::info!("***** {split} metrics *****");
    let width = metrics.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in metrics {
        tracing::info!("  {key:<width$} = {}", format_value(value));
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) if n.is_f64() => {
            n.as_f64().map_or_else(|| n.to_string(), |f| format!("{f:.4}"))
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write `<split>_results.json` and merge the metrics into `all_results.json`.
pub fn save_metrics(output_dir: &Path, split: &str, metrics: &Metrics) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    write_json(&output_dir.join(format!("{split}_results.json")), metrics)?;

    let all_path = output_dir.join("all_results.json");
    let mut all: Metrics = if all_path.is_file() {
        serde_json::from_str(&std::fs::read_to_string(&all_path)?)?
    } else {
        Metrics::new()
    };
    all.extend(metrics.iter().map(|(k, v)| (k.clone(), v.clone())));
    write_json(&all_path, &all)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)? + "\n")?;
    Ok(())
}

/// Training progress as recorded by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    /// Optimizer steps taken.
    pub global_step: u64,
    /// Epochs completed, fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<f64>,
    /// Every log entry emitted during training.
    #[serde(default)]
    pub log_history: Vec<Value>,
    /// Best checkpoint, if evaluation tracked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_model_checkpoint: Option<String>,
}

impl TrainerState {
    /// Write `trainer_state.json`.
    pub fn save_to_dir(&self, output_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(output_dir)?;
        write_json(&output_dir.join("trainer_state.json"), self)
    }

    /// Read `trainer_state.json`.
    pub fn load_from_dir(output_dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(output_dir.join("trainer_state.json"))?;
        Ok(serde_json::from_str(&content)?)
    }
}
