//! Training callbacks for monitoring and logging.
//!
//! The backend reports progress as log entries (step, loss, rewards, ...);
//! callbacks receive them as they arrive.
//!
//! - [`LoggingCallback`] - Basic logging with tracing
//! - [`MetricsJsonCallback`] - JSONL metrics file (Wandb-compatible import)

use crate::metrics::Metrics;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A progress report from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Global step, when the entry carries one.
    pub step: Option<u64>,
    /// Reported values.
    pub values: Metrics,
}

impl LogEntry {
    /// Build from a JSON object, taking `step` out of the values.
    pub fn from_object(mut object: serde_json::Map<String, serde_json::Value>) -> Self {
        let step = object.remove("step").and_then(|s| s.as_u64());
        Self {
            step,
            values: object.into_iter().collect(),
        }
    }
}

/// Hooks called while the backend runs.
pub trait TrainingCallback: Send + Sync {
    /// Called before a backend phase starts.
    fn on_train_start(&mut self, _phase: &str) {}

    /// Called for every log entry.
    fn on_log(&mut self, _entry: &LogEntry) {}

    /// Called after a backend phase ends.
    fn on_train_end(&mut self, _phase: &str) {}
}

/// Logging callback for training metrics.
#[derive(Debug, Default)]
pub struct LoggingCallback;

impl LoggingCallback {
    /// Create a new logging callback.
    pub fn new() -> Self {
        Self
    }
}

impl TrainingCallback for LoggingCallback {
    fn on_train_start(&mut self, phase: &str) {
        tracing::info!(phase, "Trainer phase started");
    }

    fn on_log(&mut self, entry: &LogEntry) {
        let values = serde_json::to_string(&entry.values).unwrap_or_default();
        match entry.step {
            Some(step) => tracing::info!(step, %values, "Training step"),
            None => tracing::info!(%values, "Trainer log"),
        }
    }

    fn on_train_end(&mut self, phase: &str) {
        tracing::info!(phase, "Trainer phase finished");
    }
}

/// JSONL metrics callback for Wandb-compatible logging.
///
/// The output format is JSONL with one JSON object per line:
///
/// ```json
/// {"event": "train_start", "phase": "train", "timestamp": "2024-12-31T12:00:00Z"}
/// {"step": 10, "loss": 0.69, "rewards/margins": 0.01, "timestamp": "2024-12-31T12:00:01Z"}
/// ```
pub struct MetricsJsonCallback {
    writer: BufWriter<File>,
    path: PathBuf,
    run_name: Option<String>,
    entries: usize,
}

impl MetricsJsonCallback {
    /// Create a new JSONL metrics callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            run_name: None,
            entries: 0,
        })
    }

    /// Set an optional run name for identification.
    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    fn write_entry(&mut self, entry: serde_json::Value) {
        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        if let Err(e) = writeln!(self.writer, "{}", line) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write metrics entry"
            );
        }
    }
}

impl TrainingCallback for MetricsJsonCallback {
    fn on_train_start(&mut self, phase: &str) {
        let mut entry = serde_json::json!({
            "event": "train_start",
            "phase": phase,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(ref name) = self.run_name {
            entry["run_name"] = serde_json::json!(name);
        }
        self.write_entry(entry);
        let _ = self.writer.flush();
    }

    fn on_log(&mut self, entry: &LogEntry) {
        let mut line = serde_json::Map::new();
        if let Some(step) = entry.step {
            line.insert("step".into(), step.into());
        }
        line.extend(entry.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        line.insert("timestamp".into(), chrono::Utc::now().to_rfc3339().into());
        self.write_entry(serde_json::Value::Object(line));

        self.entries += 1;
        if self.entries % 10 == 0 {
            let _ = self.writer.flush();
        }
    }

    fn on_train_end(&mut self, phase: &str) {
        self.write_entry(serde_json::json!({
            "event": "train_end",
            "phase": phase,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_entry_from_object() {
        let object = json!({"step": 10, "loss": 0.69, "rewards/accuracies": 0.5});
        let entry = LogEntry::from_object(object.as_object().unwrap().clone());
        assert_eq!(entry.step, Some(10));
        assert_eq!(entry.values.len(), 2);
        assert!(!entry.values.contains_key("step"));
    }

    #[test]
    fn test_metrics_json_callback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/metrics.jsonl");
        let mut callback = MetricsJsonCallback::new(&path).unwrap().with_run_name("run-1");

        callback.on_train_start("train");
        let fields = json!({"step": 1, "loss": 0.7});
        let entry = LogEntry::from_object(fields.as_object().unwrap().clone());
        callback.on_log(&entry);
        callback.on_train_end("train");
        drop(callback);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "train_start");
        assert_eq!(lines[0]["run_name"], "run-1");
        assert_eq!(lines[1]["step"], 1);
        assert_eq!(lines[1]["loss"], 0.7);
        assert_eq!(lines[2]["event"], "train_end");
    }
}
