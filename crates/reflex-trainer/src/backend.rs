//! Trainer backends.
//!
//! The optimisation itself happens outside this crate. [`PreferenceTrainer`]
//! is the seam the pipeline drives; [`ExternalTrainer`] implements it by
//! running a trainer program once per phase.
//!
//! # Backend protocol
//!
//! The command is invoked as `<command...> <phase> --manifest <path> [args]`
//! where `phase` is `train`, `evaluate` or `save`:
//!
//! - `train` may receive `--resume-from <checkpoint>`
//! - `save` receives `--output-dir <dir>`
//!
//! Every stdout line that is a JSON object is a log entry (`{"step": 10,
//! "loss": 0.69, ...}`); other lines are forwarded to the log. On success
//! the program writes `<output_dir>/<phase>_metrics.json`:
//!
//! ```json
//! {"metrics": {"train_loss": 0.52}, "global_step": 120, "epoch": 1.0, "log_history": []}
//! ```

use crate::callbacks::{LogEntry, TrainingCallback};
use crate::manifest::LaunchManifest;
use crate::metrics::{Metrics, TrainerState};
use async_trait::async_trait;
use reflex_core::{ReflexError, Result, SecretString};
use reflex_hub::{resolve_token, HubUploader, ModelCard};
use serde::Deserialize;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Result of a training run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainOutput {
    /// Optimizer steps taken.
    pub global_step: u64,
    /// Final metrics (`train_loss`, `train_runtime`, ...).
    pub metrics: Metrics,
}

/// A preference-tuning trainer.
#[async_trait]
pub trait PreferenceTrainer: Send {
    /// Train, resuming from `resume_from` when given.
    async fn train(&mut self, resume_from: Option<&Path>) -> Result<TrainOutput>;

    /// Evaluate on the test split. Keys are prefixed with `eval_`.
    async fn evaluate(&mut self) -> Result<Metrics>;

    /// Save the final model into `output_dir`.
    async fn save_model(&mut self, output_dir: &Path) -> Result<()>;

    /// Write `trainer_state.json`.
    fn save_state(&self) -> Result<()>;

    /// Upload the output directory with `card` as its README.
    async fn push_to_hub(&mut self, card: &ModelCard) -> Result<()>;

    /// Whether this process owns shared outputs.
    fn is_main_process(&self) -> bool {
        true
    }
}

/// A backend invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Training.
    Train,
    /// Evaluation on the test split.
    Evaluate,
    /// Final model save.
    Save,
}

impl Phase {
    /// Argument passed to the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Evaluate => "evaluate",
            Self::Save => "save",
        }
    }
}

/// What a backend phase reports back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseReport {
    /// Phase metrics.
    #[serde(default)]
    pub metrics: Metrics,
    /// Optimizer steps taken.
    #[serde(default)]
    pub global_step: Option<u64>,
    /// Epochs completed.
    #[serde(default)]
    pub epoch: Option<f64>,
    /// Log history, when the backend keeps one.
    #[serde(default)]
    pub log_history: Vec<Value>,
}

impl PhaseReport {
    fn path(output_dir: &Path, phase: Phase) -> PathBuf {
        output_dir.join(format!("{}_metrics.json", phase.as_str()))
    }

    fn load(output_dir: &Path, phase: Phase) -> Result<Option<Self>> {
        let path = Self::path(output_dir, phase);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&std::fs::read_to_string(&path)?)?))
    }
}

/// Where and how to push to the Hub.
#[derive(Debug, Clone)]
struct HubTarget {
    repo_id: Option<String>,
    private: bool,
    token: Option<SecretString>,
}

/// Trainer that runs an external program per phase.
pub struct ExternalTrainer {
    command: Vec<String>,
    manifest_path: PathBuf,
    output_dir: PathBuf,
    hub: HubTarget,
    callbacks: Vec<Box<dyn TrainingCallback>>,
    state: TrainerState,
}

impl std::fmt::Debug for ExternalTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTrainer")
            .field("command", &self.command)
            .field("manifest_path", &self.manifest_path)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl ExternalTrainer {
    /// Write the manifest and prepare to launch `manifest.training.trainer_command`.
    pub fn new(manifest: &LaunchManifest) -> Result<Self> {
        let training = &manifest.training;
        if training.trainer_command.is_empty() {
            return Err(ReflexError::Config(
                "trainer_command is empty; set it to the backend program to run".into(),
            ));
        }
        let manifest_path = manifest.write()?;

        Ok(Self {
            command: training.trainer_command.clone(),
            manifest_path,
            output_dir: manifest.output_dir.clone(),
            hub: HubTarget {
                repo_id: training.resolved_hub_model_id(),
                private: training.hub_private_repo,
                token: resolve_token(training.hub_token.as_ref()),
            },
            callbacks: Vec::new(),
            state: TrainerState::default(),
        })
    }

    /// Add a callback.
    pub fn with_callback(mut self, callback: Box<dyn TrainingCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Run one backend phase to completion.
    pub async fn run_phase(
        &mut self,
        phase: Phase,
        extra_args: &[OsString],
    ) -> Result<Option<PhaseReport>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ReflexError::Config("trainer_command is empty".into()))?;

        // stale reports from an earlier run must not be mistaken for this one
        let report_path = PhaseReport::path(&self.output_dir, phase);
        if report_path.is_file() {
            std::fs::remove_file(&report_path)?;
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(phase.as_str())
            .arg("--manifest")
            .arg(&self.manifest_path)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref token) = self.hub.token {
            command.env("HF_TOKEN", token.expose_secret());
        }

        tracing::info!(phase = phase.as_str(), program = %program, "Launching trainer backend");
        let mut child = command.spawn().map_err(|e| {
            ReflexError::Training(format!("Failed to launch `{program}`: {e}"))
        })?;

        for callback in &mut self.callbacks {
            callback.on_train_start(phase.as_str());
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "reflex::backend", "{line}");
                }
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                self.handle_stdout_line(&line);
            }
        }

        let status = child.wait().await?;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        for callback in &mut self.callbacks {
            callback.on_train_end(phase.as_str());
        }

        if !status.success() {
            return Err(ReflexError::Training(format!(
                "Backend phase `{}` failed with {status}",
                phase.as_str()
            )));
        }

        PhaseReport::load(&self.output_dir, phase)
    }

    fn handle_stdout_line(&mut self, line: &str) {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(object)) => {
                self.state.log_history.push(Value::Object(object.clone()));
                let entry = LogEntry::from_object(object);
                for callback in &mut self.callbacks {
                    callback.on_log(&entry);
                }
            }
            _ => tracing::info!(target: "reflex::backend", "{line}"),
        }
    }

    fn require_report(report: Option<PhaseReport>, phase: Phase) -> Result<PhaseReport> {
        report.ok_or_else(|| {
            ReflexError::Training(format!(
                "Backend phase `{}` exited without writing {}_metrics.json",
                phase.as_str(),
                phase.as_str()
            ))
        })
    }
}

#[async_trait]
impl PreferenceTrainer for ExternalTrainer {
    async fn train(&mut self, resume_from: Option<&Path>) -> Result<TrainOutput> {
        let mut extra = Vec::new();
        if let Some(checkpoint) = resume_from {
            extra.push(OsString::from("--resume-from"));
            extra.push(checkpoint.as_os_str().to_os_string());
        }

        let report = self.run_phase(Phase::Train, &extra).await?;
        let report = Self::require_report(report, Phase::Train)?;
        let global_step = report.global_step.unwrap_or(0);
        self.state.global_step = global_step;
        self.state.epoch = report.epoch;
        if !report.log_history.is_empty() {
            self.state.log_history = report.log_history;
        }

        Ok(TrainOutput {
            global_step,
            metrics: report.metrics,
        })
    }

    async fn evaluate(&mut self) -> Result<Metrics> {
        let report = self.run_phase(Phase::Evaluate, &[]).await?;
        let report = Self::require_report(report, Phase::Evaluate)?;
        Ok(prefix_keys(report.metrics, "eval_"))
    }

    async fn save_model(&mut self, output_dir: &Path) -> Result<()> {
        let extra = [OsString::from("--output-dir"), output_dir.as_os_str().to_os_string()];
        self.run_phase(Phase::Save, &extra).await?;
        tracing::info!(path = %output_dir.display(), "Model saved");
        Ok(())
    }

    fn save_state(&self) -> Result<()> {
        self.state.save_to_dir(&self.output_dir)
    }

    async fn push_to_hub(&mut self, card: &ModelCard) -> Result<()> {
        let repo_id = self
            .hub
            .repo_id
            .clone()
            .ok_or_else(|| ReflexError::Hub("No hub_model_id to push to".into()))?;
        let token = self
            .hub
            .token
            .clone()
            .ok_or_else(|| ReflexError::Hub("No Hub token; set hub_token or HF_TOKEN".into()))?;

        let mut uploader = HubUploader::new(repo_id, self.hub.private, token)?;
        let report = uploader.push_folder(&self.output_dir, card).await?;
        tracing::info!(url = %report.repo_url, files = report.files_uploaded, "Pushed to the Hub");
        Ok(())
    }

    fn is_main_process(&self) -> bool {
        is_rank_zero(std::env::var("RANK").ok().as_deref())
    }
}

fn is_rank_zero(rank: Option<&str>) -> bool {
    rank.map_or(true, |r| r.trim() == "0")
}

/// Prefix every key that lacks `prefix`.
pub fn prefix_keys(metrics: Metrics, prefix: &str) -> Metrics {
    metrics
        .into_iter()
        .map(|(k, v)| {
            if k.starts_with(prefix) {
                (k, v)
            } else {
                (format!("{prefix}{k}"), v)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefix_keys() {
        let metrics: Metrics = [
            ("loss".to_string(), json!(0.5)),
            ("eval_runtime".to_string(), json!(3)),
        ]
        .into_iter()
        .collect();
        let prefixed = prefix_keys(metrics, "eval_");
        assert!(prefixed.contains_key("eval_loss"));
        assert!(prefixed.contains_key("eval_runtime"));
        assert_eq!(prefixed.len(), 2);
    }

    #[test]
    fn test_rank_zero() {
        assert!(is_rank_zero(None));
        assert!(is_rank_zero(Some("0")));
        assert!(!is_rank_zero(Some("3")));
    }

    #[test]
    fn test_phase_report_defaults() {
        let report: PhaseReport =
            serde_json::from_str(r#"{"metrics": {"train_loss": 0.4}}"#).unwrap();
        assert_eq!(report.metrics["train_loss"], json!(0.4));
        assert!(report.global_step.is_none());
        assert!(report.log_history.is_empty());
    }
}
