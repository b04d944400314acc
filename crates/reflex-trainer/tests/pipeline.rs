//! End-to-end pipeline tests against a recording trainer.
//!
//! These tests verify the full run:
//! - reflection JSONL → formatted pairs → 90/10 split → rendered text
//! - launch manifest contents
//! - trainer call order, metrics files, model card and `use_cache`
//! - resume from the last checkpoint

use async_trait::async_trait;
use reflex_core::{Recipe, Result, SecretString};
use reflex_hub::{collect_upload_files, HubUploader, ModelCard};
use reflex_trainer::{
    DpoPipeline, LaunchManifest, Metrics, PreferenceTrainer, TrainOutput, TrainerState,
    PROCESSED_DATA_DIR,
};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const TOKENIZER_JSON: &str = r#"{
    "version": "1.0",
    "added_tokens": [
        {"id": 1, "content": "</s>", "single_word": false, "lstrip": false,
         "rstrip": false, "normalized": false, "special": true}
    ],
    "pre_tokenizer": {"type": "Whitespace"},
    "model": {
        "type": "WordLevel",
        "vocab": {"<unk>": 0, "</s>": 1, "question": 2, "answer": 3},
        "unk_token": "<unk>"
    }
}"#;

const TOKENIZER_CONFIG_JSON: &str = r#"{"eos_token": "</s>", "model_max_length": 1e30}"#;

type CallLog = Arc<Mutex<Vec<String>>>;

struct RecordingTrainer {
    calls: CallLog,
    output_dir: PathBuf,
}

impl RecordingTrainer {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PreferenceTrainer for RecordingTrainer {
    async fn train(&mut self, resume_from: Option<&Path>) -> Result<TrainOutput> {
        let resume = resume_from
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "none".into());
        self.record(format!("train:{resume}"));
        Ok(TrainOutput {
            global_step: 3,
            metrics: Metrics::from([("train_loss".to_string(), json!(0.42))]),
        })
    }

    async fn evaluate(&mut self) -> Result<Metrics> {
        self.record("evaluate");
        Ok(Metrics::from([("eval_loss".to_string(), json!(0.55))]))
    }

    async fn save_model(&mut self, output_dir: &Path) -> Result<()> {
        self.record("save_model");
        std::fs::write(output_dir.join("config.json"), r#"{"use_cache": false}"#)?;
        Ok(())
    }

    fn save_state(&self) -> Result<()> {
        self.record("save_state");
        TrainerState {
            global_step: 3,
            ..TrainerState::default()
        }
        .save_to_dir(&self.output_dir)
    }

    async fn push_to_hub(&mut self, card: &ModelCard) -> Result<()> {
        self.record(format!("push_to_hub:{}", card.model_name));
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    data_path: PathBuf,
    recipe: Recipe,
}

impl Fixture {
    fn new(rows: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let tokenizer_dir = dir.path().join("tokenizer");
        std::fs::create_dir_all(&tokenizer_dir).unwrap();
        std::fs::write(tokenizer_dir.join("tokenizer.json"), TOKENIZER_JSON).unwrap();
        std::fs::write(tokenizer_dir.join("tokenizer_config.json"), TOKENIZER_CONFIG_JSON).unwrap();

        let data_path = dir.path().join("reflections.jsonl");
        let mut file = std::fs::File::create(&data_path).unwrap();
        for i in 0..rows {
            let row = json!({
                "question": format!("question {i}"),
                "first_trial_reasoning": format!("answer {i}"),
                "reflection_chosen": format!("chosen reflection {i}"),
                "reflection_rejected": format!("rejected reflection {i}"),
            });
            writeln!(file, "{row}").unwrap();
        }

        let mut recipe = Recipe::default();
        recipe.model.model_name_or_path = "HuggingFaceH4/zephyr-7b-beta".into();
        recipe.model.tokenizer_name_or_path = Some(tokenizer_dir.to_string_lossy().into_owned());
        recipe.training.output_dir = dir.path().join("out").to_string_lossy().into_owned();
        recipe.training.hub_model_id = Some("org/reflex-dpo".into());

        Self {
            dir,
            data_path,
            recipe,
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    async fn run(
        &self,
        recipe: Recipe,
    ) -> (reflex_trainer::RunSummary, Vec<String>, LaunchManifest) {
        let calls = CallLog::default();
        let manifest = Arc::new(Mutex::new(None));
        let pipeline = DpoPipeline::new(recipe, &self.data_path).unwrap();

        let summary = {
            let calls = calls.clone();
            let manifest = manifest.clone();
            pipeline
                .run_with(move |m: &LaunchManifest| {
                    *manifest.lock().unwrap() = Some(m.clone());
                    Ok(RecordingTrainer {
                        calls,
                        output_dir: m.output_dir.clone(),
                    })
                })
                .await
                .unwrap()
        };

        let calls = calls.lock().unwrap().clone();
        let manifest = manifest.lock().unwrap().take().unwrap();
        (summary, calls, manifest)
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_full_run_call_order_and_outputs() {
    let fixture = Fixture::new(20);
    let (summary, calls, _) = fixture.run(fixture.recipe.clone()).await;

    assert_eq!(calls, vec!["train:none", "save_state", "save_model", "evaluate"]);
    assert_eq!(summary.train_metrics["train_samples"], json!(18));
    assert_eq!(summary.eval_metrics.as_ref().unwrap()["eval_samples"], json!(2));
    assert!(!summary.pushed);

    let out = fixture.output_dir();
    assert_eq!(read_json(&out.join("train_results.json"))["train_loss"], json!(0.42));
    assert_eq!(read_json(&out.join("eval_results.json"))["eval_loss"], json!(0.55));
    let all = read_json(&out.join("all_results.json"));
    assert_eq!(all["train_samples"], json!(18));
    assert_eq!(all["eval_samples"], json!(2));
    assert_eq!(read_json(&out.join("trainer_state.json"))["global_step"], json!(3));
    assert_eq!(read_json(&out.join("config.json"))["use_cache"], json!(true));

    let card = std::fs::read_to_string(out.join("README.md")).unwrap();
    assert!(card.contains("base_model: HuggingFaceH4/zephyr-7b-beta"));
    assert!(card.contains("alignment-handbook"));
    assert!(card.contains("reflections"));
}

#[tokio::test]
async fn test_processed_splits_and_manifest() {
    let fixture = Fixture::new(20);
    let (_, _, manifest) = fixture.run(fixture.recipe.clone()).await;

    let train = std::fs::read_to_string(&manifest.train_file).unwrap();
    let test = std::fs::read_to_string(&manifest.test_file).unwrap();
    assert_eq!(train.lines().count(), 18);
    assert_eq!(test.lines().count(), 2);

    let row: Value = serde_json::from_str(train.lines().next().unwrap()).unwrap();
    let prompt = row["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("You are an advanced reasoning agent"));
    assert_eq!(row["chosen"][0]["content"], row["prompt"]);
    assert!(row["chosen"][1]["content"].as_str().unwrap().starts_with("chosen reflection"));
    assert!(row["rejected"][1]["content"].as_str().unwrap().starts_with("rejected reflection"));
    // zephyr rendering with an inserted empty system turn
    assert!(row["text_prompt"].as_str().unwrap().starts_with("<|system|>\n</s>\n<|user|>\n"));
    assert!(row["text_chosen"].as_str().unwrap().starts_with("<|assistant|>\nchosen reflection"));

    assert_eq!(manifest.tokenizer.chat_template, "zephyr");
    assert_eq!(manifest.tokenizer.pad_token.as_deref(), Some("</s>"));
    assert_eq!(manifest.seed, 42);
    assert_eq!(manifest.tokenizer.model_max_length, 2048);
    assert_eq!(manifest.model.ref_model.as_deref(), Some("HuggingFaceH4/zephyr-7b-beta"));
}

#[tokio::test]
async fn test_same_seed_same_split() {
    let fixture = Fixture::new(30);
    let (_, _, first) = fixture.run(fixture.recipe.clone()).await;
    let first_test = std::fs::read_to_string(&first.test_file).unwrap();
    let (_, _, second) = fixture.run(fixture.recipe.clone()).await;
    assert_eq!(std::fs::read_to_string(&second.test_file).unwrap(), first_test);
}

#[tokio::test]
async fn test_resumes_from_last_checkpoint() {
    let fixture = Fixture::new(20);
    std::fs::create_dir_all(fixture.output_dir().join("checkpoint-10")).unwrap();
    std::fs::create_dir_all(fixture.output_dir().join("checkpoint-200")).unwrap();

    let (_, calls, _) = fixture.run(fixture.recipe.clone()).await;
    assert_eq!(calls[0], "train:checkpoint-200");

    let mut recipe = fixture.recipe.clone();
    recipe.training.resume_from_checkpoint = Some("checkpoint-10".into());
    let (_, calls, _) = fixture.run(recipe).await;
    assert_eq!(calls[0], "train:checkpoint-10");
}

#[tokio::test]
async fn test_eval_and_push_switches() {
    let fixture = Fixture::new(20);
    let mut recipe = fixture.recipe.clone();
    recipe.training.do_eval = false;
    recipe.training.push_to_hub = true;

    let (summary, calls, _) = fixture.run(recipe).await;
    assert_eq!(
        calls,
        vec!["train:none", "save_state", "save_model", "push_to_hub:org/reflex-dpo"]
    );
    assert!(summary.eval_metrics.is_none());
    assert!(summary.pushed);
    assert!(!fixture.output_dir().join("eval_results.json").exists());
}

#[tokio::test]
async fn test_push_without_hub_model_id() {
    let fixture = Fixture::new(20);
    let mut recipe = fixture.recipe.clone();
    recipe.training.hub_model_id = None;
    recipe.training.push_to_hub = true;

    let (summary, calls, _) = fixture.run(recipe.clone()).await;
    assert_eq!(calls.last().map(String::as_str), Some("push_to_hub:out"));
    assert!(summary.pushed);

    // a bare name is pushed under the token owner's namespace
    let repo_id = recipe.training.resolved_hub_model_id().unwrap();
    assert!(HubUploader::new(repo_id, false, SecretString::new("hf_x")).is_ok());
}

#[tokio::test]
async fn test_processed_data_is_not_uploaded() {
    let fixture = Fixture::new(20);
    let (_, _, manifest) = fixture.run(fixture.recipe.clone()).await;

    let data_dir = fixture.output_dir().join(PROCESSED_DATA_DIR);
    assert_eq!(manifest.train_file, data_dir.join("train.jsonl"));
    assert_eq!(manifest.test_file, data_dir.join("test.jsonl"));

    let uploads: Vec<String> = collect_upload_files(&fixture.output_dir())
        .unwrap()
        .into_iter()
        .map(|(_, remote)| remote)
        .collect();
    assert!(uploads.iter().any(|r| r == "config.json"));
    assert!(uploads.iter().all(|r| !r.starts_with('_')), "{uploads:?}");
}

#[tokio::test]
async fn test_missing_field_aborts_before_training() {
    let fixture = Fixture::new(5);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&fixture.data_path)
        .unwrap();
    let row = r#"{"question": "q", "first_trial_reasoning": "a", "reflection_chosen": "c"}"#;
    writeln!(file, "{row}").unwrap();

    let pipeline = DpoPipeline::new(fixture.recipe.clone(), &fixture.data_path).unwrap();
    let calls = CallLog::default();
    let err = pipeline
        .run_with(|m: &LaunchManifest| {
            Ok(RecordingTrainer {
                calls: calls.clone(),
                output_dir: m.output_dir.clone(),
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Line 6: missing required field `reflection_rejected`");
    assert!(calls.lock().unwrap().is_empty());
}
