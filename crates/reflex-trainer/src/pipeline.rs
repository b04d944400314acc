//! The DPO run, from reflection JSONL to a saved (and optionally pushed)
//! model.
//!
//! Steps:
//! 1. log arguments
//! 2. detect the last checkpoint
//! 3. load, format and split the dataset
//! 4. load the tokenizer and render chat templates
//! 5. resolve model loading options and write the launch manifest
//! 6. train, save metrics and state
//! 7. save the model, model card and `use_cache`
//! 8. evaluate (`do_eval`)
//! 9. push (`push_to_hub`)

use crate::backend::{ExternalTrainer, PreferenceTrainer};
use crate::callbacks::{LoggingCallback, MetricsJsonCallback};
use crate::checkpoint::{detect_checkpoint, resume_point};
use crate::dpo::DpoConfig;
use crate::manifest::{LaunchManifest, TokenizerSettings, MANIFEST_VERSION};
use crate::metrics::{log_metrics, save_metrics, Metrics};
use crate::model_init::ModelInit;
use reflex_core::{Recipe, ReflexError, Result, TruncationSide};
use reflex_data::{
    process_splits, sample_indices, write_jsonl, ChatTemplate, DatasetSplits, DpoTemplateOptions,
    PreferenceDataset, PreferencePair, ProcessedPair, TokenStats, Tokenizer,
};
use reflex_hub::{fetch_tokenizer_files, resolve_token, ModelCard};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Number of processed rows logged as samples.
const LOGGED_SAMPLES: usize = 3;

/// Directory under `output_dir` receiving the processed splits.
pub const PROCESSED_DATA_DIR: &str = "_data";

/// Processed splits ready for training.
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Rendered splits.
    pub splits: DatasetSplits<ProcessedPair>,
    /// Template that rendered them.
    pub template: ChatTemplate,
    /// Tokenizer settings for the backend.
    pub tokenizer: TokenizerSettings,
}

impl PreparedData {
    /// Write `train.jsonl` and `test.jsonl` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let train = dir.join("train.jsonl");
        let test = dir.join("test.jsonl");
        write_jsonl(&train, &self.splits.train)?;
        write_jsonl(&test, &self.splits.test)?;
        Ok((train, test))
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Training metrics, `train_samples` included.
    pub train_metrics: Metrics,
    /// Evaluation metrics when `do_eval` is set.
    pub eval_metrics: Option<Metrics>,
    /// Whether the model was pushed.
    pub pushed: bool,
}

/// A configured DPO run.
#[derive(Debug, Clone)]
pub struct DpoPipeline {
    recipe: Recipe,
    data_path: PathBuf,
}

impl DpoPipeline {
    /// Validate the recipe and bind it to a reflection JSONL file.
    pub fn new(recipe: Recipe, data_path: impl Into<PathBuf>) -> Result<Self> {
        recipe.validate()?;
        DpoConfig::from_args(&recipe.training).validate()?;
        Ok(Self {
            recipe,
            data_path: data_path.into(),
        })
    }

    /// The run's recipe.
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Log every argument group.
    pub fn log_arguments(&self) {
        tracing::info!("Model parameters {:?}", self.recipe.model);
        tracing::info!("Data parameters {:?}", self.recipe.data);
        tracing::info!("Training/evaluation parameters {:?}", self.recipe.training);
    }

    /// Load, format and split the reflection file.
    pub fn load_splits(&self) -> Result<DatasetSplits<PreferencePair>> {
        let data = &self.recipe.data;
        let dataset = PreferenceDataset::from_reflection_jsonl(&self.data_path)?;
        let splits = dataset.train_test_split(data.test_split_size, data.split_seed)?;
        tracing::info!("Training on the following splits: {:?}", splits.summary());
        Ok(splits)
    }

    /// Load the tokenizer, truncating from the left.
    pub async fn load_tokenizer(&self) -> Result<Tokenizer> {
        let model = &self.recipe.model;
        let name = self.tokenizer_name();
        let token = resolve_token(self.recipe.training.hub_token.as_ref());
        let files = fetch_tokenizer_files(name, Some(&model.model_revision), token.as_ref()).await?;

        let mut tokenizer =
            Tokenizer::from_files(&files.tokenizer_json, files.tokenizer_config.as_ref())?;
        if self.recipe.data.truncation_side == Some(TruncationSide::Right) {
            tracing::warn!(
                "truncation_side `right` is ignored; DPO prompts truncate from the left"
            );
        }
        // prompts keep their most recent context
        tokenizer.set_truncation_side(TruncationSide::Left);
        tokenizer.prepare_for_training();
        tracing::debug!(?tokenizer, "Tokenizer ready");
        Ok(tokenizer)
    }

    fn tokenizer_name(&self) -> &str {
        let model = &self.recipe.model;
        model
            .tokenizer_name_or_path
            .as_deref()
            .unwrap_or(&model.model_name_or_path)
    }

    /// Render chat templates over both splits and log samples.
    pub fn process(
        &self,
        splits: DatasetSplits<PreferencePair>,
        tokenizer: &Tokenizer,
    ) -> Result<PreparedData> {
        let data = &self.recipe.data;
        let training = &self.recipe.training;
        let template = ChatTemplate::resolve(
            data.chat_template.as_deref(),
            &self.recipe.model.model_name_or_path,
        )?;
        let options = DpoTemplateOptions {
            template: template.clone(),
            auto_insert_empty_system_msg: data.auto_insert_empty_system_msg,
        };

        let splits = process_splits(splits, &options, data.preprocessing_num_workers)?;

        for index in sample_indices(splits.train.len(), LOGGED_SAMPLES, training.seed) {
            let row = &splits.train[index];
            tracing::info!("Prompt sample {index} of the raw training set:\n\n{}", row.text_prompt);
            tracing::info!("Chosen sample {index} of the raw training set:\n\n{}", row.text_chosen);
            tracing::info!(
                "Rejected sample {index} of the raw training set:\n\n{}",
                row.text_rejected
            );
        }

        for (name, rows) in splits.iter() {
            TokenStats::compute(rows, tokenizer, training.max_prompt_length, training.max_length)?
                .log(name);
        }

        let tokenizer_settings = TokenizerSettings {
            name_or_path: self.tokenizer_name().to_string(),
            revision: self.recipe.model.model_revision.clone(),
            truncation_side: tokenizer.truncation_side(),
            pad_token: tokenizer.pad_token().map(str::to_string),
            model_max_length: tokenizer.model_max_length(),
            chat_template: template.template_type.name().to_string(),
        };

        Ok(PreparedData {
            splits,
            template,
            tokenizer: tokenizer_settings,
        })
    }

    /// Load, split, tokenize and render the dataset.
    pub async fn prepare_data(&self) -> Result<PreparedData> {
        let splits = self.load_splits()?;
        let tokenizer = self.load_tokenizer().await?;
        self.process(splits, &tokenizer)
    }

    /// Resolve model options and assemble the manifest.
    pub fn build_manifest(
        &self,
        data: &PreparedData,
        train_file: PathBuf,
        test_file: PathBuf,
    ) -> Result<LaunchManifest> {
        let training = &self.recipe.training;
        let dpo = DpoConfig {
            truncation_side: data.tokenizer.truncation_side,
            ..DpoConfig::from_args(training)
        };
        dpo.validate()?;

        Ok(LaunchManifest {
            format_version: MANIFEST_VERSION,
            train_file,
            test_file,
            output_dir: training.output_path(),
            seed: training.seed,
            model: ModelInit::resolve(&self.recipe.model, training)?,
            tokenizer: data.tokenizer.clone(),
            dpo,
            training: training.clone(),
        })
    }

    /// Model card for this run.
    pub fn model_card(&self) -> ModelCard {
        let training = &self.recipe.training;
        let datasets = self.dataset_names();
        let name = training
            .resolved_hub_model_id()
            .unwrap_or_else(|| training.output_dir.clone());

        ModelCard::new(name)
            .finetuned_from(self.recipe.model.model_name_or_path.clone())
            .datasets(datasets.clone(), datasets)
            .hyperparameter("learning_rate", training.learning_rate)
            .hyperparameter("beta", training.beta)
            .hyperparameter("loss_type", training.loss_type.as_str())
            .hyperparameter("num_train_epochs", training.num_train_epochs)
            .hyperparameter("train_batch_size", training.per_device_train_batch_size)
            .hyperparameter("gradient_accumulation_steps", training.gradient_accumulation_steps)
            .hyperparameter("seed", training.seed)
    }

    // dataset_mixer keys name the datasets; without a mixer, the file stem does
    fn dataset_names(&self) -> Vec<String> {
        let mixer = &self.recipe.data.dataset_mixer;
        if !mixer.is_empty() {
            return mixer.keys().cloned().collect();
        }
        self.data_path
            .file_stem()
            .map(|s| vec![s.to_string_lossy().into_owned()])
            .unwrap_or_default()
    }

    /// Run end to end with the external trainer backend.
    pub async fn run(&self) -> Result<RunSummary> {
        let training = &self.recipe.training;
        let metrics_log = training
            .metrics_log
            .as_ref()
            .map(|name| training.output_path().join(name));
        let run_name = training.run_name.clone();
        self.run_with(move |manifest| {
            let mut trainer =
                ExternalTrainer::new(manifest)?.with_callback(Box::new(LoggingCallback::new()));
            if let Some(path) = metrics_log {
                let mut callback = MetricsJsonCallback::new(&path)?;
                if let Some(name) = run_name {
                    callback = callback.with_run_name(name);
                }
                trainer = trainer.with_callback(Box::new(callback));
            }
            Ok(trainer)
        })
        .await
    }

    /// Run end to end with a trainer built from the launch manifest.
    pub async fn run_with<T, F>(&self, build_trainer: F) -> Result<RunSummary>
    where
        T: PreferenceTrainer,
        F: FnOnce(&LaunchManifest) -> Result<T>,
    {
        let training = &self.recipe.training;
        self.log_arguments();

        let detected = detect_checkpoint(training)?;
        tracing::info!(seed = training.seed, "Seed forwarded to the trainer backend");

        let data = self.prepare_data().await?;
        // `_`-prefixed entries stay out of Hub uploads
        let data_dir = training.output_path().join(PROCESSED_DATA_DIR);
        let (train_file, test_file) = data.write(&data_dir)?;
        let manifest = self.build_manifest(&data, train_file, test_file)?;

        let mut trainer = build_trainer(&manifest)?;
        let resume = resume_point(training, detected.as_deref());
        self.run_training(&mut trainer, &data.splits, resume.as_deref()).await
    }

    /// Train, save, evaluate and push with an already built trainer.
    pub async fn run_training<T: PreferenceTrainer + ?Sized>(
        &self,
        trainer: &mut T,
        splits: &DatasetSplits<ProcessedPair>,
        resume_from: Option<&Path>,
    ) -> Result<RunSummary> {
        let training = &self.recipe.training;
        let output_dir = training.output_path();

        tracing::info!("*** Train ***");
        let train_output = trainer.train(resume_from).await?;
        let mut train_metrics = train_output.metrics;
        train_metrics.insert("train_samples".into(), Value::from(splits.train.len()));
        log_metrics("train", &train_metrics);
        save_metrics(&output_dir, "train", &train_metrics)?;
        trainer.save_state()?;

        tracing::info!("*** Save model ***");
        trainer.save_model(&output_dir).await?;
        tracing::info!(path = %output_dir.display(), "Model saved");

        let mut card = self.model_card();
        for (key, value) in &train_metrics {
            if let Some(v) = value.as_f64() {
                card = card.metric(key.clone(), v);
            }
        }
        if trainer.is_main_process() {
            card.write_to_dir(&output_dir)?;
            restore_use_cache(&output_dir)?;
        }

        let eval_metrics = if training.do_eval {
            tracing::info!("*** Evaluate ***");
            let mut metrics = trainer.evaluate().await?;
            metrics.insert("eval_samples".into(), Value::from(splits.test.len()));
            log_metrics("eval", &metrics);
            save_metrics(&output_dir, "eval", &metrics)?;
            Some(metrics)
        } else {
            None
        };

        if training.push_to_hub {
            tracing::info!("Pushing to hub...");
            trainer.push_to_hub(&card).await?;
        }

        tracing::info!("*** Training complete ***");
        Ok(RunSummary {
            train_metrics,
            eval_metrics,
            pushed: training.push_to_hub,
        })
    }
}

/// Set `use_cache: true` in `output_dir/config.json` for fast inference.
///
/// Returns `false` when the backend wrote no `config.json`.
pub fn restore_use_cache(output_dir: &Path) -> Result<bool> {
    let path = output_dir.join("config.json");
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "No model config to update");
        return Ok(false);
    }

    let mut config: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let object = config.as_object_mut().ok_or_else(|| {
        ReflexError::Serialization(format!("{} is not a JSON object", path.display()))
    })?;
    object.insert("use_cache".into(), Value::Bool(true));
    std::fs::write(&path, serde_json::to_string_pretty(&config)? + "\n")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_restore_use_cache() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!restore_use_cache(dir.path()).unwrap());

        std::fs::write(
            dir.path().join("config.json"),
            r#"{"model_type": "mistral", "use_cache": false}"#,
        )
        .unwrap();
        assert!(restore_use_cache(dir.path()).unwrap());
        let raw = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        let config: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(config["use_cache"], json!(true));
        assert_eq!(config["model_type"], json!("mistral"));
    }

    #[test]
    fn test_dataset_names() {
        let mut recipe = Recipe::default();
        recipe.model.model_name_or_path = "org/base".into();
        let pipeline = DpoPipeline::new(recipe.clone(), "data/reflections_v2.jsonl").unwrap();
        assert_eq!(pipeline.dataset_names(), vec!["reflections_v2"]);

        recipe.data.dataset_mixer.insert("org/reflections".into(), 1.0);
        let pipeline = DpoPipeline::new(recipe, "x.jsonl").unwrap();
        let card = pipeline.model_card();
        assert_eq!(card.datasets, vec!["org/reflections"]);
        assert_eq!(card.finetuned_from.as_deref(), Some("org/base"));
        assert_eq!(card.tags, vec!["alignment-handbook"]);
    }

    #[test]
    fn test_new_rejects_invalid_recipe() {
        assert!(DpoPipeline::new(Recipe::default(), "x.jsonl").is_err());

        let mut recipe = Recipe::default();
        recipe.model.model_name_or_path = "org/base".into();
        recipe.training.beta = 0.0;
        assert!(DpoPipeline::new(recipe, "x.jsonl").is_err());
    }
}
