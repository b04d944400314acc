//! Recipe configuration for reflex.
//!
//! A recipe is a flat YAML mapping whose keys belong to one of three groups:
//! [`ModelArguments`], [`DataArguments`] and [`DpoTrainingArguments`]. Any
//! key can be overridden on the command line with `--key value` or
//! `--key=value`.

use crate::{
    BnbQuantType, DpoLossType, LogLevel, LrSchedulerType, ReflexError, Result, SecretString,
    TorchDtype, TruncationSide,
};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Model loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelArguments {
    /// Model identifier (HuggingFace repo ID or local path).
    pub model_name_or_path: String,

    /// Revision/branch of the model.
    pub model_revision: String,

    /// Revision of the base model when `model_name_or_path` is an adapter.
    pub base_model_revision: Option<String>,

    /// Tokenizer to load, when it differs from the model.
    pub tokenizer_name_or_path: Option<String>,

    /// Dtype to load the weights in. `None` leaves the choice to the trainer.
    pub torch_dtype: Option<TorchDtype>,

    /// Trust remote code (for custom model implementations).
    pub trust_remote_code: bool,

    /// Train LoRA adapters instead of the full model.
    pub use_peft: bool,

    /// LoRA rank.
    pub lora_r: usize,

    /// LoRA alpha.
    pub lora_alpha: usize,

    /// LoRA dropout.
    pub lora_dropout: f64,

    /// Modules to wrap with LoRA. `None` lets the trainer choose.
    pub lora_target_modules: Option<Vec<String>>,

    /// Extra modules to train and save in full alongside the adapters.
    pub lora_modules_to_save: Option<Vec<String>>,

    /// Load the model in 8-bit.
    pub load_in_8bit: bool,

    /// Load the model in 4-bit.
    pub load_in_4bit: bool,

    /// 4-bit quantization type.
    pub bnb_4bit_quant_type: BnbQuantType,

    /// Quantize the quantization constants as well.
    pub use_bnb_nested_quant: bool,

    /// Storage dtype for packed 4-bit weights.
    pub bnb_4bit_quant_storage: String,
}

impl Default for ModelArguments {
    fn default() -> Self {
        Self {
            model_name_or_path: String::new(),
            model_revision: "main".into(),
            base_model_revision: None,
            tokenizer_name_or_path: None,
            torch_dtype: None,
            trust_remote_code: false,
            use_peft: false,
            lora_r: 16,
            lora_alpha: 32,
            lora_dropout: 0.05,
            lora_target_modules: None,
            lora_modules_to_save: None,
            load_in_8bit: false,
            load_in_4bit: false,
            bnb_4bit_quant_type: BnbQuantType::default(),
            use_bnb_nested_quant: false,
            bnb_4bit_quant_storage: "uint8".into(),
        }
    }
}

/// Dataset and preprocessing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataArguments {
    /// Chat template name (e.g. `chatml`, `llama3`). Detected from the model
    /// name when unset.
    pub chat_template: Option<String>,

    /// Dataset names and mixing proportions. Only the names are used, for the
    /// model card.
    pub dataset_mixer: BTreeMap<String, f64>,

    /// Names of the produced splits.
    pub dataset_splits: Vec<String>,

    /// Worker threads for chat-template processing. `None` or 1 runs inline.
    pub preprocessing_num_workers: Option<usize>,

    /// Tokenizer truncation side. Always forced to `left` for DPO.
    pub truncation_side: Option<TruncationSide>,

    /// Prepend an empty system message to prompts that lack one.
    pub auto_insert_empty_system_msg: bool,

    /// Fraction of rows held out for evaluation.
    pub test_split_size: f64,

    /// Seed for the train/test shuffle.
    pub split_seed: u64,
}

impl Default for DataArguments {
    fn default() -> Self {
        Self {
            chat_template: None,
            dataset_mixer: BTreeMap::new(),
            dataset_splits: vec!["train".into(), "test".into()],
            preprocessing_num_workers: None,
            truncation_side: None,
            auto_insert_empty_system_msg: true,
            test_split_size: 0.1,
            split_seed: 42,
        }
    }
}

/// DPO training arguments handed to the external trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DpoTrainingArguments {
    /// Output directory for the model, metrics and checkpoints.
    pub output_dir: String,

    /// Ignore existing checkpoints in `output_dir`.
    pub overwrite_output_dir: bool,

    /// Run evaluation on the test split after training.
    pub do_eval: bool,

    /// Random seed.
    pub seed: u64,

    /// Learning rate.
    pub learning_rate: f64,

    /// Number of training epochs.
    pub num_train_epochs: f64,

    /// Maximum training steps (overrides epochs if set).
    pub max_steps: Option<usize>,

    /// Train batch size per device.
    pub per_device_train_batch_size: usize,

    /// Eval batch size per device.
    pub per_device_eval_batch_size: usize,

    /// Gradient accumulation steps.
    pub gradient_accumulation_steps: usize,

    /// Recompute activations in the backward pass.
    pub gradient_checkpointing: bool,

    /// Learning rate scheduler type.
    pub lr_scheduler_type: LrSchedulerType,

    /// Warmup ratio.
    pub warmup_ratio: f64,

    /// Optimizer name, interpreted by the trainer.
    pub optim: String,

    /// Train in bfloat16 mixed precision.
    pub bf16: bool,

    /// Logging steps.
    pub logging_steps: usize,

    /// Save steps.
    pub save_steps: Option<usize>,

    /// Keep at most this many checkpoints.
    pub save_total_limit: Option<usize>,

    /// Evaluation strategy (`no`, `steps`, `epoch`).
    pub eval_strategy: String,

    /// DPO temperature.
    pub beta: f64,

    /// DPO loss variant.
    pub loss_type: DpoLossType,

    /// Label smoothing (conservative DPO).
    pub label_smoothing: f64,

    /// Maximum length of prompt + completion in tokens.
    pub max_length: usize,

    /// Maximum prompt length in tokens.
    pub max_prompt_length: usize,

    /// Checkpoint to resume from.
    pub resume_from_checkpoint: Option<String>,

    /// Upload the trained model to the Hub.
    pub push_to_hub: bool,

    /// Target Hub repository. Defaults to the output directory name.
    pub hub_model_id: Option<String>,

    /// Create the Hub repository as private.
    pub hub_private_repo: bool,

    /// Hub token. Falls back to `HF_TOKEN` / the token file.
    pub hub_token: Option<SecretString>,

    /// Process log level.
    pub log_level: LogLevel,

    /// Run name for metrics logs.
    pub run_name: Option<String>,

    /// Integrations the trainer should report to.
    pub report_to: Vec<String>,

    /// External trainer command: program followed by its fixed arguments.
    pub trainer_command: Vec<String>,

    /// JSONL file receiving step metrics. Relative names land in `output_dir`.
    pub metrics_log: Option<String>,
}

impl Default for DpoTrainingArguments {
    fn default() -> Self {
        Self {
            output_dir: "./output".into(),
            overwrite_output_dir: false,
            do_eval: true,
            seed: 42,
            learning_rate: 5e-7,
            num_train_epochs: 1.0,
            max_steps: None,
            per_device_train_batch_size: 8,
            per_device_eval_batch_size: 8,
            gradient_accumulation_steps: 1,
            gradient_checkpointing: false,
            lr_scheduler_type: LrSchedulerType::default(),
            warmup_ratio: 0.1,
            optim: "adamw_torch".into(),
            bf16: false,
            logging_steps: 10,
            save_steps: None,
            save_total_limit: None,
            eval_strategy: "no".into(),
            beta: 0.1,
            loss_type: DpoLossType::default(),
            label_smoothing: 0.0,
            max_length: 1024,
            max_prompt_length: 512,
            resume_from_checkpoint: None,
            push_to_hub: false,
            hub_model_id: None,
            hub_private_repo: false,
            hub_token: None,
            log_level: LogLevel::default(),
            run_name: None,
            report_to: Vec::new(),
            trainer_command: Vec::new(),
            metrics_log: None,
        }
    }
}

impl DpoTrainingArguments {
    /// Output directory as a path.
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    /// Hub repository to push to: `hub_model_id`, or the output directory name.
    pub fn resolved_hub_model_id(&self) -> Option<String> {
        self.hub_model_id.clone().or_else(|| {
            Path::new(&self.output_dir)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
    }
}

/// A complete recipe: model, data and training arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipe {
    /// Model arguments.
    #[serde(flatten)]
    pub model: ModelArguments,

    /// Data arguments.
    #[serde(flatten)]
    pub data: DataArguments,

    /// Training arguments.
    #[serde(flatten)]
    pub training: DpoTrainingArguments,
}

impl Recipe {
    /// Every key a recipe may contain.
    pub fn known_keys() -> Vec<String> {
        match serde_yaml::to_value(Recipe::default()) {
            Ok(Value::Mapping(map)) => map
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Load a recipe from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mapping = read_yaml_mapping(path.as_ref())?;
        Self::from_mapping(mapping)
    }

    /// Build a recipe from command-line arguments: an optional YAML file
    /// followed by `--key value` overrides.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = RecipeArgs::parse(args)?;
        let mut mapping = match args.recipe_path {
            Some(ref path) => read_yaml_mapping(path)?,
            None => Mapping::new(),
        };
        for (key, value) in args.overrides {
            mapping.insert(Value::String(key), value);
        }
        Self::from_mapping(mapping)
    }

    fn from_mapping(mapping: Mapping) -> Result<Self> {
        let known = Self::known_keys();
        let unknown: Vec<String> = mapping
            .keys()
            .map(|k| match k.as_str() {
                Some(s) => s.to_string(),
                None => format!("{k:?}"),
            })
            .filter(|k| !known.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(ReflexError::Config(format!(
                "Unknown recipe keys: {}",
                unknown.join(", ")
            )));
        }

        let mapping = coerce_to_field_types(mapping);
        let recipe: Recipe = serde_yaml::from_value(Value::Mapping(mapping))
            .map_err(|e| ReflexError::Config(format!("Invalid recipe: {e}")))?;
        Ok(recipe)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.model.model_name_or_path.is_empty() {
            return Err(ReflexError::Config(
                "model_name_or_path is required".into(),
            ));
        }
        if self.model.load_in_4bit && self.model.load_in_8bit {
            return Err(ReflexError::Config(
                "load_in_4bit and load_in_8bit are mutually exclusive".into(),
            ));
        }
        let split = self.data.test_split_size;
        if !(split > 0.0 && split < 1.0) {
            return Err(ReflexError::Config(format!(
                "test_split_size must be in (0, 1), got {split}"
            )));
        }
        if self.training.max_prompt_length > self.training.max_length {
            tracing::warn!(
                max_prompt_length = self.training.max_prompt_length,
                max_length = self.training.max_length,
                "max_prompt_length exceeds max_length; completions will be empty after truncation"
            );
        }
        Ok(())
    }

    /// A starter recipe for `reflex init`.
    pub fn sample() -> Self {
        let mut recipe = Self::default();
        recipe.model.model_name_or_path = "HuggingFaceH4/mistral-7b-sft-beta".into();
        recipe.model.torch_dtype = Some(TorchDtype::BFloat16);
        recipe.model.use_peft = true;
        recipe.model.lora_target_modules = Some(
            ["q_proj", "k_proj", "v_proj", "o_proj"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        recipe.training.output_dir = "data/reflex-dpo-lora".into();
        recipe.training.gradient_checkpointing = true;
        recipe.training.bf16 = true;
        recipe.training.per_device_train_batch_size = 4;
        recipe.training.gradient_accumulation_steps = 4;
        recipe.training.lr_scheduler_type = LrSchedulerType::Cosine;
        recipe.training.save_total_limit = Some(1);
        recipe.training.trainer_command = vec!["reflex-dpo-backend".into()];
        recipe
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// List fields whose default is `None`, so their type is not visible in
/// [`Recipe::default`].
const OPTIONAL_LIST_KEYS: &[&str] = &["lora_target_modules", "lora_modules_to_save"];

/// String fields whose default is `None`.
const OPTIONAL_STRING_KEYS: &[&str] = &[
    "base_model_revision",
    "tokenizer_name_or_path",
    "chat_template",
    "resume_from_checkpoint",
    "hub_model_id",
    "hub_token",
    "run_name",
    "metrics_log",
];

/// Bring loosely typed values in line with the recipe's field types.
///
/// Command-line values are parsed as YAML scalars, so `--report_to none`
/// arrives as a string where a list is expected and `--model_revision 1234`
/// as an integer where a string is expected. A scalar given to a list field
/// becomes a one-element list, and numbers or booleans given to string
/// fields (or list-of-string fields) become strings.
fn coerce_to_field_types(mapping: Mapping) -> Mapping {
    let defaults = match serde_yaml::to_value(Recipe::default()) {
        Ok(Value::Mapping(map)) => map,
        _ => Mapping::new(),
    };

    mapping
        .into_iter()
        .map(|(key, value)| {
            let name = key.as_str().unwrap_or_default();
            let is_list = OPTIONAL_LIST_KEYS.contains(&name)
                || matches!(defaults.get(name), Some(Value::Sequence(_)));
            let is_string = OPTIONAL_STRING_KEYS.contains(&name)
                || matches!(defaults.get(name), Some(Value::String(_)));

            let value = if is_list {
                match value {
                    Value::Null => Value::Null,
                    Value::Sequence(items) => {
                        Value::Sequence(items.into_iter().map(scalar_to_string).collect())
                    }
                    scalar => Value::Sequence(vec![scalar_to_string(scalar)]),
                }
            } else if is_string {
                scalar_to_string(value)
            } else {
                value
            };
            (key, value)
        })
        .collect()
}

fn scalar_to_string(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => other,
    }
}

fn read_yaml_mapping(path: &Path) -> Result<Mapping> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ReflexError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read recipe {}: {}", path.display(), e),
        ))
    })?;
    match serde_yaml::from_str::<Value>(&content)? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ReflexError::Config(format!(
            "Recipe {} must be a YAML mapping",
            path.display()
        ))),
    }
}

/// Parsed recipe arguments: an optional recipe file and ordered overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipeArgs {
    /// YAML recipe file, if one was given.
    pub recipe_path: Option<PathBuf>,
    /// `(key, value)` overrides in command-line order.
    pub overrides: Vec<(String, Value)>,
}

impl RecipeArgs {
    /// Parse `[recipe.yaml] [--key value | --key=value | --flag] ...`.
    ///
    /// Values are read as YAML scalars, so `0.1`, `true` and `42` keep their
    /// types. Several values after one key form a list. A key with no value
    /// is `true`. Hyphens in keys become underscores.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let mut parsed = Self::default();
        let mut iter = args.iter().peekable();

        while let Some(arg) = iter.next() {
            let Some(flag) = arg.strip_prefix("--") else {
                let is_yaml = arg.ends_with(".yaml") || arg.ends_with(".yml");
                if parsed.recipe_path.is_none() && parsed.overrides.is_empty() && is_yaml {
                    parsed.recipe_path = Some(PathBuf::from(arg));
                    continue;
                }
                return Err(ReflexError::InvalidArgument(format!(
                    "unexpected positional argument `{arg}`"
                )));
            };

            if flag.is_empty() {
                return Err(ReflexError::InvalidArgument("empty flag `--`".into()));
            }

            if let Some((key, raw)) = flag.split_once('=') {
                parsed.overrides.push((normalize_key(key), parse_scalar(raw)));
                continue;
            }

            let mut values = Vec::new();
            while let Some(next) = iter.peek() {
                if next.starts_with("--") {
                    break;
                }
                values.push(parse_scalar(next));
                iter.next();
            }

            let value = match values.len() {
                0 => Value::Bool(true),
                1 => values.remove(0),
                _ => Value::Sequence(values),
            };
            parsed.overrides.push((normalize_key(flag), value));
        }

        Ok(parsed)
    }
}

fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}

fn parse_scalar(raw: &str) -> Value {
    serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let recipe = Recipe::default();
        assert_eq!(recipe.model.model_revision, "main");
        assert_eq!(recipe.data.test_split_size, 0.1);
        assert_eq!(recipe.data.split_seed, 42);
        assert_eq!(recipe.training.beta, 0.1);
        assert_eq!(recipe.training.seed, 42);
        assert!(recipe.data.auto_insert_empty_system_msg);
    }

    #[test]
    fn test_known_keys_cover_all_groups() {
        let keys = Recipe::known_keys();
        for key in ["model_name_or_path", "chat_template", "beta", "hub_token", "use_peft"] {
            assert!(keys.iter().any(|k| k == key), "missing key {key}");
        }
    }

    #[test]
    fn test_parse_overrides() {
        let args = RecipeArgs::parse([
            "recipe.yaml",
            "--beta=0.05",
            "--use-peft",
            "--lora_target_modules",
            "q_proj",
            "v_proj",
            "--output_dir",
            "out/run",
        ])
        .unwrap();

        assert_eq!(args.recipe_path, Some(PathBuf::from("recipe.yaml")));
        assert_eq!(args.overrides[0], ("beta".to_string(), Value::from(0.05)));
        assert_eq!(args.overrides[1], ("use_peft".to_string(), Value::Bool(true)));
        assert_eq!(
            args.overrides[2].1,
            Value::Sequence(vec![Value::from("q_proj"), Value::from("v_proj")])
        );
        assert_eq!(args.overrides[3].1, Value::from("out/run"));
    }

    #[test]
    fn test_positional_arguments() {
        // trailing words after a flag are its values, not positionals
        let args = RecipeArgs::parse(["--beta", "0.1", "stray"]).unwrap();
        assert!(matches!(args.overrides[0].1, Value::Sequence(_)));

        let err = RecipeArgs::parse(["stray.txt"]).unwrap_err();
        assert!(err.to_string().contains("unexpected positional"));

        let err = RecipeArgs::parse(["--beta=0.1", "late.yaml"]).unwrap_err();
        assert!(err.to_string().contains("unexpected positional"));
    }

    #[test]
    fn test_from_args_merges_file_and_overrides() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "model_name_or_path: base/model").unwrap();
        writeln!(file, "beta: 0.2").unwrap();
        writeln!(file, "load_in_4bit: true").unwrap();
        writeln!(file, "dataset_mixer:").unwrap();
        writeln!(file, "  reflections/hotpotqa: 1.0").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = [path.as_str(), "--beta", "0.3", "--do_eval=false"];
        let recipe = Recipe::from_args(args).unwrap();

        assert_eq!(recipe.model.model_name_or_path, "base/model");
        assert!(recipe.model.load_in_4bit);
        assert_eq!(recipe.training.beta, 0.3);
        assert!(!recipe.training.do_eval);
        assert!(recipe.data.dataset_mixer.contains_key("reflections/hotpotqa"));
    }

    #[test]
    fn test_single_value_for_list_field() {
        let recipe = Recipe::from_args([
            "--trainer_command",
            "reflex-dpo-backend",
            "--lora_target_modules",
            "all-linear",
            "--report_to",
            "none",
            "--dataset_splits",
            "train",
        ])
        .unwrap();

        assert_eq!(recipe.training.trainer_command, vec!["reflex-dpo-backend"]);
        assert_eq!(
            recipe.model.lora_target_modules,
            Some(vec!["all-linear".to_string()])
        );
        assert_eq!(recipe.training.report_to, vec!["none"]);
        assert_eq!(recipe.data.dataset_splits, vec!["train"]);
    }

    #[test]
    fn test_list_values_keep_multiple_entries() {
        let recipe = Recipe::from_args(["--trainer_command", "python", "train.py", "2"]).unwrap();
        assert_eq!(recipe.training.trainer_command, vec!["python", "train.py", "2"]);
    }

    #[test]
    fn test_numeric_values_for_string_fields() {
        let recipe = Recipe::from_args([
            "--model_revision",
            "1234",
            "--run_name",
            "7",
            "--hub_model_id=org/7",
            "--chat_template",
            "true",
        ])
        .unwrap();

        assert_eq!(recipe.model.model_revision, "1234");
        assert_eq!(recipe.training.run_name.as_deref(), Some("7"));
        assert_eq!(recipe.training.hub_model_id.as_deref(), Some("org/7"));
        assert_eq!(recipe.data.chat_template.as_deref(), Some("true"));
        // numeric fields keep their numbers
        let recipe = Recipe::from_args(["--seed", "7"]).unwrap();
        assert_eq!(recipe.training.seed, 7);
    }

    #[test]
    fn test_yaml_file_values_are_coerced() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "model_revision: 20240101").unwrap();
        writeln!(file, "trainer_command: reflex-dpo-backend").unwrap();
        let recipe = Recipe::from_yaml_file(file.path()).unwrap();
        assert_eq!(recipe.model.model_revision, "20240101");
        assert_eq!(recipe.training.trainer_command, vec!["reflex-dpo-backend"]);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Recipe::from_args(["--not_a_field", "1"]).unwrap_err();
        assert!(err.to_string().contains("not_a_field"));
    }

    #[test]
    fn test_validate() {
        let mut recipe = Recipe::default();
        assert!(recipe.validate().is_err());

        recipe.model.model_name_or_path = "m".into();
        assert!(recipe.validate().is_ok());

        recipe.model.load_in_4bit = true;
        recipe.model.load_in_8bit = true;
        assert!(recipe.validate().is_err());

        recipe.model.load_in_8bit = false;
        recipe.data.test_split_size = 1.0;
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_hub_model_id_defaults_to_output_dir_name() {
        let mut args = DpoTrainingArguments::default();
        args.output_dir = "data/zephyr-dpo".into();
        assert_eq!(args.resolved_hub_model_id().as_deref(), Some("zephyr-dpo"));
        args.hub_model_id = Some("org/model".into());
        assert_eq!(args.resolved_hub_model_id().as_deref(), Some("org/model"));
    }

    #[test]
    fn test_sample_round_trips_through_yaml() {
        let yaml = Recipe::sample().to_yaml().unwrap();
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let recipe = Recipe::from_yaml_file(file.path()).unwrap();
        assert!(recipe.model.use_peft);
        assert_eq!(recipe.training.trainer_command, vec!["reflex-dpo-backend"]);
    }
}
