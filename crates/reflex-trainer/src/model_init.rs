//! Model loading options handed to the trainer backend.
//!
//! Covers the dtype, quantization, attention kernel and cache settings of the
//! policy, the reference model, and the LoRA adapter config when PEFT is on.

use reflex_core::{
    BnbQuantType, DpoTrainingArguments, ModelArguments, ReflexError, Result, TorchDtype,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Attention kernel used by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttnImplementation {
    /// Plain attention.
    Eager,
    /// FlashAttention-2.
    #[serde(rename = "flash_attention_2")]
    FlashAttention2,
}

impl AttnImplementation {
    /// Gemma models need eager attention; everything else uses FlashAttention-2.
    pub fn for_model(model_name: &str) -> Self {
        if model_name.to_lowercase().contains("gemma") {
            Self::Eager
        } else {
            Self::FlashAttention2
        }
    }
}

/// bitsandbytes quantization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// 4-bit loading.
    pub load_in_4bit: bool,
    /// 8-bit loading.
    pub load_in_8bit: bool,
    /// 4-bit data type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bnb_4bit_quant_type: Option<BnbQuantType>,
    /// Compute dtype for 4-bit matmuls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bnb_4bit_compute_dtype: Option<TorchDtype>,
    /// Nested quantization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bnb_4bit_use_double_quant: Option<bool>,
    /// Storage dtype for packed weights.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bnb_4bit_quant_storage: Option<String>,
}

impl QuantizationConfig {
    /// Resolve from model arguments. `None` when no quantization is requested.
    pub fn from_args(args: &ModelArguments) -> Result<Option<Self>> {
        match (args.load_in_4bit, args.load_in_8bit) {
            (true, true) => Err(ReflexError::Config(
                "load_in_4bit and load_in_8bit are mutually exclusive".into(),
            )),
            (true, false) => {
                // auto keeps the bitsandbytes default compute dtype
                let compute_dtype = match args.torch_dtype {
                    None | Some(TorchDtype::Auto) => TorchDtype::Float16,
                    Some(dtype) => dtype,
                };
                Ok(Some(Self {
                    load_in_4bit: true,
                    load_in_8bit: false,
                    bnb_4bit_quant_type: Some(args.bnb_4bit_quant_type),
                    bnb_4bit_compute_dtype: Some(compute_dtype),
                    bnb_4bit_use_double_quant: Some(args.use_bnb_nested_quant),
                    bnb_4bit_quant_storage: Some(args.bnb_4bit_quant_storage.clone()),
                }))
            }
            (false, true) => Ok(Some(Self {
                load_in_4bit: false,
                load_in_8bit: true,
                bnb_4bit_quant_type: None,
                bnb_4bit_compute_dtype: None,
                bnb_4bit_use_double_quant: None,
                bnb_4bit_quant_storage: None,
            })),
            (false, false) => Ok(None),
        }
    }
}

/// Keyword arguments for loading the policy or reference model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInitKwargs {
    /// Model revision.
    pub revision: String,
    /// Allow custom modelling code.
    pub trust_remote_code: bool,
    /// Attention kernel.
    pub attn_implementation: AttnImplementation,
    /// Weight dtype. `None` (serialized as `null`) leaves the choice to the
    /// loader, which differs from `auto`.
    pub torch_dtype: Option<TorchDtype>,
    /// KV cache; disabled under gradient checkpointing.
    pub use_cache: bool,
    /// Place the whole model on the current process's device.
    pub device_map_current_device: bool,
    /// Quantization, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization_config: Option<QuantizationConfig>,
}

impl ModelInitKwargs {
    /// Resolve loading options for `model_args.model_name_or_path`.
    pub fn resolve(
        model_args: &ModelArguments,
        training_args: &DpoTrainingArguments,
    ) -> Result<Self> {
        let quantization_config = QuantizationConfig::from_args(model_args)?;
        Ok(Self {
            revision: model_args.model_revision.clone(),
            trust_remote_code: model_args.trust_remote_code,
            attn_implementation: AttnImplementation::for_model(&model_args.model_name_or_path),
            torch_dtype: model_args.torch_dtype,
            use_cache: !training_args.gradient_checkpointing,
            device_map_current_device: quantization_config.is_some(),
            quantization_config,
        })
    }
}

/// LoRA adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeftConfig {
    /// Adapter rank.
    pub r: usize,
    /// Scaling numerator.
    pub lora_alpha: usize,
    /// Dropout on adapter inputs.
    pub lora_dropout: f64,
    /// Bias handling.
    pub bias: String,
    /// PEFT task type.
    pub task_type: String,
    /// Modules that receive adapters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_modules: Option<Vec<String>>,
    /// Modules trained in full and saved with the adapter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules_to_save: Option<Vec<String>>,
}

impl PeftConfig {
    /// `None` unless `use_peft` is set.
    pub fn from_args(args: &ModelArguments) -> Option<Self> {
        args.use_peft.then(|| Self {
            r: args.lora_r,
            lora_alpha: args.lora_alpha,
            lora_dropout: args.lora_dropout,
            bias: "none".into(),
            task_type: "CAUSAL_LM".into(),
            target_modules: args.lora_target_modules.clone(),
            modules_to_save: args.lora_modules_to_save.clone(),
        })
    }
}

/// Everything the backend needs to instantiate models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInit {
    /// Policy model name or path.
    pub model: String,
    /// Policy loading options.
    pub model_kwargs: ModelInitKwargs,
    /// Reference model; `None` under PEFT, where the adapter-disabled policy
    /// serves as reference.
    pub ref_model: Option<String>,
    /// Reference loading options.
    pub ref_model_kwargs: Option<ModelInitKwargs>,
    /// Adapter settings.
    pub peft_config: Option<PeftConfig>,
    /// Base model of `model` when `model` is itself a local adapter.
    pub adapter_base_model: Option<String>,
}

impl ModelInit {
    /// Resolve the policy, reference and adapter settings.
    pub fn resolve(
        model_args: &ModelArguments,
        training_args: &DpoTrainingArguments,
    ) -> Result<Self> {
        let model = model_args.model_name_or_path.clone();
        let model_kwargs = ModelInitKwargs::resolve(model_args, training_args)?;
        let peft_config = PeftConfig::from_args(model_args);
        let adapter_base_model = adapter_base_model(Path::new(&model))?;
        if let Some(ref base) = adapter_base_model {
            tracing::info!(
                adapter = %model,
                base = %base,
                "Model is a PEFT adapter; the backend merges it into its base"
            );
        }

        let (ref_model, ref_model_kwargs) = if peft_config.is_some() {
            (None, None)
        } else {
            (Some(model.clone()), Some(model_kwargs.clone()))
        };

        Ok(Self {
            model,
            model_kwargs,
            ref_model,
            ref_model_kwargs,
            peft_config,
            adapter_base_model,
        })
    }
}

#[derive(Deserialize)]
struct AdapterConfig {
    base_model_name_or_path: Option<String>,
}

/// Base model named by a local `adapter_config.json`, if `model_dir` holds one.
pub fn adapter_base_model(model_dir: &Path) -> Result<Option<String>> {
    let path = model_dir.join("adapter_config.json");
    if !path.is_file() {
        return Ok(None);
    }
    let config: AdapterConfig = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    Ok(config.base_model_name_or_path)
}
