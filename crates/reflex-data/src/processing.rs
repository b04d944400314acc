//! Chat-template processing of preference pairs for DPO.
//!
//! The prompt is every chosen message except the last; the chosen and
//! rejected completions are the final message of each conversation. Each
//! piece is rendered separately so the trainer can tokenize them apart.

use crate::chat_templates::{ChatTemplate, Message};
use crate::dataset::DatasetSplits;
use crate::reflection::PreferencePair;
use crate::tokenizer::Tokenizer;
use rayon::prelude::*;
use reflex_core::{ReflexError, Result};
use serde::{Deserialize, Serialize};

/// A preference pair with its rendered text fields.
///
/// The conversational fields are kept alongside the rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedPair {
    /// The user prompt.
    pub prompt: String,
    /// Preferred conversation.
    pub chosen: Vec<Message>,
    /// Dispreferred conversation.
    pub rejected: Vec<Message>,
    /// Rendered prompt, ending in an assistant generation header.
    pub text_prompt: String,
    /// Rendered chosen completion.
    pub text_chosen: String,
    /// Rendered rejected completion.
    pub text_rejected: String,
}

/// Settings for DPO template application.
#[derive(Debug, Clone)]
pub struct DpoTemplateOptions {
    /// Template used for rendering.
    pub template: ChatTemplate,
    /// Prepend an empty system turn to prompts that lack one.
    pub auto_insert_empty_system_msg: bool,
}

fn is_conversational(messages: &[Message]) -> bool {
    !messages.is_empty() && messages.iter().all(Message::has_known_role)
}

/// Render one pair.
///
/// `row` is only used in error messages.
pub fn apply_dpo_template(
    pair: &PreferencePair,
    options: &DpoTemplateOptions,
    row: usize,
) -> Result<ProcessedPair> {
    if !is_conversational(&pair.chosen) || !is_conversational(&pair.rejected) {
        return Err(ReflexError::Dataset(format!(
            "Row {row}: could not format example as dialogue for the dpo task; \
             `chosen` and `rejected` must be lists of system/user/assistant messages"
        )));
    }

    let split = pair.chosen.len() - 1;
    let mut prompt_messages = pair.chosen[..split].to_vec();
    let chosen_message = &pair.chosen[split];
    let rejected_message = &pair.rejected[pair.rejected.len() - 1];

    let template = &options.template;
    if options.auto_insert_empty_system_msg
        && template.template_type.supports_system_role()
        && prompt_messages.first().map_or(true, |m| m.role != "system")
    {
        prompt_messages.insert(0, Message::system(""));
    }

    let text_prompt = template.render(&prompt_messages, true);
    let chosen = template.render(std::slice::from_ref(chosen_message), false);
    let rejected = template.render(std::slice::from_ref(rejected_message), false);
    let text_chosen = template.strip_bos(&chosen).to_string();
    let text_rejected = template.strip_bos(&rejected).to_string();

    Ok(ProcessedPair {
        prompt: pair.prompt.clone(),
        chosen: pair.chosen.clone(),
        rejected: pair.rejected.clone(),
        text_prompt,
        text_chosen,
        text_rejected,
    })
}

/// Render every pair, in parallel when `num_workers > 1`.
///
/// Output order matches input order.
pub fn process_pairs(
    pairs: &[PreferencePair],
    options: &DpoTemplateOptions,
    num_workers: Option<usize>,
) -> Result<Vec<ProcessedPair>> {
    match num_workers {
        Some(workers) if workers > 1 => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| ReflexError::Dataset(format!("Unable to build worker pool: {e}")))?;
            pool.install(|| {
                pairs
                    .par_iter()
                    .enumerate()
                    .map(|(i, pair)| apply_dpo_template(pair, options, i))
                    .collect()
            })
        }
        _ => pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| apply_dpo_template(pair, options, i))
            .collect(),
    }
}

/// Render both splits.
pub fn process_splits(
    splits: DatasetSplits<PreferencePair>,
    options: &DpoTemplateOptions,
    num_workers: Option<usize>,
) -> Result<DatasetSplits<ProcessedPair>> {
    tracing::info!(
        template = options.template.template_type.name(),
        workers = num_workers.unwrap_or(1),
        "Applying chat template"
    );
    splits.try_map(|rows| process_pairs(&rows, options, num_workers))
}

/// Token lengths of rendered pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    /// Rows measured.
    pub rows: usize,
    /// Longest prompt.
    pub max_prompt_tokens: usize,
    /// Longest chosen completion.
    pub max_chosen_tokens: usize,
    /// Longest rejected completion.
    pub max_rejected_tokens: usize,
    /// Rows whose prompt exceeds `max_prompt_length`.
    pub prompts_over_limit: usize,
    /// Rows whose prompt plus longer completion exceeds `max_length`.
    pub pairs_over_limit: usize,
}

impl TokenStats {
    /// Measure rendered rows.
    pub fn compute(
        rows: &[ProcessedPair],
        tokenizer: &Tokenizer,
        max_prompt_length: usize,
        max_length: usize,
    ) -> Result<Self> {
        let mut stats = Self {
            rows: rows.len(),
            ..Self::default()
        };
        for row in rows {
            let prompt = tokenizer.count_tokens(&row.text_prompt)?;
            let chosen = tokenizer.count_tokens(&row.text_chosen)?;
            let rejected = tokenizer.count_tokens(&row.text_rejected)?;

            stats.max_prompt_tokens = stats.max_prompt_tokens.max(prompt);
            stats.max_chosen_tokens = stats.max_chosen_tokens.max(chosen);
            stats.max_rejected_tokens = stats.max_rejected_tokens.max(rejected);
            if prompt > max_prompt_length {
                stats.prompts_over_limit += 1;
            }
            if prompt + chosen.max(rejected) > max_length {
                stats.pairs_over_limit += 1;
            }
        }
        Ok(stats)
    }

    /// Log the stats, warning when rows will be truncated.
    pub fn log(&self, split: &str) {
        tracing::info!(
            split,
            rows = self.rows,
            max_prompt = self.max_prompt_tokens,
            max_chosen = self.max_chosen_tokens,
            max_rejected = self.max_rejected_tokens,
            "Token lengths"
        );
        if self.prompts_over_limit > 0 || self.pairs_over_limit > 0 {
            tracing::warn!(
                split,
                prompts = self.prompts_over_limit,
                pairs = self.pairs_over_limit,
                "Rows exceed the configured lengths and will be truncated"
            );
        }
    }
}
