//! Self-reflection records and their preference-pair form.
//!
//! Each input line carries a question, the model's failed first attempt, and
//! two candidate reflections on that failure. The formatter turns a record
//! into a prompt plus chosen/rejected two-turn conversations.

use crate::chat_templates::Message;
use reflex_core::{ReflexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const PROMPT_PREAMBLE: &str = "You are an advanced reasoning agent that can improve based on \
    self-reflection. You will be given a previous reasoning trial in which you were given a \
    question to answer. You were unsuccessful in answering the question. In a few sentences, \
    Diagnose a possible reason for failure and devise a new, concise, high-level plan that aims \
    to mitigate the same failure. Use complete sentences.";

/// One line of the reflection dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    /// The question the model attempted.
    pub question: String,
    /// The model's unsuccessful first attempt.
    pub first_trial_reasoning: String,
    /// The preferred reflection.
    pub reflection_chosen: String,
    /// The dispreferred reflection.
    pub reflection_rejected: String,
}

impl ReflectionRecord {
    /// Build a record from a parsed JSON object.
    ///
    /// `line` is the 1-based source line, used in error messages. Fields other
    /// than the four required ones are ignored.
    pub fn from_object(object: &Map<String, Value>, line: usize) -> Result<Self> {
        let field = |name: &'static str| -> Result<String> {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(ReflexError::MissingField { line, field: name })
        };

        Ok(Self {
            question: field("question")?,
            first_trial_reasoning: field("first_trial_reasoning")?,
            reflection_chosen: field("reflection_chosen")?,
            reflection_rejected: field("reflection_rejected")?,
        })
    }

    /// The instruction prompt shared by both conversations.
    pub fn user_prompt(&self) -> String {
        build_user_prompt(&self.question, &self.first_trial_reasoning)
    }

    /// Convert into a preference pair.
    pub fn to_pair(&self) -> PreferencePair {
        let prompt = self.user_prompt();
        PreferencePair {
            chosen: vec![
                Message::user(prompt.clone()),
                Message::assistant(self.reflection_chosen.clone()),
            ],
            rejected: vec![
                Message::user(prompt.clone()),
                Message::assistant(self.reflection_rejected.clone()),
            ],
            prompt,
        }
    }
}

/// Interpolate the reflection instruction with a question and failed attempt.
pub fn build_user_prompt(question: &str, first_trial_reasoning: &str) -> String {
    format!(
        "{PROMPT_PREAMBLE}\n\nQuestion: {question}\n\
         Previous trial and your incorrect solution: {first_trial_reasoning}"
    )
}

/// A prompt with a preferred and a dispreferred conversation.
///
/// Both conversations open with the same user turn carrying `prompt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencePair {
    /// The user prompt.
    pub prompt: String,
    /// `[user, assistant]` with the chosen reflection.
    pub chosen: Vec<Message>,
    /// `[user, assistant]` with the rejected reflection.
    pub rejected: Vec<Message>,
}

/// Format a single parsed JSON line into a preference pair.
pub fn format_record(value: &Value, line: usize) -> Result<PreferencePair> {
    let object = value.as_object().ok_or_else(|| ReflexError::Data {
        line,
        message: "expected a JSON object".to_string(),
    })?;
    Ok(ReflectionRecord::from_object(object, line)?.to_pair())
}

fn read_json_lines(path: &Path) -> Result<Vec<(usize, Value)>> {
    let file = File::open(path).map_err(|e| {
        ReflexError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open dataset file {}: {}", path.display(), e),
        ))
    })?;

    let mut values = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_num = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| ReflexError::Data {
            line: line_num,
            message: format!("invalid JSON: {e}"),
        })?;
        values.push((line_num, value));
    }
    Ok(values)
}

/// Load every record of a reflection JSONL file.
///
/// Blank lines are skipped. The first malformed or incomplete line aborts the
/// load.
pub fn load_reflection_records<P: AsRef<Path>>(path: P) -> Result<Vec<ReflectionRecord>> {
    read_json_lines(path.as_ref())?
        .into_iter()
        .map(|(line, value)| match value {
            Value::Object(object) => ReflectionRecord::from_object(&object, line),
            _ => Err(ReflexError::Data {
                line,
                message: "expected a JSON object".to_string(),
            }),
        })
        .collect()
}

/// Load a reflection JSONL file and format every line into a preference pair.
pub fn format_reflection_file<P: AsRef<Path>>(path: P) -> Result<Vec<PreferencePair>> {
    let path = path.as_ref();
    let pairs = read_json_lines(path)?
        .iter()
        .map(|(line, value)| format_record(value, *line))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(path = %path.display(), rows = pairs.len(), "Formatted reflection records");
    Ok(pairs)
}
