//! Chat templates for rendering conversations into model-specific text.
//!
//! DPO needs three renderings per preference pair: the prompt (with a
//! generation header so the completion follows naturally) and the chosen and
//! rejected completions on their own. [`ChatTemplate::render`] covers both
//! through its `add_generation_prompt` switch.

use reflex_core::{ReflexError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", or "assistant"
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Whether the role is one of `system`, `user`, `assistant`.
    pub fn has_known_role(&self) -> bool {
        matches!(self.role.as_str(), "system" | "user" | "assistant")
    }
}

/// Known chat template types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTemplateType {
    /// `<|im_start|>role\ncontent<|im_end|>`
    ChatMl,
    /// `[INST] <<SYS>>...<</SYS>> message [/INST]`
    Llama2,
    /// `<|start_header_id|>role<|end_header_id|>\n\ncontent<|eot_id|>`
    Llama3,
    /// `[INST] message [/INST]`
    Mistral,
    /// `<start_of_turn>role\ncontent<end_of_turn>`
    Gemma,
    /// `<|user|>\ncontent<|end|>`
    Phi3,
    /// `<|im_start|>role<|im_sep|>content<|im_end|>`
    Phi4,
    /// ChatML with Qwen's default system prompt.
    Qwen,
    /// `### Instruction:` / `### Input:` / `### Response:`
    Alpaca,
    /// `USER: ... ASSISTANT: ...`
    Vicuna,
    /// `<|user|>\ncontent</s>`
    Zephyr,
    /// Harmony: `<|start|>role<|message|>content<|end|>`
    GptOss,
}

impl ChatTemplateType {
    /// Canonical template name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMl => "chatml",
            Self::Llama2 => "llama2",
            Self::Llama3 => "llama3",
            Self::Mistral => "mistral",
            Self::Gemma => "gemma",
            Self::Phi3 => "phi3",
            Self::Phi4 => "phi4",
            Self::Qwen => "qwen",
            Self::Alpaca => "alpaca",
            Self::Vicuna => "vicuna",
            Self::Zephyr => "zephyr",
            Self::GptOss => "gpt-oss",
        }
    }

    /// Get the EOS token for this template type.
    pub fn eos_token(&self) -> &'static str {
        match self {
            Self::ChatMl | Self::Qwen | Self::Phi4 => "<|im_end|>",
            Self::Llama3 => "<|eot_id|>",
            Self::Gemma => "<end_of_turn>",
            Self::Phi3 => "<|end|>",
            Self::GptOss => "<|return|>",
            Self::Llama2 | Self::Mistral | Self::Alpaca | Self::Vicuna | Self::Zephyr => "</s>",
        }
    }

    /// Get the BOS token for this template type (if any).
    pub fn bos_token(&self) -> Option<&'static str> {
        match self {
            Self::Llama2 | Self::Mistral => Some("<s>"),
            Self::Llama3 => Some("<|begin_of_text|>"),
            _ => None,
        }
    }

    /// Whether the template renders a `system` turn of its own.
    pub fn supports_system_role(&self) -> bool {
        !matches!(self, Self::Gemma | Self::Mistral | Self::Alpaca)
    }
}

impl FromStr for ChatTemplateType {
    type Err = ReflexError;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s.to_lowercase().as_str() {
            "chatml" => Self::ChatMl,
            "llama2" | "llama-2" => Self::Llama2,
            "llama3" | "llama-3" => Self::Llama3,
            "mistral" => Self::Mistral,
            "gemma" => Self::Gemma,
            "phi3" | "phi-3" => Self::Phi3,
            "phi4" | "phi-4" => Self::Phi4,
            "qwen" => Self::Qwen,
            "alpaca" => Self::Alpaca,
            "vicuna" => Self::Vicuna,
            "zephyr" => Self::Zephyr,
            "gpt-oss" | "gpt_oss" | "harmony" => Self::GptOss,
            other => {
                return Err(ReflexError::Config(format!(
                    "Unknown chat template `{other}`"
                )))
            }
        };
        Ok(ty)
    }
}

/// Chat template configuration and application.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    /// The template type.
    pub template_type: ChatTemplateType,
    /// Optional default system message.
    pub default_system_message: Option<String>,
    /// Whether to prepend the BOS token.
    pub add_bos: bool,
}

impl ChatTemplate {
    /// Create a new chat template with the given type.
    pub fn new(template_type: ChatTemplateType) -> Self {
        let default_system_message = match template_type {
            ChatTemplateType::Qwen => Some(
                "You are Qwen, created by Alibaba Cloud. You are a helpful assistant.".to_string(),
            ),
            _ => None,
        };
        Self {
            template_type,
            default_system_message,
            add_bos: template_type.bos_token().is_some(),
        }
    }

    /// Create a ChatML template.
    pub fn chatml() -> Self {
        Self::new(ChatTemplateType::ChatMl)
    }

    /// Create a Zephyr template.
    pub fn zephyr() -> Self {
        Self::new(ChatTemplateType::Zephyr)
    }

    /// Detect a template from a model name or path.
    pub fn for_model(model_name: &str) -> Option<Self> {
        let name = model_name.to_lowercase();
        let ty = if ["gpt-oss", "gptoss", "gpt_oss", "harmony"]
            .iter()
            .any(|p| name.contains(p))
        {
            ChatTemplateType::GptOss
        } else if name.contains("llama-2") || name.contains("llama2") {
            ChatTemplateType::Llama2
        } else if name.contains("llama") {
            ChatTemplateType::Llama3
        } else if name.contains("mistral") || name.contains("mixtral") {
            // zephyr models are mistral fine-tunes with their own format
            if name.contains("zephyr") {
                ChatTemplateType::Zephyr
            } else {
                ChatTemplateType::Mistral
            }
        } else if name.contains("zephyr") {
            ChatTemplateType::Zephyr
        } else if name.contains("gemma") {
            ChatTemplateType::Gemma
        } else if name.contains("phi-4") || name.contains("phi4") {
            ChatTemplateType::Phi4
        } else if name.contains("phi-3") || name.contains("phi3") {
            ChatTemplateType::Phi3
        } else if name.contains("qwen") {
            ChatTemplateType::Qwen
        } else if name.contains("vicuna") {
            ChatTemplateType::Vicuna
        } else if name.contains("alpaca") {
            ChatTemplateType::Alpaca
        } else {
            return None;
        };
        Some(Self::new(ty))
    }

    /// Pick the template for a run: an explicit name wins, then detection
    /// from the model name, then Zephyr.
    pub fn resolve(explicit: Option<&str>, model_name: &str) -> Result<Self> {
        if let Some(name) = explicit {
            return Ok(Self::new(name.parse()?));
        }
        Ok(Self::for_model(model_name).unwrap_or_else(|| {
            tracing::warn!(
                model = model_name,
                "No chat template matched the model name, falling back to zephyr"
            );
            Self::zephyr()
        }))
    }

    /// The BOS token this template emits, if any.
    pub fn bos_token(&self) -> Option<&'static str> {
        self.template_type.bos_token()
    }

    /// Strip a leading BOS token from rendered text.
    pub fn strip_bos<'a>(&self, text: &'a str) -> &'a str {
        match self.bos_token() {
            Some(bos) => text.strip_prefix(bos).unwrap_or(text),
            None => text,
        }
    }

    /// Render a conversation.
    ///
    /// With `add_generation_prompt`, the header that opens an assistant turn
    /// is appended so the rendered text ends where a completion would start.
    pub fn render(&self, messages: &[Message], add_generation_prompt: bool) -> String {
        let messages = self.with_default_system(messages);
        let mut text = String::new();
        if self.add_bos {
            if let Some(bos) = self.bos_token() {
                text.push_str(bos);
            }
        }

        match self.template_type {
            ChatTemplateType::ChatMl | ChatTemplateType::Qwen => {
                for msg in messages.iter() {
                    text.push_str(&format!(
                        "<|im_start|>{}\n{}<|im_end|>\n",
                        msg.role, msg.content
                    ));
                }
                if add_generation_prompt {
                    text.push_str("<|im_start|>assistant\n");
                }
            }
            ChatTemplateType::Llama2 => render_llama2(&mut text, &messages),
            ChatTemplateType::Llama3 => {
                for msg in messages.iter() {
                    text.push_str(&format!(
                        "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
                        msg.role,
                        msg.content.trim()
                    ));
                }
                if add_generation_prompt {
                    text.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
                }
            }
            ChatTemplateType::Mistral => render_mistral(&mut text, &messages),
            ChatTemplateType::Gemma => {
                for msg in messages.iter() {
                    let role = if msg.role == "assistant" { "model" } else { "user" };
                    text.push_str(&format!(
                        "<start_of_turn>{}\n{}<end_of_turn>\n",
                        role, msg.content
                    ));
                }
                if add_generation_prompt {
                    text.push_str("<start_of_turn>model\n");
                }
            }
            ChatTemplateType::Phi3 => {
                for msg in messages.iter() {
                    let role = tag_role(&msg.role);
                    text.push_str(&format!("<|{}|>\n{}<|end|>\n", role, msg.content));
                }
                if add_generation_prompt {
                    text.push_str("<|assistant|>\n");
                }
            }
            ChatTemplateType::Phi4 => {
                for msg in messages.iter() {
                    text.push_str(&format!(
                        "<|im_start|>{}<|im_sep|>{}<|im_end|>",
                        msg.role, msg.content
                    ));
                }
                if add_generation_prompt {
                    text.push_str("<|im_start|>assistant<|im_sep|>");
                }
            }
            ChatTemplateType::Zephyr => {
                for msg in messages.iter() {
                    text.push_str(&format!("<|{}|>\n{}</s>\n", tag_role(&msg.role), msg.content));
                }
                if add_generation_prompt {
                    text.push_str("<|assistant|>\n");
                }
            }
            ChatTemplateType::Vicuna => {
                for msg in messages.iter() {
                    match msg.role.as_str() {
                        "system" => {
                            text.push_str(&msg.content);
                            text.push_str("\n\n");
                        }
                        "assistant" => text.push_str(&format!("ASSISTANT: {}</s>\n", msg.content)),
                        _ => text.push_str(&format!("USER: {}\n", msg.content)),
                    }
                }
                if add_generation_prompt {
                    text.push_str("ASSISTANT: ");
                }
            }
            ChatTemplateType::Alpaca => render_alpaca(&mut text, &messages, add_generation_prompt),
            ChatTemplateType::GptOss => {
                let last = messages.len().saturating_sub(1);
                for (i, msg) in messages.iter().enumerate() {
                    match msg.role.as_str() {
                        "assistant" => {
                            text.push_str("<|start|>assistant<|channel|>final<|message|>");
                            text.push_str(&msg.content);
                            // a final answer closes the generation
                            text.push_str(if i == last { "<|return|>" } else { "<|end|>" });
                        }
                        role => {
                            let role = if role == "system" || role == "developer" {
                                role
                            } else {
                                "user"
                            };
                            text.push_str(&format!(
                                "<|start|>{}<|message|>{}<|end|>",
                                role, msg.content
                            ));
                        }
                    }
                }
                if add_generation_prompt {
                    text.push_str("<|start|>assistant<|channel|>final<|message|>");
                }
            }
        }

        text
    }

    fn with_default_system<'a>(&self, messages: &'a [Message]) -> Cow<'a, [Message]> {
        match self.default_system_message {
            Some(ref system) if !messages.iter().any(|m| m.role == "system") => {
                let mut all = Vec::with_capacity(messages.len() + 1);
                all.push(Message::system(system.clone()));
                all.extend_from_slice(messages);
                Cow::Owned(all)
            }
            _ => Cow::Borrowed(messages),
        }
    }
}

fn tag_role(role: &str) -> &str {
    match role {
        "system" | "assistant" => role,
        _ => "user",
    }
}

fn render_llama2(text: &mut String, messages: &[Message]) {
    let mut system: Option<&str> = None;
    let mut first_user = true;
    for msg in messages {
        match msg.role.as_str() {
            "system" => system = Some(&msg.content),
            "assistant" => text.push_str(&format!(" {} </s>", msg.content)),
            _ => {
                if !first_user {
                    text.push_str("<s>");
                }
                text.push_str("[INST] ");
                if let Some(sys) = system.take() {
                    text.push_str(&format!("<<SYS>>\n{}\n<</SYS>>\n\n", sys));
                }
                text.push_str(&msg.content);
                text.push_str(" [/INST]");
                first_user = false;
            }
        }
    }
}

// Mistral has no system turn; the system text is folded into the first
// user turn.
fn render_mistral(text: &mut String, messages: &[Message]) {
    let mut system: Option<&str> = None;
    for msg in messages {
        match msg.role.as_str() {
            "system" => system = Some(&msg.content),
            "assistant" => {
                text.push_str(&msg.content);
                text.push_str("</s>");
            }
            _ => {
                text.push_str("[INST] ");
                if let Some(sys) = system.take() {
                    text.push_str(sys);
                    text.push_str("\n\n");
                }
                text.push_str(&msg.content);
                text.push_str(" [/INST]");
            }
        }
    }
}

fn render_alpaca(text: &mut String, messages: &[Message], add_generation_prompt: bool) {
    let mut instruction = None;
    let mut input = None;
    let mut output = None;
    for msg in messages {
        match msg.role.as_str() {
            "system" => instruction = Some(msg.content.as_str()),
            "assistant" => output = Some(msg.content.as_str()),
            _ => input = Some(msg.content.as_str()),
        }
    }

    if let Some(instruction) = instruction {
        text.push_str(&format!("### Instruction:\n{}\n\n", instruction));
    }
    if let Some(input) = input {
        text.push_str(&format!("### Input:\n{}\n\n", input));
    }
    let has_context = instruction.is_some() || input.is_some();
    if add_generation_prompt || (has_context && output.is_some()) {
        text.push_str("### Response:\n");
    }
    if let Some(output) = output {
        text.push_str(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("What went wrong?"),
            Message::assistant("I misread the question."),
        ]
    }

    #[test]
    fn test_chatml_render() {
        let text = ChatTemplate::chatml().render(&conversation(), false);
        assert_eq!(
            text,
            "<|im_start|>user\nWhat went wrong?<|im_end|>\n\
             <|im_start|>assistant\nI misread the question.<|im_end|>\n"
        );
    }

    #[test]
    fn test_generation_prompt() {
        let prompt = vec![Message::user("Hi")];
        let text = ChatTemplate::zephyr().render(&prompt, true);
        assert_eq!(text, "<|user|>\nHi</s>\n<|assistant|>\n");

        let text = ChatTemplate::new(ChatTemplateType::Llama3).render(&prompt, true);
        assert!(text.starts_with("<|begin_of_text|>"));
        assert!(text.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn test_strip_bos() {
        let template = ChatTemplate::new(ChatTemplateType::Llama3);
        let text = template.render(&[Message::assistant("Answer")], false);
        let stripped = template.strip_bos(&text);
        assert!(stripped.starts_with("<|start_header_id|>assistant"));

        let chatml = ChatTemplate::chatml();
        assert_eq!(chatml.strip_bos("<s>kept"), "<s>kept");
    }

    #[test]
    fn test_default_system_message() {
        let template = ChatTemplate::new(ChatTemplateType::Qwen);
        let text = template.render(&[Message::user("Hi")], false);
        assert!(text.starts_with("<|im_start|>system\nYou are Qwen"));

        let with_system = vec![Message::system(""), Message::user("Hi")];
        let text = template.render(&with_system, false);
        assert!(!text.contains("You are Qwen"));
    }

    #[test]
    fn test_gemma_maps_roles() {
        let text = ChatTemplate::new(ChatTemplateType::Gemma).render(&conversation(), false);
        assert!(text.contains("<start_of_turn>user\nWhat went wrong?"));
        assert!(text.contains("<start_of_turn>model\nI misread"));
    }

    #[test]
    fn test_mistral_folds_system_into_first_user() {
        let messages = vec![Message::system("Be brief."), Message::user("Hi")];
        let text = ChatTemplate::new(ChatTemplateType::Mistral).render(&messages, true);
        assert_eq!(text, "<s>[INST] Be brief.\n\nHi [/INST]");
    }

    #[test]
    fn test_alpaca_completion_has_no_header() {
        let template = ChatTemplate::new(ChatTemplateType::Alpaca);
        assert_eq!(template.render(&[Message::assistant("out")], false), "out");
        assert_eq!(
            template.render(&[Message::user("in")], true),
            "### Input:\nin\n\n### Response:\n"
        );
    }

    #[test]
    fn test_gpt_oss_final_answer_returns() {
        let text = ChatTemplate::new(ChatTemplateType::GptOss).render(&conversation(), false);
        assert!(text.starts_with("<|start|>user<|message|>What went wrong?<|end|>"));
        assert!(text.ends_with("I misread the question.<|return|>"));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("ChatML".parse::<ChatTemplateType>().unwrap(), ChatTemplateType::ChatMl);
        assert_eq!("llama-3".parse::<ChatTemplateType>().unwrap(), ChatTemplateType::Llama3);
        assert!("jinja".parse::<ChatTemplateType>().is_err());
    }

    #[test]
    fn test_detect_template() {
        let detect = |name: &str| ChatTemplate::for_model(name).map(|t| t.template_type);
        assert_eq!(detect("meta-llama/Llama-3.1-8B"), Some(ChatTemplateType::Llama3));
        assert_eq!(detect("mistralai/Mistral-7B-v0.1"), Some(ChatTemplateType::Mistral));
        assert_eq!(detect("HuggingFaceH4/mistral-7b-sft-beta"), Some(ChatTemplateType::Mistral));
        assert_eq!(detect("HuggingFaceH4/zephyr-7b-beta"), Some(ChatTemplateType::Zephyr));
        assert_eq!(detect("google/gemma-2-9b"), Some(ChatTemplateType::Gemma));
        assert_eq!(detect("Qwen/Qwen2-7B"), Some(ChatTemplateType::Qwen));
        assert_eq!(detect("EleutherAI/pythia-1b"), None);
    }

    #[test]
    fn test_resolve_prefers_explicit_name() {
        let template = ChatTemplate::resolve(Some("chatml"), "meta-llama/Llama-3.1-8B").unwrap();
        assert_eq!(template.template_type, ChatTemplateType::ChatMl);

        let template = ChatTemplate::resolve(None, "EleutherAI/pythia-1b").unwrap();
        assert_eq!(template.template_type, ChatTemplateType::Zephyr);
    }
}
