//! Tokenizer integration.
//!
//! Wraps `tokenizers::Tokenizer` together with the special-token and length
//! settings that HuggingFace keeps in `tokenizer_config.json`.

use reflex_core::{ReflexError, Result, TruncationSide};
use serde::Deserialize;
use std::path::Path;

/// `model_max_length` values above this are placeholders for "unbounded".
pub const UNBOUNDED_MAX_LENGTH: usize = 100_000;

/// Length used when the configured `model_max_length` is a placeholder.
pub const DEFAULT_MAX_LENGTH: usize = 2048;

/// A special token as written in `tokenizer_config.json`: either a bare
/// string or an added-token object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    fn into_content(self) -> String {
        match self {
            Self::Text(s) | Self::Added { content: s } => s,
        }
    }
}

/// The subset of `tokenizer_config.json` the driver reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenizerConfig {
    bos_token: Option<SpecialToken>,
    eos_token: Option<SpecialToken>,
    pad_token: Option<SpecialToken>,
    /// Maximum sequence length the model was trained with.
    pub model_max_length: Option<f64>,
    /// Side truncated by default.
    pub truncation_side: Option<TruncationSide>,
}

impl TokenizerConfig {
    /// Parse a `tokenizer_config.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Wrapper around the tokenizers library.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    bos_token: Option<String>,
    eos_token: Option<String>,
    pad_token: Option<String>,
    truncation_side: TruncationSide,
    model_max_length: usize,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("eos_token", &self.eos_token)
            .field("pad_token", &self.pad_token)
            .field("truncation_side", &self.truncation_side)
            .field("model_max_length", &self.model_max_length)
            .finish()
    }
}

impl Tokenizer {
    fn from_inner(inner: tokenizers::Tokenizer) -> Self {
        let mut tokenizer = Self {
            inner,
            bos_token: None,
            eos_token: None,
            pad_token: None,
            truncation_side: TruncationSide::default(),
            model_max_length: DEFAULT_MAX_LENGTH,
        };
        tokenizer.eos_token =
            tokenizer.guess_token(&["</s>", "<|endoftext|>", "<|end_of_text|>", "<eos>"]);
        tokenizer.bos_token = tokenizer.guess_token(&["<s>", "<|begin_of_text|>", "<bos>"]);
        tokenizer.pad_token = tokenizer.guess_token(&["<pad>", "[PAD]", "<|pad|>"]);
        tokenizer
    }

    fn guess_token(&self, candidates: &[&str]) -> Option<String> {
        candidates
            .iter()
            .find(|t| self.inner.token_to_id(t).is_some())
            .map(|t| t.to_string())
    }

    /// Load a tokenizer from a local `tokenizer.json`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| ReflexError::Tokenizer(e.to_string()))?;
        Ok(Self::from_inner(inner))
    }

    /// Load a tokenizer from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| ReflexError::Tokenizer(e.to_string()))?;
        Ok(Self::from_inner(inner))
    }

    /// Load `tokenizer.json` and, when given, apply `tokenizer_config.json`.
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(
        tokenizer_json: P,
        tokenizer_config: Option<Q>,
    ) -> Result<Self> {
        let mut tokenizer = Self::from_file(tokenizer_json)?;
        if let Some(config) = tokenizer_config {
            tokenizer.apply_config(TokenizerConfig::from_file(config)?);
        }
        Ok(tokenizer)
    }

    /// Load from a local model directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let config = dir.join("tokenizer_config.json");
        Self::from_files(dir.join("tokenizer.json"), config.exists().then_some(config))
    }

    /// Override special tokens and lengths from a tokenizer config.
    pub fn apply_config(&mut self, config: TokenizerConfig) {
        if let Some(token) = config.bos_token {
            self.bos_token = Some(token.into_content());
        }
        if let Some(token) = config.eos_token {
            self.eos_token = Some(token.into_content());
        }
        if let Some(token) = config.pad_token {
            self.pad_token = Some(token.into_content());
        }
        if let Some(side) = config.truncation_side {
            self.truncation_side = side;
        }
        if let Some(len) = config.model_max_length {
            self.model_max_length = if len > UNBOUNDED_MAX_LENGTH as f64 {
                UNBOUNDED_MAX_LENGTH + 1
            } else {
                len as usize
            };
        }
    }

    /// Settle the tokenizer for preference training.
    ///
    /// Pads with EOS when no pad token exists and replaces a placeholder
    /// `model_max_length` with [`DEFAULT_MAX_LENGTH`].
    pub fn prepare_for_training(&mut self) {
        if self.pad_token.is_none() {
            if let Some(eos) = self.eos_token.clone() {
                tracing::debug!(token = %eos, "No pad token, padding with EOS");
                self.pad_token = Some(eos);
            }
        }
        if self.model_max_length > UNBOUNDED_MAX_LENGTH {
            self.model_max_length = DEFAULT_MAX_LENGTH;
        }
    }

    /// Set which side gets truncated.
    pub fn set_truncation_side(&mut self, side: TruncationSide) {
        self.truncation_side = side;
    }

    /// Side truncated when sequences exceed the maximum length.
    pub fn truncation_side(&self) -> TruncationSide {
        self.truncation_side
    }

    /// Maximum sequence length.
    pub fn model_max_length(&self) -> usize {
        self.model_max_length
    }

    /// Encode text to token IDs.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| ReflexError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Number of tokens in `text`, without added special tokens.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.encode(text).map(|ids| ids.len())
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// BOS token text.
    pub fn bos_token(&self) -> Option<&str> {
        self.bos_token.as_deref()
    }

    /// EOS token text.
    pub fn eos_token(&self) -> Option<&str> {
        self.eos_token.as_deref()
    }

    /// Pad token text.
    pub fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_deref()
    }

    /// Get pad token ID if available.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token.as_deref().and_then(|t| self.inner.token_to_id(t))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const WORD_LEVEL_JSON: &str = r#"{
        "version": "1.0",
        "added_tokens": [
            {"id": 1, "content": "</s>", "single_word": false, "lstrip": false,
             "rstrip": false, "normalized": false, "special": true}
        ],
        "pre_tokenizer": {"type": "Whitespace"},
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "</s>": 1, "hello": 2, "world": 3, "again": 4},
            "unk_token": "<unk>"
        }
    }"#;

    #[test]
    fn test_encode_decode() {
        let tokenizer = Tokenizer::from_bytes(WORD_LEVEL_JSON.as_bytes()).unwrap();
        assert_eq!(tokenizer.encode("hello world").unwrap(), vec![2, 3]);
        assert_eq!(tokenizer.count_tokens("hello world again").unwrap(), 3);
        assert_eq!(tokenizer.vocab_size(), 5);
    }

    #[test]
    fn test_pad_falls_back_to_eos() {
        let mut tokenizer = Tokenizer::from_bytes(WORD_LEVEL_JSON.as_bytes()).unwrap();
        assert_eq!(tokenizer.eos_token(), Some("</s>"));
        assert!(tokenizer.pad_token().is_none());

        tokenizer.prepare_for_training();
        assert_eq!(tokenizer.pad_token(), Some("</s>"));
        assert_eq!(tokenizer.pad_token_id(), Some(1));
    }

    #[test]
    fn test_config_overrides_and_length_clamp() {
        let config: TokenizerConfig = serde_json::from_str(
            r#"{
                "bos_token": {"content": "<s>", "lstrip": false},
                "eos_token": "</s>",
                "pad_token": null,
                "model_max_length": 1000000000000000019884624838656,
                "truncation_side": "right"
            }"#,
        )
        .unwrap();

        let mut tokenizer = Tokenizer::from_bytes(WORD_LEVEL_JSON.as_bytes()).unwrap();
        tokenizer.apply_config(config);
        assert_eq!(tokenizer.bos_token(), Some("<s>"));
        assert!(tokenizer.model_max_length() > UNBOUNDED_MAX_LENGTH);

        tokenizer.prepare_for_training();
        assert_eq!(tokenizer.model_max_length(), DEFAULT_MAX_LENGTH);

        tokenizer.set_truncation_side(TruncationSide::Left);
        assert_eq!(tokenizer.truncation_side(), TruncationSide::Left);
    }

    #[test]
    fn test_small_max_length_is_kept() {
        let config: TokenizerConfig =
            serde_json::from_str(r#"{"model_max_length": 4096}"#).unwrap();
        let mut tokenizer = Tokenizer::from_bytes(WORD_LEVEL_JSON.as_bytes()).unwrap();
        tokenizer.apply_config(config);
        tokenizer.prepare_for_training();
        assert_eq!(tokenizer.model_max_length(), 4096);
    }

    #[test]
    fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), WORD_LEVEL_JSON).unwrap();
        std::fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"pad_token": "<unk>", "model_max_length": 512}"#,
        )
        .unwrap();

        let tokenizer = Tokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tokenizer.pad_token_id(), Some(0));
        assert_eq!(tokenizer.model_max_length(), 512);
    }
}
