//! Error types for reflex.

use thiserror::Error;

/// Result type alias for reflex operations.
pub type Result<T> = std::result::Result<T, ReflexError>;

/// Main error type for reflex operations.
#[derive(Error, Debug)]
pub enum ReflexError {
    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A reflection record is missing one of its required fields.
    #[error("Line {line}: missing required field `{field}`")]
    MissingField {
        /// 1-based line number in the source file.
        line: usize,
        /// Name of the missing field.
        field: &'static str,
    },

    /// Malformed input data.
    #[error("Line {line}: {message}")]
    Data {
        /// 1-based line number in the source file.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// Dataset-level errors (empty dataset, bad split, non-conversational rows).
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// HuggingFace Hub errors.
    #[error("Hub error: {0}")]
    Hub(String),

    /// Errors raised by or while driving the external trainer.
    #[error("Training error: {0}")]
    Training(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for ReflexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ReflexError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
