//! Dataset handling and preprocessing for reflex.
//!
//! This crate provides:
//! - Reflection JSONL loading and preference-pair formatting
//! - Seeded train/test splitting and JSONL export
//! - Chat templates and DPO template application
//! - Tokenizer integration

#![warn(missing_docs)]

pub mod chat_templates;
pub mod dataset;
pub mod processing;
pub mod reflection;
pub mod tokenizer;

pub use chat_templates::{ChatTemplate, ChatTemplateType, Message};
pub use dataset::*;
pub use processing::*;
pub use reflection::*;
pub use tokenizer::*;
