//! HuggingFace Hub integration for reflex.
//!
//! This crate provides:
//! - Tokenizer and config downloads from HuggingFace Hub
//! - Model uploads to HuggingFace Hub
//! - Model card rendering
//! - Token resolution

#![warn(missing_docs)]

mod download;
mod model_card;
mod token;
mod upload;

pub use download::*;
pub use model_card::*;
pub use token::*;
pub use upload::*;
