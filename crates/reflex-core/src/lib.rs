//! Core types and configuration for reflex DPO fine-tuning.
//!
//! This crate provides the foundational pieces shared by the rest of the
//! workspace:
//!
//! - Recipe configuration (model, data and DPO training arguments)
//! - Command-line override parsing for recipes
//! - Common enums (dtype, quantization, loss type, log level)
//! - Error handling infrastructure
//! - Secure handling of hub tokens

#![warn(missing_docs)]

mod config;
mod error;
mod secrets;
mod types;

pub use config::*;
pub use error::*;
pub use secrets::SecretString;
pub use types::*;
