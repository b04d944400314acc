//! Hub token resolution.

use reflex_core::SecretString;
use std::path::{Path, PathBuf};

/// Resolve a Hub token.
///
/// Order: the explicit token, the `HF_TOKEN` environment variable, then
/// `~/.huggingface/token`. Empty values are skipped.
pub fn resolve_token(explicit: Option<&SecretString>) -> Option<SecretString> {
    resolve_token_from(
        explicit,
        std::env::var("HF_TOKEN").ok(),
        dirs::home_dir().as_deref(),
    )
}

pub(crate) fn resolve_token_from(
    explicit: Option<&SecretString>,
    env_token: Option<String>,
    home: Option<&Path>,
) -> Option<SecretString> {
    if let Some(token) = explicit.filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }

    if let Some(token) = env_token.filter(|t| !t.is_empty()) {
        return Some(SecretString::new(token));
    }

    let token = std::fs::read_to_string(token_file(home?)).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| SecretString::new(token))
}

fn token_file(home: &Path) -> PathBuf {
    home.join(".huggingface").join("token")
}
