//! Tokenizer downloads from HuggingFace Hub.

use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use reflex_core::{ReflexError, Result, SecretString};
use std::path::{Path, PathBuf};

/// Build API with optional token authentication.
fn build_api(token: Option<&SecretString>) -> Result<Api> {
    let mut builder = ApiBuilder::new();

    if let Some(secret) = token {
        builder = builder.with_token(Some(secret.expose_secret().to_string()));
    }

    builder.build().map_err(|e| ReflexError::Hub(e.to_string()))
}

fn model_repo(api: &Api, model_id: &str, revision: Option<&str>) -> ApiRepo {
    match revision {
        Some(rev) => api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            rev.to_string(),
        )),
        None => api.model(model_id.to_string()),
    }
}

/// Local paths of the files needed to build a tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerFiles {
    /// `tokenizer.json`.
    pub tokenizer_json: PathBuf,
    /// `tokenizer_config.json`, when the repository has one.
    pub tokenizer_config: Option<PathBuf>,
}

impl TokenizerFiles {
    /// Collect tokenizer files from a local model directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let tokenizer_json = dir.join("tokenizer.json");
        if !tokenizer_json.exists() {
            return Err(ReflexError::Tokenizer(format!(
                "No tokenizer.json in {}",
                dir.display()
            )));
        }
        let existing = |name: &str| Some(dir.join(name)).filter(|p| p.exists());
        Ok(Self {
            tokenizer_json,
            tokenizer_config: existing("tokenizer_config.json"),
        })
    }
}

async fn get_optional(repo: &ApiRepo, filename: &str) -> Option<PathBuf> {
    match repo.get(filename).await {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!(file = filename, error = %e, "Optional file unavailable");
            None
        }
    }
}

/// Fetch tokenizer files for a model.
///
/// A local directory is used as is; anything else is treated as a Hub model
/// id and downloaded at `revision`.
pub async fn fetch_tokenizer_files(
    name_or_path: &str,
    revision: Option<&str>,
    token: Option<&SecretString>,
) -> Result<TokenizerFiles> {
    let local = Path::new(name_or_path);
    if local.is_dir() {
        tracing::debug!(path = %local.display(), "Using local tokenizer files");
        return TokenizerFiles::from_dir(local);
    }

    tracing::info!(
        model = name_or_path,
        revision = revision.unwrap_or("main"),
        "Downloading tokenizer"
    );
    let api = build_api(token)?;
    let repo = model_repo(&api, name_or_path, revision);

    let tokenizer_json = repo
        .get("tokenizer.json")
        .await
        .map_err(|e| ReflexError::Hub(format!("{name_or_path}/tokenizer.json: {e}")))?;

    let tokenizer_config = get_optional(&repo, "tokenizer_config.json").await;

    Ok(TokenizerFiles {
        tokenizer_json,
        tokenizer_config,
    })
}
