//! Model uploading to HuggingFace Hub.
//!
//! Uses the Hub REST API directly: create the repository, then PUT each file
//! of the output directory followed by the rendered model card. A repository
//! id without an owner is pushed under the token's user namespace.

use crate::model_card::ModelCard;
use reflex_core::{ReflexError, Result, SecretString};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const HF_API_BASE: &str = "https://huggingface.co/api";

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    /// URL of the repository.
    pub repo_url: String,
    /// Files uploaded, README included.
    pub files_uploaded: usize,
}

/// Uploads a trained model directory to a Hub model repository.
pub struct HubUploader {
    client: reqwest::Client,
    token: SecretString,
    repo_id: String,
    private: bool,
}

impl std::fmt::Debug for HubUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubUploader")
            .field("repo_id", &self.repo_id)
            .field("private", &self.private)
            .finish_non_exhaustive()
    }
}

impl HubUploader {
    /// Create an uploader for `repo_id` (`owner/name`, or a bare `name`).
    pub fn new(repo_id: impl Into<String>, private: bool, token: SecretString) -> Result<Self> {
        let repo_id = repo_id.into();
        validate_repo_id(&repo_id)?;
        if token.is_empty() {
            return Err(ReflexError::Hub(
                "A Hub token is required to push; set hub_token or HF_TOKEN".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("reflex/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReflexError::Hub(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            repo_id,
            private,
        })
    }

    /// Prefix a bare repository name with the token owner's namespace.
    pub async fn resolve_namespace(&mut self) -> Result<()> {
        if self.repo_id.contains('/') {
            return Ok(());
        }

        let response = self
            .client
            .get(format!("{HF_API_BASE}/whoami-v2"))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| ReflexError::Hub(format!("whoami request failed: {e}")))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ReflexError::Hub(format!(
                "Could not resolve the namespace for `{}`: HTTP {status}: {body}",
                self.repo_id
            )));
        }

        self.repo_id = qualify_repo_id(&self.repo_id, &body)?;
        tracing::info!(repo = %self.repo_id, "Resolved Hub repository");
        Ok(())
    }

    /// Create the repository. An existing repository is not an error.
    ///
    /// The repository id must already carry its owner (see
    /// [`resolve_namespace`](Self::resolve_namespace)).
    pub async fn create_repo(&self) -> Result<String> {
        let (org, name) = self.repo_id.split_once('/').ok_or_else(|| {
            ReflexError::Hub(format!("Repository id `{}` has no owner", self.repo_id))
        })?;

        let body = serde_json::json!({
            "name": name,
            "organization": org,
            "type": "model",
            "private": self.private,
        });

        let response = self
            .client
            .post(format!("{HF_API_BASE}/repos/create"))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ReflexError::Hub(format!("Create repo request failed: {e}")))?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            Ok(format!("https://huggingface.co/{}", self.repo_id))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ReflexError::Hub(format!(
                "Creating {} failed: HTTP {status}: {body}",
                self.repo_id
            )))
        }
    }

    /// Upload raw bytes to `path_in_repo` on the main branch.
    pub async fn upload_bytes(&self, content: Vec<u8>, path_in_repo: &str) -> Result<()> {
        let url = format!(
            "{HF_API_BASE}/models/{}/upload/main/{}",
            self.repo_id, path_in_repo
        );

        let response = self
            .client
            .put(url)
            .bearer_auth(self.token.expose_secret())
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| ReflexError::Hub(format!("Upload of {path_in_repo} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ReflexError::Hub(format!(
                "Upload of {path_in_repo} failed: HTTP {status}: {body}"
            )))
        }
    }

    /// Upload a local file.
    pub async fn upload_file(&self, local_path: &Path, path_in_repo: &str) -> Result<()> {
        let content = tokio::fs::read(local_path).await?;
        self.upload_bytes(content, path_in_repo).await
    }

    /// Push an output directory and its model card.
    pub async fn push_folder(&mut self, dir: &Path, card: &ModelCard) -> Result<PushReport> {
        self.resolve_namespace().await?;
        let repo_url = self.create_repo().await?;
        let files = collect_upload_files(dir)?;
        tracing::info!(repo = %self.repo_id, files = files.len(), "Pushing to the Hub");

        for (local, remote) in &files {
            tracing::debug!(file = %remote, "Uploading");
            self.upload_file(local, remote).await?;
        }
        self.upload_bytes(card.to_markdown()?.into_bytes(), "README.md")
            .await?;

        Ok(PushReport {
            repo_url,
            files_uploaded: files.len() + 1,
        })
    }
}

fn validate_repo_id(repo_id: &str) -> Result<()> {
    let valid = match repo_id.split_once('/') {
        Some((owner, name)) => !owner.is_empty() && !name.is_empty() && !name.contains('/'),
        None => !repo_id.is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(ReflexError::Hub(format!(
            "Invalid repository id `{repo_id}`, expected `owner/name` or `name`"
        )))
    }
}

/// Join a bare repository name with the user name of a `whoami-v2` response.
fn qualify_repo_id(name: &str, whoami: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(whoami)?;
    let owner = value
        .get("name")
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReflexError::Hub("whoami response has no user name".into()))?;
    Ok(format!("{owner}/{name}"))
}

/// List the files of `dir` to upload, with their repository paths.
///
/// Skipped: `checkpoint-*` directories, hidden (`.*`) and private (`_*`)
/// entries, and `README.md`, which is uploaded separately from the card.
pub fn collect_upload_files(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        let private = name.starts_with('.') || name.starts_with('_');
        !private && !(entry.file_type().is_dir() && name.starts_with("checkpoint-"))
    });

    for entry in walker {
        let entry = entry.map_err(|e| ReflexError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let remote = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if remote == "README.md" {
            continue;
        }
        files.push((entry.path().to_path_buf(), remote));
    }
    Ok(files)
}
