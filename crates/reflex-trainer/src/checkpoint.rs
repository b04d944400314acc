//! Checkpoint discovery in an output directory.
//!
//! The trainer backend saves intermediate state under
//! `<output_dir>/checkpoint-<step>`; a rerun resumes from the highest step.

use reflex_core::{DpoTrainingArguments, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// List `checkpoint-<step>` directories, sorted by step.
///
/// A missing output directory yields an empty list.
pub fn list_checkpoints(output_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut checkpoints: Vec<(usize, PathBuf)> = fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let step = name.strip_prefix(CHECKPOINT_PREFIX)?;
            if step.is_empty() || !step.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some((step.parse::<usize>().ok()?, entry.path()))
        })
        .collect();

    checkpoints.sort_by_key(|(step, _)| *step);
    Ok(checkpoints)
}

/// The checkpoint with the highest step, if any.
pub fn last_checkpoint(output_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(output_dir)?.pop().map(|(_, path)| path))
}

/// Detect the checkpoint a run would resume from.
///
/// Returns `None` when `overwrite_output_dir` is set.
pub fn detect_checkpoint(args: &DpoTrainingArguments) -> Result<Option<PathBuf>> {
    if args.overwrite_output_dir {
        return Ok(None);
    }
    let last = last_checkpoint(&args.output_path())?;
    if let Some(ref path) = last {
        if args.resume_from_checkpoint.is_none() {
            tracing::info!(checkpoint = %path.display(), "Checkpoint detected, resuming training");
        }
    }
    Ok(last)
}

/// Where training resumes from: the explicit `resume_from_checkpoint`, else
/// the detected checkpoint.
pub fn resume_point(args: &DpoTrainingArguments, detected: Option<&Path>) -> Option<PathBuf> {
    args.resume_from_checkpoint
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| detected.map(Path::to_path_buf))
}
