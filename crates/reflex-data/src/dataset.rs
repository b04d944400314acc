//! Preference datasets, train/test splitting and JSONL export.

use crate::reflection::{format_reflection_file, PreferencePair};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use reflex_core::{ReflexError, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A list of formatted preference pairs.
#[derive(Debug, Clone, Default)]
pub struct PreferenceDataset {
    pairs: Vec<PreferencePair>,
}

impl PreferenceDataset {
    /// Create a dataset from formatted pairs.
    pub fn from_pairs(pairs: Vec<PreferencePair>) -> Self {
        Self { pairs }
    }

    /// Load and format a reflection JSONL file.
    pub fn from_reflection_jsonl<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_pairs(format_reflection_file(path)?))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Check if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Get all pairs.
    pub fn pairs(&self) -> &[PreferencePair] {
        &self.pairs
    }

    /// Split into train and test partitions.
    ///
    /// The test side holds `ceil(len * test_size)` rows. Rows are assigned by
    /// a permutation drawn from `seed`, so the same seed always produces the
    /// same partition.
    pub fn train_test_split(
        self,
        test_size: f64,
        seed: u64,
    ) -> Result<DatasetSplits<PreferencePair>> {
        let (train, test) = split_rows(self.pairs, test_size, seed)?;
        Ok(DatasetSplits { train, test })
    }
}

impl IntoIterator for PreferenceDataset {
    type Item = PreferencePair;
    type IntoIter = std::vec::IntoIter<PreferencePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

fn split_rows<T>(rows: Vec<T>, test_size: f64, seed: u64) -> Result<(Vec<T>, Vec<T>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ReflexError::InvalidArgument(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }

    let n = rows.len();
    let n_test = (n as f64 * test_size).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(ReflexError::Dataset(format!(
            "Cannot split {n} rows with test_size {test_size}: one partition would be empty"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut slots: Vec<Option<T>> = rows.into_iter().map(Some).collect();
    let mut take = |indices: &[usize]| -> Vec<T> {
        indices.iter().filter_map(|&i| slots[i].take()).collect()
    };
    let test = take(&order[..n_test]);
    let train = take(&order[n_test..]);
    Ok((train, test))
}

/// Named train and test partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplits<T> {
    /// Training rows.
    pub train: Vec<T>,
    /// Held-out rows.
    pub test: Vec<T>,
}

impl<T> DatasetSplits<T> {
    /// Split names paired with their rows, in `train`, `test` order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[T])> {
        [("train", self.train.as_slice()), ("test", self.test.as_slice())].into_iter()
    }

    /// One `"name : rows"` entry per split.
    pub fn summary(&self) -> Vec<String> {
        self.iter()
            .map(|(name, rows)| format!("{} : {}", name, rows.len()))
            .collect()
    }

    /// Total rows across both splits.
    pub fn total(&self) -> usize {
        self.train.len() + self.test.len()
    }

    /// Apply a fallible transform to every row of both splits.
    pub fn try_map<U, F>(self, mut f: F) -> Result<DatasetSplits<U>>
    where
        F: FnMut(Vec<T>) -> Result<Vec<U>>,
    {
        Ok(DatasetSplits {
            train: f(self.train)?,
            test: f(self.test)?,
        })
    }
}

/// Pick up to `k` distinct row indices out of `len`, reproducibly from `seed`.
pub fn sample_indices(len: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    index::sample(&mut rng, len, k.min(len)).into_vec()
}

/// Write rows as JSON Lines.
pub fn write_jsonl<T: Serialize, P: AsRef<Path>>(path: P, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "Wrote JSONL");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_templates::Message;
    use std::collections::HashSet;

    fn pairs(n: usize) -> Vec<PreferencePair> {
        (0..n)
            .map(|i| PreferencePair {
                prompt: format!("prompt {i}"),
                chosen: vec![Message::user(format!("prompt {i}")), Message::assistant("good")],
                rejected: vec![Message::user(format!("prompt {i}")), Message::assistant("bad")],
            })
            .collect()
    }

    #[test]
    fn test_split_sizes() {
        let splits = PreferenceDataset::from_pairs(pairs(100))
            .train_test_split(0.1, 42)
            .unwrap();
        assert_eq!(splits.train.len(), 90);
        assert_eq!(splits.test.len(), 10);

        // ceil(0.1 * 15) = 2
        let splits = PreferenceDataset::from_pairs(pairs(15))
            .train_test_split(0.1, 42)
            .unwrap();
        assert_eq!(splits.test.len(), 2);
        assert_eq!(splits.train.len(), 13);
    }

    #[test]
    fn test_split_partitions_without_overlap() {
        let splits = PreferenceDataset::from_pairs(pairs(50))
            .train_test_split(0.1, 42)
            .unwrap();
        let train: HashSet<_> = splits.train.iter().map(|p| p.prompt.clone()).collect();
        let test: HashSet<_> = splits.test.iter().map(|p| p.prompt.clone()).collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 50);
    }

    #[test]
    fn test_split_is_reproducible() {
        let a = PreferenceDataset::from_pairs(pairs(40)).train_test_split(0.1, 42).unwrap();
        let b = PreferenceDataset::from_pairs(pairs(40)).train_test_split(0.1, 42).unwrap();
        assert_eq!(a, b);

        let c = PreferenceDataset::from_pairs(pairs(40)).train_test_split(0.1, 7).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_split_rejects_empty_side() {
        assert!(matches!(
            PreferenceDataset::from_pairs(pairs(1)).train_test_split(0.1, 42),
            Err(ReflexError::Dataset(_))
        ));
        assert!(matches!(
            PreferenceDataset::from_pairs(vec![]).train_test_split(0.1, 42),
            Err(ReflexError::Dataset(_))
        ));
        assert!(PreferenceDataset::from_pairs(pairs(10)).train_test_split(1.5, 42).is_err());
    }

    #[test]
    fn test_summary() {
        let splits = PreferenceDataset::from_pairs(pairs(20)).train_test_split(0.1, 42).unwrap();
        assert_eq!(splits.summary(), vec!["train : 18", "test : 2"]);
        assert_eq!(splits.total(), 20);
    }

    #[test]
    fn test_sample_indices() {
        let picked = sample_indices(10, 3, 42);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 3);
        assert!(picked.iter().all(|&i| i < 10));
        assert_eq!(picked, sample_indices(10, 3, 42));
        assert_eq!(sample_indices(2, 3, 42).len(), 2);
    }

    #[test]
    fn test_write_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        write_jsonl(&path, &pairs(3)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["chosen"][1]["content"], "good");
        assert_eq!(first["rejected"][0]["role"], "user");
    }
}
