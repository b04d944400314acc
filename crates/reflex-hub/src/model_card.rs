//! Model card (README.md) rendering.

use reflex_core::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Tag added to every card.
pub const DEFAULT_TAG: &str = "alignment-handbook";

#[derive(Serialize)]
struct FrontMatter<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_model: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    datasets: &'a [String],
    library_name: &'a str,
    model_name: &'a str,
}

fn is_empty(values: &&[String]) -> bool {
    values.is_empty()
}

/// A model card for a fine-tuned model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCard {
    /// Name of the fine-tuned model.
    pub model_name: String,
    /// Model the run started from.
    pub finetuned_from: Option<String>,
    /// Training datasets.
    pub datasets: Vec<String>,
    /// Dataset tags.
    pub dataset_tags: Vec<String>,
    /// Card tags.
    pub tags: Vec<String>,
    /// Final metrics, by name.
    pub metrics: BTreeMap<String, f64>,
    /// Training hyperparameters, by name.
    pub hyperparameters: BTreeMap<String, String>,
}

impl ModelCard {
    /// Create a card with the default tag.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            tags: vec![DEFAULT_TAG.to_string()],
            ..Self::default()
        }
    }

    /// Set the base model.
    pub fn finetuned_from(mut self, base: impl Into<String>) -> Self {
        self.finetuned_from = Some(base.into());
        self
    }

    /// Set datasets and their tags.
    pub fn datasets(mut self, datasets: Vec<String>, dataset_tags: Vec<String>) -> Self {
        self.datasets = datasets;
        self.dataset_tags = dataset_tags;
        self
    }

    /// Add a metric.
    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Add a hyperparameter.
    pub fn hyperparameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.hyperparameters.insert(name.into(), value.to_string());
        self
    }

    /// Render as markdown with YAML front matter.
    pub fn to_markdown(&self) -> Result<String> {
        let front = FrontMatter {
            base_model: self.finetuned_from.as_deref(),
            tags: &self.tags,
            datasets: &self.dataset_tags,
            library_name: "transformers",
            model_name: &self.model_name,
        };

        let mut md = String::from("---\n");
        md.push_str(&serde_yaml::to_string(&front)?);
        md.push_str("---\n\n");
        md.push_str(&format!("# {}\n\n", self.model_name));

        md.push_str("This model is a fine-tuned version of ");
        match &self.finetuned_from {
            Some(base) => md.push_str(&format!("[{base}](https://huggingface.co/{base})")),
            None => md.push_str("an unspecified base model"),
        }
        if self.datasets.is_empty() {
            md.push_str(" on an unspecified dataset.\n\n");
        } else {
            md.push_str(&format!(" on the {} dataset.\n\n", self.datasets.join(", ")));
        }

        md.push_str("## Training procedure\n\n");
        md.push_str("Trained with Direct Preference Optimization (DPO) ");
        md.push_str("on self-reflection preference pairs.\n\n");

        if !self.hyperparameters.is_empty() {
            md.push_str("### Training hyperparameters\n\n");
            for (name, value) in &self.hyperparameters {
                md.push_str(&format!("- {name}: {value}\n"));
            }
            md.push('\n');
        }

        if !self.metrics.is_empty() {
            md.push_str("### Results\n\n| Metric | Value |\n|--------|-------|\n");
            for (name, value) in &self.metrics {
                md.push_str(&format!("| {name} | {value:.4} |\n"));
            }
            md.push('\n');
        }

        Ok(md)
    }

    /// Write `README.md` into `dir`.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let path = dir.as_ref().join("README.md");
        std::fs::write(&path, self.to_markdown()?)?;
        tracing::info!(path = %path.display(), "Model card saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> ModelCard {
        ModelCard::new("reflex-dpo")
            .finetuned_from("HuggingFaceH4/mistral-7b-sft-beta")
            .datasets(vec!["reflections".into()], vec!["reflections".into()])
            .metric("train_loss", 0.5)
            .hyperparameter("beta", 0.1)
    }

    #[test]
    fn test_front_matter() {
        let md = card().to_markdown().unwrap();
        let front = md
            .strip_prefix("---\n")
            .and_then(|rest| rest.split("---\n").next())
            .unwrap();
        let yaml: serde_yaml::Value = serde_yaml::from_str(front).unwrap();
        assert_eq!(yaml["base_model"], "HuggingFaceH4/mistral-7b-sft-beta");
        assert_eq!(yaml["tags"][0], DEFAULT_TAG);
        assert_eq!(yaml["datasets"][0], "reflections");
    }

    #[test]
    fn test_body() {
        let md = card().to_markdown().unwrap();
        assert!(md.contains("# reflex-dpo"));
        assert!(md.contains("on the reflections dataset."));
        assert!(md.contains("| train_loss | 0.5000 |"));
        assert!(md.contains("- beta: 0.1"));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        ModelCard::new("m").write_to_dir(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert!(content.starts_with("---\n"));
        assert!(!content.contains("### Results"));
    }
}
