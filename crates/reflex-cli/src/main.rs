//! reflex CLI - DPO fine-tuning on self-reflection preference data.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reflex_core::{LogLevel, Recipe};
use reflex_trainer::DpoPipeline;

#[derive(Parser)]
#[command(name = "reflex")]
#[command(author, version, long_about = None)]
#[command(about = "DPO fine-tuning on self-reflection preference pairs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fine-tune a model with DPO
    Train {
        /// Reflection dataset (JSONL file)
        #[arg(long, alias = "data_path")]
        data_path: PathBuf,

        /// Optional recipe file (YAML) followed by `--key value` overrides
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        recipe_args: Vec<String>,
    },

    /// Format, split and render the dataset without training
    Prepare {
        /// Reflection dataset (JSONL file)
        #[arg(long, alias = "data_path")]
        data_path: PathBuf,

        /// Directory receiving train.jsonl and test.jsonl
        #[arg(short, long)]
        output: PathBuf,

        /// Optional recipe file (YAML) followed by `--key value` overrides
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        recipe_args: Vec<String>,
    },

    /// Write a sample recipe
    Init {
        /// Output path
        #[arg(short, long, default_value = "recipe.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data_path,
            recipe_args,
        } => {
            let recipe = load_recipe(&data_path, &recipe_args)?;
            init_logging(recipe.training.log_level);
            run_training(recipe, data_path).await?;
        }

        Commands::Prepare {
            data_path,
            output,
            recipe_args,
        } => {
            let recipe = load_recipe(&data_path, &recipe_args)?;
            init_logging(recipe.training.log_level);
            run_prepare(recipe, data_path, &output).await?;
        }

        Commands::Init { output } => {
            init_logging(LogLevel::default());
            generate_sample_recipe(&output)?;
        }
    }

    Ok(())
}

// RUST_LOG wins over the recipe's log_level
fn init_logging(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_recipe(data_path: &Path, recipe_args: &[String]) -> anyhow::Result<Recipe> {
    if !data_path.is_file() {
        anyhow::bail!("Dataset not found: {}", data_path.display());
    }
    Ok(Recipe::from_args(recipe_args)?)
}

/// Run the full DPO pipeline.
async fn run_training(recipe: Recipe, data_path: PathBuf) -> anyhow::Result<()> {
    let output_dir = recipe.training.output_path();
    tracing::info!(
        data = %data_path.display(),
        model = %recipe.model.model_name_or_path,
        "Starting DPO run"
    );
    let summary = DpoPipeline::new(recipe, data_path)?.run().await?;

    println!("\nTraining complete. Model saved to {}", output_dir.display());
    for (key, value) in &summary.train_metrics {
        println!("  {key:<24} {value}");
    }
    if let Some(ref eval) = summary.eval_metrics {
        for (key, value) in eval {
            println!("  {key:<24} {value}");
        }
    }
    if summary.pushed {
        println!("Pushed to the Hub.");
    }

    Ok(())
}

/// Write the processed splits for inspection or an offline backend.
async fn run_prepare(recipe: Recipe, data_path: PathBuf, output: &Path) -> anyhow::Result<()> {
    let pipeline = DpoPipeline::new(recipe, data_path)?;
    let prepared = pipeline.prepare_data().await?;
    let (train, test) = prepared.write(output)?;

    println!("Wrote {} training pairs to {}", prepared.splits.train.len(), train.display());
    println!("Wrote {} test pairs to {}", prepared.splits.test.len(), test.display());
    println!("Chat template: {}", prepared.tokenizer.chat_template);

    Ok(())
}

/// Generate a sample recipe file.
fn generate_sample_recipe(output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, Recipe::sample().to_yaml()?)?;

    println!("Sample recipe written to: {}", output.display());
    println!("\nEdit it and run training with:");
    println!("  reflex train --data-path data/reflections.jsonl {}", output.display());

    Ok(())
}
