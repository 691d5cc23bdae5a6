//! Store and list victim models.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use rgnn::prelude::*;
use std::path::Path;

use crate::config::Config;

pub fn register(config: &Config, file: &str, label: Option<String>) -> Result<()> {
    let path = Path::new(file);
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read model: {}", path.display()))?;
    let mut model: LinearPprModel =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse model: {}", path.display()))?;
    if let Some(label) = label {
        model.label = label;
    }
    model.validate().context("Invalid model")?;

    let dataset = config.data.load_dataset()?;
    let n_features = dataset.attributes.n_features();
    if model.weights.len() != n_features {
        bail!(
            "Model has {} weight rows but {} has {} features",
            model.weights.len(),
            dataset.name,
            n_features
        );
    }

    let key = model_params(&dataset, Some(&model.label), config.data.seed);
    let mut store = create_store(&config.storage)?;
    let outcome = store.save_artifact(&config.models.storage_type, &key, &model, false)?;
    match outcome {
        SaveOutcome::Saved(meta) => println!(
            "{} Stored {} for {} ({})",
            "✓".green().bold(),
            model.label.cyan(),
            dataset.name,
            meta.id.dimmed()
        ),
        SaveOutcome::AlreadyExists(meta) => println!(
            "{} {} is already stored for {} ({})",
            "•".yellow(),
            model.label.cyan(),
            dataset.name,
            meta.id.dimmed()
        ),
    }
    Ok(())
}

pub fn list(config: &Config) -> Result<()> {
    let dataset = config.data.load_dataset()?;
    let store = create_store(&config.storage)?;
    let query = model_params(&dataset, None, config.data.seed);
    let models: Vec<(LinearPprModel, CacheKey)> = store.find_models(&config.models.storage_type, &query)?;

    if models.is_empty() {
        println!("{} No models stored for {}.", "•".yellow(), dataset.name);
        return Ok(());
    }

    println!("{} Models for {}:", "→".blue(), dataset.name.white().bold());
    println!();
    for (model, _) in &models {
        println!(
            "  {} {} (alpha {}, eps {}, topk {}, {})",
            "•".blue(),
            model.label.white().bold(),
            model.ppr.alpha,
            model.ppr.eps,
            model.ppr.topk,
            model.ppr.normalization
        );
    }
    Ok(())
}
