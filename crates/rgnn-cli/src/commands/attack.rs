//! Run a local attack experiment against the stored victim models.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rgnn::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;

/// Command-line values that replace config fields.
pub struct Overrides {
    pub attack: Option<String>,
    pub epsilons: Option<String>,
    pub nodes: Option<String>,
    pub output: Option<String>,
}

pub fn run(mut config: Config, overrides: Overrides, verbose: bool) -> Result<()> {
    if let Some(attack) = overrides.attack {
        config.attack.name = attack;
    }
    if let Some(epsilons) = overrides.epsilons {
        config.attack.epsilons = parse_list(&epsilons).context("Invalid --epsilons")?;
    }
    if let Some(nodes) = overrides.nodes {
        config.attack.nodes = Some(parse_list(&nodes).context("Invalid --nodes")?);
    }
    if let Some(output) = overrides.output {
        config.attack.results_file = output.into();
    }

    let experiment = config.experiment()?;
    validate_epsilons(&experiment.epsilons)?;
    experiment.attack_params.validate()?;

    let dataset = config.data.load_dataset()?;
    let mut store = create_store(&config.storage)?;

    let surrogate = find_model(&*store, &config, &dataset, &config.models.surrogate_label)?;
    let victim_models: Vec<LinearPprModel> = if config.models.victims.is_empty() {
        let query = model_params(&dataset, None, config.data.seed);
        store
            .find_models::<LinearPprModel>(&config.models.storage_type, &query)?
            .into_iter()
            .map(|(model, _)| model)
            .collect()
    } else {
        config
            .models
            .victims
            .iter()
            .map(|label| find_model(&*store, &config, &dataset, label))
            .collect::<Result<Vec<_>>>()?
    };
    if victim_models.is_empty() {
        bail!(
            "No victim models stored for {}. Run {} first.",
            dataset.name,
            "rgnn model register".cyan()
        );
    }
    let victims: Vec<Victim<'_>> = victim_models
        .iter()
        .map(|model| Victim {
            label: model.label.clone(),
            model,
        })
        .collect();

    println!(
        "{} Attacking {} with {} ({} victims, epsilons {:?})...",
        "→".blue(),
        dataset.name.cyan(),
        experiment.attack.name().cyan(),
        victims.len(),
        experiment.epsilons
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {elapsed} {msg}")
            .context("Invalid progress template")?,
    );
    pb.set_message("running local attacks");
    pb.enable_steady_tick(Duration::from_millis(100));
    let report = run_local_experiment(
        &dataset,
        &surrogate,
        &victims,
        &experiment,
        Some(store.as_mut() as &mut dyn ArtifactStore),
    );
    pb.finish_and_clear();
    let report = report?;

    let results_file = &config.attack.results_file;
    if let Some(parent) = results_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize results")?;
    std::fs::write(results_file, json)
        .with_context(|| format!("Failed to write results: {}", results_file.display()))?;

    let failures: Vec<&UnitFailure> = report.failures().collect();
    if !failures.is_empty() {
        println!("{} {} units failed", "•".yellow(), failures.len().to_string().yellow());
        if verbose {
            for failure in &failures {
                println!(
                    "  {} node {} eps {} ({:?}): {}",
                    "✗".red(),
                    failure.node,
                    failure.epsilon,
                    failure.stage,
                    failure.reason
                );
            }
        }
    }

    let results = report.into_results()?;
    print_summary(&results);
    println!();
    println!("{} Results written to {}", "✓".green().bold(), results_file.display());
    Ok(())
}

/// The latest stored model with `label`.
fn find_model(store: &dyn ArtifactStore, config: &Config, dataset: &Dataset, label: &str) -> Result<LinearPprModel> {
    let query = model_params(dataset, Some(label), config.data.seed);
    let mut models = store.find_models::<LinearPprModel>(&config.models.storage_type, &query)?;
    if models.len() > 1 {
        warn!(label, found = models.len(), "several stored models match, using the latest");
    }
    match models.pop() {
        Some((model, _)) => Ok(model),
        None => bail!("No stored model labelled {:?} for {}", label, dataset.name),
    }
}

fn parse_list<T: std::str::FromStr>(list: &str) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().with_context(|| format!("Cannot parse {:?}", s)))
        .collect()
}

#[derive(Default)]
struct Summary {
    count: usize,
    margin: f64,
    initial_margin: f64,
    flipped: usize,
}

fn print_summary(results: &[LocalResult]) {
    let mut groups: BTreeMap<(String, String), Summary> = BTreeMap::new();
    for result in results {
        let entry = groups
            .entry((result.label.clone(), format!("{:.3}", result.epsilon)))
            .or_default();
        entry.count += 1;
        entry.margin += result.statistics.margin;
        entry.initial_margin += result.initial_statistics.margin;
        if result.initial_statistics.margin > 0.0 && result.statistics.margin <= 0.0 {
            entry.flipped += 1;
        }
    }

    println!();
    println!("{}", "Local Attack Results".white().bold());
    println!("{}", "═".repeat(64).dimmed());
    println!(
        "  {:<20} {:>8} {:>6} {:>12} {:>12} {:>8}",
        "model", "epsilon", "nodes", "margin", "clean", "flipped"
    );
    for ((label, epsilon), summary) in &groups {
        let n = summary.count as f64;
        println!(
            "  {:<20} {:>8} {:>6} {:>12.4} {:>12.4} {:>8}",
            label,
            epsilon,
            summary.count,
            summary.margin / n,
            summary.initial_margin / n,
            summary.flipped.to_string().cyan()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_parse_with_spaces_and_trailing_commas() {
        let eps: Vec<f64> = parse_list("0.1, 0.5,1.0,").unwrap();
        assert_eq!(eps, vec![0.1, 0.5, 1.0]);
        let nodes: Vec<usize> = parse_list("3,7").unwrap();
        assert_eq!(nodes, vec![3, 7]);
        assert!(parse_list::<usize>("3,x").is_err());
    }
}
