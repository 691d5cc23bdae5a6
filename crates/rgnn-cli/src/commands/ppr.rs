//! Compute and cache the PPR matrix of the configured dataset.

use anyhow::{Context, Result};
use colored::Colorize;
use rgnn::prelude::*;
use std::time::Instant;

use crate::config::{cache_storage_type, Config};

pub fn run(config: &Config, alpha: f64, eps: f64, topk: usize, normalization: &str) -> Result<()> {
    let normalization: PprNormalization = normalization.parse()?;
    let ppr_config = PprConfig::new(alpha, eps, topk, normalization);
    ppr_config.validate().context("Invalid PPR parameters")?;

    let dataset = config.data.load_dataset()?;
    let storage_type = cache_storage_type(&config.attack.ppr_storage_type).unwrap_or_else(|| "ppr".into());
    let params = PprCacheParams::for_dataset(&dataset, storage_type);
    let nodes: Vec<usize> = (0..dataset.n_nodes()).collect();

    println!(
        "{} Computing PPR for {} ({} nodes, {} edges)...",
        "→".blue(),
        dataset.name.cyan(),
        dataset.n_nodes(),
        dataset.graph.edge_count()
    );

    let mut store = create_store(&config.storage)?;
    let started = Instant::now();
    let cache = Some((store.as_mut() as &mut dyn ArtifactStore, &params));
    let matrix = load_or_compute_ppr(&dataset, &ppr_config, &nodes, cache)?;

    println!();
    println!("{} PPR matrix ready", "✓".green().bold());
    println!("  Shape:   {:?}", matrix.shape());
    println!("  Entries: {}", matrix.nnz().to_string().cyan());
    println!("  Time:    {:.2?}", started.elapsed());
    Ok(())
}
