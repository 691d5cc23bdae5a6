//! Inspect cached artifacts.

use anyhow::Result;
use colored::Colorize;
use rgnn::prelude::*;

use crate::config::Config;

pub fn list(config: &Config, storage_type: &str) -> Result<()> {
    let store = create_store(&config.storage)?;
    let entries = store.entries(storage_type)?;

    if entries.is_empty() {
        println!("{} No entries of type {}.", "•".yellow(), storage_type.cyan());
        return Ok(());
    }

    println!(
        "{} {} entries of type {}:",
        "→".blue(),
        entries.len().to_string().cyan(),
        storage_type.cyan()
    );
    println!();
    for meta in &entries {
        println!(
            "  {} #{} {} {}",
            "•".blue(),
            meta.sequence,
            meta.id.white().bold(),
            meta.key.canonical_string().dimmed()
        );
    }
    Ok(())
}
