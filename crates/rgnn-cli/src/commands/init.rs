//! Initialize a new rgnn project.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::Config;

pub fn run(path: Option<String>) -> Result<()> {
    let base_path = match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().context("Failed to resolve the current directory")?,
    };

    println!("{} Initializing rgnn project...", "→".blue());

    // Create .rgnn/cache
    let cache_dir = base_path.join(".rgnn").join("cache");
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create {}", cache_dir.display()))?;
    println!("  {} Created {}", "✓".green(), cache_dir.display());

    // Create datasets directory
    let config = Config::default();
    let data_dir = base_path.join(&config.data.dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    println!("  {} Created {}", "✓".green(), data_dir.display());

    // Create default config
    let config_path = base_path.join("rgnn.toml");
    if !config_path.exists() {
        config.save(&config_path)?;
        println!("  {} Created {}", "✓".green(), config_path.display());
    } else {
        println!("  {} {} already exists", "•".yellow(), config_path.display());
    }

    let gitignore_path = base_path.join(".rgnn").join(".gitignore");
    if !gitignore_path.exists() {
        std::fs::write(&gitignore_path, "cache/\nresults.json\n")?;
        println!("  {} Created {}", "✓".green(), gitignore_path.display());
    }

    println!();
    println!("{} rgnn project initialized!", "✓".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  {} place {}.json in {}",
        "1.".blue(),
        config.data.dataset,
        config.data.dir.display()
    );
    println!("  {} rgnn model register <model.json>", "2.".blue());
    println!("  {} rgnn attack", "3.".blue());

    Ok(())
}
