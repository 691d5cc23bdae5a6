//! Configuration management for the rgnn CLI.

use anyhow::{Context, Result};
use rgnn::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project configuration, read from `rgnn.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_debug_level")]
    pub debug_level: String,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub attack: AttackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub make_undirected: bool,
    #[serde(default = "default_true")]
    pub make_unweighted: bool,
    #[serde(default)]
    pub binary_attr: bool,
    #[serde(default)]
    pub normalize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_storage_type")]
    pub storage_type: String,
    #[serde(default = "default_surrogate_label")]
    pub surrogate_label: String,
    /// Victim labels; empty means every stored model of the dataset.
    #[serde(default)]
    pub victims: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackConfig {
    #[serde(default = "default_attack")]
    pub name: String,
    #[serde(default = "default_epsilons")]
    pub epsilons: Vec<f64>,
    #[serde(default)]
    pub nodes: Option<Vec<usize>>,
    #[serde(default)]
    pub selection: NodeSelection,
    /// Storage type of cached PPR matrices; an empty string disables caching.
    #[serde(default = "default_ppr_storage_type")]
    pub ppr_storage_type: Option<String>,
    /// Storage type of cached perturbations; an empty string disables caching.
    #[serde(default = "default_pert_storage_type")]
    pub pert_storage_type: Option<String>,
    #[serde(default = "default_results_file")]
    pub results_file: PathBuf,
    #[serde(default)]
    pub params: LocalAttackConfig,
}

// Default value functions
fn default_debug_level() -> String { "info".into() }
fn default_storage() -> StorageConfig { StorageConfig::file(".rgnn/cache") }
fn default_data_dir() -> PathBuf { PathBuf::from("datasets") }
fn default_dataset() -> String { "cora_ml".into() }
fn default_true() -> bool { true }
fn default_model_storage_type() -> String { "victim_models".into() }
fn default_surrogate_label() -> String { "Linear PPR".into() }
fn default_attack() -> String { AttackKind::LocalBatchedPrbcd.name().into() }
fn default_epsilons() -> Vec<f64> { vec![0.1, 0.25, 0.5, 0.75, 1.0] }
fn default_ppr_storage_type() -> Option<String> { Some("ppr".into()) }
fn default_pert_storage_type() -> Option<String> { Some("perturbation_local".into()) }
fn default_results_file() -> PathBuf { PathBuf::from(".rgnn/results.json") }

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_level: default_debug_level(),
            data: DataConfig::default(),
            storage: default_storage(),
            models: ModelConfig::default(),
            attack: AttackConfig::default(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            dataset: default_dataset(),
            seed: 0,
            make_undirected: true,
            make_unweighted: true,
            binary_attr: false,
            normalize: false,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            storage_type: default_model_storage_type(),
            surrogate_label: default_surrogate_label(),
            victims: Vec::new(),
        }
    }
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            name: default_attack(),
            epsilons: default_epsilons(),
            nodes: None,
            selection: NodeSelection::default(),
            ppr_storage_type: default_ppr_storage_type(),
            pert_storage_type: default_pert_storage_type(),
            results_file: default_results_file(),
            params: LocalAttackConfig::default(),
        }
    }
}

impl DataConfig {
    pub fn prep_options(&self) -> PrepOptions {
        PrepOptions {
            make_undirected: self.make_undirected,
            make_unweighted: self.make_unweighted,
            binary_attr: self.binary_attr,
            normalize: self.normalize,
        }
    }

    /// Load and prepare the configured dataset.
    pub fn load_dataset(&self) -> Result<Dataset> {
        let loader = JsonDatasetLoader::new(&self.dir, self.prep_options(), self.seed);
        loader
            .load(&self.dataset)
            .with_context(|| format!("Failed to load dataset {} from {}", self.dataset, self.dir.display()))
    }
}

impl Config {
    /// Load config from rgnn.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        if let Some(path) = find_config_file() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Experiment settings for the attack subcommand.
    pub fn experiment(&self) -> Result<LocalExperimentConfig> {
        let attack: AttackKind = self
            .attack
            .name
            .parse()
            .with_context(|| format!("Unknown attack: {}", self.attack.name))?;
        Ok(LocalExperimentConfig {
            attack,
            attack_params: self.attack.params.clone(),
            epsilons: self.attack.epsilons.clone(),
            nodes: self.attack.nodes.clone(),
            node_selection: self.attack.selection.clone(),
            seed: self.data.seed,
            surrogate_label: self.models.surrogate_label.clone(),
            ppr_storage_type: cache_storage_type(&self.attack.ppr_storage_type),
            pert_storage_type: cache_storage_type(&self.attack.pert_storage_type),
        })
    }
}

/// TOML has no null, so an empty storage type turns the cache off.
pub fn cache_storage_type(storage_type: &Option<String>) -> Option<String> {
    storage_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Find rgnn.toml in current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let config_path = dir.join("rgnn.toml");
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
