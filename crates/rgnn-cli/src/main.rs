//! rgnn CLI - local adversarial attacks on graph neural networks.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rgnn")]
#[command(author, version, about = "rgnn - Adversarial robustness of GNNs at scale", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new rgnn project
    Init {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Manage stored models
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },

    /// Compute the top-k PPR matrix of the dataset and cache it
    Ppr {
        /// Teleport probability
        #[arg(short, long, default_value = "0.15")]
        alpha: f64,

        /// Push tolerance
        #[arg(short, long, default_value = "1e-6")]
        eps: f64,

        /// Entries kept per row
        #[arg(short, long, default_value = "64")]
        topk: usize,

        /// Normalization: row, sym or col
        #[arg(short, long, default_value = "row")]
        normalization: String,
    },

    /// Run a local attack experiment
    Attack {
        /// Attack name (overrides the config)
        #[arg(short, long)]
        attack: Option<String>,

        /// Comma-separated epsilons (overrides the config)
        #[arg(short, long)]
        epsilons: Option<String>,

        /// Comma-separated target nodes (overrides the config)
        #[arg(short, long)]
        nodes: Option<String>,

        /// Results file (overrides the config)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Inspect the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Store a linear PPR model from a JSON file
    Register {
        /// Model JSON file
        file: String,

        /// Label to store the model under (default: the model's own label)
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List stored models of the configured dataset
    List,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cache entries of a storage type
    List {
        /// Storage type (e.g. "ppr")
        storage_type: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    init_tracing(&config.debug_level, cli.verbose);

    match cli.command {
        Commands::Init { path } => commands::init::run(path),
        Commands::Model { command } => match command {
            ModelCommands::Register { file, label } => commands::model::register(&config, &file, label),
            ModelCommands::List => commands::model::list(&config),
        },
        Commands::Ppr { alpha, eps, topk, normalization } => {
            commands::ppr::run(&config, alpha, eps, topk, &normalization)
        }
        Commands::Attack { attack, epsilons, nodes, output } => {
            let overrides = commands::attack::Overrides { attack, epsilons, nodes, output };
            commands::attack::run(config, overrides, cli.verbose)
        }
        Commands::Cache { command } => match command {
            CacheCommands::List { storage_type } => commands::cache::list(&config, &storage_type),
        },
    }
}

fn init_tracing(debug_level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { debug_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
