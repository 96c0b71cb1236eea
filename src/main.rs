//! Clasificar CLI
//!
//! Single-command training entry point for the day-type classifier.
//!
//! # Usage
//!
//! ```bash
//! clasificar train --raw flows.safetensors --augmented flows_aug.safetensors
//!
//! # With overrides
//! clasificar train --raw flows.safetensors --augmented flows_aug.safetensors \
//!     --iterations 10000 --seed 7 --checkpoint-dir checkpoints/run1
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use clasificar::data::load::load_raw_and_augmented;
use clasificar::data::split::shuffle_split;
use clasificar::train::{TrainConfig, Trainer};

/// Clasificar: weekday/weekend day-type classifier for urban flow grids
#[derive(Parser, Debug, Clone)]
#[command(name = "clasificar")]
#[command(version)]
#[command(about = "Train a dual-branch day-type classifier on spatiotemporal flow data")]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Train the classifier from safetensors data files
    Train(TrainArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone)]
struct TrainArgs {
    /// Path to the raw dataset container
    #[arg(long)]
    raw: PathBuf,

    /// Path to the augmented dataset container
    #[arg(long)]
    augmented: PathBuf,

    /// Directory for checkpoint files
    #[arg(long, default_value = "checkpoint")]
    checkpoint_dir: PathBuf,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Number of minibatch steps
    #[arg(long, default_value_t = 10_000)]
    iterations: usize,

    /// Fraction of samples assigned to the train split
    #[arg(long, default_value_t = 0.8)]
    ratio: f32,
}

fn run_command(cli: Cli) -> clasificar::Result<()> {
    match cli.command {
        Command::Train(args) => train(args),
    }
}

fn train(args: TrainArgs) -> clasificar::Result<()> {
    let (dataset, _augmented) = load_raw_and_augmented(&args.raw, &args.augmented)?;
    let (train_set, test_set) = shuffle_split(&dataset, args.ratio, args.seed)?;

    let config = TrainConfig {
        iterations: args.iterations,
        checkpoint_dir: args.checkpoint_dir.clone(),
        seed: args.seed,
        ..TrainConfig::default()
    };
    let mut trainer = Trainer::new(config, train_set, test_set)?;
    let summary = trainer.run()?;

    // Record the run next to its checkpoints.
    std::fs::create_dir_all(&args.checkpoint_dir)?;
    let summary_json = serde_json::to_string_pretty(&summary)
        .map_err(|e| clasificar::Error::Serialization(e.to_string()))?;
    std::fs::write(args.checkpoint_dir.join("run-summary.json"), summary_json)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
