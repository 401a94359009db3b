//! paraphrasegen: contrastive sentence-encoder training on paraphrase pairs.
//!
//! Subcommands:
//! - `train` trains an encoder from a TOML config with CLI overrides
//! - `evaluate` scores a saved checkpoint on the validation or test split
//! - `summary` prints label counts of a JSONL pair file

mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pairs::{Split, Task};
use simcse::model::pooling::PoolerType;
use tracing_subscriber::EnvFilter;

use pipeline::{EvaluateArgs, SummaryArgs, TrainArgs};

#[derive(Parser)]
#[command(name = "paraphrasegen", version, about = "Contrastive paraphrase encoder training")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a sentence encoder on positive paraphrase pairs.
    Train {
        /// Path to the training TOML config.
        #[arg(long, default_value = "configs/train.toml")]
        config: PathBuf,
        /// Number of epochs (overrides `[training] epochs`).
        #[arg(long)]
        epochs: Option<usize>,
        /// Learning rate (overrides `[training] learning_rate`).
        #[arg(long)]
        lr: Option<f64>,
        /// Batch size (overrides `[data] batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,
        /// Pooling strategy: cls, cls_before_pooler, avg, avg_top2, avg_first_last.
        #[arg(long)]
        pooler: Option<PoolerType>,
        /// Directory for checkpoints, metrics and the encoder config.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Pretrained backbone record (`.mpk`) to start from.
        #[arg(long)]
        backbone_weights: Option<PathBuf>,
        /// Resume from `{output_dir}/step_{N}`.
        #[arg(long)]
        resume_step: Option<usize>,
    },
    /// Evaluate a saved model on a labelled split.
    Evaluate {
        /// Path to the training TOML config (data and tokenizer).
        #[arg(long, default_value = "configs/train.toml")]
        config: PathBuf,
        /// Model record written by `train`, e.g. `checkpoints/simcse/final/model.mpk`.
        #[arg(long)]
        checkpoint: PathBuf,
        /// Split to evaluate: validation or test.
        #[arg(long, default_value = "validation")]
        split: Split,
        /// Pooling strategy, if different from the saved encoder config.
        #[arg(long)]
        pooler: Option<PoolerType>,
    },
    /// Print label counts of a JSONL pair file.
    Summary {
        /// Path to the JSONL file.
        #[arg(long)]
        data: PathBuf,
        /// Task whose column names the file uses: mrpc, qqp, paws.
        #[arg(long, default_value = "qqp")]
        task: Task,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            epochs,
            lr,
            batch_size,
            pooler,
            output_dir,
            backbone_weights,
            resume_step,
        } => pipeline::run_train(TrainArgs {
            config,
            epochs,
            lr,
            batch_size,
            pooler,
            output_dir,
            backbone_weights,
            resume_step,
        }),
        Command::Evaluate {
            config,
            checkpoint,
            split,
            pooler,
        } => {
            anyhow::ensure!(
                split != Split::Train,
                "evaluate expects --split validation or test"
            );
            pipeline::run_evaluate(EvaluateArgs {
                config,
                checkpoint,
                split,
                pooler,
            })
        }
        Command::Summary { data, task, json } => {
            pipeline::run_summary(SummaryArgs { data, task, json })
        }
    }
}
