//! Implementation of the `train`, `evaluate` and `summary` subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};

use pairs::{
    HfTokenizer, PairDataModule, PairDataset, PairLoader, PairReader, PairTokenizer, Split, Task,
};
use simcse::model::encoder::{SentenceEncoder, SentenceEncoderConfig};
use simcse::model::pooling::PoolerType;
use simcse::training::metrics::{
    EvalMetrics, JsonlMetricSink, MetricSink, MetricsHistory, MultiSink, DIFF_NEG, DIFF_POS,
    HP_METRIC, SIM_NEG, SIM_POS, TRAIN_LOSS,
};
use simcse::training::trainer::{evaluate, load_encoder, train, TrainingConfig};

use crate::config::{
    backbone_weights_path, build_data_config, build_encoder_config, build_loss_config,
    build_training_config, load_train_toml, TrainCliOverrides,
};

type TrainBackend = Autodiff<NdArray<f32>>;
type EvalBackend = NdArray<f32>;

/// Encoder hyperparameters written next to the checkpoints.
const ENCODER_CONFIG_FILE: &str = "encoder.json";
const METRICS_FILE: &str = "metrics.jsonl";

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    pub config: PathBuf,
    pub epochs: Option<usize>,
    pub lr: Option<f64>,
    pub batch_size: Option<usize>,
    pub pooler: Option<PoolerType>,
    pub output_dir: Option<PathBuf>,
    pub backbone_weights: Option<PathBuf>,
    pub resume_step: Option<usize>,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Debug)]
pub struct EvaluateArgs {
    pub config: PathBuf,
    pub checkpoint: PathBuf,
    pub split: Split,
    pub pooler: Option<PoolerType>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub data: PathBuf,
    pub task: Task,
    pub json: bool,
}

/// Train a contrastive encoder from a TOML config plus CLI overrides.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let toml = load_train_toml(&args.config)?;
    let cli = TrainCliOverrides {
        epochs: args.epochs,
        lr: args.lr,
        batch_size: args.batch_size,
        pooler: args.pooler,
        output_dir: args.output_dir,
        backbone_weights: args.backbone_weights,
    };

    // 1. Data
    let data_config = build_data_config(&toml.data, cli.batch_size);
    let tokenizer = HfTokenizer::from_file(&data_config.tokenizer, data_config.max_seq_length)?;
    let data = PairDataModule::setup(&data_config, &tokenizer)?;
    for (split, summary) in data.summary() {
        tracing::info!(
            split = %split,
            total = summary.total,
            positive = summary.positive,
            negative = summary.negative,
            "Split summary"
        );
    }

    // 2. Configs
    let encoder_config = build_encoder_config(
        &toml.encoder,
        cli.pooler,
        tokenizer.vocab_size(),
        tokenizer.boundary_token_ids(),
    );
    let training_config = build_training_config(&toml, &cli);
    let output_dir = PathBuf::from(&training_config.checkpoint_dir);
    std::fs::create_dir_all(&output_dir)?;
    encoder_config
        .save(output_dir.join(ENCODER_CONFIG_FILE))
        .map_err(|e| anyhow::anyhow!("Failed to save encoder config: {e}"))?;

    // 3. Model
    let device: <TrainBackend as Backend>::Device = Default::default();
    TrainBackend::seed(training_config.seed);
    let mut model = encoder_config.init::<TrainBackend>(&device)?;
    match backbone_weights_path(&toml.encoder, cli.backbone_weights.as_deref()) {
        Some(path) if args.resume_step.is_none() => {
            model = model.with_backbone_weights(&path, &device)?;
        }
        Some(_) => tracing::info!("Resuming; backbone weights come from the checkpoint"),
        None => tracing::warn!("No backbone weights configured, training from random init"),
    }
    tracing::info!(
        pooler = %encoder_config.pooler,
        d_output = model.d_output(),
        vocab_size = encoder_config.backbone.vocab_size,
        boundary_token_ids = ?encoder_config.boundary_token_ids,
        "Encoder ready"
    );

    // 4. Train, then score the test split into the same metric log
    let mut jsonl = JsonlMetricSink::create(&output_dir.join(METRICS_FILE))?;
    let mut history = MetricsHistory::new();
    let total_steps = data.train.num_batches() * training_config.epochs;
    let pb = progress_bar(total_steps as u64);
    if let Some(step) = args.resume_step {
        pb.set_position(step as u64);
    }

    let report = {
        let mut sink = MultiSink::new(vec![&mut jsonl as &mut dyn MetricSink, &mut history]);
        train_and_test(
            &training_config,
            model,
            &data,
            &device,
            &mut sink,
            args.resume_step,
            &pb,
        )?
    };
    pb.finish_with_message("done");
    jsonl.flush()?;

    // 5. Report
    println!("\n--- Training Summary ---");
    println!("Steps:        {}", report.steps);
    println!("Output dir:   {}", output_dir.display());
    if let Some(loss) = history.last(TRAIN_LOSS) {
        println!("Last loss:    {loss:.4}");
    }
    if let Some(last) = report.validation.last() {
        println!("Validation:   {}", last.display());
    }
    if let Some(test) = report.test {
        println!("Test:         {}", test.display());
    }

    Ok(())
}

/// Outcome of [`train_and_test`].
struct TrainReport {
    steps: usize,
    validation: Vec<EvalMetrics>,
    test: Option<EvalMetrics>,
}

/// Run training and, if the data module has a test split, evaluate the
/// final model on it. Both splits report through `sink`.
fn train_and_test(
    config: &TrainingConfig,
    model: SentenceEncoder<TrainBackend>,
    data: &PairDataModule,
    device: &<TrainBackend as Backend>::Device,
    sink: &mut dyn MetricSink,
    resume_step: Option<usize>,
    pb: &ProgressBar,
) -> anyhow::Result<TrainReport> {
    let output = train(
        config,
        model,
        &data.train,
        data.validation.as_ref(),
        device,
        sink,
        resume_step,
        &mut |step, loss| {
            pb.set_position(step as u64);
            pb.set_message(format!("loss={loss:.4}"));
        },
    )?;

    let test = match data.test.as_ref() {
        Some(loader) => Some(evaluate(
            &output.model.valid(),
            config.loss.temperature,
            loader,
            device,
            sink,
            output.steps,
        )?),
        None => None,
    };

    Ok(TrainReport {
        steps: output.steps,
        validation: output.validation,
        test,
    })
}

/// Evaluate a saved model on the validation or test split.
pub fn run_evaluate(args: EvaluateArgs) -> anyhow::Result<()> {
    let toml = load_train_toml(&args.config)?;
    let data_config = build_data_config(&toml.data, None);
    let path = data_config
        .path_for(args.split)
        .ok_or_else(|| anyhow::anyhow!("No {} split configured in {}", args.split, args.config.display()))?
        .clone();

    let tokenizer = HfTokenizer::from_file(&data_config.tokenizer, data_config.max_seq_length)?;
    let encoder_config = resolve_encoder_config(&args, &toml.encoder, &tokenizer)?;
    let temperature = build_loss_config(&toml.loss).temperature;

    let records = PairReader::read_jsonl(&path, data_config.task)?;
    let dataset = PairDataset::from_records(&records, &tokenizer)?;
    let loader = PairLoader::new(Arc::new(dataset), data_config.batch_size, false);

    let device: <EvalBackend as Backend>::Device = Default::default();
    let model = load_encoder::<EvalBackend>(&args.checkpoint, &encoder_config, &device)?;
    tracing::info!(
        checkpoint = %args.checkpoint.display(),
        split = %args.split,
        pairs = loader.dataset().len(),
        batches = loader.num_batches(),
        "Evaluating"
    );

    let mut scratch = MetricsHistory::new();
    let metrics = evaluate(&model, temperature, &loader, &device, &mut scratch, 0)?;

    println!("--- Evaluation ({}) ---", args.split);
    println!("{DIFF_POS:<10} {:.4}", metrics.diff_pos);
    println!("{DIFF_NEG:<10} {:.4}", metrics.diff_neg);
    println!("{SIM_POS:<10} {:.4}", metrics.sim_pos);
    println!("{SIM_NEG:<10} {:.4}", metrics.sim_neg);
    println!("{HP_METRIC:<10} {:.4}", metrics.hp_metric);
    Ok(())
}

/// Prefer the `encoder.json` saved by `train` beside the checkpoint; fall
/// back to rebuilding it from the TOML and tokenizer.
fn resolve_encoder_config(
    args: &EvaluateArgs,
    overrides: &crate::config::EncoderOverrides,
    tokenizer: &HfTokenizer,
) -> anyhow::Result<SentenceEncoderConfig> {
    let saved = saved_encoder_config_path(&args.checkpoint);
    let mut config = match saved {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using saved encoder config");
            SentenceEncoderConfig::load(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?
        }
        None => build_encoder_config(
            overrides,
            None,
            tokenizer.vocab_size(),
            tokenizer.boundary_token_ids(),
        ),
    };
    if let Some(p) = args.pooler {
        config.pooler = p;
    }
    Ok(config)
}

/// `{output_dir}/encoder.json` for a checkpoint at `{output_dir}/{step}/model.mpk`.
fn saved_encoder_config_path(checkpoint: &Path) -> Option<PathBuf> {
    let path = checkpoint.parent()?.parent()?.join(ENCODER_CONFIG_FILE);
    path.exists().then_some(path)
}

/// Print label counts for a JSONL file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = PairReader::read_summary(&args.data, args.task)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Pair Summary ({}) ---", args.task);
    println!("File:     {}", args.data.display());
    println!("Total:    {}", summary.total);
    println!("Positive: {}", summary.positive);
    println!("Negative: {}", summary.negative);
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}
