//! Epoch-level training driver.
//!
//! Ties together the data loader, the per-step protocol, the grouped AdamW
//! optimizer and checkpointing. Validation runs on the non-autodiff copy of
//! the model at the end of every epoch.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use pairs::{PairBatcher, PairLoader};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::model::encoder::{SentenceEncoder, SentenceEncoderConfig};
use crate::training::loss::ContrastiveLossConfig;
use crate::training::metrics::{EvalMetrics, MetricSink, MetricsHistory};
use crate::training::optim::grouped_adamw;
use crate::training::step::{evaluation_step, training_step};

/// Metadata saved alongside each checkpoint for resuming training.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    /// Optimizer steps completed.
    pub step: usize,
    /// Epoch the next step belongs to.
    pub epoch: usize,
    /// Batches of `epoch` already consumed.
    pub batch_in_epoch: usize,
}

/// Learning-rate schedule.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrSchedule {
    /// Fixed learning rate for the whole run.
    #[default]
    Constant,
    /// Linear warmup followed by cosine decay to zero at the last step.
    WarmupCosine { warmup_steps: usize },
}

/// Configuration for contrastive training.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 3e-5)]
    pub learning_rate: f64,
    /// AdamW weight decay for the matrix parameter group.
    #[config(default = 0.0)]
    pub weight_decay: f64,
    #[config(default = 1)]
    pub epochs: usize,
    /// Steps between training-loss log lines.
    #[config(default = 50)]
    pub log_interval: usize,
    /// Steps between intermediate checkpoints. 0 disables them.
    #[config(default = 0)]
    pub checkpoint_interval: usize,
    #[config(default = "String::from(\"checkpoints/simcse\")")]
    pub checkpoint_dir: String,
    #[config(default = 42)]
    pub seed: u64,
    /// Per-parameter gradient norm clipping.
    pub max_grad_norm: Option<f64>,
    #[config(default = "LrSchedule::Constant")]
    pub schedule: LrSchedule,
    #[config(default = "ContrastiveLossConfig::new()")]
    pub loss: ContrastiveLossConfig,
}

impl TrainingConfig {
    fn step_dir(&self, step: usize) -> PathBuf {
        Path::new(&self.checkpoint_dir).join(format!("step_{step}"))
    }

    fn final_dir(&self) -> PathBuf {
        Path::new(&self.checkpoint_dir).join("final")
    }
}

/// Compute the learning rate at a given step using warmup + cosine decay.
///
/// - Warmup phase (`step < warmup_steps`): linearly ramps from 0 to `base_lr`.
/// - Cosine phase: decays from `base_lr` to 0 following a cosine schedule.
pub fn lr_schedule(base_lr: f64, warmup_steps: usize, total_steps: usize, step: usize) -> f64 {
    if warmup_steps > 0 && step < warmup_steps {
        base_lr * (step + 1) as f64 / warmup_steps as f64
    } else {
        let decay_steps = total_steps.saturating_sub(warmup_steps).max(1);
        let progress = (step.saturating_sub(warmup_steps)) as f64 / decay_steps as f64;
        let progress = progress.min(1.0);
        base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
    }
}

impl LrSchedule {
    pub fn lr_at(&self, base_lr: f64, total_steps: usize, step: usize) -> f64 {
        match *self {
            LrSchedule::Constant => base_lr,
            LrSchedule::WarmupCosine { warmup_steps } => {
                lr_schedule(base_lr, warmup_steps, total_steps, step)
            }
        }
    }
}

/// Running mean of the training loss over one logging interval.
struct RunningAvg {
    loss: f64,
    count: usize,
}

impl RunningAvg {
    fn new() -> Self {
        Self { loss: 0.0, count: 0 }
    }

    fn update(&mut self, loss: f64) {
        self.loss += loss;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.loss / self.count as f64)
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Result of a training run.
pub struct TrainOutput<B: AutodiffBackend> {
    pub model: SentenceEncoder<B>,
    /// Optimizer steps completed, including steps before a resume.
    pub steps: usize,
    /// Validation metrics after each epoch that had a validation split.
    pub validation: Vec<EvalMetrics>,
}

/// Run contrastive training.
///
/// # Arguments
/// - `config`: training hyperparameters
/// - `model`: initialized encoder (consumed and returned updated)
/// - `train_loader`: positive pairs, full batches only
/// - `val_loader`: optional labelled split evaluated after every epoch
/// - `device`: burn device for tensor operations
/// - `sink`: receives `loss/train` per step and the averaged validation
///   metrics per epoch
/// - `resume_step`: if `Some(step)`, load model, optimizer state and
///   metadata from `{checkpoint_dir}/step_{step}/` and continue from there
/// - `on_step`: called after every optimizer step with `(step, loss)`
#[allow(clippy::too_many_arguments)]
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    mut model: SentenceEncoder<B>,
    train_loader: &PairLoader,
    val_loader: Option<&PairLoader>,
    device: &B::Device,
    sink: &mut dyn MetricSink,
    resume_step: Option<usize>,
    on_step: &mut dyn FnMut(usize, f64),
) -> anyhow::Result<TrainOutput<B>> {
    anyhow::ensure!(
        train_loader.num_batches() > 0,
        "Training split has {} pairs, fewer than one batch of {}",
        train_loader.dataset().len(),
        train_loader.batch_size()
    );
    std::fs::create_dir_all(&config.checkpoint_dir)?;

    let loss_fn = config.loss.init()?;
    let batcher = PairBatcher::<B>::new(device.clone());
    let mut optimizer = grouped_adamw::<B, _>(&model, config.weight_decay, config.max_grad_norm);

    let steps_per_epoch = train_loader.num_batches();
    let total_steps = steps_per_epoch * config.epochs;
    let mut global_step = 0;
    let mut start_epoch = 0;
    let mut skip_batches = 0;

    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    if let Some(step) = resume_step {
        let step_dir = config.step_dir(step);
        model = load_encoder_weights(model, &step_dir.join("model"), device)?;
        optimizer = optimizer.load(&step_dir, device)?;

        let meta_path = step_dir.join("meta.json");
        let meta: CheckpointMeta = serde_json::from_reader(
            std::fs::File::open(&meta_path)
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", meta_path.display()))?,
        )
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", meta_path.display()))?;

        global_step = meta.step;
        start_epoch = meta.epoch;
        skip_batches = meta.batch_in_epoch;
        rng = StdRng::seed_from_u64(config.seed.wrapping_add(meta.step as u64));
        tracing::info!(
            step = global_step,
            epoch = start_epoch,
            batch_in_epoch = skip_batches,
            "Resumed training from checkpoint"
        );
    }

    tracing::info!(
        epochs = config.epochs,
        steps_per_epoch,
        total_steps,
        batch_size = train_loader.batch_size(),
        lr = config.learning_rate,
        temperature = loss_fn.temperature(),
        hard_negative_weight = loss_fn.hard_negative_weight(),
        pooler = %model.pooler(),
        "Starting contrastive training"
    );

    let train_start = Instant::now();
    let mut running_avg = RunningAvg::new();
    let mut validation = Vec::new();

    for epoch in start_epoch..config.epochs {
        let batches: Vec<_> = train_loader.batches(&mut rng).collect();
        let skip = std::mem::take(&mut skip_batches);

        for (batch_idx, items) in batches.into_iter().enumerate().skip(skip) {
            let lr = config
                .schedule
                .lr_at(config.learning_rate, total_steps, global_step);
            let batch = batcher.batch(items);

            let out = training_step(&model, &loss_fn, &batch, &mut rng, sink, global_step);
            if !out.loss_value.is_finite() {
                tracing::warn!(step = global_step, loss = out.loss_value, "Non-finite training loss");
            }
            let grads = GradientsParams::from_grads(out.loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            running_avg.update(out.loss_value);
            global_step += 1;
            on_step(global_step, out.loss_value);

            if config.log_interval > 0 && global_step % config.log_interval == 0 {
                let elapsed = train_start.elapsed().as_secs_f64();
                let lr_str = format!("{lr:.2e}");
                tracing::info!(
                    step = global_step,
                    epoch,
                    lr = %lr_str,
                    loss = format!("{:.4}", running_avg.mean().unwrap_or(f64::NAN)),
                    elapsed_secs = format!("{elapsed:.1}"),
                    "avg({})",
                    running_avg.count
                );
                running_avg.reset();
            }

            if config.checkpoint_interval > 0 && global_step % config.checkpoint_interval == 0 {
                let meta = CheckpointMeta {
                    step: global_step,
                    epoch,
                    batch_in_epoch: batch_idx + 1,
                };
                save_checkpoint(&config.step_dir(global_step), &model, &optimizer, &meta)?;
                tracing::info!(step = global_step, "Checkpoint saved (model + optimizer + meta)");
            }
        }

        if let Some(loader) = val_loader {
            match evaluate(
                &model.valid(),
                loss_fn.temperature(),
                loader,
                device,
                sink,
                global_step,
            ) {
                Ok(metrics) => {
                    tracing::info!(epoch, step = global_step, "validation: {}", metrics.display());
                    validation.push(metrics);
                }
                Err(e) => tracing::warn!(epoch, "Skipped validation: {e}"),
            }
        }
    }

    tracing::info!(
        steps = global_step,
        elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        "Training loop finished"
    );

    let meta = CheckpointMeta {
        step: global_step,
        epoch: config.epochs,
        batch_in_epoch: 0,
    };
    save_checkpoint(&config.final_dir(), &model, &optimizer, &meta)?;
    tracing::info!("Training complete. Final checkpoint saved (model + optimizer + meta).");

    Ok(TrainOutput {
        model,
        steps: global_step,
        validation,
    })
}

fn save_checkpoint<B, O>(
    dir: &Path,
    model: &SentenceEncoder<B>,
    optimizer: &crate::training::optim::GroupedOptimizer<B, SentenceEncoder<B>, O>,
    meta: &CheckpointMeta,
) -> anyhow::Result<()>
where
    B: AutodiffBackend,
    O: burn::optim::Optimizer<SentenceEncoder<B>, B>,
{
    std::fs::create_dir_all(dir)?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(dir.join("model"), &recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save model to {}: {e}", dir.display()))?;
    optimizer.save(dir)?;
    serde_json::to_writer(std::fs::File::create(dir.join("meta.json"))?, meta)?;
    Ok(())
}

/// Evaluate a model over every full batch of `loader`.
///
/// Batch metrics are averaged (NaN batches skipped per field) and the
/// averages are emitted to `sink` at `step`.
pub fn evaluate<B: Backend>(
    model: &SentenceEncoder<B>,
    temperature: f64,
    loader: &PairLoader,
    device: &B::Device,
    sink: &mut dyn MetricSink,
    step: usize,
) -> anyhow::Result<EvalMetrics> {
    let batcher = PairBatcher::<B>::new(device.clone());
    // Evaluation loaders never shuffle; the RNG only satisfies the signature.
    let mut rng = StdRng::seed_from_u64(0);
    let mut per_batch = MetricsHistory::new();

    let batches: Vec<EvalMetrics> = loader
        .batches(&mut rng)
        .enumerate()
        .map(|(i, items)| evaluation_step(model, temperature, &batcher.batch(items), &mut per_batch, i))
        .collect();

    let metrics = EvalMetrics::mean(&batches).ok_or_else(|| {
        anyhow::anyhow!(
            "Evaluation split has {} pairs, fewer than one batch of {}",
            loader.dataset().len(),
            loader.batch_size()
        )
    })?;
    metrics.log_to(sink, step);
    Ok(metrics)
}

/// Build an encoder from `config` and load saved weights on top.
pub fn load_encoder<B: Backend>(
    path: &Path,
    config: &SentenceEncoderConfig,
    device: &B::Device,
) -> anyhow::Result<SentenceEncoder<B>> {
    let model = config.init::<B>(device)?;
    load_encoder_weights(model, path, device)
}

fn load_encoder_weights<B: Backend>(
    model: SentenceEncoder<B>,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<SentenceEncoder<B>> {
    model
        .load_file(
            path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load checkpoint from {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lr_schedule() {
        let base_lr = 1e-4;
        let warmup = 100;
        let total = 1000;

        // Warmup phase: step 0 → lr = base_lr * 1/100
        let lr0 = lr_schedule(base_lr, warmup, total, 0);
        assert!(
            (lr0 - base_lr / 100.0).abs() < 1e-10,
            "Step 0: expected {}, got {lr0}",
            base_lr / 100.0
        );

        // End of warmup reaches base_lr
        let lr_peak = lr_schedule(base_lr, warmup, total, warmup - 1);
        assert!((lr_peak - base_lr).abs() < 1e-10);

        // Midpoint of decay is half of base_lr
        let mid = warmup + (total - warmup) / 2;
        let lr_mid = lr_schedule(base_lr, warmup, total, mid);
        assert!((lr_mid - base_lr / 2.0).abs() < 1e-8, "mid: {lr_mid}");

        // Decays to zero at the end and stays there
        assert!(lr_schedule(base_lr, warmup, total, total) < 1e-12);
        assert!(lr_schedule(base_lr, warmup, total, total + 50) < 1e-12);
    }

    #[test]
    fn test_constant_schedule() {
        let schedule = LrSchedule::Constant;
        for step in [0, 10, 10_000] {
            assert_eq!(schedule.lr_at(3e-5, 100, step), 3e-5);
        }
        let warm = LrSchedule::WarmupCosine { warmup_steps: 10 };
        assert!(warm.lr_at(3e-5, 100, 0) < 3e-5);
    }

    #[test]
    fn test_config_defaults() {
        let config = TrainingConfig::new();
        assert_eq!(config.learning_rate, 3e-5);
        assert_eq!(config.weight_decay, 0.0);
        assert_eq!(config.epochs, 1);
        assert_eq!(config.seed, 42);
        assert_eq!(config.checkpoint_interval, 0);
        assert!(config.max_grad_norm.is_none());
        assert_eq!(config.schedule, LrSchedule::Constant);
        assert_eq!(config.loss.temperature, 0.05);
        assert_eq!(config.loss.hard_negative_weight, 0.0);
    }

    #[test]
    fn test_schedule_toml_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            schedule: LrSchedule,
        }
        let w: Wrapper = toml::from_str("schedule = { kind = \"warmup_cosine\", warmup_steps = 20 }").unwrap();
        assert_eq!(w.schedule, LrSchedule::WarmupCosine { warmup_steps: 20 });
        let w: Wrapper = toml::from_str("schedule = { kind = \"constant\" }").unwrap();
        assert_eq!(w.schedule, LrSchedule::Constant);
    }

    #[test]
    fn test_running_avg() {
        let mut avg = RunningAvg::new();
        assert!(avg.mean().is_none());
        avg.update(1.0);
        avg.update(3.0);
        assert_eq!(avg.mean(), Some(2.0));
        avg.reset();
        assert_eq!(avg.count, 0);
    }
}
