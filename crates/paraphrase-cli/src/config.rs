//! TOML config loading for the training CLI.
//!
//! Deserializes `configs/train.toml`, which has a required `[data]` section
//! and optional `[encoder]`, `[encoder.backbone]`, `[loss]` and `[training]`
//! sections, then merges with CLI overrides.

use std::path::{Path, PathBuf};

use pairs::DataModuleConfig;
use serde::Deserialize;
use simcse::model::backbone::BackboneConfig;
use simcse::model::encoder::SentenceEncoderConfig;
use simcse::model::pooling::PoolerType;
use simcse::model::projection::Activation;
use simcse::training::loss::ContrastiveLossConfig;
use simcse::training::trainer::{LrSchedule, TrainingConfig};

/// Top-level structure matching `configs/train.toml`.
#[derive(Debug, Deserialize)]
pub struct TrainToml {
    pub data: DataModuleConfig,
    #[serde(default)]
    pub encoder: EncoderOverrides,
    #[serde(default)]
    pub loss: LossOverrides,
    #[serde(default)]
    pub training: TrainingOverrides,
}

/// Optional overrides for [`SentenceEncoderConfig`].
#[derive(Debug, Default, Deserialize)]
pub struct EncoderOverrides {
    pub pooler: Option<PoolerType>,
    pub mlp_layers: Option<Vec<usize>>,
    pub activation: Option<Activation>,
    pub input_mask_rate: Option<f64>,
    /// Defaults to the tokenizer's `[CLS]`/`[SEP]` (or `<s>`/`</s>`) ids.
    pub boundary_token_ids: Option<Vec<i64>>,
    /// Pretrained backbone record (`.mpk`) loaded before training.
    pub backbone_weights: Option<PathBuf>,
    #[serde(default)]
    pub backbone: BackboneOverrides,
}

/// Optional overrides for [`BackboneConfig`].
///
/// `vocab_size` defaults to the tokenizer vocabulary.
#[derive(Debug, Default, Deserialize)]
pub struct BackboneOverrides {
    pub vocab_size: Option<usize>,
    pub hidden_size: Option<usize>,
    pub num_layers: Option<usize>,
    pub num_heads: Option<usize>,
    pub intermediate_size: Option<usize>,
    pub max_position_embeddings: Option<usize>,
    pub dropout: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LossOverrides {
    pub temperature: Option<f64>,
    pub hard_negative_weight: Option<f64>,
}

/// Optional overrides for [`TrainingConfig`].
#[derive(Debug, Default, Deserialize)]
pub struct TrainingOverrides {
    pub learning_rate: Option<f64>,
    pub weight_decay: Option<f64>,
    pub epochs: Option<usize>,
    pub log_interval: Option<usize>,
    pub checkpoint_interval: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub max_grad_norm: Option<f64>,
    pub schedule: Option<LrSchedule>,
}

/// Training flags given on the command line.
#[derive(Debug, Default, Clone)]
pub struct TrainCliOverrides {
    pub epochs: Option<usize>,
    pub lr: Option<f64>,
    pub batch_size: Option<usize>,
    pub pooler: Option<PoolerType>,
    pub output_dir: Option<PathBuf>,
    pub backbone_weights: Option<PathBuf>,
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
    let config: TrainToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded training config");
    Ok(config)
}

/// Data config with the CLI `--batch-size` applied.
pub fn build_data_config(toml: &DataModuleConfig, batch_size_cli: Option<usize>) -> DataModuleConfig {
    let mut config = toml.clone();
    if let Some(n) = batch_size_cli {
        config.batch_size = n;
    }
    config
}

/// Build a [`SentenceEncoderConfig`] from tokenizer-derived values, TOML
/// overrides and CLI flags.
///
/// Priority chain: defaults (vocabulary and boundary ids from the tokenizer)
/// < TOML values < CLI `--pooler`.
pub fn build_encoder_config(
    overrides: &EncoderOverrides,
    pooler_cli: Option<PoolerType>,
    tokenizer_vocab_size: usize,
    tokenizer_boundary_ids: Vec<i64>,
) -> SentenceEncoderConfig {
    let b = &overrides.backbone;
    let mut backbone = BackboneConfig::new(b.vocab_size.unwrap_or(tokenizer_vocab_size));
    if let Some(n) = b.hidden_size {
        backbone.hidden_size = n;
    }
    if let Some(n) = b.num_layers {
        backbone.num_layers = n;
    }
    if let Some(n) = b.num_heads {
        backbone.num_heads = n;
    }
    if let Some(n) = b.intermediate_size {
        backbone.intermediate_size = n;
    }
    if let Some(n) = b.max_position_embeddings {
        backbone.max_position_embeddings = n;
    }
    if let Some(p) = b.dropout {
        backbone.dropout = p;
    }

    let mut config = SentenceEncoderConfig::new(backbone);
    if !tokenizer_boundary_ids.is_empty() {
        config.boundary_token_ids = tokenizer_boundary_ids;
    }
    if let Some(p) = overrides.pooler {
        config.pooler = p;
    }
    if let Some(ref layers) = overrides.mlp_layers {
        config.mlp_layers = layers.clone();
    }
    if let Some(a) = overrides.activation {
        config.activation = a;
    }
    if let Some(r) = overrides.input_mask_rate {
        config.input_mask_rate = r;
    }
    if let Some(ref ids) = overrides.boundary_token_ids {
        config.boundary_token_ids = ids.clone();
    }

    if let Some(p) = pooler_cli {
        config.pooler = p;
    }
    config
}

pub fn build_loss_config(overrides: &LossOverrides) -> ContrastiveLossConfig {
    let mut config = ContrastiveLossConfig::new();
    if let Some(t) = overrides.temperature {
        config.temperature = t;
    }
    if let Some(w) = overrides.hard_negative_weight {
        config.hard_negative_weight = w;
    }
    config
}

/// Build a [`TrainingConfig`]: defaults < TOML `[training]`/`[loss]` < CLI.
pub fn build_training_config(toml: &TrainToml, cli: &TrainCliOverrides) -> TrainingConfig {
    let t = &toml.training;
    let mut config = TrainingConfig::new().with_loss(build_loss_config(&toml.loss));

    if let Some(lr) = t.learning_rate {
        config.learning_rate = lr;
    }
    if let Some(wd) = t.weight_decay {
        config.weight_decay = wd;
    }
    if let Some(n) = t.epochs {
        config.epochs = n;
    }
    if let Some(n) = t.log_interval {
        config.log_interval = n;
    }
    if let Some(n) = t.checkpoint_interval {
        config.checkpoint_interval = n;
    }
    if let Some(ref dir) = t.output_dir {
        config.checkpoint_dir = dir.display().to_string();
    }
    if let Some(seed) = t.seed {
        config.seed = seed;
    }
    if t.max_grad_norm.is_some() {
        config.max_grad_norm = t.max_grad_norm;
    }
    if let Some(schedule) = t.schedule {
        config.schedule = schedule;
    }

    if let Some(n) = cli.epochs {
        config.epochs = n;
    }
    if let Some(lr) = cli.lr {
        config.learning_rate = lr;
    }
    if let Some(ref dir) = cli.output_dir {
        config.checkpoint_dir = dir.display().to_string();
    }
    config
}

/// Backbone weights path: CLI flag wins over the TOML entry.
pub fn backbone_weights_path(toml: &EncoderOverrides, cli: Option<&Path>) -> Option<PathBuf> {
    cli.map(Path::to_path_buf)
        .or_else(|| toml.backbone_weights.clone())
}
