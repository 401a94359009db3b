//! Split-level data setup: read, tokenize, filter and wrap in loaders.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::batcher::PairLoader;
use crate::dataset::PairDataset;
use crate::reader::PairReader;
use crate::tokenize::PairTokenizer;
use crate::types::{PairSummary, Split, Task};

/// Data configuration, typically the `[data]` section of the training TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DataModuleConfig {
    /// Which text columns to read.
    #[serde(default)]
    pub task: Task,
    /// Training split JSONL.
    pub train: PathBuf,
    /// Validation split JSONL.
    #[serde(default)]
    pub validation: Option<PathBuf>,
    /// Test split JSONL.
    #[serde(default)]
    pub test: Option<PathBuf>,
    /// HuggingFace `tokenizer.json` for the backbone vocabulary.
    pub tokenizer: PathBuf,
    /// Padding/truncation length for every sentence.
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Shuffle the training split every epoch.
    #[serde(default)]
    pub shuffle: bool,
}

fn default_max_seq_length() -> usize {
    32
}
fn default_batch_size() -> usize {
    32
}

impl DataModuleConfig {
    /// Config with defaults for everything except the required paths.
    pub fn new(train: PathBuf, tokenizer: PathBuf) -> Self {
        Self {
            task: Task::default(),
            train,
            validation: None,
            test: None,
            tokenizer,
            max_seq_length: default_max_seq_length(),
            batch_size: default_batch_size(),
            shuffle: false,
        }
    }

    /// Path configured for a split, if any.
    pub fn path_for(&self, split: Split) -> Option<&PathBuf> {
        match split {
            Split::Train => Some(&self.train),
            Split::Validation => self.validation.as_ref(),
            Split::Test => self.test.as_ref(),
        }
    }
}

/// Loaders for every configured split.
///
/// The training split keeps only positive pairs; validation and test keep
/// both labels. All loaders drop the trailing partial batch.
pub struct PairDataModule {
    pub train: PairLoader,
    pub validation: Option<PairLoader>,
    pub test: Option<PairLoader>,
}

impl PairDataModule {
    /// Read and tokenize every configured split.
    pub fn setup(config: &DataModuleConfig, tokenizer: &dyn PairTokenizer) -> anyhow::Result<Self> {
        anyhow::ensure!(config.batch_size > 0, "batch_size must be > 0");

        let train = load_split(config, Split::Train, tokenizer)?
            .map(PairDataset::positives_only)
            .ok_or_else(|| anyhow::anyhow!("No training split configured"))?;
        let train_summary = train.summary();
        tracing::info!(
            task = %config.task,
            pairs = train_summary.total,
            batches = train_summary.total / config.batch_size,
            "Training split ready (positives only)"
        );

        let eval_loader = |split: Split| -> anyhow::Result<Option<PairLoader>> {
            Ok(load_split(config, split, tokenizer)?.map(|ds| {
                let summary = ds.summary();
                tracing::info!(
                    split = %split,
                    positive = summary.positive,
                    negative = summary.negative,
                    "Evaluation split ready"
                );
                PairLoader::new(Arc::new(ds), config.batch_size, false)
            }))
        };

        Ok(Self {
            train: PairLoader::new(Arc::new(train), config.batch_size, config.shuffle),
            validation: eval_loader(Split::Validation)?,
            test: eval_loader(Split::Test)?,
        })
    }

    /// Loader for a split, if configured.
    pub fn loader(&self, split: Split) -> Option<&PairLoader> {
        match split {
            Split::Train => Some(&self.train),
            Split::Validation => self.validation.as_ref(),
            Split::Test => self.test.as_ref(),
        }
    }

    /// Label counts per configured split.
    pub fn summary(&self) -> Vec<(Split, PairSummary)> {
        [Split::Train, Split::Validation, Split::Test]
            .into_iter()
            .filter_map(|split| self.loader(split).map(|l| (split, l.dataset().summary())))
            .collect()
    }
}

fn load_split(
    config: &DataModuleConfig,
    split: Split,
    tokenizer: &dyn PairTokenizer,
) -> anyhow::Result<Option<PairDataset>> {
    let Some(path) = config.path_for(split) else {
        return Ok(None);
    };
    let records = PairReader::read_jsonl(path, config.task)?;
    PairDataset::from_records(&records, tokenizer).map(Some)
}
