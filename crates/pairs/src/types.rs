use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors raised while interpreting dataset configuration.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// Task name not in the supported set.
    #[error("unrecognized task: {0} (expected one of: mrpc, qqp, paws)")]
    UnknownTask(String),

    /// Split name not in the supported set.
    #[error("unrecognized split: {0} (expected one of: train, validation, test)")]
    UnknownSplit(String),

    /// Tokenizer output violated the fixed-length contract.
    #[error("tokenizer produced {got} tokens, expected {expected}")]
    LengthMismatch { expected: usize, got: usize },
}

/// Supported paraphrase-detection tasks.
///
/// Each task names the two text columns holding the anchor and target
/// sentences. All tasks store the binary label under `label`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// GLUE MRPC.
    Mrpc,
    /// GLUE QQP (question pairs).
    #[default]
    Qqp,
    /// PAWS `labeled_final`.
    Paws,
}

impl Task {
    /// Column names for (anchor, target) text.
    pub fn text_fields(&self) -> (&'static str, &'static str) {
        match self {
            Task::Mrpc | Task::Paws => ("sentence1", "sentence2"),
            Task::Qqp => ("question1", "question2"),
        }
    }

    /// Column name for the binary label.
    pub fn label_field(&self) -> &'static str {
        "label"
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Mrpc => write!(f, "mrpc"),
            Task::Qqp => write!(f, "qqp"),
            Task::Paws => write!(f, "paws"),
        }
    }
}

impl FromStr for Task {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mrpc" => Ok(Task::Mrpc),
            "qqp" => Ok(Task::Qqp),
            "paws" => Ok(Task::Paws),
            _ => Err(DataError::UnknownTask(s.to_string())),
        }
    }
}

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Validation => write!(f, "validation"),
            Split::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Split {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "validation" | "val" => Ok(Split::Validation),
            "test" => Ok(Split::Test),
            _ => Err(DataError::UnknownSplit(s.to_string())),
        }
    }
}

/// A raw sentence pair with a binary paraphrase label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    /// First sentence of the pair.
    pub anchor: String,
    /// Second sentence of the pair.
    pub target: String,
    /// 1 = paraphrase, 0 = not a paraphrase.
    pub label: u8,
}

/// Fixed-length token ids and attention mask for one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    pub input_ids: Vec<i64>,
    /// 1 for real tokens, 0 for padding. Same length as `input_ids`.
    pub attention_mask: Vec<i64>,
}

/// A tokenized pair, the host-side form of one batch row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedPair {
    pub anchor_input_ids: Vec<i64>,
    pub anchor_attention_mask: Vec<i64>,
    pub target_input_ids: Vec<i64>,
    pub target_attention_mask: Vec<i64>,
    pub label: i64,
}

impl TokenizedPair {
    /// Combine tokenized anchor and target sides.
    pub fn new(anchor: TokenizedText, target: TokenizedText, label: u8) -> Self {
        Self {
            anchor_input_ids: anchor.input_ids,
            anchor_attention_mask: anchor.attention_mask,
            target_input_ids: target.input_ids,
            target_attention_mask: target.attention_mask,
            label: label as i64,
        }
    }

    /// Sequence length of the anchor side.
    pub fn seq_len(&self) -> usize {
        self.anchor_input_ids.len()
    }
}

/// Label counts for a set of pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PairSummary {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
}
