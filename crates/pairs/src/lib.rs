//! Sentence-pair data for contrastive encoder training.
//!
//! Reads labeled sentence pairs (MRPC, QQP, PAWS style JSONL), tokenizes
//! anchors and targets to fixed-length id/mask sequences, and assembles
//! full-size batches as burn tensors.

pub mod batcher;
pub mod dataset;
pub mod module;
pub mod reader;
pub mod tokenize;
pub mod types;

pub use batcher::{PairBatch, PairBatcher, PairLoader};
pub use dataset::PairDataset;
pub use module::{DataModuleConfig, PairDataModule};
pub use reader::PairReader;
pub use tokenize::{HfTokenizer, PairTokenizer};
pub use types::{DataError, PairRecord, PairSummary, Split, Task, TokenizedPair, TokenizedText};
