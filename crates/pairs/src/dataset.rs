//! Tokenized in-memory pair datasets.

use crate::tokenize::PairTokenizer;
use crate::types::{PairRecord, PairSummary, TokenizedPair};

/// Number of sentences handed to the tokenizer per call.
const TOKENIZE_CHUNK: usize = 1024;

/// A tokenized, index-addressable set of sentence pairs.
#[derive(Debug, Clone, Default)]
pub struct PairDataset {
    items: Vec<TokenizedPair>,
}

impl PairDataset {
    /// Wrap already tokenized pairs.
    pub fn new(items: Vec<TokenizedPair>) -> Self {
        Self { items }
    }

    /// Tokenize anchors and targets separately and zip them back into pairs.
    pub fn from_records(
        records: &[PairRecord],
        tokenizer: &dyn PairTokenizer,
    ) -> anyhow::Result<Self> {
        let mut items = Vec::with_capacity(records.len());

        for chunk in records.chunks(TOKENIZE_CHUNK) {
            let anchors: Vec<&str> = chunk.iter().map(|r| r.anchor.as_str()).collect();
            let targets: Vec<&str> = chunk.iter().map(|r| r.target.as_str()).collect();

            let anchor_tokens = tokenizer.encode_batch(&anchors)?;
            let target_tokens = tokenizer.encode_batch(&targets)?;
            anyhow::ensure!(
                anchor_tokens.len() == chunk.len() && target_tokens.len() == chunk.len(),
                "tokenizer returned {} anchor / {} target encodings for {} pairs",
                anchor_tokens.len(),
                target_tokens.len(),
                chunk.len()
            );

            for ((record, anchor), target) in chunk.iter().zip(anchor_tokens).zip(target_tokens) {
                items.push(TokenizedPair::new(anchor, target, record.label));
            }
        }

        tracing::debug!(count = items.len(), "Tokenized sentence pairs");
        Ok(Self { items })
    }

    /// Keep only paraphrase pairs (label 1). Training uses positives only.
    pub fn positives_only(self) -> Self {
        Self {
            items: self.items.into_iter().filter(|p| p.label == 1).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TokenizedPair> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenizedPair> {
        self.items.iter()
    }

    /// Label counts.
    pub fn summary(&self) -> PairSummary {
        let positive = self.items.iter().filter(|p| p.label == 1).count();
        PairSummary {
            total: self.items.len(),
            positive,
            negative: self.items.len() - positive,
        }
    }
}
