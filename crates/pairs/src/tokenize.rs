//! Tokenization to fixed-length id/mask sequences.

use std::path::Path;

use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::types::{DataError, TokenizedText};

/// Sequence-start/end marker tokens tried when deriving boundary ids.
const BOUNDARY_TOKENS: [&str; 4] = ["[CLS]", "[SEP]", "<s>", "</s>"];

/// Padding tokens tried, in order, when configuring fixed-length padding.
const PAD_TOKENS: [&str; 2] = ["[PAD]", "<pad>"];

/// Converts sentences into fixed-length token ids and attention masks.
///
/// Every returned sequence must have the same length (padding and
/// truncation are the tokenizer's responsibility).
pub trait PairTokenizer {
    /// Tokenize a batch of sentences.
    fn encode_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<TokenizedText>>;

    /// Ids of the reserved sequence-start/end markers for this vocabulary.
    fn boundary_token_ids(&self) -> Vec<i64>;

    /// Fixed output length.
    fn max_seq_length(&self) -> usize;
}

/// HuggingFace `tokenizer.json` wrapper with truncation and fixed padding.
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    max_seq_length: usize,
}

impl HfTokenizer {
    /// Load a tokenizer file and configure it to emit exactly
    /// `max_seq_length` tokens per sentence.
    pub fn from_file(path: &Path, max_seq_length: usize) -> anyhow::Result<Self> {
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer from {}: {e}", path.display()))?;

        let (pad_token, pad_id) = PAD_TOKENS
            .iter()
            .find_map(|tok| tokenizer.token_to_id(tok).map(|id| (tok.to_string(), id)))
            .unwrap_or_else(|| ("[PAD]".to_string(), 0));

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_seq_length),
            pad_id,
            pad_token,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {e}"))?;

        tracing::info!(
            path = %path.display(),
            max_seq_length,
            pad_id,
            "Loaded tokenizer"
        );

        Ok(Self {
            tokenizer,
            max_seq_length,
        })
    }

    /// Vocabulary size including added special tokens.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

impl PairTokenizer for HfTokenizer {
    fn encode_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<TokenizedText>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))?;

        encodings
            .iter()
            .map(|enc| {
                let ids = enc.get_ids();
                if ids.len() != self.max_seq_length {
                    return Err(DataError::LengthMismatch {
                        expected: self.max_seq_length,
                        got: ids.len(),
                    }
                    .into());
                }
                Ok(TokenizedText {
                    input_ids: ids.iter().map(|&id| id as i64).collect(),
                    attention_mask: enc.get_attention_mask().iter().map(|&m| m as i64).collect(),
                })
            })
            .collect()
    }

    fn boundary_token_ids(&self) -> Vec<i64> {
        BOUNDARY_TOKENS
            .iter()
            .filter_map(|tok| self.tokenizer.token_to_id(tok))
            .map(|id| id as i64)
            .collect()
    }

    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }
}
