//! Batch assembly: host pairs → burn tensors, and full-batch iteration.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::TensorData;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::dataset::PairDataset;
use crate::types::TokenizedPair;

/// A batch of aligned anchor/target token sequences with labels.
///
/// Shapes: ids and masks `[batch, seq_len]`, labels `[batch]`.
/// Row `i` of the anchor tensors pairs with row `i` of the target tensors.
#[derive(Clone, Debug)]
pub struct PairBatch<B: Backend> {
    pub anchor_input_ids: Tensor<B, 2, Int>,
    pub anchor_attention_mask: Tensor<B, 2, Int>,
    pub target_input_ids: Tensor<B, 2, Int>,
    pub target_attention_mask: Tensor<B, 2, Int>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> PairBatch<B> {
    /// Number of pairs in the batch.
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks [`TokenizedPair`]s into a [`PairBatch`] on a fixed device.
#[derive(Clone, Debug)]
pub struct PairBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> PairBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn stack(&self, rows: Vec<&[i64]>, seq_len: usize) -> Tensor<B, 2, Int> {
        let batch = rows.len();
        let flat: Vec<i64> = rows.into_iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_data(TensorData::new(flat, [batch, seq_len]), &self.device)
    }
}

impl<B: Backend> Batcher<TokenizedPair, PairBatch<B>> for PairBatcher<B> {
    /// # Panics
    /// Panics if `items` is empty or sequences have differing lengths.
    fn batch(&self, items: Vec<TokenizedPair>) -> PairBatch<B> {
        assert!(!items.is_empty(), "cannot batch zero pairs");
        let seq_len = items[0].seq_len();
        for (i, item) in items.iter().enumerate() {
            assert!(
                item.anchor_input_ids.len() == seq_len
                    && item.anchor_attention_mask.len() == seq_len
                    && item.target_input_ids.len() == seq_len
                    && item.target_attention_mask.len() == seq_len,
                "pair {i} does not have sequence length {seq_len}"
            );
        }

        let labels: Vec<i64> = items.iter().map(|p| p.label).collect();
        let n = labels.len();

        PairBatch {
            anchor_input_ids: self
                .stack(items.iter().map(|p| p.anchor_input_ids.as_slice()).collect(), seq_len),
            anchor_attention_mask: self.stack(
                items.iter().map(|p| p.anchor_attention_mask.as_slice()).collect(),
                seq_len,
            ),
            target_input_ids: self
                .stack(items.iter().map(|p| p.target_input_ids.as_slice()).collect(), seq_len),
            target_attention_mask: self.stack(
                items.iter().map(|p| p.target_attention_mask.as_slice()).collect(),
                seq_len,
            ),
            labels: Tensor::from_data(TensorData::new(labels, [n]), &self.device),
        }
    }
}

/// Iterates a dataset in full batches of `batch_size`.
///
/// The trailing partial batch is always dropped, so every batch has exactly
/// `batch_size` rows.
#[derive(Debug, Clone)]
pub struct PairLoader {
    dataset: Arc<PairDataset>,
    batch_size: usize,
    shuffle: bool,
}

impl PairLoader {
    /// # Panics
    /// Panics if `batch_size` is zero.
    pub fn new(dataset: Arc<PairDataset>, batch_size: usize, shuffle: bool) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            dataset,
            batch_size,
            shuffle,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of full batches per pass.
    pub fn num_batches(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    pub fn dataset(&self) -> &PairDataset {
        &self.dataset
    }

    /// One pass over the data. Order is shuffled with `rng` when enabled.
    pub fn batches<R: Rng>(&self, rng: &mut R) -> impl Iterator<Item = Vec<TokenizedPair>> + '_ {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        let chunks: Vec<Vec<usize>> = order
            .chunks_exact(self.batch_size)
            .map(|c| c.to_vec())
            .collect();

        chunks.into_iter().map(move |indices| {
            indices
                .into_iter()
                .filter_map(|i| self.dataset.get(i).cloned())
                .collect()
        })
    }
}
