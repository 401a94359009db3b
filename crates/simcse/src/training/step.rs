//! Per-batch training and evaluation protocol.

use burn::prelude::*;
use burn::tensor::TensorData;
use pairs::PairBatch;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::bridge::{int_tensor_to_vec, tensor_to_f64, tensor_to_vec};
use crate::model::encoder::SentenceEncoder;
use crate::model::similarity::{paired_distance, paired_similarity};
use crate::training::loss::ContrastiveLoss;
use crate::training::metrics::{EvalMetrics, MetricSink, TRAIN_LOSS};

/// Loss of one training batch.
pub struct TrainStepOutput<B: Backend> {
    /// Scalar loss, still attached to the autodiff graph.
    pub loss: Tensor<B, 1>,
    pub loss_value: f64,
}

/// One contrastive training step.
///
/// Anchors and targets are embedded with input corruption. Negatives are the
/// anchor sequences under a fresh random permutation of the batch, embedded
/// again with their own corruption draw, so negative `i` is usually some
/// other anchor. Labels are ignored. Emits `loss/train`.
pub fn training_step<B: Backend, R: Rng + ?Sized>(
    model: &SentenceEncoder<B>,
    loss_fn: &ContrastiveLoss,
    batch: &PairBatch<B>,
    rng: &mut R,
    sink: &mut dyn MetricSink,
    step: usize,
) -> TrainStepOutput<B> {
    let device = batch.anchor_input_ids.device();
    let batch_size = batch.len();

    let anchor = model.forward_corrupted(
        batch.anchor_input_ids.clone(),
        batch.anchor_attention_mask.clone(),
        rng,
    );
    let target = model.forward_corrupted(
        batch.target_input_ids.clone(),
        batch.target_attention_mask.clone(),
        rng,
    );

    let mut order: Vec<i64> = (0..batch_size as i64).collect();
    order.shuffle(rng);
    let order = Tensor::<B, 1, Int>::from_data(TensorData::new(order, [batch_size]), &device);
    let negative = model.forward_corrupted(
        batch.anchor_input_ids.clone().select(0, order.clone()),
        batch.anchor_attention_mask.clone().select(0, order),
        rng,
    );

    let loss = loss_fn.forward(anchor, target, negative);
    let loss_value = tensor_to_f64(loss.clone());
    sink.log_scalar(TRAIN_LOSS, loss_value, step);

    TrainStepOutput { loss, loss_value }
}

/// One evaluation step: distance and similarity statistics split by label.
///
/// No corruption and no loss. `diff/*` is the mean Euclidean distance
/// between paired embeddings, `sim/*` the mean paired cosine similarity
/// scaled by `temperature`. A label absent from the batch yields NaN for its
/// entries. Emits all five metrics.
pub fn evaluation_step<B: Backend>(
    model: &SentenceEncoder<B>,
    temperature: f64,
    batch: &PairBatch<B>,
    sink: &mut dyn MetricSink,
    step: usize,
) -> EvalMetrics {
    let anchor = model.forward(
        batch.anchor_input_ids.clone(),
        batch.anchor_attention_mask.clone(),
    );
    let target = model.forward(
        batch.target_input_ids.clone(),
        batch.target_attention_mask.clone(),
    );

    let distances = tensor_to_vec(paired_distance(anchor.clone(), target.clone()));
    let similarities = tensor_to_vec(paired_similarity(anchor, target, temperature));
    let labels = int_tensor_to_vec(batch.labels.clone());

    let metrics = EvalMetrics::new(
        label_mean(&distances, &labels, 1),
        label_mean(&distances, &labels, 0),
        label_mean(&similarities, &labels, 1),
        label_mean(&similarities, &labels, 0),
    );
    metrics.log_to(sink, step);
    metrics
}

/// Mean of `values[i]` over rows with `labels[i] == label`; NaN if none.
fn label_mean(values: &[f64], labels: &[i64], label: i64) -> f64 {
    let (sum, count) = values
        .iter()
        .zip(labels)
        .filter(|(_, &l)| l == label)
        .fold((0.0, 0usize), |(s, c), (&v, _)| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}
