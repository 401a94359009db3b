//! Pooling strategies: per-token hidden states → one vector per sentence.
//!
//! Padding positions (mask 0) never contribute. Every averaging variant
//! divides by the number of unmasked tokens, so a row with an all-zero mask
//! yields NaN.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::backbone::BackboneOutput;

/// Closed set of sentence pooling strategies.
///
/// - `cls`: position-0 hidden state of the final layer, followed by the
///   projection head.
/// - `cls_before_pooler`: same vector, projection head skipped.
/// - `avg`: masked mean of the final layer.
/// - `avg_top2`: masked mean of the average of the last two layers.
/// - `avg_first_last`: masked mean of the average of the embedding layer
///   and the final layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolerType {
    #[default]
    Cls,
    ClsBeforePooler,
    Avg,
    AvgTop2,
    AvgFirstLast,
}

impl PoolerType {
    /// All variants, in declaration order.
    pub const ALL: [PoolerType; 5] = [
        PoolerType::Cls,
        PoolerType::ClsBeforePooler,
        PoolerType::Avg,
        PoolerType::AvgTop2,
        PoolerType::AvgFirstLast,
    ];

    /// Whether the projection head runs after pooling.
    pub fn uses_projection(&self) -> bool {
        matches!(self, PoolerType::Cls)
    }

    /// Reduce backbone output to `(batch, hidden)`.
    ///
    /// # Panics
    /// `avg_top2` panics if the backbone returned fewer than two hidden
    /// states.
    pub fn pool<B: Backend>(
        &self,
        attention_mask: Tensor<B, 2, Int>,
        outputs: &BackboneOutput<B>,
    ) -> Tensor<B, 2> {
        match self {
            PoolerType::Cls | PoolerType::ClsBeforePooler => {
                first_token(outputs.last_hidden_state.clone())
            }
            PoolerType::Avg => masked_mean(outputs.last_hidden_state.clone(), attention_mask),
            PoolerType::AvgTop2 => {
                let n = outputs.hidden_states.len();
                assert!(n >= 2, "avg_top2 needs at least two hidden states, got {n}");
                let last = outputs.hidden_states[n - 1].clone();
                let second_last = outputs.hidden_states[n - 2].clone();
                masked_mean((last + second_last) / 2.0, attention_mask)
            }
            PoolerType::AvgFirstLast => {
                let first = outputs
                    .hidden_states
                    .first()
                    .cloned()
                    .unwrap_or_else(|| outputs.last_hidden_state.clone());
                let last = outputs
                    .hidden_states
                    .last()
                    .cloned()
                    .unwrap_or_else(|| outputs.last_hidden_state.clone());
                masked_mean((first + last) / 2.0, attention_mask)
            }
        }
    }
}

impl fmt::Display for PoolerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolerType::Cls => "cls",
            PoolerType::ClsBeforePooler => "cls_before_pooler",
            PoolerType::Avg => "avg",
            PoolerType::AvgTop2 => "avg_top2",
            PoolerType::AvgFirstLast => "avg_first_last",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PoolerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoolerType::ALL
            .into_iter()
            .find(|p| p.to_string() == s)
            .ok_or_else(|| ConfigError::UnknownPooler(s.to_string()))
    }
}

/// Hidden state at sequence position 0: `(N, L, D)` → `(N, D)`.
pub fn first_token<B: Backend>(hidden: Tensor<B, 3>) -> Tensor<B, 2> {
    let [batch, _seq_len, dim] = hidden.dims();
    hidden.slice([0..batch, 0..1, 0..dim]).squeeze::<2>(1)
}

/// Mean over unmasked positions: `(N, L, D)`, `(N, L)` → `(N, D)`.
pub fn masked_mean<B: Backend>(hidden: Tensor<B, 3>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
    let mask = attention_mask.float().unsqueeze_dim::<3>(2); // (N, L, 1)
    let summed = (hidden * mask.clone()).sum_dim(1).squeeze::<2>(1); // (N, D)
    let counts = mask.sum_dim(1).squeeze::<2>(1); // (N, 1)
    summed / counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn output(hidden_states: Vec<Tensor<TestBackend, 3>>) -> BackboneOutput<TestBackend> {
        let last = hidden_states.last().cloned().unwrap();
        let [n, _, d] = last.dims();
        BackboneOutput {
            last_hidden_state: last,
            pooler_output: Tensor::zeros([n, d], &Default::default()),
            hidden_states,
        }
    }

    fn random_states(layers: usize, n: usize, l: usize, d: usize) -> Vec<Tensor<TestBackend, 3>> {
        (0..layers)
            .map(|_| Tensor::random([n, l, d], Distribution::Normal(0.0, 1.0), &Default::default()))
            .collect()
    }

    fn ones_mask(n: usize, l: usize) -> Tensor<TestBackend, 2, Int> {
        Tensor::ones([n, l], &Default::default())
    }

    fn max_abs_diff(a: Tensor<TestBackend, 2>, b: Tensor<TestBackend, 2>) -> f32 {
        (a - b).abs().max().into_scalar().elem()
    }

    #[test]
    fn test_all_variants_output_shape() {
        for l in [1, 5, 17] {
            let out = output(random_states(3, 4, l, 8));
            for pooler in PoolerType::ALL {
                let pooled = pooler.pool(ones_mask(4, l), &out);
                assert_eq!(pooled.dims(), [4, 8], "{pooler} with L={l}");
            }
        }
    }

    #[test]
    fn test_cls_takes_position_zero() {
        let out = output(random_states(2, 3, 6, 4));
        let expected = out.last_hidden_state.clone().slice([0..3, 0..1, 0..4]).reshape([3, 4]);
        let pooled = PoolerType::Cls.pool(ones_mask(3, 6), &out);
        assert!(max_abs_diff(pooled, expected.clone()) < 1e-7);
        let pooled = PoolerType::ClsBeforePooler.pool(ones_mask(3, 6), &out);
        assert!(max_abs_diff(pooled, expected) < 1e-7);
    }

    #[test]
    fn test_avg_all_ones_is_plain_mean() {
        let out = output(random_states(2, 4, 7, 8));
        let expected = out.last_hidden_state.clone().mean_dim(1).squeeze::<2>(1);
        let pooled = PoolerType::Avg.pool(ones_mask(4, 7), &out);
        assert!(max_abs_diff(pooled, expected) < 1e-5);
    }

    #[test]
    fn test_avg_single_unmasked_position_is_exact() {
        let device = Default::default();
        let out = output(random_states(2, 2, 5, 3));
        // Row 0 keeps position 3, row 1 keeps position 0.
        let mask = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[0i64, 0, 0, 1, 0], [1, 0, 0, 0, 0]]),
            &device,
        );
        let pooled = PoolerType::Avg.pool(mask, &out);

        let hidden = out.last_hidden_state.clone();
        let row0 = hidden.clone().slice([0..1, 3..4, 0..3]).reshape([1, 3]);
        let row1 = hidden.slice([1..2, 0..1, 0..3]).reshape([1, 3]);
        let expected = Tensor::cat(vec![row0, row1], 0);
        assert!(max_abs_diff(pooled, expected) < 1e-6);
    }

    #[test]
    fn test_padding_does_not_contribute() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 2, Int>::from_data(TensorData::from([[1i64, 1, 0, 0]]), &device);
        let base = random_states(1, 1, 4, 6);
        let mut altered = base[0].clone();
        // Overwrite padded positions with large values.
        altered = altered.slice_assign(
            [0..1, 2..4, 0..6],
            Tensor::full([1, 2, 6], 1000.0, &device),
        );

        let a = PoolerType::Avg.pool(mask.clone(), &output(base));
        let b = PoolerType::Avg.pool(mask, &output(vec![altered]));
        assert!(max_abs_diff(a, b) < 1e-5);
    }

    #[test]
    fn test_avg_top2_identical_layers_reduces_to_avg() {
        let layer = random_states(1, 3, 6, 8).remove(0);
        let other = random_states(1, 3, 6, 8).remove(0);
        let out = output(vec![other, layer.clone(), layer]);
        let mask = ones_mask(3, 6);
        let top2 = PoolerType::AvgTop2.pool(mask.clone(), &out);
        let avg = PoolerType::Avg.pool(mask, &out);
        assert!(max_abs_diff(top2, avg) < 1e-5);
    }

    #[test]
    fn test_avg_first_last_identical_layers_reduces_to_avg() {
        let layer = random_states(1, 3, 6, 8).remove(0);
        let middle = random_states(1, 3, 6, 8).remove(0);
        let out = output(vec![layer.clone(), middle, layer]);
        let mask = ones_mask(3, 6);
        let first_last = PoolerType::AvgFirstLast.pool(mask.clone(), &out);
        let avg = PoolerType::Avg.pool(mask, &out);
        assert!(max_abs_diff(first_last, avg) < 1e-5);
    }

    #[test]
    fn test_all_masked_row_is_nan() {
        let device = Default::default();
        let out = output(random_states(1, 1, 3, 2));
        let mask = Tensor::<TestBackend, 2, Int>::zeros([1, 3], &device);
        let pooled: Vec<f32> = PoolerType::Avg.pool(mask, &out).into_data().iter::<f32>().collect();
        assert!(pooled.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_parse_names() {
        for pooler in PoolerType::ALL {
            assert_eq!(pooler.to_string().parse::<PoolerType>().unwrap(), pooler);
        }
        let err = "max".parse::<PoolerType>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownPooler("max".into()));
        assert!(PoolerType::Cls.uses_projection());
        assert!(!PoolerType::ClsBeforePooler.uses_projection());
        assert!(!PoolerType::Avg.uses_projection());
    }
}
