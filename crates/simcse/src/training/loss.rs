//! In-batch contrastive loss with weighted hard negatives.
//!
//! Row `i` of the logits holds the scaled similarities of anchor `i` against
//! every target (positives on the diagonal) followed by every negative. The
//! correct class for row `i` is column `i`.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::ConfigError;
use crate::model::similarity::similarity;

#[derive(Config, Debug)]
pub struct ContrastiveLossConfig {
    /// Softmax temperature τ. Must be > 0.
    #[config(default = 0.05)]
    pub temperature: f64,
    /// Bias added to the anchor-vs-own-negative logit. Must be ≥ 0.
    #[config(default = 0.0)]
    pub hard_negative_weight: f64,
}

impl ContrastiveLossConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "temperature",
                reason: format!("must be a positive finite number, got {}", self.temperature),
            });
        }
        if !(self.hard_negative_weight >= 0.0 && self.hard_negative_weight.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "hard_negative_weight",
                reason: format!("must be ≥ 0, got {}", self.hard_negative_weight),
            });
        }
        Ok(())
    }

    pub fn init(&self) -> Result<ContrastiveLoss, ConfigError> {
        self.validate()?;
        Ok(ContrastiveLoss {
            temperature: self.temperature,
            hard_negative_weight: self.hard_negative_weight,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContrastiveLoss {
    temperature: f64,
    hard_negative_weight: f64,
}

impl ContrastiveLoss {
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn hard_negative_weight(&self) -> f64 {
        self.hard_negative_weight
    }

    /// Cross-entropy over `[S(anchor, target) | S(anchor, negative) + w·I]`.
    ///
    /// # Arguments
    /// - `anchor`, `target`, `negative`: shape `(batch, dim)`, row-aligned
    ///
    /// # Returns
    /// Scalar loss tensor of shape `(1,)`, averaged over the batch.
    pub fn forward<B: Backend>(
        &self,
        anchor: Tensor<B, 2>,
        target: Tensor<B, 2>,
        negative: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let device = anchor.device();
        let [batch_size, _dim] = anchor.dims();

        let positives = similarity(anchor.clone(), target, self.temperature); // (batch, batch)
        let negatives = similarity(anchor, negative, self.temperature); // (batch, batch)
        let negatives = negatives + hard_negative_bias::<B>(batch_size, self.hard_negative_weight, &device);

        let logits = Tensor::cat(vec![positives, negatives], 1); // (batch, 2·batch)
        let labels = Tensor::<B, 1, Int>::arange(0..batch_size as i64, &device);

        CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, labels)
    }
}

/// `(n, n)` matrix with `weight` on the diagonal and zeros elsewhere.
pub fn hard_negative_bias<B: Backend>(n: usize, weight: f64, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0_f32; n * n];
    for i in 0..n {
        values[i * n + i] = weight as f32;
    }
    Tensor::from_data(TensorData::new(values, [n, n]), device)
}
