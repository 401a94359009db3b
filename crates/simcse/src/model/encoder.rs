//! Sentence encoder: backbone → pooling → optional projection head.
//!
//! During training the token ids are randomly corrupted before they reach the
//! backbone. Corruption runs on the host with a caller-supplied RNG so every
//! draw is reproducible from the training seed.

use burn::module::Ignored;
use burn::prelude::*;
use rand::Rng;

use crate::error::ConfigError;
use crate::model::backbone::{Backbone, BackboneConfig};
use crate::model::bridge::{host_to_int_tensor, int_tensor_to_host};
use crate::model::pooling::PoolerType;
use crate::model::projection::{Activation, ProjectionHead, ProjectionHeadConfig};

/// Id written over corrupted positions.
pub const CORRUPTION_TOKEN_ID: i64 = 0;

#[derive(Config, Debug)]
pub struct SentenceEncoderConfig {
    pub backbone: BackboneConfig,
    #[config(default = "PoolerType::Cls")]
    pub pooler: PoolerType,
    /// Widths of the projection head blocks (used by `cls` pooling only).
    #[config(default = "vec![768]")]
    pub mlp_layers: Vec<usize>,
    #[config(default = "Activation::Gelu")]
    pub activation: Activation,
    /// Per-token probability of replacing a non-boundary id with
    /// [`CORRUPTION_TOKEN_ID`] during training.
    #[config(default = 0.1)]
    pub input_mask_rate: f64,
    /// Sequence boundary ids (e.g. `[CLS]`, `[SEP]`) that are never corrupted.
    #[config(default = "vec![101, 102]")]
    pub boundary_token_ids: Vec<i64>,
}

impl SentenceEncoderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.input_mask_rate) {
            return Err(ConfigError::InvalidValue {
                field: "input_mask_rate",
                reason: format!("must be within [0, 1], got {}", self.input_mask_rate),
            });
        }
        let backbone = &self.backbone;
        if backbone.num_heads == 0 || backbone.hidden_size % backbone.num_heads != 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_heads",
                reason: format!(
                    "hidden_size {} is not divisible by num_heads {}",
                    backbone.hidden_size, backbone.num_heads
                ),
            });
        }
        if self.pooler == PoolerType::AvgTop2 && backbone.num_layers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_layers",
                reason: "avg_top2 pooling needs at least one transformer layer".to_string(),
            });
        }
        self.projection_config().validate()
    }

    fn projection_config(&self) -> ProjectionHeadConfig {
        ProjectionHeadConfig::new(self.backbone.hidden_size)
            .with_hidden_dims(self.mlp_layers.clone())
            .with_activation(self.activation)
    }

    /// Initialize the encoder with a randomly initialized backbone.
    ///
    /// Pretrained weights are loaded afterwards through
    /// [`SentenceEncoder::with_backbone_weights`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SentenceEncoder<B>, ConfigError> {
        self.validate()?;

        let projection = if self.pooler.uses_projection() {
            Some(self.projection_config().init(device)?)
        } else {
            None
        };

        Ok(SentenceEncoder {
            backbone: self.backbone.init(device),
            projection,
            pooler: Ignored(self.pooler),
            input_mask_rate: Ignored(self.input_mask_rate),
            boundary_token_ids: Ignored(self.boundary_token_ids.clone()),
        })
    }
}

#[derive(Module, Debug)]
pub struct SentenceEncoder<B: Backend> {
    pub backbone: Backbone<B>,
    /// Present only for `cls` pooling.
    pub projection: Option<ProjectionHead<B>>,
    pooler: Ignored<PoolerType>,
    input_mask_rate: Ignored<f64>,
    boundary_token_ids: Ignored<Vec<i64>>,
}

impl<B: Backend> SentenceEncoder<B> {
    /// Embed token sequences without corruption: `(N, L)` → `(N, D')`.
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let outputs = self.backbone.forward(input_ids, attention_mask.clone());
        let pooled = self.pooler.0.pool(attention_mask, &outputs);
        match &self.projection {
            Some(head) => head.forward(pooled),
            None => pooled,
        }
    }

    /// Embed token sequences after random input corruption.
    ///
    /// Each call draws a fresh corruption pattern from `rng`; the caller's
    /// `input_ids` tensor is not modified.
    pub fn forward_corrupted<R: Rng + ?Sized>(
        &self,
        input_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        rng: &mut R,
    ) -> Tensor<B, 2> {
        let corrupted = self.corrupt(input_ids, rng);
        self.forward(corrupted, attention_mask)
    }

    fn corrupt<R: Rng + ?Sized>(&self, input_ids: Tensor<B, 2, Int>, rng: &mut R) -> Tensor<B, 2, Int> {
        if self.input_mask_rate.0 <= 0.0 {
            return input_ids;
        }
        let device = input_ids.device();
        let (mut ids, dims) = int_tensor_to_host(input_ids);
        let replaced = corrupt_input_ids(&mut ids, self.input_mask_rate.0, &self.boundary_token_ids.0, rng);
        tracing::trace!(replaced, total = ids.len(), "Corrupted input ids");
        host_to_int_tensor(ids, dims, &device)
    }

    pub fn pooler(&self) -> PoolerType {
        self.pooler.0
    }

    pub fn input_mask_rate(&self) -> f64 {
        self.input_mask_rate.0
    }

    pub fn boundary_token_ids(&self) -> &[i64] {
        &self.boundary_token_ids.0
    }

    /// Width of the produced embeddings.
    pub fn d_output(&self) -> usize {
        match &self.projection {
            Some(head) => head.d_output(),
            None => self.backbone.hidden_size(),
        }
    }

    /// Replace the backbone parameters with pretrained weights.
    pub fn with_backbone_weights(
        mut self,
        path: &std::path::Path,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        self.backbone = self.backbone.load_weights(path, device)?;
        Ok(self)
    }
}

/// Randomly replace token ids with [`CORRUPTION_TOKEN_ID`] in place.
///
/// Every position draws independently: with probability `rate` its id is
/// replaced, unless the id is one of `boundary_ids`. Returns the number of
/// replaced positions.
pub fn corrupt_input_ids<R: Rng + ?Sized>(
    ids: &mut [i64],
    rate: f64,
    boundary_ids: &[i64],
    rng: &mut R,
) -> usize {
    let mut replaced = 0;
    for id in ids.iter_mut() {
        let draw: f64 = rng.gen();
        if draw < rate && !boundary_ids.contains(id) {
            *id = CORRUPTION_TOKEN_ID;
            replaced += 1;
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn tiny_backbone() -> BackboneConfig {
        BackboneConfig::new(200)
            .with_hidden_size(8)
            .with_num_layers(2)
            .with_num_heads(2)
            .with_intermediate_size(16)
            .with_max_position_embeddings(16)
            .with_dropout(0.0)
    }

    fn batch() -> (Tensor<TestBackend, 2, Int>, Tensor<TestBackend, 2, Int>) {
        let device = Default::default();
        let ids = Tensor::from_data(
            TensorData::new(vec![101i64, 5, 6, 7, 102, 0, 101, 8, 9, 102, 0, 0], [2, 6]),
            &device,
        );
        let mask = Tensor::from_data(
            TensorData::new(vec![1i64, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0], [2, 6]),
            &device,
        );
        (ids, mask)
    }

    #[test]
    fn test_corruption_never_touches_boundaries() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ids = vec![101, 5, 6, 7, 8, 9, 102];
        let replaced = corrupt_input_ids(&mut ids, 1.0, &[101, 102], &mut rng);
        assert_eq!(ids, vec![101, 0, 0, 0, 0, 0, 102]);
        assert_eq!(replaced, 5);
    }

    #[test]
    fn test_corruption_rate_zero_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ids = vec![101, 5, 6, 7, 102];
        assert_eq!(corrupt_input_ids(&mut ids, 0.0, &[101, 102], &mut rng), 0);
        assert_eq!(ids, vec![101, 5, 6, 7, 102]);
    }

    #[test]
    fn test_corruption_rate_is_respected_on_average() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut ids: Vec<i64> = (1000..21_000).collect();
        let replaced = corrupt_input_ids(&mut ids, 0.1, &[101, 102], &mut rng);
        let rate = replaced as f64 / ids.len() as f64;
        assert!((rate - 0.1).abs() < 0.01, "observed corruption rate {rate}");
    }

    #[test]
    fn test_fresh_pattern_per_call() {
        let mut rng = StdRng::seed_from_u64(3);
        let original: Vec<i64> = (1000..1200).collect();
        let mut a = original.clone();
        let mut b = original.clone();
        corrupt_input_ids(&mut a, 0.5, &[], &mut rng);
        corrupt_input_ids(&mut b, 0.5, &[], &mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn test_output_width_per_pooler() {
        let device = Default::default();
        for pooler in PoolerType::ALL {
            let encoder = SentenceEncoderConfig::new(tiny_backbone())
                .with_pooler(pooler)
                .with_mlp_layers(vec![12, 6])
                .init::<TestBackend>(&device)
                .unwrap();
            let (ids, mask) = batch();
            let out = encoder.forward(ids, mask);
            let expected = if pooler == PoolerType::Cls { 6 } else { 8 };
            assert_eq!(out.dims(), [2, expected], "{pooler}");
            assert_eq!(encoder.d_output(), expected);
            assert_eq!(encoder.projection.is_some(), pooler == PoolerType::Cls);
        }
    }

    #[test]
    fn test_forward_is_deterministic_without_corruption() {
        let device = Default::default();
        let encoder = SentenceEncoderConfig::new(tiny_backbone())
            .with_pooler(PoolerType::Avg)
            .init::<TestBackend>(&device)
            .unwrap();
        let (ids, mask) = batch();
        let a = encoder.forward(ids.clone(), mask.clone());
        let b = encoder.forward(ids, mask);
        let diff: f32 = (a - b).abs().max().into_scalar().elem();
        assert!(diff < 1e-7);
    }

    #[test]
    fn test_corrupted_forward_changes_embeddings() {
        let device = Default::default();
        let encoder = SentenceEncoderConfig::new(tiny_backbone())
            .with_pooler(PoolerType::Avg)
            .with_input_mask_rate(1.0)
            .init::<TestBackend>(&device)
            .unwrap();
        let (ids, mask) = batch();
        let mut rng = StdRng::seed_from_u64(0);
        let clean = encoder.forward(ids.clone(), mask.clone());
        let noisy = encoder.forward_corrupted(ids, mask, &mut rng);
        let diff: f32 = (clean - noisy).abs().max().into_scalar().elem();
        assert!(diff > 1e-6);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let device = Default::default();
        let err = SentenceEncoderConfig::new(tiny_backbone())
            .with_input_mask_rate(1.5)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "input_mask_rate", .. }));

        let err = SentenceEncoderConfig::new(tiny_backbone())
            .with_mlp_layers(vec![])
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "mlp_layers", .. }));
    }

    #[test]
    fn test_invalid_backbone_shape_rejected() {
        let device = Default::default();
        let err = SentenceEncoderConfig::new(tiny_backbone().with_num_heads(3))
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "num_heads", .. }));

        let err = SentenceEncoderConfig::new(tiny_backbone().with_num_heads(0))
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "num_heads", .. }));

        let err = SentenceEncoderConfig::new(tiny_backbone().with_num_layers(0))
            .with_pooler(PoolerType::AvgTop2)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "num_layers", .. }));

        // Without avg_top2 a layerless backbone is still a valid encoder.
        assert!(SentenceEncoderConfig::new(tiny_backbone().with_num_layers(0))
            .with_pooler(PoolerType::Avg)
            .init::<TestBackend>(&device)
            .is_ok());
    }
}
