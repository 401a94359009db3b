//! BERT-compatible transformer backbone.
//!
//! The contrastive trainer treats the backbone as a pretrained collaborator:
//! it maps `(input_ids, attention_mask)` to per-layer hidden states and a
//! pooled vector. Weights come from a burn record file exported ahead of
//! time; nothing is downloaded.
//!
//! ```text
//! input_ids (N, L)
//!   → word + position + token-type embeddings → LayerNorm → Dropout   hidden_states[0]
//!   → BertLayer × num_layers                                           hidden_states[1..]
//!   → last_hidden_state (N, L, D)
//!   → tanh(Linear(last_hidden_state[:, 0]))                            pooler_output (N, D)
//! ```

use std::path::Path;

use burn::nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
    LinearConfig,
};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::activation::{gelu, softmax};

use crate::model::pooling::first_token;

/// Additive bias applied to attention scores at padded key positions.
const MASKED_SCORE: f32 = -10_000.0;

/// Hyperparameters of the transformer backbone.
///
/// Defaults match `bert-base-uncased` apart from the vocabulary size, which
/// must always be supplied.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    pub vocab_size: usize,
    #[config(default = 768)]
    pub hidden_size: usize,
    #[config(default = 12)]
    pub num_layers: usize,
    #[config(default = 12)]
    pub num_heads: usize,
    #[config(default = 3072)]
    pub intermediate_size: usize,
    #[config(default = 512)]
    pub max_position_embeddings: usize,
    #[config(default = 2)]
    pub type_vocab_size: usize,
    /// Dropout on embeddings, attention probabilities and residual branches.
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,
}

/// Everything the pooling strategies may read.
#[derive(Debug, Clone)]
pub struct BackboneOutput<B: Backend> {
    /// Final layer, `(N, L, D)`.
    pub last_hidden_state: Tensor<B, 3>,
    /// tanh-activated projection of the position-0 state, `(N, D)`.
    pub pooler_output: Tensor<B, 2>,
    /// Embedding output followed by every layer output, each `(N, L, D)`.
    pub hidden_states: Vec<Tensor<B, 3>>,
}

#[derive(Module, Debug)]
pub struct BertEmbeddings<B: Backend> {
    pub(crate) word_embeddings: Embedding<B>,
    position_embeddings: Embedding<B>,
    token_type_embeddings: Embedding<B>,
    pub(crate) layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> BertEmbeddings<B> {
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let words = self.word_embeddings.forward(input_ids);

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .reshape([1, seq_len])
            .repeat_dim(0, batch);
        let positions = self.position_embeddings.forward(positions);

        let token_types = self
            .token_type_embeddings
            .forward(Tensor::zeros([batch, seq_len], &device));

        let embeddings = self.layer_norm.forward(words + positions + token_types);
        self.dropout.forward(embeddings)
    }
}

/// Multi-head self-attention with separate query/key/value projections.
#[derive(Module, Debug)]
pub struct BertSelfAttention<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    output: Linear<B>,
    output_norm: LayerNorm<B>,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl<B: Backend> BertSelfAttention<B> {
    /// `x`: `(N, L, D)`; `mask_bias`: `(N, H, L, L)` additive score bias.
    pub fn forward(&self, x: Tensor<B, 3>, mask_bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, seq_len, hidden] = x.dims();
        let split_heads = |t: Tensor<B, 3>| {
            t.reshape([batch, seq_len, self.num_heads, self.head_dim])
                .swap_dims(1, 2)
        };

        let q = split_heads(self.query.forward(x.clone()));
        let k = split_heads(self.key.forward(x.clone()));
        let v = split_heads(self.value.forward(x.clone()));

        let scale = (self.head_dim as f64).sqrt();
        let scores = q.matmul(k.swap_dims(2, 3)) / scale + mask_bias;
        let probs = self.dropout.forward(softmax(scores, 3));

        let context = probs
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq_len, hidden]);

        let out = self.dropout.forward(self.output.forward(context));
        self.output_norm.forward(out + x)
    }
}

/// One transformer block: self-attention followed by a GELU feed-forward.
#[derive(Module, Debug)]
pub struct BertLayer<B: Backend> {
    attention: BertSelfAttention<B>,
    intermediate: Linear<B>,
    output: Linear<B>,
    output_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> BertLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask_bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let attended = self.attention.forward(x, mask_bias);
        let ffn = gelu(self.intermediate.forward(attended.clone()));
        let ffn = self.dropout.forward(self.output.forward(ffn));
        self.output_norm.forward(ffn + attended)
    }
}

#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub(crate) embeddings: BertEmbeddings<B>,
    layers: Vec<BertLayer<B>>,
    pooler: Linear<B>,
    num_heads: usize,
}

impl BackboneConfig {
    /// Initialize a backbone with random weights.
    ///
    /// # Panics
    /// Panics if `hidden_size` is not divisible by `num_heads`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        assert!(
            self.num_heads > 0 && self.hidden_size % self.num_heads == 0,
            "hidden_size {} is not divisible by num_heads {}",
            self.hidden_size,
            self.num_heads
        );
        let d = self.hidden_size;
        let norm = || LayerNormConfig::new(d).with_epsilon(self.layer_norm_eps).init(device);
        let dropout = || DropoutConfig::new(self.dropout).init();

        let embeddings = BertEmbeddings {
            word_embeddings: EmbeddingConfig::new(self.vocab_size, d).init(device),
            position_embeddings: EmbeddingConfig::new(self.max_position_embeddings, d).init(device),
            token_type_embeddings: EmbeddingConfig::new(self.type_vocab_size, d).init(device),
            layer_norm: norm(),
            dropout: dropout(),
        };

        let layers = (0..self.num_layers)
            .map(|_| BertLayer {
                attention: BertSelfAttention {
                    query: LinearConfig::new(d, d).init(device),
                    key: LinearConfig::new(d, d).init(device),
                    value: LinearConfig::new(d, d).init(device),
                    output: LinearConfig::new(d, d).init(device),
                    output_norm: norm(),
                    dropout: dropout(),
                    num_heads: self.num_heads,
                    head_dim: d / self.num_heads,
                },
                intermediate: LinearConfig::new(d, self.intermediate_size).init(device),
                output: LinearConfig::new(self.intermediate_size, d).init(device),
                output_norm: norm(),
                dropout: dropout(),
            })
            .collect();

        Backbone {
            embeddings,
            layers,
            pooler: LinearConfig::new(d, d).init(device),
            num_heads: self.num_heads,
        }
    }
}

impl<B: Backend> Backbone<B> {
    /// Run the transformer, keeping every intermediate hidden state.
    ///
    /// `input_ids`, `attention_mask`: `(N, L)`. Positions with mask 0 are
    /// excluded as attention keys.
    pub fn forward(
        &self,
        input_ids: Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> BackboneOutput<B> {
        let mask_bias = attention_bias(attention_mask, self.num_heads);

        let mut hidden = self.embeddings.forward(input_ids);
        let mut hidden_states = Vec::with_capacity(self.layers.len() + 1);
        hidden_states.push(hidden.clone());
        for layer in &self.layers {
            hidden = layer.forward(hidden, mask_bias.clone());
            hidden_states.push(hidden.clone());
        }

        let pooler_output = self.pooler.forward(first_token(hidden.clone())).tanh();

        BackboneOutput {
            last_hidden_state: hidden,
            pooler_output,
            hidden_states,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.pooler.weight.dims()[0]
    }

    /// Load pretrained weights from a burn named-MessagePack record.
    pub fn load_weights(self, path: &Path, device: &B::Device) -> anyhow::Result<Self> {
        let backbone = self
            .load_file(
                path,
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                device,
            )
            .map_err(|e| anyhow::anyhow!("Failed to load backbone weights from {}: {e}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            layers = backbone.num_layers(),
            hidden = backbone.hidden_size(),
            "Loaded pretrained backbone"
        );
        Ok(backbone)
    }
}

/// Expand a `(N, L)` padding mask into a `(N, H, L, L)` additive score bias:
/// 0 for visible keys, a large negative value for padded keys.
fn attention_bias<B: Backend>(attention_mask: Tensor<B, 2, Int>, num_heads: usize) -> Tensor<B, 4> {
    let [batch, seq_len] = attention_mask.dims();
    let bias = attention_mask.float().neg().add_scalar(1.0) * MASKED_SCORE;
    bias
        .reshape([batch, 1, 1, seq_len])
        .repeat_dim(1, num_heads)
        .repeat_dim(2, seq_len)
}
