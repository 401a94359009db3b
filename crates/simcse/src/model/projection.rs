use std::fmt;
use std::str::FromStr;

use burn::module::Ignored;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Negative slope used by [`Activation::LeakyRelu`].
const LEAKY_RELU_SLOPE: f64 = 0.01;

/// Activation applied after every LayerNorm in the projection head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Gelu,
    Relu,
    Mish,
    LeakyRelu,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        use burn::tensor::activation;
        match self {
            Activation::Gelu => activation::gelu(x),
            Activation::Relu => activation::relu(x),
            Activation::Mish => activation::mish(x),
            Activation::LeakyRelu => activation::leaky_relu(x, LEAKY_RELU_SLOPE),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Gelu => "gelu",
            Activation::Relu => "relu",
            Activation::Mish => "mish",
            Activation::LeakyRelu => "leaky_relu",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Activation {
    type Err = ConfigError;

    /// Case-insensitive, so `GELU` and `ReLU` parse too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "gelu" => Ok(Activation::Gelu),
            "relu" => Ok(Activation::Relu),
            "mish" => Ok(Activation::Mish),
            "leaky_relu" | "leakyrelu" => Ok(Activation::LeakyRelu),
            _ => Err(ConfigError::UnknownActivation(s.to_string())),
        }
    }
}

/// Configuration for the projection head applied on top of `cls` pooling.
///
/// ```text
/// (batch, d_input)
///   → Linear(d_input→h0) → LayerNorm(h0) → act
///   → Linear(h0→h1)      → LayerNorm(h1) → act
///   ...
///   → (batch, h_last)
/// ```
#[derive(Config, Debug)]
pub struct ProjectionHeadConfig {
    /// Backbone hidden size.
    pub d_input: usize,
    /// Output width of each block. Must be non-empty.
    #[config(default = "vec![768]")]
    pub hidden_dims: Vec<usize>,
    #[config(default = "Activation::Gelu")]
    pub activation: Activation,
}

impl ProjectionHeadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hidden_dims.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mlp_layers",
                reason: "at least one projection width is required".into(),
            });
        }
        if self.d_input == 0 || self.hidden_dims.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "mlp_layers",
                reason: "projection widths must be > 0".into(),
            });
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ProjectionHead<B>, ConfigError> {
        self.validate()?;

        let mut blocks = Vec::with_capacity(self.hidden_dims.len());
        let mut d_in = self.d_input;
        for &d_out in &self.hidden_dims {
            blocks.push(ProjectionBlock {
                linear: LinearConfig::new(d_in, d_out).init(device),
                norm: LayerNormConfig::new(d_out).init(device),
            });
            d_in = d_out;
        }

        Ok(ProjectionHead {
            blocks,
            activation: Ignored(self.activation),
        })
    }
}

/// One Linear → LayerNorm pair. The activation is shared across blocks.
#[derive(Module, Debug)]
pub struct ProjectionBlock<B: Backend> {
    pub linear: Linear<B>,
    pub norm: LayerNorm<B>,
}

#[derive(Module, Debug)]
pub struct ProjectionHead<B: Backend> {
    pub blocks: Vec<ProjectionBlock<B>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> ProjectionHead<B> {
    /// `(batch, d_input)` → `(batch, hidden_dims.last())`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.blocks.iter().fold(x, |x, block| {
            let x = block.linear.forward(x);
            let x = block.norm.forward(x);
            self.activation.0.apply(x)
        })
    }

    pub fn d_output(&self) -> usize {
        self.blocks
            .last()
            .map(|b| b.linear.weight.dims()[1])
            .unwrap_or_default()
    }

    pub fn activation(&self) -> Activation {
        self.activation.0
    }
}
