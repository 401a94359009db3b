//! Contrastive sentence-embedding encoder (SimCSE-style).
//!
//! A transformer backbone produces per-token hidden states, a pooling
//! strategy reduces them to one vector per sentence, and an optional MLP
//! projection head maps that vector into the embedding space. Training
//! pulls each anchor toward its paired target and away from in-batch
//! negatives under a temperature-scaled cosine similarity.

pub mod error;
pub mod model;
pub mod training;

pub use error::ConfigError;
