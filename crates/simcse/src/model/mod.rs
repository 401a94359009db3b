//! Encoder components: similarity, pooling, projection head, the
//! transformer backbone, and the encoder that ties them together.

pub mod backbone;
pub mod bridge;
pub mod encoder;
pub mod pooling;
pub mod projection;
pub mod similarity;
