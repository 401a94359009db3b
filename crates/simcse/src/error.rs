/// Invalid model or loss configuration, raised at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Pooling strategy name not in the closed set.
    #[error(
        "unrecognized pooling type: {0} (expected one of: cls, cls_before_pooler, avg, avg_top2, avg_first_last)"
    )]
    UnknownPooler(String),

    /// Activation name not in the closed set.
    #[error("unrecognized activation: {0} (expected one of: gelu, relu, mish, leaky_relu)")]
    UnknownActivation(String),

    /// A numeric or structural setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
