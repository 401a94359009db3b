//! Contrastive training: loss, per-step protocol, parameter groups,
//! metrics, and the epoch-level training driver.

pub mod loss;
pub mod metrics;
pub mod optim;
pub mod step;
pub mod trainer;
