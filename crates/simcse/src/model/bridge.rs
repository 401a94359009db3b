//! Tensor bridge: conversions between host vectors and burn tensors.
//!
//! Random input corruption and label partitioning run on the host, so the
//! encoder and the evaluation step move small integer and scalar tensors
//! across this boundary every step.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Copy a 2D integer tensor to the host as `(values, [rows, cols])`.
pub fn int_tensor_to_host<B: Backend>(tensor: Tensor<B, 2, Int>) -> (Vec<i64>, [usize; 2]) {
    let dims = tensor.dims();
    let values = tensor.into_data().iter::<i64>().collect();
    (values, dims)
}

/// Build a 2D integer tensor from row-major host values.
pub fn host_to_int_tensor<B: Backend>(
    values: Vec<i64>,
    dims: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    Tensor::from_data(TensorData::new(values, dims), device)
}

/// Extract f64 values from a burn 1D tensor.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// Extract i64 values from a burn 1D integer tensor.
pub fn int_tensor_to_vec<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<i64> {
    tensor.into_data().iter::<i64>().collect()
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}
