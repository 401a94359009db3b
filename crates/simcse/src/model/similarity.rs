//! Temperature-scaled cosine similarity.
//!
//! Rows with zero norm give NaN; callers must pass non-degenerate
//! embeddings.

use burn::prelude::*;

/// All-pairs scaled cosine similarity.
///
/// `a`: `(N, D)`, `b`: `(M, D)` → `(N, M)` with entry `(i, j)` equal to
/// `cos(a_i, b_j) / temperature`.
pub fn similarity<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>, temperature: f64) -> Tensor<B, 2> {
    let a_norm = l2_norm(a.clone()); // (N, 1)
    let b_norm = l2_norm(b.clone()); // (M, 1)
    let dots = a.matmul(b.transpose()); // (N, M)
    dots / (a_norm * b_norm.transpose()) / temperature
}

/// Row-aligned scaled cosine similarity.
///
/// `a`, `b`: `(N, D)` → `(N,)` with entry `i` equal to
/// `cos(a_i, b_i) / temperature`. This is the diagonal of
/// [`similarity`] without materializing the full matrix.
pub fn paired_similarity<B: Backend>(
    a: Tensor<B, 2>,
    b: Tensor<B, 2>,
    temperature: f64,
) -> Tensor<B, 1> {
    let norms = l2_norm(a.clone()) * l2_norm(b.clone()); // (N, 1)
    let dots = (a * b).sum_dim(1); // (N, 1)
    (dots / norms).squeeze::<1>(1) / temperature
}

/// Row-aligned Euclidean distance `||a_i - b_i||`, shape `(N,)`.
pub fn paired_distance<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 1> {
    l2_norm(a - b).squeeze::<1>(1)
}

fn l2_norm<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    x.powf_scalar(2.0).sum_dim(1).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn to_vec(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_shape() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::random([3, 8], Distribution::Normal(0.0, 1.0), &device);
        let b = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(similarity(a, b, 0.05).dims(), [3, 5]);
    }

    #[test]
    fn test_self_similarity_diagonal_is_inverse_temperature() {
        let device = Default::default();
        let temp = 0.05;
        let a = Tensor::<TestBackend, 2>::random([6, 16], Distribution::Normal(0.0, 1.0), &device);
        let sim = to_vec(similarity(a.clone(), a, temp));

        for i in 0..6 {
            let diag = sim[i * 6 + i];
            assert!(
                (diag - 1.0 / temp as f32).abs() < 1e-3,
                "diag[{i}] = {diag}, expected {}",
                1.0 / temp
            );
            for j in 0..6 {
                assert!(
                    sim[i * 6 + j] <= diag + 1e-3,
                    "self-similarity should be maximal in row {i}"
                );
            }
        }
    }

    #[test]
    fn test_symmetric_under_swap() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let b = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);

        let ab = to_vec(similarity(a.clone(), b.clone(), 0.1));
        let ba = to_vec(similarity(b, a, 0.1));
        for i in 0..4 {
            for j in 0..4 {
                assert!((ab[i * 4 + j] - ba[j * 4 + i]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0_f32, 0.0], [0.0, 2.0]]),
            &device,
        );
        let b = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.0_f32, 3.0], [-5.0, 0.0]]),
            &device,
        );
        let sim = to_vec(similarity(a, b, 0.5));
        // a0·b0 = 0, a0·b1 = -1 (scaled by 1/0.5 = 2)
        assert!(sim[0].abs() < 1e-6);
        assert!((sim[1] + 2.0).abs() < 1e-5);
        assert!((sim[2] - 2.0).abs() < 1e-5);
        assert!(sim[3].abs() < 1e-6);
    }

    #[test]
    fn test_paired_matches_diagonal() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);
        let b = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);

        let full = to_vec(similarity(a.clone(), b.clone(), 0.05));
        let paired: Vec<f32> = paired_similarity(a, b, 0.05).into_data().iter::<f32>().collect();
        for i in 0..5 {
            assert!((full[i * 5 + i] - paired[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_paired_distance() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.0_f32, 0.0], [1.0, 1.0]]),
            &device,
        );
        let b = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[3.0_f32, 4.0], [1.0, 1.0]]),
            &device,
        );
        let d: Vec<f32> = paired_distance(a, b).into_data().iter::<f32>().collect();
        assert!((d[0] - 5.0).abs() < 1e-6);
        assert!(d[1].abs() < 1e-6);
    }

    #[test]
    fn test_zero_norm_is_nan() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let b = Tensor::<TestBackend, 2>::ones([1, 4], &device);
        let sim = to_vec(similarity(a, b, 0.05));
        assert!(sim[0].is_nan());
    }
}
