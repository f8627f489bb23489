// src/diagnostics.rs

use float_cmp::approx_eq;
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::pca::ShapeModel;

/// Numerical health of a computed shape model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub n_features: usize,
    pub n_samples: usize,
    pub n_components: usize,
    /// ||I - VᵀV||_F over the eigenvector matrix.
    pub orthogonality_error: f64,
    /// Largest | ||vᵢ|| - 1 | over all eigenvectors.
    pub max_unit_norm_deviation: f64,
    /// True when eigenvalues never increase.
    pub eigenvalues_sorted: bool,
    pub explained_variance_ratio: Vec<f64>,
    pub cumulative_variance_ratio: Vec<f64>,
}

impl ModelDiagnostics {
    pub fn from_model(model: &ShapeModel) -> Self {
        let ratio = model.explained_variance_ratio().to_vec();
        let cumulative = ratio
            .iter()
            .scan(0.0, |acc, &r| {
                *acc += r;
                Some(*acc)
            })
            .collect();
        Self {
            n_features: model.n_features(),
            n_samples: model.n_samples(),
            n_components: model.n_components(),
            orthogonality_error: orthogonality_error(model.eigenvectors().view()),
            max_unit_norm_deviation: max_unit_norm_deviation(model.eigenvectors().view()),
            eigenvalues_sorted: is_non_increasing(model.eigenvalues().view()),
            explained_variance_ratio: ratio,
            cumulative_variance_ratio: cumulative,
        }
    }

    /// True when the eigenvectors form an orthonormal set within `epsilon`
    /// and the eigenvalues are sorted.
    pub fn is_orthonormal(&self, epsilon: f64) -> bool {
        self.eigenvalues_sorted
            && approx_eq!(f64, self.orthogonality_error, 0.0, epsilon = epsilon)
            && approx_eq!(f64, self.max_unit_norm_deviation, 0.0, epsilon = epsilon)
    }

    /// Number of leading components needed to explain at least `fraction`
    /// of the total variance. Zero when the ensemble has no variance.
    pub fn components_for_variance(&self, fraction: f64) -> usize {
        self.cumulative_variance_ratio
            .iter()
            .position(|&c| c >= fraction)
            .map_or(0, |i| i + 1)
    }
}

/// Computes ||I - QᵀQ||_F.
pub fn orthogonality_error(q_matrix: ArrayView2<f64>) -> f64 {
    let k = q_matrix.ncols();
    if k == 0 {
        return 0.0;
    }
    let qtq = q_matrix.t().dot(&q_matrix);
    let residual = Array2::<f64>::eye(k) - qtq;
    residual.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn max_unit_norm_deviation(vectors: ArrayView2<f64>) -> f64 {
    vectors
        .columns()
        .into_iter()
        .map(|col| (col.dot(&col).sqrt() - 1.0).abs())
        .fold(0.0, f64::max)
}

fn is_non_increasing(values: ArrayView1<f64>) -> bool {
    values
        .iter()
        .zip(values.iter().skip(1))
        .all(|(a, b)| a >= b)
}

/// Euclidean distance between a reconstruction and the observation it approximates.
pub fn reconstruction_error(original: ArrayView1<f64>, reconstructed: ArrayView1<f64>) -> f64 {
    original
        .iter()
        .zip(reconstructed.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}
