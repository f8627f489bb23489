// Principal component analysis of shape ensembles

use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, ShapePcaError};
use crate::linalg_backends::{BackendQR, BackendSVD, LinAlgBackendProvider};

/// A computed statistical shape model.
///
/// Observations are column vectors of length `n_features` (three coordinates
/// per vertex). The model is immutable: it is produced by [`ShapePca::compute`]
/// or loaded with [`ShapeModel::load_model`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShapeModel {
    /// Mean observation.
    /// Shape: (n_features)
    mean: Array1<f64>,
    /// Variance along each principal axis, in non-increasing order.
    /// Shape: (k_components)
    eigenvalues: Array1<f64>,
    /// Unit-length principal axes as columns, matching `eigenvalues` 1:1.
    /// Shape: (n_features, k_components)
    eigenvectors: Array2<f64>,
    /// Number of observations the model was trained on.
    n_samples: usize,
    /// Coordinates of the first training observation in the eigenbasis.
    /// Shape: (k_components)
    first_sample_coefficients: Array1<f64>,
}

impl ShapeModel {
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    pub fn eigenvectors(&self) -> &Array2<f64> {
        &self.eigenvectors
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn first_sample_coefficients(&self) -> &Array1<f64> {
        &self.first_sample_coefficients
    }

    /// Fraction of the total variance carried by each component.
    ///
    /// All zeros when the ensemble has no variance.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total = self.eigenvalues.sum();
        if total > 0.0 {
            &self.eigenvalues / total
        } else {
            Array1::zeros(self.eigenvalues.len())
        }
    }

    /// Coordinates of `observation` in the eigenbasis: `Vᵀ (x − μ)`.
    ///
    /// # Errors
    /// Returns a dimension error if `observation` does not have `n_features` entries.
    pub fn project(&self, observation: ArrayView1<f64>) -> Result<Array1<f64>> {
        if observation.len() != self.n_features() {
            return Err(ShapePcaError::Dimension(format!(
                "observation has {} entries, model has {} features",
                observation.len(),
                self.n_features()
            )));
        }
        let centered = &observation - &self.mean;
        Ok(self.eigenvectors.t().dot(&centered))
    }

    /// Maps eigenbasis coordinates back to observation space: `μ + Σ cᵢ vᵢ`.
    ///
    /// `coefficients` may be shorter than `n_components`; it weights the
    /// leading components.
    ///
    /// # Errors
    /// Returns a dimension error if more coefficients than components are given.
    pub fn reconstruct(&self, coefficients: ArrayView1<f64>) -> Result<Array1<f64>> {
        let k = coefficients.len();
        if k > self.n_components() {
            return Err(ShapePcaError::Dimension(format!(
                "{} coefficients given, model has {} components",
                k,
                self.n_components()
            )));
        }
        let basis = self.eigenvectors.slice(s![.., ..k]);
        Ok(&self.mean + &basis.dot(&coefficients))
    }

    /// Reconstructs the first training observation from its leading
    /// `num_components` modes.
    ///
    /// Requests beyond the available component count are clamped. Zero
    /// components yields the mean.
    pub fn reprojection(&self, num_components: usize) -> Array1<f64> {
        let k = num_components.min(self.n_components());
        let basis = self.eigenvectors.slice(s![.., ..k]);
        let coefficients = self.first_sample_coefficients.slice(s![..k]);
        &self.mean + &basis.dot(&coefficients)
    }

    /// Draws coefficients for the leading `num_components` modes, each from a
    /// normal distribution with the mode's variance.
    ///
    /// `num_components` is clamped like in [`ShapeModel::reprojection`].
    ///
    /// # Errors
    /// Returns an error if an eigenvalue is not a valid variance.
    pub fn sample_coefficients(&self, num_components: usize, seed: u64) -> Result<Array1<f64>> {
        let k = num_components.min(self.n_components());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut coefficients = Array1::<f64>::zeros(k);
        for (c, &lambda) in coefficients.iter_mut().zip(self.eigenvalues.iter()) {
            let normal = Normal::new(0.0, lambda.max(0.0).sqrt())
                .map_err(|e| ShapePcaError::Config(format!("invalid mode variance {lambda}: {e}")))?;
            *c = rng.sample(normal);
        }
        Ok(coefficients)
    }

    /// Synthesizes a random plausible shape from the leading `num_components` modes.
    ///
    /// # Errors
    /// See [`ShapeModel::sample_coefficients`].
    pub fn sample_shape(&self, num_components: usize, seed: u64) -> Result<Array1<f64>> {
        let coefficients = self.sample_coefficients(num_components, seed)?;
        self.reconstruct(coefficients.view())
    }

    /// Saves the model to a file using bincode.
    ///
    /// # Errors
    /// Returns an error if file I/O or serialization fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref()).map_err(|e| {
            ShapePcaError::ModelPersistence(format!(
                "Failed to create file at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| {
                ShapePcaError::ModelPersistence(format!("Failed to serialize shape model: {}", e))
            })?;
        Ok(())
    }

    /// Loads a model previously saved with [`ShapeModel::save_model`].
    ///
    /// # Errors
    /// Returns an error if file I/O or deserialization fails, or if the loaded
    /// model has inconsistent dimensions or invalid eigenvalues.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            ShapePcaError::ModelPersistence(format!(
                "Failed to open file at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        let mut reader = BufReader::new(file);
        let model: ShapeModel =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| {
                    ShapePcaError::ModelPersistence(format!(
                        "Failed to deserialize shape model: {}",
                        e
                    ))
                })?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let (d, k) = self.eigenvectors.dim();
        if d != self.mean.len() {
            return Err(ShapePcaError::ModelPersistence(format!(
                "eigenvectors have {} rows, mean has {} entries",
                d,
                self.mean.len()
            )));
        }
        if k != self.eigenvalues.len() || k != self.first_sample_coefficients.len() {
            return Err(ShapePcaError::ModelPersistence(format!(
                "inconsistent component counts: eigenvectors={}, eigenvalues={}, coefficients={}",
                k,
                self.eigenvalues.len(),
                self.first_sample_coefficients.len()
            )));
        }
        if self.eigenvalues.iter().any(|&v| !v.is_finite() || v < 0.0) {
            return Err(ShapePcaError::ModelPersistence(
                "eigenvalues contain non-finite or negative values".into(),
            ));
        }
        Ok(())
    }
}

enum EngineState {
    Uninitialized,
    InputSet(Array2<f64>),
    Computed(ShapeModel),
}

impl EngineState {
    fn name(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::InputSet(_) => "awaiting compute",
            EngineState::Computed(_) => "computed",
        }
    }
}

/// PCA engine over an observation matrix whose columns are samples.
///
/// The engine moves through `Uninitialized → InputSet → Computed`. Results are
/// only available once [`ShapePca::compute`] has succeeded, and a new
/// computation requires a new [`ShapePca::set_input`].
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use shape_pca::ShapePca;
///
/// // two one-vertex "meshes"
/// let observations = array![[0.0, 2.0], [1.0, 1.0], [5.0, 5.0]];
///
/// let mut pca = ShapePca::new();
/// pca.set_input(observations).unwrap();
/// pca.compute().unwrap();
///
/// let first = pca.reprojection(1).unwrap();
/// assert!((first[0] - 0.0).abs() < 1e-9);
/// ```
pub struct ShapePca {
    state: EngineState,
    backend: LinAlgBackendProvider,
}

impl Default for ShapePca {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapePca {
    pub fn new() -> Self {
        Self {
            state: EngineState::Uninitialized,
            backend: LinAlgBackendProvider::new(),
        }
    }

    /// Stores the observation matrix, shape (n_features, n_samples).
    ///
    /// Any earlier result is discarded.
    ///
    /// # Errors
    /// Returns a dimension error if the matrix has no rows or no columns.
    pub fn set_input(&mut self, observations: Array2<f64>) -> Result<()> {
        let (n_features, n_samples) = observations.dim();
        if n_features == 0 || n_samples == 0 {
            return Err(ShapePcaError::Dimension(format!(
                "observation matrix is {}x{}, needs at least one feature and one sample",
                n_features, n_samples
            )));
        }
        self.state = EngineState::InputSet(observations);
        Ok(())
    }

    /// Computes mean, eigenvalues and eigenvectors of the stored input.
    ///
    /// The covariance is never formed: the centered matrix is decomposed
    /// directly (through a thin QR first when features outnumber samples), and
    /// eigenvalues are squared singular values over `n_samples - 1`. Each
    /// eigenvector is signed so that its entry of largest magnitude is positive.
    ///
    /// # Errors
    /// Returns a dimension error if no input was set, a state error if the
    /// input was already consumed by a previous computation, or a
    /// decomposition error if the backend fails.
    pub fn compute(&mut self) -> Result<()> {
        let observations = match std::mem::replace(&mut self.state, EngineState::Uninitialized) {
            EngineState::InputSet(observations) => observations,
            EngineState::Uninitialized => {
                return Err(ShapePcaError::Dimension(
                    "no observation matrix has been set".into(),
                ))
            }
            computed @ EngineState::Computed(_) => {
                self.state = computed;
                return Err(ShapePcaError::State {
                    operation: "compute",
                    state: "computed; set a new input first",
                });
            }
        };

        let (n_features, n_samples) = observations.dim();
        info!(
            "Computing PCA on {} features x {} samples",
            n_features, n_samples
        );
        if n_samples == 1 {
            warn!("Only one sample in the ensemble; all eigenvalues will be zero.");
        }

        let mean = observations
            .mean_axis(Axis(1))
            .ok_or_else(|| ShapePcaError::Dimension("Failed to compute mean of the data.".into()))?;
        let mut centered = observations.as_standard_layout().into_owned();
        centered -= &mean.view().insert_axis(Axis(1));
        let first_centered = centered.column(0).to_owned();

        let (left_vectors, singular_values) = self.thin_left_singular(centered)?;

        let divisor = n_samples.saturating_sub(1).max(1) as f64;
        let mut eig_pairs: Vec<(f64, Array1<f64>)> = singular_values
            .iter()
            .map(|&s_val| (s_val * s_val / divisor).max(0.0))
            .zip(left_vectors.columns().into_iter().map(|col| col.to_owned()))
            .collect();
        eig_pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let k = eig_pairs.len();
        let mut eigenvalues = Array1::<f64>::zeros(k);
        let mut eigenvectors = Array2::<f64>::zeros((n_features, k));
        for (i, (eig_val, mut eig_vec)) in eig_pairs.into_iter().enumerate() {
            let norm = eig_vec.dot(&eig_vec).sqrt();
            if norm > 1e-12 {
                eig_vec.mapv_inplace(|x| x / norm);
            }
            canonicalize_sign(&mut eig_vec);
            eigenvalues[i] = eig_val;
            eigenvectors.column_mut(i).assign(&eig_vec);
        }

        let first_sample_coefficients = eigenvectors.t().dot(&first_centered);

        if eigenvalues.iter().all(|&v| v <= f64::EPSILON) {
            warn!("Ensemble has no measurable variance; reprojection returns the mean shape.");
        }
        debug!("Eigenvalues: {}", eigenvalues);

        self.state = EngineState::Computed(ShapeModel {
            mean,
            eigenvalues,
            eigenvectors,
            n_samples,
            first_sample_coefficients,
        });
        Ok(())
    }

    /// Thin left singular vectors and singular values of a centered matrix.
    /// Returns `min(n_features, n_samples)` components.
    fn thin_left_singular(&self, centered: Array2<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
        let (n_features, n_samples) = centered.dim();
        if n_features > n_samples {
            // X = Q R with Q (D x N); the SVD of the small R gives U = Q Ur.
            let (q_factor, r_factor) = self.backend.qr_q_r(&centered).map_err(|e| {
                ShapePcaError::Decomposition(format!("QR of centered observations failed: {}", e))
            })?;
            let svd = self.backend.svd_into(r_factor, true, false).map_err(|e| {
                ShapePcaError::Decomposition(format!("SVD of R factor failed: {}", e))
            })?;
            let u_r = svd.u.ok_or_else(|| {
                ShapePcaError::Decomposition("SVD did not return left singular vectors".into())
            })?;
            Ok((q_factor.dot(&u_r), svd.s))
        } else {
            let svd = self.backend.svd_into(centered, true, false).map_err(|e| {
                ShapePcaError::Decomposition(format!("SVD of centered observations failed: {}", e))
            })?;
            let u = svd.u.ok_or_else(|| {
                ShapePcaError::Decomposition("SVD did not return left singular vectors".into())
            })?;
            let k = svd.s.len();
            Ok((u.slice_move(s![.., ..k]), svd.s))
        }
    }

    /// The computed model.
    ///
    /// # Errors
    /// Returns a state error before [`ShapePca::compute`] has succeeded.
    pub fn model(&self) -> Result<&ShapeModel> {
        self.computed("model")
    }

    /// Consumes the engine and returns the computed model.
    ///
    /// # Errors
    /// Returns a state error before [`ShapePca::compute`] has succeeded.
    pub fn into_model(self) -> Result<ShapeModel> {
        match self.state {
            EngineState::Computed(model) => Ok(model),
            other => Err(ShapePcaError::State {
                operation: "into_model",
                state: other.name(),
            }),
        }
    }

    /// Eigenvalues in non-increasing order.
    ///
    /// # Errors
    /// Returns a state error before [`ShapePca::compute`] has succeeded.
    pub fn eigen_values(&self) -> Result<&Array1<f64>> {
        self.computed("eigen_values").map(ShapeModel::eigenvalues)
    }

    /// Unit-length eigenvectors as columns, ordered like [`ShapePca::eigen_values`].
    ///
    /// # Errors
    /// Returns a state error before [`ShapePca::compute`] has succeeded.
    pub fn eigen_vectors(&self) -> Result<&Array2<f64>> {
        self.computed("eigen_vectors").map(ShapeModel::eigenvectors)
    }

    /// Reconstruction of the first input column from its leading
    /// `num_components` modes. See [`ShapeModel::reprojection`].
    ///
    /// # Errors
    /// Returns a state error before [`ShapePca::compute`] has succeeded.
    pub fn reprojection(&self, num_components: usize) -> Result<Array1<f64>> {
        self.computed("reprojection")
            .map(|model| model.reprojection(num_components))
    }

    fn computed(&self, operation: &'static str) -> Result<&ShapeModel> {
        match &self.state {
            EngineState::Computed(model) => Ok(model),
            other => Err(ShapePcaError::State {
                operation,
                state: other.name(),
            }),
        }
    }
}

/// Flips `v` so that its entry of largest magnitude is positive. The first
/// such entry wins ties.
fn canonicalize_sign(v: &mut Array1<f64>) {
    let mut pivot = 0.0_f64;
    for &x in v.iter() {
        if x.abs() > pivot.abs() {
            pivot = x;
        }
    }
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
}
