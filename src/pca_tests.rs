use crate::diagnostics::ModelDiagnostics;
use crate::{ShapeModel, ShapePca, ShapePcaError};
use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array1, Array2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::error::Error;

/// Random observation matrix, shape (n_features, n_samples).
fn generate_random_observations(n_features: usize, n_samples: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((n_features, n_samples), |_| rng.gen_range(-1.0..1.0))
}

fn computed(observations: Array2<f64>) -> ShapePca {
    let mut pca = ShapePca::new();
    pca.set_input(observations).unwrap();
    pca.compute().unwrap();
    pca
}

fn assert_orthonormal_sorted(model: &ShapeModel) {
    let diagnostics = ModelDiagnostics::from_model(model);
    assert!(
        diagnostics.is_orthonormal(1e-9),
        "not orthonormal: {:?}",
        diagnostics
    );
}

#[cfg(test)]
mod pca_tests {
    use super::*;

    #[test]
    fn test_identical_meshes_have_no_variance() {
        let mesh = array![0.5, -1.0, 2.0, 3.0, 0.0, 1.25];
        let mut observations = Array2::<f64>::zeros((6, 4));
        for mut col in observations.columns_mut() {
            col.assign(&mesh);
        }

        let pca = computed(observations);
        let model = pca.model().unwrap();

        assert_abs_diff_eq!(model.mean().clone(), mesh, epsilon = 1e-12);
        for &v in pca.eigen_values().unwrap() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-20);
        }
        for k in [0, 1, 2, 4, 100] {
            assert_abs_diff_eq!(pca.reprojection(k).unwrap(), mesh, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_wide_ensemble_is_orthonormal_and_sorted() {
        // more coordinates than meshes: the QR path
        let pca = computed(generate_random_observations(60, 7, 11));
        let model = pca.model().unwrap();
        assert_eq!(model.n_components(), 7);
        assert_eq!(pca.eigen_vectors().unwrap().dim(), (60, 7));
        assert_orthonormal_sorted(model);
    }

    #[test]
    fn test_tall_ensemble_is_orthonormal_and_sorted() {
        // more meshes than coordinates: direct SVD path
        let pca = computed(generate_random_observations(6, 20, 12));
        let model = pca.model().unwrap();
        assert_eq!(model.n_components(), 6);
        assert_orthonormal_sorted(model);
    }

    #[test]
    fn test_eigenvalues_match_explicit_covariance() -> Result<(), Box<dyn Error>> {
        let observations = generate_random_observations(5, 9, 3);
        let mean = observations.mean_axis(Axis(1)).unwrap();
        let centered = &observations - &mean.view().insert_axis(Axis(1));
        let covariance = centered.dot(&centered.t()) / 8.0;
        let (reference_values, reference_vectors) = covariance.eigh(UPLO::Upper)?;

        let pca = computed(observations);
        let values = pca.eigen_values()?;
        let vectors = pca.eigen_vectors()?;

        for i in 0..5 {
            // eigh is ascending
            let j = 4 - i;
            assert_abs_diff_eq!(values[i], reference_values[j], epsilon = 1e-10);
            let alignment = vectors.column(i).dot(&reference_vectors.column(j)).abs();
            assert_abs_diff_eq!(alignment, 1.0, epsilon = 1e-8);
        }
        Ok(())
    }

    #[test]
    fn test_single_axis_variation_is_reconstructed_by_first_mode() {
        // two meshes of two vertices that differ only along x of vertex 1
        let observations = array![
            [0.0, 0.0],
            [1.0, 1.0],
            [2.0, 2.0],
            [3.0, 5.0],
            [4.0, 4.0],
            [5.0, 5.0]
        ];
        let first = observations.column(0).to_owned();
        let pca = computed(observations);

        let values = pca.eigen_values().unwrap();
        assert_abs_diff_eq!(values[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 0.0, epsilon = 1e-12);

        let axis = pca.eigen_vectors().unwrap().column(0).to_owned();
        assert_abs_diff_eq!(axis, array![0.0, 0.0, 0.0, 1.0, 0.0, 0.0], epsilon = 1e-12);

        assert_abs_diff_eq!(pca.reprojection(1).unwrap(), first, epsilon = 1e-12);
    }

    #[test]
    fn test_first_mode_ignores_smaller_orthogonal_variation() {
        // three samples: strong variation on feature 0, weak on feature 1
        let observations = array![[-10.0, 0.0, 10.0], [0.1, -0.2, 0.1], [7.0, 7.0, 7.0]];
        let pca = computed(observations);
        let reprojected = pca.reprojection(1).unwrap();
        let mean = pca.model().unwrap().mean().clone();

        assert_abs_diff_eq!(reprojected[0], -10.0, epsilon = 1e-2);
        assert_abs_diff_eq!(reprojected[1], mean[1], epsilon = 1e-2);
        assert_abs_diff_eq!(reprojected[2], 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_all_components_reconstruct_first_sample_exactly() {
        for (d, n, seed) in [(30, 5, 1), (4, 10, 2)] {
            let observations = generate_random_observations(d, n, seed);
            let first = observations.column(0).to_owned();
            let pca = computed(observations);
            let k = pca.model().unwrap().n_components();
            assert_abs_diff_eq!(pca.reprojection(k).unwrap(), first, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_component_request_is_clamped() {
        let pca = computed(generate_random_observations(12, 4, 5));
        let available = pca.model().unwrap().n_components();
        let at_max = pca.reprojection(available).unwrap();
        let beyond = pca.reprojection(available + 50).unwrap();
        assert_eq!(at_max, beyond);
    }

    #[test]
    fn test_zero_components_gives_mean() {
        let pca = computed(generate_random_observations(9, 3, 8));
        let mean = pca.model().unwrap().mean().clone();
        assert_eq!(pca.reprojection(0).unwrap(), mean);
    }

    #[test]
    fn test_sign_convention_is_deterministic() {
        let observations = generate_random_observations(25, 6, 21);
        let a = computed(observations.clone());
        let b = computed(observations);
        assert_eq!(a.eigen_vectors().unwrap(), b.eigen_vectors().unwrap());
        assert_eq!(a.eigen_values().unwrap(), b.eigen_values().unwrap());

        for col in a.eigen_vectors().unwrap().columns() {
            let pivot = col
                .iter()
                .copied()
                .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
            assert!(pivot >= 0.0);
        }
    }

    #[test]
    fn test_single_sample() {
        let sample = array![[1.0], [2.0], [3.0]];
        let pca = computed(sample.clone());
        assert!(pca.eigen_values().unwrap().iter().all(|&v| v == 0.0));
        assert_abs_diff_eq!(
            pca.reprojection(1).unwrap(),
            sample.column(0).to_owned(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_column_truncated_input_on_both_paths() {
        // a view-truncated matrix keeps the row stride of the wider allocation
        for (d, n) in [(12, 4), (3, 6)] {
            let padded = generate_random_observations(d, n + 2, 31);
            let truncated = padded.slice_move(s![.., ..n]);
            assert!(!truncated.is_standard_layout());
            let contiguous = truncated.as_standard_layout().into_owned();

            let expected = computed(contiguous);
            let pca = computed(truncated);
            assert_abs_diff_eq!(
                pca.eigen_values().unwrap().clone(),
                expected.eigen_values().unwrap().clone(),
                epsilon = 1e-12
            );
            assert_orthonormal_sorted(pca.model().unwrap());
        }
    }

    #[test]
    fn test_explained_variance_ratio_sums_to_one() {
        let pca = computed(generate_random_observations(15, 6, 4));
        let ratio = pca.model().unwrap().explained_variance_ratio();
        assert_abs_diff_eq!(ratio.sum(), 1.0, epsilon = 1e-12);
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn test_accessors_before_compute_are_state_errors() {
        let mut pca = ShapePca::new();
        assert!(matches!(pca.eigen_values(), Err(ShapePcaError::State { .. })));
        assert!(matches!(pca.reprojection(1), Err(ShapePcaError::State { .. })));

        pca.set_input(generate_random_observations(3, 2, 0)).unwrap();
        assert!(matches!(pca.eigen_vectors(), Err(ShapePcaError::State { .. })));
        assert!(matches!(pca.model(), Err(ShapePcaError::State { .. })));
    }

    #[test]
    fn test_compute_without_input_is_dimension_error() {
        let mut pca = ShapePca::new();
        assert!(matches!(pca.compute(), Err(ShapePcaError::Dimension(_))));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let mut pca = ShapePca::new();
        assert!(matches!(
            pca.set_input(Array2::zeros((6, 0))),
            Err(ShapePcaError::Dimension(_))
        ));
        assert!(matches!(
            pca.set_input(Array2::zeros((0, 3))),
            Err(ShapePcaError::Dimension(_))
        ));
    }

    #[test]
    fn test_recompute_requires_new_input() {
        let mut pca = computed(generate_random_observations(6, 3, 1));
        assert!(matches!(pca.compute(), Err(ShapePcaError::State { .. })));
        // the earlier result survives the failed call
        assert!(pca.eigen_values().is_ok());

        pca.set_input(generate_random_observations(9, 3, 2)).unwrap();
        assert!(pca.eigen_values().is_err());
        pca.compute().unwrap();
        assert_eq!(pca.model().unwrap().n_features(), 9);
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;

    #[test]
    fn test_project_then_reconstruct_training_sample() {
        let observations = generate_random_observations(18, 5, 9);
        let third = observations.column(2).to_owned();
        let model = computed(observations).into_model().unwrap();

        let coefficients = model.project(third.view()).unwrap();
        let rebuilt = model.reconstruct(coefficients.view()).unwrap();
        assert_abs_diff_eq!(rebuilt, third, epsilon = 1e-10);

        let full = model.reprojection(model.n_components());
        let recovered = model.project(full.view()).unwrap();
        assert_abs_diff_eq!(
            recovered,
            model.first_sample_coefficients().clone(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_dimension_checks() {
        let model = computed(generate_random_observations(6, 3, 9))
            .into_model()
            .unwrap();
        assert!(model.project(Array1::zeros(5).view()).is_err());
        assert!(model
            .reconstruct(Array1::zeros(model.n_components() + 1).view())
            .is_err());
    }

    #[test]
    fn test_sampling_is_seeded() {
        let model = computed(generate_random_observations(12, 6, 13))
            .into_model()
            .unwrap();
        let a = model.sample_shape(3, 42).unwrap();
        let b = model.sample_shape(3, 42).unwrap();
        let c = model.sample_shape(3, 43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(model.sample_coefficients(100, 1).unwrap().len(), model.n_components());
    }

    #[test]
    fn test_sampling_without_variance_returns_mean() {
        let mut observations = Array2::<f64>::zeros((3, 3));
        observations.row_mut(1).fill(4.0);
        let model = computed(observations).into_model().unwrap();
        assert_eq!(model.sample_shape(3, 7).unwrap(), array![0.0, 4.0, 0.0]);
    }

    #[test]
    fn test_save_load_roundtrip() -> Result<(), Box<dyn Error>> {
        let model = computed(generate_random_observations(21, 4, 17)).into_model()?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.bin");

        model.save_model(&path)?;
        let loaded = ShapeModel::load_model(&path)?;
        assert_eq!(loaded, model);
        assert_eq!(loaded.reprojection(2), model.reprojection(2));
        Ok(())
    }

    #[test]
    fn test_load_model_error_conditions() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let missing = ShapeModel::load_model(dir.path().join("missing.bin"));
        assert!(matches!(missing, Err(ShapePcaError::ModelPersistence(_))));

        let garbage = dir.path().join("garbage.bin");
        std::fs::write(&garbage, [0xffu8; 7])?;
        assert!(matches!(
            ShapeModel::load_model(&garbage),
            Err(ShapePcaError::ModelPersistence(_))
        ));
        Ok(())
    }
}
