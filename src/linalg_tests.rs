// src/linalg_tests.rs
#![cfg(test)]
use crate::linalg::{determinant, inverse, is_symmetric, solve, symmetric_eigen, LuDecomposition};
use crate::linalg_backends::{BackendEigh, BackendLu, LinAlgBackendProvider, PivotedLuBackend, QrIterationBackend};
use crate::error::StatsError;
use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_symmetric(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n + 5, n), |_| rng.gen_range(-1.0..1.0));
    x.t().dot(&x)
}

fn assert_matrices_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64, context: &str) {
    assert_eq!(a.dim(), b.dim(), "Dimension mismatch for {}", context);
    for ((idx, x), y) in a.indexed_iter().zip(b.iter()) {
        assert!(
            (x - y).abs() < tol,
            "Mismatch at {:?} for {}: {} vs {} (diff: {})",
            idx,
            context,
            x,
            y,
            (x - y).abs()
        );
    }
}

fn assert_vectors_close(a: &Array1<f64>, b: &Array1<f64>, tol: f64, context: &str) {
    assert_eq!(a.len(), b.len(), "Length mismatch for {}", context);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() < tol, "Mismatch at {} for {}: {} vs {}", i, context, x, y);
    }
}

mod eigen_tests {
    use super::*;

    #[test]
    fn test_two_by_two_known_solution() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let eig = symmetric_eigen(&m).unwrap();
        assert_abs_diff_eq!(eig.values[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.values[1], 1.0, epsilon = 1e-12);
        let h = 0.5f64.sqrt();
        assert_abs_diff_eq!(eig.vectors[[0, 0]], h, epsilon = 1e-10);
        assert_abs_diff_eq!(eig.vectors[[1, 0]], h, epsilon = 1e-10);
        assert_abs_diff_eq!(eig.vectors[[0, 1]].abs(), h, epsilon = 1e-10);
        assert!(eig.vectors[[0, 1]] * eig.vectors[[1, 1]] < 0.0);
    }

    #[test]
    fn test_diagonal_matrix_sorted_descending() {
        let m = array![[1.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 2.0]];
        let eig = symmetric_eigen(&m).unwrap();
        assert_vectors_close(&eig.values, &array![3.0, 2.0, 1.0], 1e-12, "eigenvalues");
        let expected = array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert_matrices_close(&eig.vectors, &expected, 1e-12, "eigenvectors");
    }

    #[test]
    fn test_reconstruction_and_orthonormality_random() {
        for (n, seed) in [(3usize, 1u64), (7, 2), (12, 3), (25, 4)] {
            let m = random_symmetric(n, seed);
            let eig = symmetric_eigen(&m).unwrap();

            let lambda = Array2::from_diag(&eig.values);
            let rebuilt = eig.vectors.dot(&lambda).dot(&eig.vectors.t());
            assert_matrices_close(&rebuilt, &m, 1e-9, &format!("reconstruction n={}", n));

            let gram = eig.vectors.t().dot(&eig.vectors);
            assert_matrices_close(&gram, &Array2::eye(n), 1e-10, &format!("orthonormality n={}", n));

            for k in 1..n {
                assert!(eig.values[k - 1] >= eig.values[k], "eigenvalues not descending for n={}", n);
            }
            let trace: f64 = m.diag().sum();
            assert_abs_diff_eq!(eig.values.sum(), trace, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_dominant_entry_is_positive() {
        let m = random_symmetric(6, 99);
        let eig = symmetric_eigen(&m).unwrap();
        for col in eig.vectors.columns() {
            let dominant = col
                .iter()
                .copied()
                .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
            assert!(dominant > 0.0);
        }
    }

    #[test]
    fn test_repeated_eigenvalues() {
        // Equicorrelation matrix: one eigenvalue 1 + (p-1) r and p-1 copies of 1 - r.
        let p = 5;
        let r = 0.4;
        let m = Array2::from_shape_fn((p, p), |(i, j)| if i == j { 1.0 } else { r });
        let eig = symmetric_eigen(&m).unwrap();
        assert_abs_diff_eq!(eig.values[0], 1.0 + (p as f64 - 1.0) * r, epsilon = 1e-10);
        for k in 1..p {
            assert_abs_diff_eq!(eig.values[k], 1.0 - r, epsilon = 1e-10);
        }
        let gram = eig.vectors.t().dot(&eig.vectors);
        assert_matrices_close(&gram, &Array2::eye(p), 1e-10, "equicorrelation orthonormality");
    }

    #[test]
    fn test_backend_returns_ascending() {
        let m = random_symmetric(8, 5);
        let out = QrIterationBackend.eigh_upper(&m).unwrap();
        for k in 1..8 {
            assert!(out.eigenvalues[k - 1] <= out.eigenvalues[k]);
        }
    }

    #[test]
    fn test_backend_reads_upper_triangle_only() {
        let mut m = random_symmetric(4, 6);
        let reference = QrIterationBackend.eigh_upper(&m).unwrap();
        m[[3, 0]] = 1.0e6;
        m[[2, 1]] = -1.0e6;
        let out = QrIterationBackend.eigh_upper(&m).unwrap();
        assert_vectors_close(&out.eigenvalues, &reference.eigenvalues, 1e-10, "upper triangle");
    }

    #[test]
    fn test_backend_rejects_non_finite() {
        let m = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        assert!(QrIterationBackend.eigh_upper(&m).is_err());
    }

    #[test]
    fn test_single_element_and_empty() {
        let eig = symmetric_eigen(&array![[4.5]]).unwrap();
        assert_abs_diff_eq!(eig.values[0], 4.5);
        assert_abs_diff_eq!(eig.vectors[[0, 0]], 1.0);

        let empty = QrIterationBackend.eigh_upper(&Array2::zeros((0, 0))).unwrap();
        assert_eq!(empty.eigenvalues.len(), 0);
    }

    #[test]
    fn test_rejects_asymmetric_input() {
        let m = array![[1.0, 2.0], [0.0, 1.0]];
        assert!(matches!(symmetric_eigen(&m), Err(StatsError::InvalidConfig(_))));
    }
}

mod lu_tests {
    use super::*;

    #[test]
    fn test_determinant_known() {
        let m = array![[4.0, 3.0], [6.0, 3.0]];
        assert_abs_diff_eq!(determinant(&m).unwrap(), -6.0, epsilon = 1e-12);

        let m3 = array![[2.0, -3.0, 1.0], [2.0, 0.0, -1.0], [1.0, 4.0, 5.0]];
        assert_abs_diff_eq!(determinant(&m3).unwrap(), 49.0, epsilon = 1e-10);
    }

    #[test]
    fn test_determinant_matches_eigenvalue_product() {
        let m = random_symmetric(6, 11);
        let eig = symmetric_eigen(&m).unwrap();
        let product: f64 = eig.values.iter().product();
        assert_abs_diff_eq!(determinant(&m).unwrap(), product, epsilon = 1e-8 * product.abs().max(1.0));
    }

    #[test]
    fn test_inverse_times_matrix_is_identity() {
        let m = random_symmetric(9, 12);
        let inv = inverse(&m).unwrap();
        assert_matrices_close(&m.dot(&inv), &Array2::eye(9), 1e-9, "A A^-1");
    }

    #[test]
    fn test_solve_multiple_right_hand_sides() {
        let a = array![[3.0, 1.0, 0.0], [1.0, 4.0, 1.0], [0.0, 1.0, 5.0]];
        let x_true = array![[1.0, -2.0], [0.5, 3.0], [-1.0, 0.0]];
        let b = a.dot(&x_true);
        let lu = LuDecomposition::new(a.view()).unwrap();
        let x = lu.solve(b.view()).unwrap();
        assert_matrices_close(&x, &x_true, 1e-12, "solve");
    }

    #[test]
    fn test_singular_matrix() {
        let m = array![[1.0, 2.0], [2.0, 4.0]];
        let lu = LuDecomposition::new(m.view()).unwrap();
        assert!(lu.is_singular());
        assert_eq!(lu.determinant(), 0.0);
        assert!(matches!(inverse(&m), Err(StatsError::SingularMatrix(_))));
    }

    #[test]
    fn test_non_square_rejected() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(LuDecomposition::new(m.view()).is_err());
    }

    #[test]
    fn test_is_symmetric() {
        let m = random_symmetric(4, 13);
        assert!(is_symmetric(&m, 1e-12));
        let mut n = m.clone();
        n[[0, 3]] += 1e-3;
        assert!(!is_symmetric(&n, 1e-9));
        assert!(!is_symmetric(&Array2::zeros((2, 3)), 1e-9));
    }
}

mod lu_backend_tests {
    use super::*;

    #[test]
    fn test_provider_matches_pivoted_lu() {
        let m = random_symmetric(7, 21);
        let b = Array2::from_shape_fn((7, 3), |(i, j)| (i as f64) - 2.0 * (j as f64));
        let provider = LinAlgBackendProvider::new();

        let det_provider = provider.determinant(&m).unwrap();
        let det_pure = PivotedLuBackend.determinant(&m).unwrap();
        assert_abs_diff_eq!(det_provider, det_pure, epsilon = 1e-9 * det_pure.abs().max(1.0));

        let x = solve(&m, &b).unwrap();
        assert_matrices_close(&m.dot(&x), &b, 1e-9, "A X = B");
        assert_matrices_close(&x, &PivotedLuBackend.solve(&m, &b).unwrap(), 1e-9, "solve");
        assert_matrices_close(&provider.inverse(&m).unwrap(), &inverse(&m).unwrap(), 1e-12, "inverse");
    }

    #[test]
    fn test_backend_errors_keep_their_kind() {
        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        assert_eq!(determinant(&singular).unwrap(), 0.0);
        assert!(matches!(inverse(&singular), Err(StatsError::SingularMatrix(_))));
        assert!(matches!(
            solve(&singular, &array![[1.0], [2.0]]),
            Err(StatsError::SingularMatrix(_))
        ));

        let boxed = PivotedLuBackend.inverse(&singular).unwrap_err();
        assert!(matches!(StatsError::from(boxed), StatsError::SingularMatrix(_)));

        let square = array![[2.0, 0.0], [0.0, 2.0]];
        assert!(matches!(
            solve(&square, &array![[1.0], [2.0], [3.0]]),
            Err(StatsError::InvalidConfig(_))
        ));
        assert!(matches!(
            inverse(&Array2::zeros((2, 3))),
            Err(StatsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_foreign_backend_error_becomes_backend_variant() {
        let foreign: crate::error::ThreadSafeStdError = "lapack exploded".into();
        match StatsError::from(foreign) {
            StatsError::Backend(message) => assert_eq!(message, "lapack exploded"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
