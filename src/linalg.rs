// src/linalg.rs

//! Dense helpers on top of `ndarray`: LU factorisation (determinant, inverse,
//! solve) and the symmetric eigendecomposition used by every extraction.
//! The free functions dispatch through `LinAlgBackendProvider`; `LuDecomposition`
//! is the pure-Rust factorisation behind `PivotedLuBackend`.

use crate::error::{StatsError, StatsResult};
use crate::linalg_backends::{BackendEigh, BackendLu, LinAlgBackendProvider};
use float_cmp::approx_eq;
use log::trace;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Pivots smaller than this (relative to the largest entry of the column) mark a singular matrix.
const SINGULAR_PIVOT_TOLERANCE: f64 = 1e-12;

/// LU factorisation with partial pivoting, `P A = L U`, stored compactly.
#[derive(Debug, Clone)]
pub struct LuDecomposition {
    lu: Array2<f64>,
    pivots: Vec<usize>,
    sign: f64,
    singular: bool,
}

impl LuDecomposition {
    pub fn new(matrix: ArrayView2<f64>) -> StatsResult<Self> {
        let (n, m) = matrix.dim();
        if n != m {
            return Err(StatsError::InvalidConfig(format!(
                "LU decomposition requires a square matrix, got {}x{}",
                n, m
            )));
        }
        let mut lu = matrix.to_owned();
        let mut pivots: Vec<usize> = (0..n).collect();
        let mut sign = 1.0;
        let mut singular = false;
        let max_abs = lu.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));

        for k in 0..n {
            let mut p = k;
            for i in (k + 1)..n {
                if lu[[i, k]].abs() > lu[[p, k]].abs() {
                    p = i;
                }
            }
            if p != k {
                for j in 0..n {
                    lu.swap([p, j], [k, j]);
                }
                pivots.swap(p, k);
                sign = -sign;
            }
            let pivot = lu[[k, k]];
            if pivot.abs() <= SINGULAR_PIVOT_TOLERANCE * max_abs.max(1.0) {
                singular = true;
                continue;
            }
            for i in (k + 1)..n {
                lu[[i, k]] /= pivot;
                let factor = lu[[i, k]];
                if factor != 0.0 {
                    for j in (k + 1)..n {
                        lu[[i, j]] -= factor * lu[[k, j]];
                    }
                }
            }
        }
        trace!("LU decomposition of {}x{} matrix, singular={}", n, n, singular);
        Ok(Self {
            lu,
            pivots,
            sign,
            singular,
        })
    }

    pub fn is_singular(&self) -> bool {
        self.singular
    }

    pub fn determinant(&self) -> f64 {
        if self.singular {
            return 0.0;
        }
        self.lu.diag().iter().fold(self.sign, |acc, &v| acc * v)
    }

    /// Solves `A X = B` for every column of `b`.
    pub fn solve(&self, b: ArrayView2<f64>) -> StatsResult<Array2<f64>> {
        if self.singular {
            return Err(StatsError::SingularMatrix(
                "cannot solve a system with a singular matrix".to_string(),
            ));
        }
        let n = self.lu.nrows();
        if b.nrows() != n {
            return Err(StatsError::InvalidConfig(format!(
                "right-hand side has {} rows, expected {}",
                b.nrows(),
                n
            )));
        }
        let mut x = b.select(Axis(0), &self.pivots);
        for col in 0..x.ncols() {
            for i in 0..n {
                let mut sum = x[[i, col]];
                for k in 0..i {
                    sum -= self.lu[[i, k]] * x[[k, col]];
                }
                x[[i, col]] = sum;
            }
            for i in (0..n).rev() {
                let mut sum = x[[i, col]];
                for k in (i + 1)..n {
                    sum -= self.lu[[i, k]] * x[[k, col]];
                }
                x[[i, col]] = sum / self.lu[[i, i]];
            }
        }
        Ok(x)
    }

    pub fn inverse(&self) -> StatsResult<Array2<f64>> {
        let n = self.lu.nrows();
        self.solve(Array2::eye(n).view())
    }
}

/// Determinant through the configured backend; 0.0 for a singular matrix.
pub fn determinant(matrix: &Array2<f64>) -> StatsResult<f64> {
    Ok(LinAlgBackendProvider::new().determinant(matrix)?)
}

/// Solves `A X = B` through the configured backend.
pub fn solve(a: &Array2<f64>, b: &Array2<f64>) -> StatsResult<Array2<f64>> {
    Ok(LinAlgBackendProvider::new().solve(a, b)?)
}

pub fn inverse(matrix: &Array2<f64>) -> StatsResult<Array2<f64>> {
    Ok(LinAlgBackendProvider::new().inverse(matrix)?)
}

/// Checks that `matrix` is square and symmetric up to `epsilon`.
pub fn is_symmetric(matrix: &Array2<f64>, epsilon: f64) -> bool {
    let (n, m) = matrix.dim();
    if n != m {
        return false;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if !approx_eq!(f64, matrix[[i, j]], matrix[[j, i]], epsilon = epsilon, ulps = 4) {
                return false;
            }
        }
    }
    true
}

/// Eigenvalues and unit eigenvectors of a symmetric matrix, largest eigenvalue first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenDecomposition {
    /// Shape: (n)
    pub values: Array1<f64>,
    /// Shape: (n, n); column `k` belongs to `values[k]`.
    pub vectors: Array2<f64>,
}

/// Symmetric eigendecomposition through the configured backend.
///
/// Eigenpairs are sorted by descending eigenvalue and every eigenvector is
/// oriented so that its largest-magnitude entry is positive.
pub fn symmetric_eigen(matrix: &Array2<f64>) -> StatsResult<EigenDecomposition> {
    if !is_symmetric(matrix, 1e-9) {
        return Err(StatsError::InvalidConfig(
            "eigendecomposition requires a square symmetric matrix".to_string(),
        ));
    }
    let provider = LinAlgBackendProvider::new();
    let out = provider.eigh_upper(matrix)?;
    trace!("Eigendecomposition via {} backend", provider.name());

    let n = out.eigenvalues.len();
    let mut eig_pairs: Vec<(f64, Array1<f64>)> = out
        .eigenvalues
        .into_iter()
        .zip(out.eigenvectors.columns().into_iter().map(|col| col.to_owned()))
        .collect();
    eig_pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut values = Array1::zeros(n);
    let mut vectors = Array2::zeros((n, n));
    for (k, (val, mut vec)) in eig_pairs.into_iter().enumerate() {
        let norm = vec.dot(&vec).sqrt();
        if norm > 1e-12 {
            vec.mapv_inplace(|x| x / norm);
        }
        let dominant = vec
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if dominant < 0.0 {
            vec.mapv_inplace(|x| -x);
        }
        values[k] = val;
        vectors.column_mut(k).assign(&vec);
    }
    Ok(EigenDecomposition { values, vectors })
}
