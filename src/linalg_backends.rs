// src/linalg_backends.rs

use crate::error::ThreadSafeStdError;
use crate::linalg::LuDecomposition;
use ndarray::{Array1, Array2};

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues in ascending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvector_matrix.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<f64>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVD).
/// Implementers expect `matrix` to be symmetric; only its upper triangle is guaranteed to be read.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError>;
}

/// Trait for LU-based operations on square matrices (similar to LAPACK's DGETRF/DGETRS/DGETRI).
/// A singular matrix is reported as a boxed `StatsError::SingularMatrix` from `solve`
/// and `inverse`; `determinant` returns 0.0 for it.
pub trait BackendLu {
    fn determinant(&self, matrix: &Array2<f64>) -> Result<f64, ThreadSafeStdError>;
    /// Solves `A X = B` for every column of `b`.
    fn solve(&self, a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError>;
    fn inverse(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError>;
}

// --- PivotedLuBackend: pure-Rust LU with partial pivoting ---

#[derive(Debug, Default, Copy, Clone)]
pub struct PivotedLuBackend;

impl BackendLu for PivotedLuBackend {
    fn determinant(&self, matrix: &Array2<f64>) -> Result<f64, ThreadSafeStdError> {
        Ok(LuDecomposition::new(matrix.view())?.determinant())
    }

    fn solve(&self, a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        Ok(LuDecomposition::new(a.view())?.solve(b.view())?)
    }

    fn inverse(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        Ok(LuDecomposition::new(matrix.view())?.inverse()?)
    }
}

// --- QrIterationBackend: pure-Rust symmetric QR algorithm ---

/// Maximum implicit QR sweeps spent on a single eigenvalue before giving up.
const MAX_SWEEPS_PER_EIGENVALUE: usize = 60;

/// Householder reduction to tridiagonal form followed by implicitly shifted
/// QR iteration (QL ordering) on the tridiagonal matrix, accumulating the
/// orthogonal transforms into the eigenvector matrix.
#[derive(Debug, Default, Copy, Clone)]
pub struct QrIterationBackend;

impl BackendEigh for QrIterationBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if nrows != ncols {
            return Err(format!(
                "Matrix must be square for eigendecomposition, got {}x{}.",
                nrows, ncols
            )
            .into());
        }
        let n = nrows;
        if n == 0 {
            return Ok(EighOutput {
                eigenvalues: Array1::zeros(0),
                eigenvectors: Array2::zeros((0, 0)),
            });
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err("Matrix contains non-finite values.".into());
        }

        // Mirror the upper triangle so the lower one is never trusted.
        let mut v = Array2::from_shape_fn((n, n), |(i, j)| {
            if i <= j {
                matrix[[i, j]]
            } else {
                matrix[[j, i]]
            }
        });
        let mut d = Array1::<f64>::zeros(n);
        let mut e = Array1::<f64>::zeros(n);

        householder_tridiagonalize(&mut v, &mut d, &mut e);
        tridiagonal_qr(&mut v, &mut d, &mut e)?;

        // Ascending order to match LAPACK.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| d[a].partial_cmp(&d[b]).unwrap_or(std::cmp::Ordering::Equal));
        let eigenvalues = Array1::from_iter(order.iter().map(|&i| d[i]));
        let eigenvectors = Array2::from_shape_fn((n, n), |(r, c)| v[[r, order[c]]]);

        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

/// Reduces the symmetric matrix held in `v` to tridiagonal form.
/// On return `d` holds the diagonal, `e[1..]` the sub-diagonal, and `v` the
/// accumulated orthogonal transformation.
fn householder_tridiagonalize(v: &mut Array2<f64>, d: &mut Array1<f64>, e: &mut Array1<f64>) {
    let n = v.nrows();
    for j in 0..n {
        d[j] = v[[n - 1, j]];
    }

    for i in (1..n).rev() {
        let mut scale = 0.0;
        let mut h = 0.0;
        for k in 0..i {
            scale += d[k].abs();
        }
        if scale == 0.0 {
            e[i] = d[i - 1];
            for j in 0..i {
                d[j] = v[[i - 1, j]];
                v[[i, j]] = 0.0;
                v[[j, i]] = 0.0;
            }
        } else {
            for k in 0..i {
                d[k] /= scale;
                h += d[k] * d[k];
            }
            let mut f = d[i - 1];
            let mut g = h.sqrt();
            if f > 0.0 {
                g = -g;
            }
            e[i] = scale * g;
            h -= f * g;
            d[i - 1] = f - g;
            for j in 0..i {
                e[j] = 0.0;
            }

            for j in 0..i {
                f = d[j];
                v[[j, i]] = f;
                g = e[j] + v[[j, j]] * f;
                for k in (j + 1)..i {
                    g += v[[k, j]] * d[k];
                    e[k] += v[[k, j]] * f;
                }
                e[j] = g;
            }
            f = 0.0;
            for j in 0..i {
                e[j] /= h;
                f += e[j] * d[j];
            }
            let hh = f / (h + h);
            for j in 0..i {
                e[j] -= hh * d[j];
            }
            for j in 0..i {
                f = d[j];
                g = e[j];
                for k in j..i {
                    v[[k, j]] -= f * e[k] + g * d[k];
                }
                d[j] = v[[i - 1, j]];
                v[[i, j]] = 0.0;
            }
        }
        d[i] = h;
    }

    // Accumulate transformations.
    for i in 0..n.saturating_sub(1) {
        v[[n - 1, i]] = v[[i, i]];
        v[[i, i]] = 1.0;
        let h = d[i + 1];
        if h != 0.0 {
            for k in 0..=i {
                d[k] = v[[k, i + 1]] / h;
            }
            for j in 0..=i {
                let mut g = 0.0;
                for k in 0..=i {
                    g += v[[k, i + 1]] * v[[k, j]];
                }
                for k in 0..=i {
                    v[[k, j]] -= g * d[k];
                }
            }
        }
        for k in 0..=i {
            v[[k, i + 1]] = 0.0;
        }
    }
    for j in 0..n {
        d[j] = v[[n - 1, j]];
        v[[n - 1, j]] = 0.0;
    }
    v[[n - 1, n - 1]] = 1.0;
    e[0] = 0.0;
}

/// Implicitly shifted QR iteration on the tridiagonal matrix (`d`, `e`),
/// applying every Givens rotation to `v`.
fn tridiagonal_qr(
    v: &mut Array2<f64>,
    d: &mut Array1<f64>,
    e: &mut Array1<f64>,
) -> Result<(), ThreadSafeStdError> {
    let n = d.len();
    for i in 1..n {
        e[i - 1] = e[i];
    }
    e[n - 1] = 0.0;

    let mut f = 0.0;
    let mut tst1: f64 = 0.0;
    let eps = f64::EPSILON;

    for l in 0..n {
        tst1 = tst1.max(d[l].abs() + e[l].abs());
        let mut m = l;
        while m < n - 1 {
            if e[m].abs() <= eps * tst1 {
                break;
            }
            m += 1;
        }

        if m > l {
            let mut sweeps = 0;
            loop {
                sweeps += 1;
                if sweeps > MAX_SWEEPS_PER_EIGENVALUE {
                    return Err(format!(
                        "QR iteration failed to converge for eigenvalue {} after {} sweeps.",
                        l, MAX_SWEEPS_PER_EIGENVALUE
                    )
                    .into());
                }

                // Wilkinson-style shift from the leading 2x2 block.
                let mut g = d[l];
                let mut p = (d[l + 1] - g) / (2.0 * e[l]);
                let mut r = p.hypot(1.0);
                if p < 0.0 {
                    r = -r;
                }
                d[l] = e[l] / (p + r);
                d[l + 1] = e[l] * (p + r);
                let dl1 = d[l + 1];
                let mut h = g - d[l];
                for i in (l + 2)..n {
                    d[i] -= h;
                }
                f += h;

                p = d[m];
                let mut c = 1.0;
                let mut c2 = c;
                let mut c3 = c;
                let el1 = e[l + 1];
                let mut s = 0.0;
                let mut s2 = 0.0;
                for i in (l..m).rev() {
                    c3 = c2;
                    c2 = c;
                    s2 = s;
                    g = c * e[i];
                    h = c * p;
                    r = p.hypot(e[i]);
                    e[i + 1] = s * r;
                    s = e[i] / r;
                    c = p / r;
                    p = c * d[i] - s * g;
                    d[i + 1] = h + s * (c * g + s * d[i]);

                    for k in 0..n {
                        h = v[[k, i + 1]];
                        v[[k, i + 1]] = s * v[[k, i]] + c * h;
                        v[[k, i]] = c * v[[k, i]] - s * h;
                    }
                }
                p = -s * s2 * c3 * el1 * e[l] / dl1;
                e[l] = s * p;
                d[l] = c * p;

                if e[l].abs() <= eps * tst1 {
                    break;
                }
            }
        }
        d[l] += f;
        e[l] = 0.0;
    }
    Ok(())
}

// --- NdarrayLinAlgBackend: LAPACK through ndarray-linalg ---

#[cfg(feature = "lapack")]
mod lapack_specific_code {
    use super::{BackendEigh, BackendLu, EighOutput};
    use crate::error::{StatsError, ThreadSafeStdError};
    use ndarray::Array2;
    use ndarray_linalg::error::LinalgError;
    use ndarray_linalg::{Determinant, Eigh as NdLinalgEigh, Factorize, Inverse, Solve, UPLO};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct NdarrayLinAlgBackend;

    fn require_square(matrix: &Array2<f64>) -> Result<(), ThreadSafeStdError> {
        let (n, m) = matrix.dim();
        if n != m {
            return Err(Box::new(StatsError::InvalidConfig(format!(
                "LU decomposition requires a square matrix, got {}x{}",
                n, m
            ))));
        }
        Ok(())
    }

    // getrf reports an exactly singular matrix as a computational failure.
    fn lu_error(e: LinalgError) -> ThreadSafeStdError {
        match e {
            LinalgError::Lapack(inner) => Box::new(StatsError::SingularMatrix(inner.to_string())),
            other => Box::new(other),
        }
    }

    impl BackendEigh for NdarrayLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
            let (eigenvalues, eigenvectors) = matrix
                .eigh(UPLO::Upper)
                .map_err(|e| -> ThreadSafeStdError { Box::new(e) })?;
            Ok(EighOutput { eigenvalues, eigenvectors })
        }
    }

    impl BackendLu for NdarrayLinAlgBackend {
        fn determinant(&self, matrix: &Array2<f64>) -> Result<f64, ThreadSafeStdError> {
            require_square(matrix)?;
            match matrix.det() {
                Ok(det) => Ok(det),
                Err(LinalgError::Lapack(_)) => Ok(0.0),
                Err(e) => Err(Box::new(e)),
            }
        }

        fn solve(&self, a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
            require_square(a)?;
            if b.nrows() != a.nrows() {
                return Err(Box::new(StatsError::InvalidConfig(format!(
                    "right-hand side has {} rows, expected {}",
                    b.nrows(),
                    a.nrows()
                ))));
            }
            let factorized = a.factorize().map_err(lu_error)?;
            let mut x = Array2::zeros(b.raw_dim());
            for (rhs, mut out) in b.columns().into_iter().zip(x.columns_mut()) {
                let column = factorized.solve(&rhs.to_owned()).map_err(lu_error)?;
                out.assign(&column);
            }
            Ok(x)
        }

        fn inverse(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
            require_square(matrix)?;
            matrix.inv().map_err(lu_error)
        }
    }
}

#[cfg(feature = "lapack")]
pub use lapack_specific_code::NdarrayLinAlgBackend;

// --- LinAlgBackendProvider dispatch ---

/// Dispatches to the selected linear algebra backend based on compile-time
/// feature flags: LAPACK when a `backend_*` feature is enabled, the pure-Rust
/// QR iteration and pivoted LU otherwise.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider;

impl LinAlgBackendProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &'static str {
        #[cfg(feature = "lapack")]
        {
            "lapack"
        }
        #[cfg(not(feature = "lapack"))]
        {
            "qr-iteration"
        }
    }
}

impl BackendEigh for LinAlgBackendProvider {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
        #[cfg(feature = "lapack")]
        {
            NdarrayLinAlgBackend.eigh_upper(matrix)
        }
        #[cfg(not(feature = "lapack"))]
        {
            QrIterationBackend.eigh_upper(matrix)
        }
    }
}

impl BackendLu for LinAlgBackendProvider {
    fn determinant(&self, matrix: &Array2<f64>) -> Result<f64, ThreadSafeStdError> {
        #[cfg(feature = "lapack")]
        {
            NdarrayLinAlgBackend.determinant(matrix)
        }
        #[cfg(not(feature = "lapack"))]
        {
            PivotedLuBackend.determinant(matrix)
        }
    }

    fn solve(&self, a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        #[cfg(feature = "lapack")]
        {
            NdarrayLinAlgBackend.solve(a, b)
        }
        #[cfg(not(feature = "lapack"))]
        {
            PivotedLuBackend.solve(a, b)
        }
    }

    fn inverse(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        #[cfg(feature = "lapack")]
        {
            NdarrayLinAlgBackend.inverse(matrix)
        }
        #[cfg(not(feature = "lapack"))]
        {
            PivotedLuBackend.inverse(matrix)
        }
    }
}
