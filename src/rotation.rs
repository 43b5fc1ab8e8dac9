// src/rotation.rs

use crate::error::{StatsError, StatsResult};
use log::{debug, info, trace};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Largest planar rotation angle (radians) still treated as "no change" when
/// checking a sweep for convergence.
const ANGLE_TOLERANCE: f64 = 1e-5;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationMethod {
    #[default]
    None,
    Varimax,
    Quartimax,
    Equamax,
}

impl RotationMethod {
    /// Orthomax weight for `m` factors.
    pub fn gamma(&self, n_factors: usize) -> Option<f64> {
        match self {
            RotationMethod::None => None,
            RotationMethod::Varimax => Some(1.0),
            RotationMethod::Quartimax => Some(0.0),
            RotationMethod::Equamax => Some(n_factors as f64 / 2.0),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RotationConfig {
    pub method: RotationMethod,
    pub kaiser_normalization: bool,
    pub max_iterations: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            method: RotationMethod::None,
            kaiser_normalization: true,
            max_iterations: 25,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RotationOutput {
    /// Shape: (n_variables, n_factors)
    pub loadings: Array2<f64>,
    /// Orthogonal matrix `T` with `rotated = unrotated . T`. Shape: (n_factors, n_factors)
    pub transformation: Array2<f64>,
    pub iterations: usize,
}

/// Orthomax rotation by Kaiser's successive pairwise planar rotations.
///
/// For every factor pair (j, k) the angle is `phi = atan2(D - 2 gamma A B / p,
/// C - gamma (A^2 - B^2) / p) / 4`, with `u = x_j^2 - x_k^2`, `v = 2 x_j x_k`,
/// `A = sum u`, `B = sum v`, `C = sum (u^2 - v^2)` and `D = 2 sum u v`.
/// Sweeps repeat until no angle exceeds the tolerance.
pub fn orthomax(
    loadings: &Array2<f64>,
    gamma: f64,
    kaiser_normalization: bool,
    max_iterations: usize,
) -> StatsResult<RotationOutput> {
    let (p, m) = loadings.dim();
    let mut x = loadings.clone();
    let mut transformation = Array2::<f64>::eye(m);

    let row_norms: Array1<f64> = loadings.map_axis(Axis(1), |row| row.dot(&row).sqrt());
    if kaiser_normalization {
        for (mut row, &h) in x.axis_iter_mut(Axis(0)).zip(row_norms.iter()) {
            if h > 1e-12 {
                row.mapv_inplace(|v| v / h);
            }
        }
    }

    let p_f = p as f64;
    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        iterations += 1;
        let mut max_angle: f64 = 0.0;
        for j in 0..m {
            for k in (j + 1)..m {
                let (mut a, mut b, mut c, mut d) = (0.0, 0.0, 0.0, 0.0);
                for i in 0..p {
                    let xj = x[[i, j]];
                    let xk = x[[i, k]];
                    let u = xj * xj - xk * xk;
                    let v = 2.0 * xj * xk;
                    a += u;
                    b += v;
                    c += u * u - v * v;
                    d += u * v;
                }
                d *= 2.0;
                let numerator = d - 2.0 * gamma * a * b / p_f;
                let denominator = c - gamma * (a * a - b * b) / p_f;
                let phi = 0.25 * numerator.atan2(denominator);
                if phi.abs() < ANGLE_TOLERANCE {
                    continue;
                }
                max_angle = max_angle.max(phi.abs());
                let (sin, cos) = phi.sin_cos();
                rotate_columns(&mut x, j, k, cos, sin);
                rotate_columns(&mut transformation, j, k, cos, sin);
            }
        }
        trace!("Orthomax sweep {}: largest angle {:.3e}", iterations, max_angle);
        if max_angle < ANGLE_TOLERANCE {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(StatsError::NotConverged {
            procedure: "rotation",
            iterations: max_iterations,
        });
    }

    if kaiser_normalization {
        for (mut row, &h) in x.axis_iter_mut(Axis(0)).zip(row_norms.iter()) {
            if h > 1e-12 {
                row.mapv_inplace(|v| v * h);
            }
        }
    }

    // Orient each factor so its loadings sum to a non-negative value.
    for k in 0..m {
        if x.column(k).sum() < 0.0 {
            x.column_mut(k).mapv_inplace(|v| -v);
            transformation.column_mut(k).mapv_inplace(|v| -v);
        }
    }

    debug!("Orthomax (gamma = {}) converged in {} sweep(s).", gamma, iterations);
    Ok(RotationOutput {
        loadings: x,
        transformation,
        iterations,
    })
}

fn rotate_columns(matrix: &mut Array2<f64>, j: usize, k: usize, cos: f64, sin: f64) {
    for i in 0..matrix.nrows() {
        let xj = matrix[[i, j]];
        let xk = matrix[[i, k]];
        matrix[[i, j]] = xj * cos + xk * sin;
        matrix[[i, k]] = -xj * sin + xk * cos;
    }
}

/// Applies the configured rotation. Returns `None` when no rotation is
/// requested or only one factor was extracted.
pub fn rotate(loadings: &Array2<f64>, config: &RotationConfig) -> StatsResult<Option<RotationOutput>> {
    let m = loadings.ncols();
    let gamma = match config.method.gamma(m) {
        Some(g) => g,
        None => return Ok(None),
    };
    if m < 2 {
        info!("Only one factor was extracted. The solution cannot be rotated.");
        return Ok(None);
    }
    orthomax(loadings, gamma, config.kaiser_normalization, config.max_iterations).map(Some)
}

/// Value of the orthomax criterion `sum_k [sum_i x_ik^4 - gamma/p (sum_i x_ik^2)^2]`.
pub fn orthomax_criterion(loadings: &Array2<f64>, gamma: f64) -> f64 {
    let p = loadings.nrows() as f64;
    loadings
        .columns()
        .into_iter()
        .map(|col| {
            let sq_sum: f64 = col.iter().map(|v| v * v).sum();
            let quartic: f64 = col.iter().map(|v| v.powi(4)).sum();
            quartic - gamma / p * sq_sum * sq_sum
        })
        .sum()
}
