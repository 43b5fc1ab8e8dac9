// src/kmo.rs

//! Kaiser-Meyer-Olkin measure of sampling adequacy and Bartlett's test of sphericity.

use crate::error::{StatsError, StatsResult};
use crate::linalg;
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KmoResult {
    /// Overall measure of sampling adequacy.
    pub overall: f64,
    /// Per-variable measure of sampling adequacy (MSA).
    pub per_variable: Array1<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BartlettTest {
    pub chi_square: f64,
    pub df: usize,
    pub significance: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KmoBartlett {
    pub kmo: KmoResult,
    pub bartlett: BartlettTest,
}

/// Partial correlations `a_ij = -q_ij / sqrt(q_ii q_jj)` from the inverse `Q` of `R`.
pub fn partial_correlations(correlations: &Array2<f64>) -> StatsResult<Array2<f64>> {
    let inverse = linalg::inverse(correlations)?;
    let p = inverse.nrows();
    let mut partial = Array2::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            if i == j {
                partial[[i, j]] = 1.0;
                continue;
            }
            let denom = inverse[[i, i]] * inverse[[j, j]];
            if denom <= 0.0 {
                return Err(StatsError::SingularMatrix(
                    "inverse correlation matrix has a non-positive diagonal".to_string(),
                ));
            }
            partial[[i, j]] = -inverse[[i, j]] / denom.sqrt();
        }
    }
    Ok(partial)
}

/// KMO = sum r_ij^2 / (sum r_ij^2 + sum a_ij^2) over off-diagonal pairs,
/// overall and restricted to each variable's row.
pub fn kmo(correlations: &Array2<f64>) -> StatsResult<KmoResult> {
    let p = correlations.nrows();
    if p < 2 {
        return Err(StatsError::InsufficientData(
            "KMO requires at least 2 variables".to_string(),
        ));
    }
    let partial = partial_correlations(correlations)?;

    let mut total_r2 = 0.0;
    let mut total_a2 = 0.0;
    let mut per_variable = Array1::zeros(p);
    for j in 0..p {
        let mut r2 = 0.0;
        let mut a2 = 0.0;
        for i in 0..p {
            if i == j {
                continue;
            }
            r2 += correlations[[i, j]].powi(2);
            a2 += partial[[i, j]].powi(2);
        }
        per_variable[j] = if r2 + a2 > 0.0 { r2 / (r2 + a2) } else { f64::NAN };
        total_r2 += r2;
        total_a2 += a2;
    }
    let overall = if total_r2 + total_a2 > 0.0 {
        total_r2 / (total_r2 + total_a2)
    } else {
        f64::NAN
    };
    debug!("KMO overall = {:.4}", overall);
    Ok(KmoResult { overall, per_variable })
}

/// Bartlett's test that `R` is an identity matrix:
/// `chi2 = -(n - 1 - (2p + 5)/6) ln|R|` with `p(p-1)/2` degrees of freedom.
pub fn bartlett_sphericity(correlations: &Array2<f64>, n_cases: usize) -> StatsResult<BartlettTest> {
    let p = correlations.nrows();
    if p < 2 {
        return Err(StatsError::InsufficientData(
            "Bartlett's test requires at least 2 variables".to_string(),
        ));
    }
    let det = linalg::determinant(correlations)?;
    if det <= 0.0 || !det.is_finite() {
        return Err(StatsError::SingularMatrix(format!(
            "determinant of the correlation matrix is {}",
            det
        )));
    }
    let multiplier = n_cases as f64 - 1.0 - (2.0 * p as f64 + 5.0) / 6.0;
    if multiplier <= 0.0 {
        return Err(StatsError::InsufficientData(format!(
            "{} cases are too few for Bartlett's test on {} variables",
            n_cases, p
        )));
    }
    let chi_square = -multiplier * det.ln();
    let df = p * (p - 1) / 2;
    let dist = ChiSquared::new(df as f64)
        .map_err(|e| StatsError::InvalidConfig(format!("chi-squared distribution: {}", e)))?;
    let significance = dist.sf(chi_square.max(0.0));
    debug!(
        "Bartlett's test: chi2 = {:.4}, df = {}, p = {:.4e}",
        chi_square, df, significance
    );
    Ok(BartlettTest {
        chi_square,
        df,
        significance,
    })
}

pub fn kmo_and_bartlett(correlations: &Array2<f64>, n_cases: usize) -> StatsResult<KmoBartlett> {
    Ok(KmoBartlett {
        kmo: kmo(correlations)?,
        bartlett: bartlett_sphericity(correlations, n_cases)?,
    })
}
