// src/matrix.rs

use crate::data::ExtractedData;
use crate::error::{StatsError, StatsResult};
use crate::kmo;
use crate::linalg;
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatrixKind {
    #[default]
    Correlation,
    Covariance,
}

/// A square matrix whose rows and columns are labelled by variable names.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LabelledMatrix {
    pub variable_order: Vec<String>,
    pub values: Array2<f64>,
}

impl LabelledMatrix {
    pub fn new(variable_order: Vec<String>, values: Array2<f64>) -> StatsResult<Self> {
        let n = variable_order.len();
        if values.dim() != (n, n) {
            return Err(StatsError::InvalidConfig(format!(
                "Matrix dimensions {}x{} don't match variable count {}",
                values.nrows(),
                values.ncols(),
                n
            )));
        }
        Ok(Self { variable_order, values })
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.variable_order.iter().position(|v| v == name)
    }

    /// Looks up the cell for the (`row`, `col`) variable pair.
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        Some(self.values[[self.index_of(row)?, self.index_of(col)?]])
    }
}

/// Univariate statistics of one analysed variable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DescriptiveStatistic {
    pub variable: String,
    pub mean: f64,
    pub std_deviation: f64,
    pub analysis_n: usize,
}

/// Pearson correlation or covariance (divisor n-1) of the columns of `data`.
///
/// A column without variation has correlation 1 with itself and 0 with
/// every other column.
pub fn calculate_matrix(data: ArrayView2<f64>, kind: MatrixKind) -> StatsResult<Array2<f64>> {
    let (n_rows, n_cols) = data.dim();
    if n_rows < 2 {
        return Err(StatsError::InsufficientData(
            "Not enough data to calculate matrix".to_string(),
        ));
    }

    let means = data
        .mean_axis(Axis(0))
        .ok_or_else(|| StatsError::InsufficientData("Failed to compute column means.".to_string()))?;
    let centered = &data - &means;
    let sum_sq: Array1<f64> = centered.map_axis(Axis(0), |col| col.dot(&col));

    let rows: Vec<Vec<f64>> = (0..n_cols)
        .into_par_iter()
        .map(|i| {
            let col_i = centered.column(i);
            (0..n_cols)
                .map(|j| {
                    let sum_xy = col_i.dot(&centered.column(j));
                    match kind {
                        MatrixKind::Correlation => {
                            let denominator = (sum_sq[i] * sum_sq[j]).sqrt();
                            if denominator > 0.0 {
                                (sum_xy / denominator).clamp(-1.0, 1.0)
                            } else if i == j {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        MatrixKind::Covariance => sum_xy / (n_rows - 1) as f64,
                    }
                })
                .collect()
        })
        .collect();

    let constant: Vec<usize> = (0..n_cols).filter(|&j| sum_sq[j] <= 0.0).collect();
    if !constant.is_empty() {
        warn!("Columns {:?} have zero variance.", constant);
    }

    let mut result = Array2::zeros((n_cols, n_cols));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            result[[i, j]] = v;
        }
    }
    // Exact symmetry regardless of summation order.
    for i in 0..n_cols {
        for j in (i + 1)..n_cols {
            let avg = 0.5 * (result[[i, j]] + result[[j, i]]);
            result[[i, j]] = avg;
            result[[j, i]] = avg;
        }
    }
    debug!("Computed {:?} matrix of {} variables from {} cases.", kind, n_cols, n_rows);
    Ok(result)
}

/// Pairwise-deletion version of [`calculate_matrix`]. Each cell uses the cases
/// valid for both variables, with means taken over those cases.
/// Returns the matrix and the per-pair case counts.
pub fn calculate_pairwise_matrix(
    data: ArrayView2<f64>,
    valid_mask: ArrayView2<bool>,
    kind: MatrixKind,
) -> StatsResult<(Array2<f64>, Array2<usize>)> {
    if data.dim() != valid_mask.dim() {
        return Err(StatsError::InvalidConfig(
            "validity mask does not match the data matrix".to_string(),
        ));
    }
    let n_cols = data.ncols();

    let cells: Vec<Vec<(f64, usize)>> = (0..n_cols)
        .into_par_iter()
        .map(|i| {
            (0..n_cols)
                .map(|j| {
                    let pairs: Vec<(f64, f64)> = (0..data.nrows())
                        .filter(|&k| valid_mask[[k, i]] && valid_mask[[k, j]])
                        .map(|k| (data[[k, i]], data[[k, j]]))
                        .collect();
                    let n = pairs.len();
                    if n < 2 {
                        return (f64::NAN, n);
                    }
                    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
                    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
                    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
                    for &(x, y) in &pairs {
                        let dx = x - mean_x;
                        let dy = y - mean_y;
                        sxy += dx * dy;
                        sxx += dx * dx;
                        syy += dy * dy;
                    }
                    let value = match kind {
                        MatrixKind::Correlation => {
                            let denominator = (sxx * syy).sqrt();
                            if denominator > 0.0 {
                                (sxy / denominator).clamp(-1.0, 1.0)
                            } else if i == j {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        MatrixKind::Covariance => sxy / (n - 1) as f64,
                    };
                    (value, n)
                })
                .collect()
        })
        .collect();

    let mut matrix = Array2::zeros((n_cols, n_cols));
    let mut counts = Array2::zeros((n_cols, n_cols));
    for (i, row) in cells.into_iter().enumerate() {
        for (j, (value, n)) in row.into_iter().enumerate() {
            if n < 2 {
                return Err(StatsError::InsufficientData(format!(
                    "only {} case(s) are valid for variable pair ({}, {})",
                    n, i, j
                )));
            }
            matrix[[i, j]] = value;
            counts[[i, j]] = n;
        }
    }
    Ok((matrix, counts))
}

/// Computes the analysed matrix for an extraction, dispatching on the
/// missing-value layout. Returns the matrix and per-pair N.
pub fn analysis_matrix(
    extracted: &ExtractedData,
    kind: MatrixKind,
) -> StatsResult<(Array2<f64>, Array2<usize>)> {
    match &extracted.valid_mask {
        Some(mask) => calculate_pairwise_matrix(extracted.matrix.view(), mask.view(), kind),
        None => {
            let p = extracted.n_variables();
            let m = calculate_matrix(extracted.matrix.view(), kind)?;
            Ok((m, Array2::from_elem((p, p), extracted.n_cases())))
        }
    }
}

/// Mean, standard deviation (divisor n-1) and valid N of each variable.
pub fn descriptive_statistics(extracted: &ExtractedData) -> StatsResult<Vec<DescriptiveStatistic>> {
    let mut stats = Vec::with_capacity(extracted.n_variables());
    for (j, name) in extracted.names.iter().enumerate() {
        let column = extracted.matrix.column(j);
        let values: Vec<f64> = match &extracted.valid_mask {
            Some(mask) => column
                .iter()
                .zip(mask.column(j).iter())
                .filter(|(_, ok)| **ok)
                .map(|(&v, _)| v)
                .collect(),
            None => column.to_vec(),
        };
        let n = values.len();
        if n < 2 {
            return Err(StatsError::InsufficientData(format!(
                "variable '{}' has fewer than 2 valid cases",
                name
            )));
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        stats.push(DescriptiveStatistic {
            variable: name.clone(),
            mean,
            std_deviation: variance.sqrt(),
            analysis_n: n,
        });
    }
    Ok(stats)
}

/// One-tailed significance of each correlation coefficient,
/// `t = r sqrt((n-2)/(1-r^2))` on `n-2` degrees of freedom. The diagonal is 0.
pub fn correlation_significance(
    correlations: &Array2<f64>,
    pair_counts: &Array2<usize>,
) -> StatsResult<Array2<f64>> {
    let p = correlations.nrows();
    let mut sig = Array2::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            if i == j {
                continue;
            }
            let n = pair_counts[[i, j]];
            if n < 3 {
                sig[[i, j]] = f64::NAN;
                continue;
            }
            let df = (n - 2) as f64;
            let r = correlations[[i, j]];
            let one_minus_r2 = 1.0 - r * r;
            sig[[i, j]] = if one_minus_r2 <= f64::EPSILON {
                0.0
            } else {
                let t = r.abs() * (df / one_minus_r2).sqrt();
                let dist = StudentsT::new(0.0, 1.0, df)
                    .map_err(|e| StatsError::InvalidConfig(format!("t distribution: {}", e)))?;
                dist.sf(t)
            };
        }
    }
    Ok(sig)
}

/// Anti-image covariance and correlation matrices derived from `R^-1`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AntiImageMatrices {
    pub anti_image_covariance: LabelledMatrix,
    /// Off-diagonal: negated partial correlations. Diagonal: measure of sampling adequacy.
    pub anti_image_correlation: LabelledMatrix,
}

pub fn anti_image_matrices(
    correlations: &Array2<f64>,
    names: &[String],
) -> StatsResult<AntiImageMatrices> {
    let inverse = linalg::inverse(correlations)?;
    let adequacy = kmo::kmo(correlations)?;
    let p = correlations.nrows();

    let mut covariance = Array2::zeros((p, p));
    let mut correlation = Array2::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            let (qii, qjj, qij) = (inverse[[i, i]], inverse[[j, j]], inverse[[i, j]]);
            if i == j {
                covariance[[i, j]] = 1.0 / qii;
                correlation[[i, j]] = adequacy.per_variable[i];
            } else {
                covariance[[i, j]] = -qij / (qii * qjj);
                correlation[[i, j]] = -qij / (qii * qjj).sqrt();
            }
        }
    }
    Ok(AntiImageMatrices {
        anti_image_covariance: LabelledMatrix::new(names.to_vec(), covariance)?,
        anti_image_correlation: LabelledMatrix::new(names.to_vec(), correlation)?,
    })
}
