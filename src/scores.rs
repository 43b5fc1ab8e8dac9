// src/scores.rs

//! Factor score coefficients, case scores and the persisted factor model.

use crate::data::{Dataset, ExtractedData};
use crate::error::{StatsError, StatsResult};
use crate::linalg;
use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Uniquenesses below this make Bartlett scores undefined.
const MIN_UNIQUENESS: f64 = 1e-8;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMethod {
    #[default]
    Regression,
    Bartlett,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoresConfig {
    /// Save scores as new variables.
    pub save: bool,
    pub method: ScoreMethod,
    /// Report the factor score coefficient matrix.
    pub display_coefficients: bool,
}

/// Score coefficient matrix `B` (shape (n_variables, n_factors)) such that
/// scores = standardized data . B.
///
/// * Regression: `B = A^-1 L`, `A` the analysed matrix.
/// * Bartlett: `B = U^-2 L (L' U^-2 L)^-1` with `U^2 = diag(a_ii - h_i^2)`.
pub fn score_coefficients(
    analysed: &Array2<f64>,
    loadings: &Array2<f64>,
    method: ScoreMethod,
) -> StatsResult<Array2<f64>> {
    if analysed.nrows() != loadings.nrows() {
        return Err(StatsError::InvalidConfig(format!(
            "loadings have {} rows but the analysed matrix has {} variables",
            loadings.nrows(),
            analysed.nrows()
        )));
    }
    match method {
        ScoreMethod::Regression => {
            linalg::solve(analysed, loadings)
        }
        ScoreMethod::Bartlett => {
            let communalities = loadings.map_axis(Axis(1), |row| row.dot(&row));
            let mut weighted = loadings.clone();
            for (i, mut row) in weighted.axis_iter_mut(Axis(0)).enumerate() {
                let uniqueness = analysed[[i, i]] - communalities[i];
                if uniqueness < MIN_UNIQUENESS {
                    return Err(StatsError::SingularMatrix(format!(
                        "variable {} has zero uniqueness; Bartlett scores are undefined",
                        i
                    )));
                }
                row.mapv_inplace(|v| v / uniqueness);
            }
            let inner = loadings.t().dot(&weighted);
            let inner_inv = linalg::inverse(&inner)?;
            Ok(weighted.dot(&inner_inv))
        }
    }
}

/// Names for `n_factors` new score variables, `FAC{k}_{s}` with the smallest
/// suffix `s` that clashes with nothing in `dataset`.
pub fn score_variable_names(dataset: &Dataset, n_factors: usize) -> Vec<String> {
    let mut suffix = 1;
    loop {
        let names: Vec<String> = (1..=n_factors)
            .map(|k| format!("FAC{}_{}", k, suffix))
            .collect();
        if names.iter().all(|n| !dataset.contains(n)) {
            return names;
        }
        suffix += 1;
    }
}

/// Saved factor scores, one column per factor aligned with the dataset's cases.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FactorScores {
    pub variable_names: Vec<String>,
    /// `values[k][case]`; `None` for cases not used in the analysis.
    pub values: Vec<Vec<Option<f64>>>,
}

/// Persistable factor solution able to score new data.
///
/// Decoding (JSON or bincode) runs the same dimension and scale checks as
/// `load_model`, so a decoded model can always `transform`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawFactorModel")]
pub struct FactorModel {
    /// Analysed variables in column order.
    variables: Vec<String>,
    /// Shape: (n_variables)
    mean: Array1<f64>,
    /// Positive divisor applied after centering; 1.0 for covariance analyses.
    /// Shape: (n_variables)
    scale: Array1<f64>,
    /// Shape: (n_variables, n_factors)
    coefficients: Array2<f64>,
    /// Shape: (n_variables, n_factors)
    loadings: Array2<f64>,
}

#[derive(Deserialize)]
struct RawFactorModel {
    variables: Vec<String>,
    mean: Array1<f64>,
    scale: Array1<f64>,
    coefficients: Array2<f64>,
    loadings: Array2<f64>,
}

impl TryFrom<RawFactorModel> for FactorModel {
    type Error = StatsError;

    fn try_from(raw: RawFactorModel) -> StatsResult<Self> {
        let model = FactorModel {
            variables: raw.variables,
            mean: raw.mean,
            scale: raw.scale,
            coefficients: raw.coefficients,
            loadings: raw.loadings,
        };
        model.check_consistency()?;
        Ok(model)
    }
}

impl FactorModel {
    /// Assembles a model. Non-finite or near-zero scale factors are replaced by 1.0.
    pub fn new(
        variables: Vec<String>,
        mean: Array1<f64>,
        raw_scale: Array1<f64>,
        coefficients: Array2<f64>,
        loadings: Array2<f64>,
    ) -> StatsResult<Self> {
        let p = variables.len();
        if mean.len() != p || raw_scale.len() != p || coefficients.nrows() != p || loadings.nrows() != p {
            return Err(StatsError::Model(format!(
                "feature dimensions of variables ({}), mean ({}), scale ({}), coefficients ({}) and loadings ({}) must match",
                p,
                mean.len(),
                raw_scale.len(),
                coefficients.nrows(),
                loadings.nrows()
            )));
        }
        if coefficients.ncols() != loadings.ncols() {
            return Err(StatsError::Model(
                "coefficients and loadings have different factor counts".to_string(),
            ));
        }
        let scale = raw_scale.mapv(|v| if v.is_finite() && v > 1e-9 { v } else { 1.0 });
        Ok(Self {
            variables,
            mean,
            scale,
            coefficients,
            loadings,
        })
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn loadings(&self) -> &Array2<f64> {
        &self.loadings
    }

    pub fn n_factors(&self) -> usize {
        self.coefficients.ncols()
    }

    /// Scores the rows of `x` (shape (m_samples, n_variables)); `x` is standardized in place.
    pub fn transform(&self, mut x: Array2<f64>) -> StatsResult<Array2<f64>> {
        if x.ncols() != self.variables.len() {
            return Err(StatsError::Model(format!(
                "Input data feature dimension ({}) does not match model's feature dimension ({}).",
                x.ncols(),
                self.variables.len()
            )));
        }
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, self.n_factors())));
        }
        for mut row in x.axis_iter_mut(Axis(0)) {
            ndarray::Zip::from(row.view_mut())
                .and(self.mean.view())
                .and(self.scale.view())
                .for_each(|val, &m, &s| {
                    *val = (*val - m) / s;
                });
        }
        Ok(x.dot(&self.coefficients))
    }

    /// Scores every case of `extracted` that has all analysed values valid and
    /// spreads the result over the `n_cases` rows of the source dataset.
    pub fn score_cases(&self, extracted: &ExtractedData, n_cases: usize) -> StatsResult<Vec<Vec<Option<f64>>>> {
        let scored = self.transform(extracted.matrix.clone())?;
        let mut values = vec![vec![None; n_cases]; self.n_factors()];
        for (row, &case) in extracted.case_indices.iter().enumerate() {
            let complete = extracted
                .valid_mask
                .as_ref()
                .map_or(true, |mask| mask.row(row).iter().all(|&ok| ok));
            if !complete {
                continue;
            }
            for (k, column) in values.iter_mut().enumerate() {
                column[case] = Some(scored[[row, k]]);
            }
        }
        Ok(values)
    }

    /// Saves the model to a file using bincode.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> StatsResult<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| StatsError::Model(format!("Failed to serialize factor model: {}", e)))?;
        info!("Saved factor model with {} factors to {:?}", self.n_factors(), path.as_ref());
        Ok(())
    }

    /// Loads a model saved with `save_model`, rejecting inconsistent dimensions
    /// and non-positive scale factors.
    pub fn load_model<P: AsRef<Path>>(path: P) -> StatsResult<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let model: FactorModel =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| StatsError::Model(format!("Failed to deserialize factor model: {}", e)))?;
        debug!(
            "Loaded factor model with {} variables and {} factors.",
            model.variables.len(),
            model.n_factors()
        );
        Ok(model)
    }

    fn check_consistency(&self) -> StatsResult<()> {
        let p = self.variables.len();
        if self.mean.len() != p
            || self.scale.len() != p
            || self.coefficients.nrows() != p
            || self.loadings.dim() != self.coefficients.dim()
        {
            return Err(StatsError::Model(format!(
                "factor model has inconsistent dimensions: variables={}, mean={}, scale={}, coefficients={:?}, loadings={:?}",
                p,
                self.mean.len(),
                self.scale.len(),
                self.coefficients.dim(),
                self.loadings.dim()
            )));
        }
        if self.scale.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(StatsError::Model(
                "factor model's scale vector contains non-finite, zero, or negative values.".to_string(),
            ));
        }
        Ok(())
    }
}
