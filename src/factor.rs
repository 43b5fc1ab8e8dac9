// src/factor.rs

//! Factor analysis: principal components and principal axis factoring,
//! with the optional diagnostic tables the procedure can report.

use crate::data::{extract_data_matrix, CaseFilter, Dataset, ExtractedData, MissingValueStrategy};
use crate::error::{StatsError, StatsResult};
use crate::kmo::{self, KmoBartlett};
use crate::linalg::{self, symmetric_eigen};
use crate::matrix::{
    self, analysis_matrix, AntiImageMatrices, DescriptiveStatistic, LabelledMatrix, MatrixKind,
};
use crate::rotation::{self, RotationConfig};
use crate::scores::{self, FactorModel, FactorScores, ScoresConfig};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Off-diagonal residuals larger than this are counted in the reproduced-correlation summary.
const RESIDUAL_REPORT_THRESHOLD: f64 = 0.05;

// --- Configuration ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DescriptivesConfig {
    pub univariate: bool,
    /// Report every component's initial eigenvalue, not just the extracted ones.
    pub initial_solution: bool,
    pub coefficients: bool,
    pub significance_levels: bool,
    pub determinant: bool,
    pub kmo_bartlett: bool,
    pub inverse: bool,
    pub reproduced: bool,
    pub anti_image: bool,
}

impl Default for DescriptivesConfig {
    fn default() -> Self {
        DescriptivesConfig {
            univariate: false,
            initial_solution: true,
            coefficients: false,
            significance_levels: false,
            determinant: false,
            kmo_bartlett: false,
            inverse: false,
            reproduced: false,
            anti_image: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    #[default]
    PrincipalComponents,
    PrincipalAxisFactoring,
}

/// How many factors to keep.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ExtractionCriterion {
    /// Keep factors whose initial eigenvalue exceeds `min` times the mean
    /// eigenvalue (the mean is 1 for correlation matrices).
    Eigenvalue { min: f64 },
    Factors { count: usize },
}

impl Default for ExtractionCriterion {
    fn default() -> Self {
        ExtractionCriterion::Eigenvalue { min: 1.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub method: ExtractionMethod,
    pub analyze: MatrixKind,
    pub criterion: ExtractionCriterion,
    /// Iteration cap for principal axis factoring.
    pub max_iterations: usize,
    /// Largest change in any communality accepted as converged.
    pub convergence: f64,
    pub scree_plot: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            method: ExtractionMethod::PrincipalComponents,
            analyze: MatrixKind::Correlation,
            criterion: ExtractionCriterion::default(),
            max_iterations: 25,
            convergence: 0.001,
            scree_plot: false,
        }
    }
}

/// Everything the factor analysis dialog posts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactorAnalysisConfig {
    pub variables: Vec<String>,
    pub selection: Option<CaseFilter>,
    pub missing: MissingValueStrategy,
    pub descriptives: DescriptivesConfig,
    pub extraction: ExtractionConfig,
    pub rotation: RotationConfig,
    pub scores: ScoresConfig,
}

impl FactorAnalysisConfig {
    pub fn new(variables: Vec<String>) -> Self {
        FactorAnalysisConfig {
            variables,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> StatsResult<Self> {
        let config: FactorAnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StatsResult<()> {
        if self.variables.len() < 2 {
            return Err(StatsError::InvalidConfig(
                "factor analysis needs at least 2 variables".to_string(),
            ));
        }
        match self.extraction.criterion {
            ExtractionCriterion::Eigenvalue { min } if !(min.is_finite() && min >= 0.0) => {
                return Err(StatsError::InvalidConfig(format!(
                    "eigenvalue threshold must be a non-negative number, got {}",
                    min
                )));
            }
            ExtractionCriterion::Factors { count } if count == 0 || count > self.variables.len() => {
                return Err(StatsError::InvalidConfig(format!(
                    "number of factors must be between 1 and {}, got {}",
                    self.variables.len(),
                    count
                )));
            }
            _ => {}
        }
        if self.extraction.method == ExtractionMethod::PrincipalAxisFactoring
            && self.extraction.analyze == MatrixKind::Covariance
        {
            return Err(StatsError::InvalidConfig(
                "principal axis factoring can only analyse the correlation matrix".to_string(),
            ));
        }
        if self.extraction.max_iterations == 0 || self.rotation.max_iterations == 0 {
            return Err(StatsError::InvalidConfig(
                "maximum iterations must be greater than 0".to_string(),
            ));
        }
        if !(self.extraction.convergence > 0.0) {
            return Err(StatsError::InvalidConfig(
                "convergence criterion must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// --- Result tables ---

/// Loadings (or coefficients) labelled by variable rows and factor columns.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LabelledLoadings {
    pub variables: Vec<String>,
    pub factors: Vec<String>,
    /// Shape: (n_variables, n_factors)
    pub values: Array2<f64>,
}

impl LabelledLoadings {
    fn new(variables: &[String], values: Array2<f64>) -> Self {
        let factors = (1..=values.ncols()).map(|k| k.to_string()).collect();
        Self {
            variables: variables.to_vec(),
            factors,
            values,
        }
    }

    pub fn get(&self, variable: &str, factor: usize) -> Option<f64> {
        let row = self.variables.iter().position(|v| v == variable)?;
        (factor < self.values.ncols()).then(|| self.values[[row, factor]])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Communality {
    pub variable: String,
    pub initial: f64,
    pub extraction: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct VarianceRow {
    pub total: f64,
    pub percent_of_variance: f64,
    pub cumulative_percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VarianceExplained {
    /// 1-based component number.
    pub component: usize,
    pub initial: VarianceRow,
    pub extraction: Option<VarianceRow>,
    pub rotation: Option<VarianceRow>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReproducedCorrelations {
    /// `L L'` with the extracted communalities on the diagonal.
    pub reproduced: LabelledMatrix,
    /// Observed minus reproduced; the diagonal is zero.
    pub residuals: LabelledMatrix,
    pub nonredundant_residuals_above_threshold: usize,
    pub nonredundant_residual_count: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScreePoint {
    pub component: usize,
    pub eigenvalue: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RotatedSolution {
    pub loadings: LabelledLoadings,
    pub transformation: Array2<f64>,
    pub iterations: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FactorAnalysisResult {
    pub method: ExtractionMethod,
    pub analyzed: MatrixKind,
    /// Cases used (smallest pairwise N under pairwise deletion).
    pub analysis_n: usize,
    pub descriptives: Option<Vec<DescriptiveStatistic>>,
    pub correlation: Option<LabelledMatrix>,
    pub significance: Option<LabelledMatrix>,
    pub determinant: Option<f64>,
    pub inverse: Option<LabelledMatrix>,
    pub kmo_bartlett: Option<KmoBartlett>,
    pub anti_image: Option<AntiImageMatrices>,
    pub communalities: Vec<Communality>,
    pub total_variance_explained: Vec<VarianceExplained>,
    pub scree: Option<Vec<ScreePoint>>,
    pub component_matrix: LabelledLoadings,
    /// Loadings divided by each variable's standard deviation (covariance analyses only).
    pub rescaled_component_matrix: Option<LabelledLoadings>,
    pub extraction_iterations: usize,
    pub rotated: Option<RotatedSolution>,
    pub reproduced: Option<ReproducedCorrelations>,
    pub score_coefficients: Option<LabelledLoadings>,
    pub scores: Option<FactorScores>,
    pub model: Option<FactorModel>,
}

impl FactorAnalysisResult {
    pub fn n_factors(&self) -> usize {
        self.component_matrix.values.ncols()
    }

    /// Rotated loadings when a rotation was applied, unrotated otherwise.
    pub fn final_loadings(&self) -> &LabelledLoadings {
        self.rotated
            .as_ref()
            .map_or(&self.component_matrix, |r| &r.loadings)
    }
}

// --- Extraction ---

/// Unrotated factor solution.
#[derive(Clone, Debug)]
pub struct Extraction {
    /// Shape: (n_variables, n_factors)
    pub loadings: Array2<f64>,
    pub initial_communalities: Array1<f64>,
    pub communalities: Array1<f64>,
    /// Column sums of squared loadings.
    pub sums_of_squared_loadings: Array1<f64>,
    pub iterations: usize,
}

fn loadings_from_eigen(vectors: &Array2<f64>, values: &Array1<f64>, n_factors: usize) -> Array2<f64> {
    let mut loadings = vectors.slice(s![.., ..n_factors]).to_owned();
    for (mut col, &val) in loadings.axis_iter_mut(Axis(1)).zip(values.iter()) {
        let root = val.max(0.0).sqrt();
        // Reflect so each factor's loadings sum to a non-negative value.
        let sign = if col.sum() < 0.0 { -1.0 } else { 1.0 };
        col.mapv_inplace(|v| sign * v * root);
    }
    loadings
}

fn column_sums_of_squares(loadings: &Array2<f64>) -> Array1<f64> {
    loadings.map_axis(Axis(0), |col| col.dot(&col))
}

fn row_sums_of_squares(loadings: &Array2<f64>) -> Array1<f64> {
    loadings.map_axis(Axis(1), |row| row.dot(&row))
}

/// Principal components of `analysed`: loadings `v_k sqrt(lambda_k)` for the
/// first `n_factors` eigenpairs.
pub fn extract_principal_components(analysed: &Array2<f64>, n_factors: usize) -> StatsResult<Extraction> {
    let eigen = symmetric_eigen(analysed)?;
    let loadings = loadings_from_eigen(&eigen.vectors, &eigen.values, n_factors);
    Ok(Extraction {
        initial_communalities: analysed.diag().to_owned(),
        communalities: row_sums_of_squares(&loadings),
        sums_of_squared_loadings: column_sums_of_squares(&loadings),
        loadings,
        iterations: 0,
    })
}

/// Squared multiple correlation of each variable with all others, `1 - 1/q_ii`.
/// Falls back to each variable's largest absolute correlation when `R` is singular.
pub fn squared_multiple_correlations(correlations: &Array2<f64>) -> StatsResult<Array1<f64>> {
    match linalg::inverse(correlations) {
        Ok(inverse) => {
            let smc = inverse.diag().mapv(|q| 1.0 - 1.0 / q);
            if smc.iter().all(|v| v.is_finite() && *v >= 0.0) {
                return Ok(smc);
            }
        }
        Err(StatsError::SingularMatrix(_)) => {}
        Err(e) => return Err(e),
    }
    warn!("Correlation matrix is not invertible; initial communalities use the largest absolute correlations.");
    let p = correlations.nrows();
    Ok(Array1::from_shape_fn(p, |i| {
        (0..p)
            .filter(|&j| j != i)
            .map(|j| correlations[[i, j]].abs())
            .fold(0.0, f64::max)
    }))
}

/// Iterated principal axis factoring on the correlation matrix.
pub fn extract_principal_axis(
    correlations: &Array2<f64>,
    n_factors: usize,
    max_iterations: usize,
    convergence: f64,
) -> StatsResult<Extraction> {
    let initial = squared_multiple_correlations(correlations)?;
    let mut communalities = initial.clone();
    let mut reduced = correlations.clone();

    for iteration in 1..=max_iterations {
        reduced.diag_mut().assign(&communalities);
        let eigen = symmetric_eigen(&reduced)?;
        let loadings = loadings_from_eigen(&eigen.vectors, &eigen.values, n_factors);
        let updated = row_sums_of_squares(&loadings);
        let change = updated
            .iter()
            .zip(communalities.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        communalities = updated;
        debug!("Principal axis iteration {}: max communality change {:.6}", iteration, change);

        if change < convergence {
            if communalities.iter().any(|&h| h > 1.0) {
                warn!("One or more communality estimates exceed 1 (Heywood case).");
            }
            info!("Principal axis factoring converged after {} iterations.", iteration);
            return Ok(Extraction {
                sums_of_squared_loadings: column_sums_of_squares(&loadings),
                initial_communalities: initial,
                communalities,
                loadings,
                iterations: iteration,
            });
        }
    }
    Err(StatsError::NotConverged {
        procedure: "principal axis factoring",
        iterations: max_iterations,
    })
}

/// Number of factors retained under `criterion` given the initial eigenvalues.
pub fn retained_factor_count(eigenvalues: &Array1<f64>, criterion: ExtractionCriterion) -> usize {
    match criterion {
        ExtractionCriterion::Eigenvalue { min } => {
            let mean = eigenvalues.mean().unwrap_or(0.0);
            let threshold = min * mean;
            eigenvalues.iter().filter(|&&v| v > threshold).count()
        }
        ExtractionCriterion::Factors { count } => count.min(eigenvalues.len()),
    }
}

fn variance_rows(totals: &Array1<f64>, total_variance: f64) -> Vec<VarianceRow> {
    let mut cumulative = 0.0;
    totals
        .iter()
        .map(|&total| {
            let percent = 100.0 * total / total_variance;
            cumulative += percent;
            VarianceRow {
                total,
                percent_of_variance: percent,
                cumulative_percent: cumulative,
            }
        })
        .collect()
}

fn reproduced_correlations(
    analysed: &Array2<f64>,
    loadings: &Array2<f64>,
    names: &[String],
) -> StatsResult<ReproducedCorrelations> {
    let reproduced = loadings.dot(&loadings.t());
    let mut residuals = analysed - &reproduced;
    residuals.diag_mut().fill(0.0);
    let p = analysed.nrows();
    let mut above = 0;
    for i in 0..p {
        for j in (i + 1)..p {
            if residuals[[i, j]].abs() > RESIDUAL_REPORT_THRESHOLD {
                above += 1;
            }
        }
    }
    Ok(ReproducedCorrelations {
        reproduced: LabelledMatrix::new(names.to_vec(), reproduced)?,
        residuals: LabelledMatrix::new(names.to_vec(), residuals)?,
        nonredundant_residuals_above_threshold: above,
        nonredundant_residual_count: p * (p - 1) / 2,
    })
}

/// Runs an optional table, turning singular-matrix and too-few-cases failures
/// into an absent table with a warning.
fn optional_table<T>(name: &str, table: StatsResult<T>) -> StatsResult<Option<T>> {
    match table {
        Ok(t) => Ok(Some(t)),
        Err(StatsError::SingularMatrix(reason)) | Err(StatsError::InsufficientData(reason)) => {
            warn!("{} is not available: {}", name, reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn standardizing_scale(analyzed: MatrixKind, stats: &[DescriptiveStatistic]) -> Array1<f64> {
    match analyzed {
        MatrixKind::Correlation => stats.iter().map(|s| s.std_deviation).collect(),
        MatrixKind::Covariance => Array1::ones(stats.len()),
    }
}

/// Runs the factor analysis procedure on `dataset`.
pub fn run_factor_analysis(dataset: &Dataset, config: &FactorAnalysisConfig) -> StatsResult<FactorAnalysisResult> {
    config.validate()?;
    info!(
        "Starting factor analysis: {} variables, method {:?}, rotation {:?}.",
        config.variables.len(),
        config.extraction.method,
        config.rotation.method
    );
    let extracted = extract_data_matrix(
        dataset,
        &config.variables,
        config.selection.as_ref(),
        config.missing,
    )?;
    let result = analyze_extracted(dataset, &extracted, config)?;
    info!(
        "Factor analysis finished: {} factor(s) extracted from {} cases.",
        result.n_factors(),
        result.analysis_n
    );
    Ok(result)
}

fn analyze_extracted(
    dataset: &Dataset,
    extracted: &ExtractedData,
    config: &FactorAnalysisConfig,
) -> StatsResult<FactorAnalysisResult> {
    let names = &extracted.names;
    let p = names.len();
    let descriptives = &config.descriptives;
    let extraction_config = &config.extraction;

    let stats = matrix::descriptive_statistics(extracted)?;
    let (correlations, pair_counts) = analysis_matrix(extracted, MatrixKind::Correlation)?;
    let analysed = match extraction_config.analyze {
        MatrixKind::Correlation => correlations.clone(),
        MatrixKind::Covariance => analysis_matrix(extracted, MatrixKind::Covariance)?.0,
    };
    let analysis_n = pair_counts.iter().copied().min().unwrap_or(0);

    let correlation_table = if descriptives.coefficients {
        Some(LabelledMatrix::new(names.clone(), correlations.clone())?)
    } else {
        None
    };
    let significance = if descriptives.significance_levels {
        let sig = matrix::correlation_significance(&correlations, &pair_counts)?;
        Some(LabelledMatrix::new(names.clone(), sig)?)
    } else {
        None
    };
    let determinant = if descriptives.determinant {
        Some(linalg::determinant(&correlations)?)
    } else {
        None
    };
    let inverse = if descriptives.inverse {
        optional_table(
            "Inverse of correlation matrix",
            linalg::inverse(&correlations).and_then(|inv| LabelledMatrix::new(names.clone(), inv)),
        )?
    } else {
        None
    };
    let kmo_bartlett = if descriptives.kmo_bartlett {
        optional_table(
            "KMO and Bartlett's test",
            kmo::kmo_and_bartlett(&correlations, analysis_n),
        )?
    } else {
        None
    };
    let anti_image = if descriptives.anti_image {
        optional_table(
            "Anti-image matrices",
            matrix::anti_image_matrices(&correlations, names),
        )?
    } else {
        None
    };

    // Initial solution.
    let initial_eigen = symmetric_eigen(&analysed)?;
    let n_factors = retained_factor_count(&initial_eigen.values, extraction_config.criterion);
    if n_factors == 0 {
        return Err(StatsError::InsufficientData(
            "no factors meet the extraction criterion".to_string(),
        ));
    }
    debug!("Retaining {} of {} factors.", n_factors, p);

    let extraction = match extraction_config.method {
        ExtractionMethod::PrincipalComponents => extract_principal_components(&analysed, n_factors)?,
        ExtractionMethod::PrincipalAxisFactoring => extract_principal_axis(
            &correlations,
            n_factors,
            extraction_config.max_iterations,
            extraction_config.convergence,
        )?,
    };

    let total_variance = analysed.diag().sum();
    let initial_rows = variance_rows(&initial_eigen.values, total_variance);
    let extraction_rows = variance_rows(&extraction.sums_of_squared_loadings, total_variance);

    // Rotation.
    let rotated = rotation::rotate(&extraction.loadings, &config.rotation)?;
    let rotation_rows = rotated
        .as_ref()
        .map(|r| variance_rows(&column_sums_of_squares(&r.loadings), total_variance));

    let reported_components = if descriptives.initial_solution { p } else { n_factors };
    let total_variance_explained = initial_rows
        .iter()
        .take(reported_components)
        .enumerate()
        .map(|(k, &initial)| VarianceExplained {
            component: k + 1,
            initial,
            extraction: extraction_rows.get(k).copied(),
            rotation: rotation_rows.as_ref().and_then(|rows| rows.get(k).copied()),
        })
        .collect();

    let communalities = names
        .iter()
        .enumerate()
        .map(|(i, name)| Communality {
            variable: name.clone(),
            initial: extraction.initial_communalities[i],
            extraction: extraction.communalities[i],
        })
        .collect();

    let scree = extraction_config.scree_plot.then(|| {
        initial_eigen
            .values
            .iter()
            .enumerate()
            .map(|(k, &eigenvalue)| ScreePoint {
                component: k + 1,
                eigenvalue,
            })
            .collect()
    });

    let rescaled_component_matrix = match extraction_config.analyze {
        MatrixKind::Covariance => {
            let mut rescaled = extraction.loadings.clone();
            for (mut row, stat) in rescaled.axis_iter_mut(Axis(0)).zip(stats.iter()) {
                if stat.std_deviation > 0.0 {
                    row.mapv_inplace(|v| v / stat.std_deviation);
                }
            }
            Some(LabelledLoadings::new(names, rescaled))
        }
        MatrixKind::Correlation => None,
    };

    let reproduced = if descriptives.reproduced {
        Some(reproduced_correlations(&analysed, &extraction.loadings, names)?)
    } else {
        None
    };

    // Scores and the persisted model use the final (rotated if available) loadings.
    let final_loadings = rotated
        .as_ref()
        .map_or(&extraction.loadings, |r| &r.loadings);
    let scores_wanted = config.scores.save || config.scores.display_coefficients;
    let coefficients = match scores::score_coefficients(&analysed, final_loadings, config.scores.method) {
        Ok(b) => Some(b),
        Err(e) if !scores_wanted => {
            debug!("Score coefficients unavailable: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    let model = match coefficients.as_ref() {
        Some(b) => Some(FactorModel::new(
            names.clone(),
            stats.iter().map(|s| s.mean).collect(),
            standardizing_scale(extraction_config.analyze, &stats),
            b.clone(),
            final_loadings.clone(),
        )?),
        None => None,
    };

    let scores = match (&model, config.scores.save) {
        (Some(model), true) => Some(FactorScores {
            variable_names: scores::score_variable_names(dataset, n_factors),
            values: model.score_cases(extracted, dataset.n_cases())?,
        }),
        _ => None,
    };
    let score_coefficients = if config.scores.display_coefficients {
        coefficients.map(|b| LabelledLoadings::new(names, b))
    } else {
        None
    };

    Ok(FactorAnalysisResult {
        method: extraction_config.method,
        analyzed: extraction_config.analyze,
        analysis_n,
        descriptives: descriptives.univariate.then_some(stats),
        correlation: correlation_table,
        significance,
        determinant,
        inverse,
        kmo_bartlett,
        anti_image,
        communalities,
        total_variance_explained,
        scree,
        component_matrix: LabelledLoadings::new(names, extraction.loadings),
        rescaled_component_matrix,
        extraction_iterations: extraction.iterations,
        rotated: rotated.map(|r| RotatedSolution {
            loadings: LabelledLoadings::new(names, r.loadings),
            transformation: r.transformation,
            iterations: r.iterations,
        }),
        reproduced,
        score_coefficients,
        scores,
        model,
    })
}
