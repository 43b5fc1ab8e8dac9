// src/data.rs

//! Column-oriented dataset and the extraction of analysis matrices from it.

use crate::error::{StatsError, StatsResult};
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single numeric variable (column) of a dataset.
///
/// `values` holds one entry per case. A value counts as missing when it is
/// `None`, not finite, or equal to one of the `user_missing` codes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub values: Vec<Option<f64>>,
    #[serde(default)]
    pub user_missing: Vec<f64>,
}

impl Variable {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            label: None,
            values,
            user_missing: Vec::new(),
        }
    }

    /// Builds a variable without missing values.
    pub fn from_values(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|&v| Some(v)).collect())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_user_missing(mut self, codes: Vec<f64>) -> Self {
        self.user_missing = codes;
        self
    }

    /// Returns the valid value of case `case`, or `None` if it is missing.
    pub fn valid_value(&self, case: usize) -> Option<f64> {
        let v = self.values.get(case).copied().flatten()?;
        if !v.is_finite() || self.user_missing.iter().any(|&code| code == v) {
            None
        } else {
            Some(v)
        }
    }

    /// Label if set, otherwise the name.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// A rectangular collection of variables sharing the same number of cases.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    variables: Vec<Variable>,
}

/// Wire form of a dataset; converted through `Dataset::new` so decoded data
/// obeys the same length and naming rules as data built in code.
#[derive(Deserialize)]
struct RawDataset {
    variables: Vec<Variable>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = StatsError;

    fn try_from(raw: RawDataset) -> StatsResult<Self> {
        Dataset::new(raw.variables)
    }
}

impl Dataset {
    /// Creates a dataset, checking that all variables have the same length
    /// and distinct names.
    pub fn new(variables: Vec<Variable>) -> StatsResult<Self> {
        let mut dataset = Dataset {
            variables: Vec::with_capacity(variables.len()),
        };
        for var in variables {
            dataset.add_variable(var)?;
        }
        Ok(dataset)
    }

    pub fn add_variable(&mut self, variable: Variable) -> StatsResult<()> {
        if self.variable(&variable.name).is_some() {
            return Err(StatsError::DuplicateVariable(variable.name));
        }
        if let Some(first) = self.variables.first() {
            if first.values.len() != variable.values.len() {
                return Err(StatsError::LengthMismatch {
                    name: variable.name,
                    expected: first.values.len(),
                    found: variable.values.len(),
                });
            }
        }
        self.variables.push(variable);
        Ok(())
    }

    pub fn n_cases(&self) -> usize {
        self.variables.first().map_or(0, |v| v.values.len())
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn require(&self, name: &str) -> StatsResult<&Variable> {
        self.variable(name)
            .ok_or_else(|| StatsError::UnknownVariable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variable(name).is_some()
    }

    /// Parses a dataset from its JSON form (`{"variables": [...]}`).
    pub fn from_json_str(json: &str) -> StatsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Restricts an analysis to cases whose selection variable equals `value`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CaseFilter {
    pub variable: String,
    pub value: f64,
}

impl CaseFilter {
    fn selected_cases(&self, dataset: &Dataset) -> StatsResult<Vec<usize>> {
        let var = dataset.require(&self.variable)?;
        Ok((0..dataset.n_cases())
            .filter(|&i| var.valid_value(i) == Some(self.value))
            .collect())
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingValueStrategy {
    /// Drop every case with a missing value in any analysed variable.
    #[default]
    Listwise,
    /// Keep each case; every pair of variables uses the cases valid for both.
    Pairwise,
    /// Substitute the variable's mean over its valid cases.
    ReplaceWithMean,
}

/// Matrix pulled out of a dataset for analysis.
#[derive(Clone, Debug)]
pub struct ExtractedData {
    /// Shape: (n_cases, n_variables). Missing cells are 0.0 under `Pairwise`.
    pub matrix: Array2<f64>,
    pub names: Vec<String>,
    /// Original dataset row of each matrix row.
    pub case_indices: Vec<usize>,
    /// `Some` only for `Pairwise`; `true` where the cell holds a valid value.
    pub valid_mask: Option<Array2<bool>>,
}

impl ExtractedData {
    pub fn n_cases(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_variables(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Extracts the analysis matrix for `names` from `dataset`.
///
/// The optional `filter` is applied first, then missing values are handled
/// according to `strategy`. At least two usable cases are required.
pub fn extract_data_matrix(
    dataset: &Dataset,
    names: &[String],
    filter: Option<&CaseFilter>,
    strategy: MissingValueStrategy,
) -> StatsResult<ExtractedData> {
    if names.is_empty() {
        return Err(StatsError::InvalidConfig(
            "no analysis variables were specified".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    let mut variables = Vec::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(StatsError::DuplicateVariable(name.clone()));
        }
        variables.push(dataset.require(name)?);
    }

    let candidates: Vec<usize> = match filter {
        Some(f) => f.selected_cases(dataset)?,
        None => (0..dataset.n_cases()).collect(),
    };

    let (case_indices, valid_mask) = match strategy {
        MissingValueStrategy::Listwise => {
            let kept: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&i| variables.iter().all(|v| v.valid_value(i).is_some()))
                .collect();
            let dropped = candidates.len() - kept.len();
            if dropped > 0 {
                debug!("Listwise deletion removed {} of {} cases.", dropped, candidates.len());
            }
            (kept, None)
        }
        MissingValueStrategy::Pairwise | MissingValueStrategy::ReplaceWithMean => {
            let kept: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&i| variables.iter().any(|v| v.valid_value(i).is_some()))
                .collect();
            let mask = Array2::from_shape_fn((kept.len(), variables.len()), |(r, c)| {
                variables[c].valid_value(kept[r]).is_some()
            });
            (kept, Some(mask))
        }
    };

    if case_indices.len() < 2 {
        return Err(StatsError::InsufficientData(format!(
            "{} valid case(s) remain after missing-value handling; at least 2 are required",
            case_indices.len()
        )));
    }

    let mut matrix = Array2::from_shape_fn((case_indices.len(), variables.len()), |(r, c)| {
        variables[c].valid_value(case_indices[r]).unwrap_or(0.0)
    });

    let valid_mask = match (strategy, valid_mask) {
        (MissingValueStrategy::ReplaceWithMean, Some(mask)) => {
            for (c, var) in variables.iter().enumerate() {
                let column_mask = mask.column(c);
                let n_valid = column_mask.iter().filter(|&&ok| ok).count();
                if n_valid == 0 {
                    return Err(StatsError::InsufficientData(format!(
                        "variable '{}' has no valid values",
                        var.name
                    )));
                }
                let mean = matrix
                    .column(c)
                    .iter()
                    .zip(column_mask.iter())
                    .filter(|(_, ok)| **ok)
                    .map(|(&v, _)| v)
                    .sum::<f64>()
                    / n_valid as f64;
                let replaced = column_mask.len() - n_valid;
                if replaced > 0 {
                    debug!("Replaced {} missing value(s) of '{}' with mean {:.4}.", replaced, var.name, mean);
                }
                for (cell, &ok) in matrix.column_mut(c).iter_mut().zip(column_mask.iter()) {
                    if !ok {
                        *cell = mean;
                    }
                }
            }
            None
        }
        (_, mask) => mask,
    };

    if dataset.n_cases() > 0 && case_indices.len() * 2 < candidates.len() {
        warn!(
            "Only {} of {} selected cases are usable for the analysis.",
            case_indices.len(),
            candidates.len()
        );
    }

    Ok(ExtractedData {
        matrix,
        names: names.to_vec(),
        case_indices,
        valid_mask,
    })
}
