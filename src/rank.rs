// src/rank.rs

//! Rank Cases: ordinal ranks and rank-derived scores for numeric variables,
//! optionally within groups defined by other variables.

use crate::data::{Dataset, Variable};
use crate::error::{StatsError, StatsResult};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::{HashMap, HashSet};

/// Longest variable name the dataset accepts.
const MAX_VARIABLE_NAME_LEN: usize = 64;

/// Which end of the ordering receives rank 1.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    #[default]
    Smallest,
    Largest,
}

/// Rank assigned to tied values.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieMethod {
    /// Average of the positions the ties occupy.
    #[default]
    Mean,
    Low,
    High,
    /// Consecutive integers over the distinct values.
    Condense,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProportionFormula {
    #[default]
    Blom,
    Tukey,
    Rankit,
    VanDerWaerden,
}

impl ProportionFormula {
    /// Proportion estimate for rank `r` among `w` cases.
    pub fn estimate(&self, r: f64, w: f64) -> f64 {
        match self {
            ProportionFormula::Blom => (r - 3.0 / 8.0) / (w + 0.25),
            ProportionFormula::Tukey => (r - 1.0 / 3.0) / (w + 1.0 / 3.0),
            ProportionFormula::Rankit => (r - 0.5) / w,
            ProportionFormula::VanDerWaerden => r / (w + 1.0),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProportionFormula::Blom => "Blom's Formula",
            ProportionFormula::Tukey => "Tukey's Formula",
            ProportionFormula::Rankit => "Rankit's Formula",
            ProportionFormula::VanDerWaerden => "Van der Waerden's Formula",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RankFunction {
    Rank,
    Savage,
    FractionalRank,
    FractionalRankPercent,
    SumOfCaseWeights,
    Ntiles { groups: usize },
    ProportionEstimate,
    NormalScore,
}

impl RankFunction {
    fn prefix(&self) -> &'static str {
        match self {
            RankFunction::Rank => "R",
            RankFunction::Savage => "S",
            RankFunction::FractionalRank => "RFR",
            RankFunction::FractionalRankPercent => "PER",
            RankFunction::SumOfCaseWeights => "N",
            RankFunction::Ntiles { .. } => "NTI",
            RankFunction::ProportionEstimate => "P",
            RankFunction::NormalScore => "N",
        }
    }

    fn fallback_prefix(&self) -> &'static str {
        match self {
            RankFunction::Rank => "RAN",
            RankFunction::Savage => "SAV",
            RankFunction::FractionalRank => "RFR",
            RankFunction::FractionalRankPercent => "PER",
            RankFunction::SumOfCaseWeights => "NWT",
            RankFunction::Ntiles { .. } => "NTI",
            RankFunction::ProportionEstimate => "PRO",
            RankFunction::NormalScore => "NOR",
        }
    }

    fn describe(&self) -> String {
        match self {
            RankFunction::Rank => "Rank".to_string(),
            RankFunction::Savage => "Savage Score".to_string(),
            RankFunction::FractionalRank => "Fractional Rank".to_string(),
            RankFunction::FractionalRankPercent => "Fractional Rank Percent".to_string(),
            RankFunction::SumOfCaseWeights => "Sum of Case Weights".to_string(),
            RankFunction::Ntiles { groups } => format!("Percentile Group ({} groups)", groups),
            RankFunction::ProportionEstimate => "Proportion Estimate".to_string(),
            RankFunction::NormalScore => "Normal Score".to_string(),
        }
    }

    fn uses_proportion_formula(&self) -> bool {
        matches!(self, RankFunction::ProportionEstimate | RankFunction::NormalScore)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankCasesConfig {
    pub variables: Vec<String>,
    /// Ranks are computed separately within each combination of these variables.
    pub by: Vec<String>,
    pub assign_rank_1: RankOrder,
    pub ties: TieMethod,
    pub functions: Vec<RankFunction>,
    pub proportion_formula: ProportionFormula,
    pub display_summary: bool,
}

impl Default for RankCasesConfig {
    fn default() -> Self {
        RankCasesConfig {
            variables: Vec::new(),
            by: Vec::new(),
            assign_rank_1: RankOrder::Smallest,
            ties: TieMethod::Mean,
            functions: vec![RankFunction::Rank],
            proportion_formula: ProportionFormula::Blom,
            display_summary: true,
        }
    }
}

impl RankCasesConfig {
    pub fn new(variables: Vec<String>) -> Self {
        RankCasesConfig {
            variables,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> StatsResult<Self> {
        let config: RankCasesConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StatsResult<()> {
        if self.variables.is_empty() {
            return Err(StatsError::InvalidConfig(
                "at least one variable must be ranked".to_string(),
            ));
        }
        if self.functions.is_empty() {
            return Err(StatsError::InvalidConfig(
                "at least one rank function must be selected".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.variables {
            if !seen.insert(name.as_str()) {
                return Err(StatsError::DuplicateVariable(name.clone()));
            }
        }
        if let Some(name) = self.by.iter().find(|b| seen.contains(b.as_str())) {
            return Err(StatsError::InvalidConfig(format!(
                "'{}' cannot be both ranked and used as a grouping variable",
                name
            )));
        }
        let mut functions_seen = HashSet::new();
        for function in &self.functions {
            if let RankFunction::Ntiles { groups } = function {
                if *groups < 2 {
                    return Err(StatsError::InvalidConfig(format!(
                        "Ntiles needs at least 2 groups, got {}",
                        groups
                    )));
                }
            }
            if !functions_seen.insert(*function) {
                return Err(StatsError::InvalidConfig(format!(
                    "rank function {:?} is selected more than once",
                    function
                )));
            }
        }
        Ok(())
    }
}

/// A new variable produced by the procedure.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RankedVariable {
    pub name: String,
    pub label: String,
    pub source: String,
    pub function: RankFunction,
    /// One entry per dataset case; `None` where the source or a grouping value is missing.
    pub values: Vec<Option<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RankSummaryRow {
    pub source_variable: String,
    pub function: String,
    pub new_variable: String,
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RankCasesResult {
    pub variables: Vec<RankedVariable>,
    pub summary: Option<Vec<RankSummaryRow>>,
}

impl RankCasesResult {
    /// Appends the new variables to `dataset`.
    pub fn apply_to(&self, dataset: &mut Dataset) -> StatsResult<()> {
        for ranked in &self.variables {
            dataset.add_variable(
                Variable::new(ranked.name.clone(), ranked.values.clone()).with_label(ranked.label.clone()),
            )?;
        }
        Ok(())
    }
}

/// Positions (1-based, inclusive) that one run of tied values occupies in the sorted order.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TieRun {
    first: usize,
    last: usize,
    /// 1-based index among distinct values.
    distinct: usize,
}

/// Rank of every value in `values` (same order as the input) under the tie method.
///
/// Rank 1 goes to the smallest value for `RankOrder::Smallest` and the largest
/// for `RankOrder::Largest`.
pub fn rank_values(values: &[f64], order: RankOrder, ties: TieMethod) -> Vec<f64> {
    let runs = tie_runs(values, order);
    runs.iter()
        .map(|run| match ties {
            TieMethod::Mean => (run.first + run.last) as f64 / 2.0,
            TieMethod::Low => run.first as f64,
            TieMethod::High => run.last as f64,
            TieMethod::Condense => run.distinct as f64,
        })
        .collect()
}

fn tie_runs(values: &[f64], order: RankOrder) -> Vec<TieRun> {
    let mut sorted: Vec<usize> = (0..values.len()).collect();
    sorted.sort_by(|&a, &b| {
        let cmp = values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal);
        match order {
            RankOrder::Smallest => cmp,
            RankOrder::Largest => cmp.reverse(),
        }
    });

    let mut runs = vec![
        TieRun {
            first: 0,
            last: 0,
            distinct: 0
        };
        values.len()
    ];
    let mut start = 0;
    let mut distinct = 0;
    while start < sorted.len() {
        let mut end = start;
        while end + 1 < sorted.len() && values[sorted[end + 1]] == values[sorted[start]] {
            end += 1;
        }
        distinct += 1;
        let run = TieRun {
            first: start + 1,
            last: end + 1,
            distinct,
        };
        for &idx in &sorted[start..=end] {
            runs[idx] = run;
        }
        start = end + 1;
    }
    runs
}

/// Savage score of sorted position `j` among `w` cases: `sum_{i<=j} 1/(w-i+1) - 1`.
fn savage_scores(w: usize) -> Vec<f64> {
    let mut scores = Vec::with_capacity(w);
    let mut acc = 0.0;
    for i in 1..=w {
        acc += 1.0 / (w - i + 1) as f64;
        scores.push(acc - 1.0);
    }
    scores
}

fn savage_for_run(run: &TieRun, ties: TieMethod, by_position: &[f64], by_distinct: &[f64]) -> f64 {
    match ties {
        TieMethod::Mean => {
            let span = &by_position[run.first - 1..run.last];
            span.iter().sum::<f64>() / span.len() as f64
        }
        TieMethod::Low => by_position[run.first - 1],
        TieMethod::High => by_position[run.last - 1],
        TieMethod::Condense => by_distinct[run.distinct - 1],
    }
}

/// Values of every requested function for one group of valid values.
fn group_functions(
    values: &[f64],
    config: &RankCasesConfig,
    normal: &Normal,
) -> Vec<Vec<f64>> {
    let w = values.len();
    let w_f = w as f64;
    let runs = tie_runs(values, config.assign_rank_1);
    let ranks = rank_values(values, config.assign_rank_1, config.ties);
    let formula = config.proportion_formula;

    config
        .functions
        .iter()
        .map(|function| match function {
            RankFunction::Rank => ranks.clone(),
            RankFunction::Savage => {
                let by_position = savage_scores(w);
                let n_distinct = runs.iter().map(|r| r.distinct).max().unwrap_or(0);
                let by_distinct = savage_scores(n_distinct);
                runs.iter()
                    .map(|run| savage_for_run(run, config.ties, &by_position, &by_distinct))
                    .collect()
            }
            RankFunction::FractionalRank => ranks.iter().map(|r| r / w_f).collect(),
            RankFunction::FractionalRankPercent => ranks.iter().map(|r| 100.0 * r / w_f).collect(),
            RankFunction::SumOfCaseWeights => vec![w_f; w],
            RankFunction::Ntiles { groups } => {
                let k = *groups as f64;
                ranks
                    .iter()
                    .map(|r| ((k * r / (w_f + 1.0)).floor() + 1.0).clamp(1.0, k))
                    .collect()
            }
            RankFunction::ProportionEstimate => ranks.iter().map(|&r| formula.estimate(r, w_f)).collect(),
            RankFunction::NormalScore => ranks
                .iter()
                .map(|&r| normal.inverse_cdf(formula.estimate(r, w_f)))
                .collect(),
        })
        .collect()
}

fn group_key(by: &[&Variable], case: usize) -> Option<Vec<u64>> {
    by.iter()
        .map(|v| v.valid_value(case).map(|x| if x == 0.0 { 0.0f64.to_bits() } else { x.to_bits() }))
        .collect()
}

/// Ranks one source variable; returns one value column per configured function.
fn rank_variable(
    dataset: &Dataset,
    source: &Variable,
    by: &[&Variable],
    config: &RankCasesConfig,
    normal: &Normal,
) -> Vec<Vec<Option<f64>>> {
    let n_cases = dataset.n_cases();
    let mut groups: HashMap<Vec<u64>, Vec<usize>> = HashMap::new();
    for case in 0..n_cases {
        if source.valid_value(case).is_none() {
            continue;
        }
        if let Some(key) = group_key(by, case) {
            groups.entry(key).or_default().push(case);
        }
    }

    let mut columns = vec![vec![None; n_cases]; config.functions.len()];
    for cases in groups.values() {
        let values: Vec<f64> = cases
            .iter()
            .filter_map(|&c| source.valid_value(c))
            .collect();
        let results = group_functions(&values, config, normal);
        for (column, result) in columns.iter_mut().zip(results) {
            for (&case, value) in cases.iter().zip(result) {
                column[case] = Some(value);
            }
        }
    }
    debug!(
        "Ranked '{}' in {} group(s) of {} cases.",
        source.name,
        groups.len(),
        n_cases
    );
    columns
}

fn truncate_name(name: String) -> String {
    if name.len() <= MAX_VARIABLE_NAME_LEN {
        return name;
    }
    let mut end = MAX_VARIABLE_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Picks a name for a new variable that clashes with neither the dataset nor `taken`.
fn new_variable_name(
    dataset: &Dataset,
    taken: &HashSet<String>,
    function: RankFunction,
    source: &str,
) -> String {
    let preferred = truncate_name(format!("{}{}", function.prefix(), source));
    if !dataset.contains(&preferred) && !taken.contains(&preferred) {
        return preferred;
    }
    (1..)
        .map(|n| format!("{}{:03}", function.fallback_prefix(), n))
        .find(|candidate| !dataset.contains(candidate) && !taken.contains(candidate))
        .unwrap_or(preferred)
}

/// Runs the Rank Cases procedure. The dataset is left untouched; use
/// [`RankCasesResult::apply_to`] to add the new variables.
pub fn run_rank_cases(dataset: &Dataset, config: &RankCasesConfig) -> StatsResult<RankCasesResult> {
    config.validate()?;
    info!(
        "Ranking {} variable(s) with {} function(s).",
        config.variables.len(),
        config.functions.len()
    );

    let sources = config
        .variables
        .iter()
        .map(|name| dataset.require(name))
        .collect::<StatsResult<Vec<_>>>()?;
    let by = config
        .by
        .iter()
        .map(|name| dataset.require(name))
        .collect::<StatsResult<Vec<_>>>()?;
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| StatsError::InvalidConfig(format!("normal distribution: {}", e)))?;

    let ranked_columns: Vec<Vec<Vec<Option<f64>>>> = sources
        .par_iter()
        .map(|source| rank_variable(dataset, source, &by, config, &normal))
        .collect();

    let group_suffix = if config.by.is_empty() {
        String::new()
    } else {
        format!(" by {}", config.by.join(" "))
    };

    let mut taken = HashSet::new();
    let mut variables = Vec::new();
    let mut summary = Vec::new();
    for (source, columns) in sources.iter().zip(ranked_columns) {
        for (&function, values) in config.functions.iter().zip(columns) {
            let name = new_variable_name(dataset, &taken, function, &source.name);
            taken.insert(name.clone());
            let description = function.describe();
            let formula_suffix = if function.uses_proportion_formula() {
                format!(" using {}", config.proportion_formula.label())
            } else {
                String::new()
            };
            let label = format!("{} of {}{}{}", description, source.name, formula_suffix, group_suffix);
            summary.push(RankSummaryRow {
                source_variable: source.name.clone(),
                function: description,
                new_variable: name.clone(),
                label: label.clone(),
            });
            variables.push(RankedVariable {
                name,
                label,
                source: source.name.clone(),
                function,
                values,
            });
        }
    }

    info!("Rank Cases created {} new variable(s).", variables.len());
    Ok(RankCasesResult {
        variables,
        summary: config.display_summary.then_some(summary),
    })
}
