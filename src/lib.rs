// Rank Cases and Factor Analysis engine

//! Numerical core of the "Rank Cases" and "Factor Analysis" procedures of a
//! statistics application.
//!
//! * [`data`] holds the column-oriented [`Dataset`] and extracts analysis
//!   matrices under listwise, pairwise or mean-substitution missing-value handling.
//! * [`matrix`] computes correlation/covariance matrices and the optional
//!   diagnostic tables (significance, anti-image).
//! * [`linalg`] and [`linalg_backends`] provide LU factorisation and the
//!   symmetric eigendecomposition (pure-Rust QR iteration by default, LAPACK
//!   behind the `backend_*` features).
//! * [`factor`] runs principal components / principal axis factoring,
//!   [`rotation`] applies orthomax rotations and [`scores`] computes factor scores.
//! * [`kmo`] implements the KMO measure and Bartlett's test of sphericity.
//! * [`rank`] implements Rank Cases.
//! * [`worker`] executes procedures on a background thread pool.
//!
//! ```
//! use factor_rank::{run_rank_cases, Dataset, RankCasesConfig, Variable};
//!
//! let dataset = Dataset::new(vec![Variable::from_values("x", &[3.0, 1.0, 2.0, 2.0])]).unwrap();
//! let result = run_rank_cases(&dataset, &RankCasesConfig::new(vec!["x".to_string()])).unwrap();
//! assert_eq!(result.variables[0].name, "Rx");
//! assert_eq!(
//!     result.variables[0].values,
//!     vec![Some(4.0), Some(1.0), Some(2.5), Some(2.5)]
//! );
//! ```

pub mod data;
pub mod error;
pub mod factor;
pub mod kmo;
pub mod linalg;
pub mod linalg_backends;
pub mod matrix;
pub mod rank;
pub mod rotation;
pub mod scores;
pub mod worker;

pub use data::{extract_data_matrix, CaseFilter, Dataset, ExtractedData, MissingValueStrategy, Variable};
pub use error::{StatsError, StatsResult, ThreadSafeStdError};
pub use factor::{
    run_factor_analysis, ExtractionConfig, ExtractionCriterion, ExtractionMethod, FactorAnalysisConfig,
    FactorAnalysisResult,
};
pub use kmo::{bartlett_sphericity, kmo, KmoBartlett};
pub use linalg::{symmetric_eigen, EigenDecomposition};
pub use matrix::{calculate_matrix, MatrixKind};
pub use rank::{
    rank_values, run_rank_cases, ProportionFormula, RankCasesConfig, RankCasesResult, RankFunction, RankOrder,
    TieMethod,
};
pub use rotation::{RotationConfig, RotationMethod};
pub use scores::{FactorModel, ScoreMethod, ScoresConfig};
pub use worker::{AnalysisOutput, AnalysisRequest, AnalysisWorker, JobHandle};

#[cfg(test)]
mod data_tests;
#[cfg(test)]
mod linalg_tests;
#[cfg(test)]
mod worker_tests;
