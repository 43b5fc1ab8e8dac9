// src/error.rs

use std::error::Error;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors, so they implement `Send` and `Sync`.
/// Linear algebra backends report failures with this type.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Errors produced by the rank-cases and factor-analysis procedures.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("variable '{0}' does not exist in the dataset")]
    UnknownVariable(String),

    #[error("variable '{name}' has {found} values but the dataset has {expected} cases")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("variable '{0}' appears more than once")]
    DuplicateVariable(String),

    #[error("not enough data: {0}")]
    InsufficientData(String),

    #[error("matrix is singular or not positive definite: {0}")]
    SingularMatrix(String),

    #[error("{procedure} did not converge within {iterations} iterations")]
    NotConverged {
        procedure: &'static str,
        iterations: usize,
    },

    #[error("linear algebra backend failed: {0}")]
    Backend(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background worker disconnected before producing a result")]
    WorkerDisconnected,
}

impl From<ThreadSafeStdError> for StatsError {
    fn from(e: ThreadSafeStdError) -> Self {
        // Backends box our own errors (singular matrix, bad shapes); keep their variant.
        match e.downcast::<StatsError>() {
            Ok(inner) => *inner,
            Err(other) => StatsError::Backend(other.to_string()),
        }
    }
}

pub type StatsResult<T> = Result<T, StatsError>;
