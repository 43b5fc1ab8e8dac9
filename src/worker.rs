// src/worker.rs

//! Runs procedures off the caller's thread so an interactive front end stays responsive.

use crate::data::Dataset;
use crate::error::{StatsError, StatsResult};
use crate::factor::{run_factor_analysis, FactorAnalysisConfig, FactorAnalysisResult};
use crate::rank::{run_rank_cases, RankCasesConfig, RankCasesResult};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

/// A procedure invocation as posted by a dialog.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "procedure")]
pub enum AnalysisRequest {
    Factor {
        dataset: Arc<Dataset>,
        config: FactorAnalysisConfig,
    },
    Rank {
        dataset: Arc<Dataset>,
        config: RankCasesConfig,
    },
}

impl AnalysisRequest {
    pub fn from_json_str(json: &str) -> StatsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn name(&self) -> &'static str {
        match self {
            AnalysisRequest::Factor { .. } => "factor analysis",
            AnalysisRequest::Rank { .. } => "rank cases",
        }
    }

    /// Runs the request on the current thread.
    pub fn execute(&self) -> StatsResult<AnalysisOutput> {
        match self {
            AnalysisRequest::Factor { dataset, config } => {
                run_factor_analysis(dataset, config).map(|r| AnalysisOutput::Factor(Box::new(r)))
            }
            AnalysisRequest::Rank { dataset, config } => {
                run_rank_cases(dataset, config).map(AnalysisOutput::Rank)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "procedure", content = "result")]
pub enum AnalysisOutput {
    Factor(Box<FactorAnalysisResult>),
    Rank(RankCasesResult),
}

impl AnalysisOutput {
    pub fn into_factor(self) -> Option<FactorAnalysisResult> {
        match self {
            AnalysisOutput::Factor(r) => Some(*r),
            AnalysisOutput::Rank(_) => None,
        }
    }

    pub fn into_rank(self) -> Option<RankCasesResult> {
        match self {
            AnalysisOutput::Rank(r) => Some(r),
            AnalysisOutput::Factor(_) => None,
        }
    }

    pub fn to_json(&self) -> StatsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Pending result of a submitted request.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    receiver: Receiver<StatsResult<AnalysisOutput>>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks until the job finishes.
    pub fn wait(self) -> StatsResult<AnalysisOutput> {
        self.receiver
            .recv()
            .map_err(|_| StatsError::WorkerDisconnected)?
    }

    /// Returns the result if the job has finished, `None` while it is still running.
    pub fn try_result(&self) -> Option<StatsResult<AnalysisOutput>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StatsError::WorkerDisconnected)),
        }
    }
}

/// Executes analysis requests on a dedicated rayon thread pool.
pub struct AnalysisWorker {
    pool: rayon::ThreadPool,
    next_id: AtomicU64,
}

impl AnalysisWorker {
    /// Creates a worker with `threads` threads; 0 lets rayon choose.
    pub fn new(threads: usize) -> StatsResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("analysis-worker-{}", i))
            .build()
            .map_err(|e| StatsError::Backend(format!("failed to build worker pool: {}", e)))?;
        info!("Analysis worker started with {} thread(s).", pool.current_num_threads());
        Ok(Self {
            pool,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queues `request` and returns immediately.
    pub fn submit(&self, request: AnalysisRequest) -> JobHandle {
        let name = request.name();
        self.spawn_job(name, move || request.execute())
    }

    /// Runs `job` on the pool. A job that panics drops its sender without a
    /// result, which the handle reports as `WorkerDisconnected`.
    pub(crate) fn spawn_job<F>(&self, name: &'static str, job: F) -> JobHandle
    where
        F: FnOnce() -> StatsResult<AnalysisOutput> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();
        debug!("Queued job {} ({}).", id, name);
        self.pool.spawn(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result,
                Err(_) => {
                    error!("Job {} ({}) panicked; its handle will report a disconnect.", id, name);
                    return;
                }
            };
            if let Err(e) = &result {
                error!("Job {} ({}) failed: {}", id, name, e);
            } else {
                debug!("Job {} ({}) finished.", id, name);
            }
            // The receiver may already be gone if the caller dropped the handle.
            let _ = sender.send(result);
        });
        JobHandle { id, receiver }
    }

    /// Runs `request` on the pool and blocks for the result.
    pub fn run(&self, request: AnalysisRequest) -> StatsResult<AnalysisOutput> {
        self.pool.install(|| request.execute())
    }
}
