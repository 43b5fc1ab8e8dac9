// src/worker_tests.rs
#![cfg(test)]
use crate::data::{Dataset, Variable};
use crate::error::StatsError;
use crate::rank::RankCasesConfig;
use crate::worker::{AnalysisRequest, AnalysisWorker};
use std::sync::Arc;

fn small_rank_request(name: &str) -> AnalysisRequest {
    let dataset = Dataset::new(vec![Variable::from_values(name, &[3.0, 1.0, 2.0])]).unwrap();
    AnalysisRequest::Rank {
        dataset: Arc::new(dataset),
        config: RankCasesConfig::new(vec![name.to_string()]),
    }
}

mod job_tests {
    use super::*;

    #[test]
    fn test_panicking_job_reports_disconnect() {
        let worker = AnalysisWorker::new(1).unwrap();
        let handle = worker.spawn_job("panicking job", || panic!("job blew up"));
        assert!(matches!(handle.wait(), Err(StatsError::WorkerDisconnected)));

        // The pool keeps serving requests afterwards.
        let output = worker.submit(small_rank_request("x")).wait().unwrap();
        assert_eq!(output.into_rank().unwrap().variables[0].values, vec![Some(3.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_try_result_reports_disconnect_after_panic() {
        let worker = AnalysisWorker::new(1).unwrap();
        let handle = worker.spawn_job("panicking job", || panic!("job blew up"));
        let result = loop {
            if let Some(result) = handle.try_result() {
                break result;
            }
            std::thread::yield_now();
        };
        assert!(matches!(result, Err(StatsError::WorkerDisconnected)));
    }
}
