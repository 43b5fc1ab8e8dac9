// In tests/worker_tests.rs

use factor_rank::{
    AnalysisOutput, AnalysisRequest, AnalysisWorker, Dataset, FactorAnalysisConfig, RankCasesConfig, StatsError,
    Variable,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn random_dataset(n_cases: usize, n_vars: usize, seed: u64) -> Arc<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let common: Vec<f64> = (0..n_cases).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let variables = (0..n_vars)
        .map(|j| {
            let values: Vec<f64> = common.iter().map(|c| c + rng.gen_range(-1.0..1.0)).collect();
            Variable::from_values(format!("v{}", j), &values)
        })
        .collect();
    Arc::new(Dataset::new(variables).unwrap())
}

fn names(n: usize) -> Vec<String> {
    (0..n).map(|j| format!("v{}", j)).collect()
}

#[test]
fn test_submit_and_wait() {
    let worker = AnalysisWorker::new(2).unwrap();
    assert_eq!(worker.num_threads(), 2);
    let dataset = random_dataset(100, 5, 1);

    let factor = worker.submit(AnalysisRequest::Factor {
        dataset: Arc::clone(&dataset),
        config: FactorAnalysisConfig::new(names(5)),
    });
    let rank = worker.submit(AnalysisRequest::Rank {
        dataset,
        config: RankCasesConfig::new(vec!["v0".to_string()]),
    });
    assert_ne!(factor.id(), rank.id());

    let factor_result = factor.wait().unwrap().into_factor().unwrap();
    assert!(factor_result.n_factors() >= 1);
    let rank_result = rank.wait().unwrap().into_rank().unwrap();
    assert_eq!(rank_result.variables[0].name, "Rv0");
}

#[test]
fn test_try_result_polls_until_done() {
    let worker = AnalysisWorker::new(1).unwrap();
    let handle = worker.submit(AnalysisRequest::Factor {
        dataset: random_dataset(2000, 30, 2),
        config: FactorAnalysisConfig::new(names(30)),
    });
    let deadline = Instant::now() + Duration::from_secs(60);
    let output = loop {
        if let Some(result) = handle.try_result() {
            break result.unwrap();
        }
        assert!(Instant::now() < deadline, "job did not finish in time");
        thread::sleep(Duration::from_millis(5));
    };
    assert!(matches!(output, AnalysisOutput::Factor(_)));
    assert!(output.into_rank().is_none());
}

#[test]
fn test_errors_are_delivered_to_the_handle() {
    let worker = AnalysisWorker::new(0).unwrap();
    assert!(worker.num_threads() >= 1);
    let handle = worker.submit(AnalysisRequest::Rank {
        dataset: random_dataset(10, 1, 3),
        config: RankCasesConfig::new(vec!["missing".to_string()]),
    });
    assert!(matches!(handle.wait(), Err(StatsError::UnknownVariable(_))));
}

#[test]
fn test_many_jobs_in_parallel() {
    let worker = AnalysisWorker::new(4).unwrap();
    let dataset = random_dataset(200, 4, 4);
    let handles: Vec<_> = (0..16)
        .map(|i| {
            worker.submit(AnalysisRequest::Rank {
                dataset: Arc::clone(&dataset),
                config: RankCasesConfig::new(vec![format!("v{}", i % 4)]),
            })
        })
        .collect();
    let mut ids: Vec<u64> = handles.iter().map(|h| h.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.wait().unwrap().into_rank().unwrap();
        assert_eq!(result.variables[0].source, format!("v{}", i % 4));
    }
}

#[test]
fn test_dropped_handle_does_not_disturb_worker() {
    let worker = AnalysisWorker::new(1).unwrap();
    let dataset = random_dataset(50, 3, 5);
    drop(worker.submit(AnalysisRequest::Rank {
        dataset: Arc::clone(&dataset),
        config: RankCasesConfig::new(vec!["v1".to_string()]),
    }));
    let output = worker
        .run(AnalysisRequest::Rank {
            dataset,
            config: RankCasesConfig::new(vec!["v2".to_string()]),
        })
        .unwrap();
    assert_eq!(output.into_rank().unwrap().variables[0].name, "Rv2");
}

#[test]
fn test_request_from_json() {
    let json = r#"{
        "procedure": "rank",
        "dataset": {"variables": [{"name": "score", "values": [3.0, null, 1.0, 2.0]}]},
        "config": {"variables": ["score"], "ties": "low", "assign_rank_1": "largest"}
    }"#;
    let request = AnalysisRequest::from_json_str(json).unwrap();
    let output = request.execute().unwrap();
    let text = output.to_json().unwrap();
    assert!(text.contains("\"procedure\":\"rank\""));
    let ranked = output.into_rank().unwrap();
    assert_eq!(ranked.variables[0].values, vec![Some(1.0), None, Some(3.0), Some(2.0)]);

    assert!(AnalysisRequest::from_json_str(r#"{"procedure": "regression"}"#).is_err());
}

#[test]
fn test_request_with_malformed_dataset_is_rejected() {
    let duplicate = r#"{
        "procedure": "rank",
        "dataset": {"variables": [{"name": "x", "values": [1.0, 2.0, 3.0]}, {"name": "x", "values": [4.0]}]},
        "config": {"variables": ["x"]}
    }"#;
    match AnalysisRequest::from_json_str(duplicate) {
        Err(StatsError::Json(e)) => assert!(e.to_string().contains("more than once"), "{}", e),
        other => panic!("expected a JSON error, got {:?}", other.map(|_| ())),
    }

    let ragged = r#"{
        "procedure": "factor",
        "dataset": {"variables": [{"name": "a", "values": [1.0, 2.0, 3.0]}, {"name": "b", "values": [4.0]}]},
        "config": {"variables": ["a", "b"]}
    }"#;
    assert!(AnalysisRequest::from_json_str(ragged).is_err());
}
