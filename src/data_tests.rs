// src/data_tests.rs
#![cfg(test)]
use crate::data::{extract_data_matrix, CaseFilter, Dataset, MissingValueStrategy, Variable};
use crate::error::StatsError;
use approx::assert_abs_diff_eq;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn dataset_with_gaps() -> Dataset {
    Dataset::new(vec![
        Variable::new("x", vec![Some(1.0), Some(2.0), Some(3.0), None, Some(5.0)]),
        Variable::new("y", vec![Some(2.0), None, Some(5.0), Some(4.0), Some(5.0)]),
        Variable::from_values("z", &[1.0, 1.0, 2.0, 3.0, 5.0]),
        Variable::from_values("sel", &[1.0, 1.0, 0.0, 1.0, 1.0]),
    ])
    .unwrap()
}

mod dataset_tests {
    use super::*;

    #[test]
    fn test_rejects_length_mismatch() {
        let err = Dataset::new(vec![
            Variable::from_values("a", &[1.0, 2.0]),
            Variable::from_values("b", &[1.0, 2.0, 3.0]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            StatsError::LengthMismatch { expected: 2, found: 3, .. }
        ));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = Dataset::new(vec![
            Variable::from_values("a", &[1.0]),
            Variable::from_values("a", &[2.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, StatsError::DuplicateVariable(name) if name == "a"));
    }

    #[test]
    fn test_valid_value_respects_user_missing_and_nan() {
        let v = Variable::new("v", vec![Some(1.0), Some(99.0), Some(f64::NAN), None])
            .with_user_missing(vec![99.0]);
        assert_eq!(v.valid_value(0), Some(1.0));
        assert_eq!(v.valid_value(1), None);
        assert_eq!(v.valid_value(2), None);
        assert_eq!(v.valid_value(3), None);
        assert_eq!(v.valid_value(10), None);
    }

    #[test]
    fn test_display_name_prefers_label() {
        let v = Variable::from_values("q1", &[1.0]).with_label("Question 1");
        assert_eq!(v.display_name(), "Question 1");
        assert_eq!(Variable::from_values("q2", &[1.0]).display_name(), "q2");
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"variables": [
            {"name": "a", "values": [1.0, null, 3.0]},
            {"name": "b", "label": "Bee", "values": [4.0, 5.0, -9.0], "user_missing": [-9.0]}
        ]}"#;
        let ds = Dataset::from_json_str(json).unwrap();
        assert_eq!(ds.n_cases(), 3);
        assert_eq!(ds.require("a").unwrap().valid_value(1), None);
        assert_eq!(ds.require("b").unwrap().valid_value(2), None);
        assert!(matches!(ds.require("c"), Err(StatsError::UnknownVariable(_))));

        let bad = r#"{"variables": [{"name": "a", "values": [1.0]}, {"name": "b", "values": []}]}"#;
        assert!(Dataset::from_json_str(bad).is_err());
    }

    #[test]
    fn test_deserialize_enforces_dataset_rules() {
        let duplicate = r#"{"variables": [{"name": "x", "values": [1.0, 2.0, 3.0]}, {"name": "x", "values": [1.0]}]}"#;
        let err = serde_json::from_str::<Dataset>(duplicate).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{}", err);

        let ragged = r#"{"variables": [{"name": "x", "values": [1.0, 2.0, 3.0]}, {"name": "y", "values": [1.0]}]}"#;
        let err = serde_json::from_str::<Dataset>(ragged).unwrap_err();
        assert!(err.to_string().contains("has 1 values but the dataset has 3 cases"), "{}", err);

        let ds = Dataset::new(vec![Variable::from_values("x", &[1.0, 2.0])]).unwrap();
        let text = serde_json::to_string(&ds).unwrap();
        assert_eq!(serde_json::from_str::<Dataset>(&text).unwrap(), ds);
    }
}

mod extraction_tests {
    use super::*;

    #[test]
    fn test_listwise_drops_incomplete_cases() {
        let ds = dataset_with_gaps();
        let ex = extract_data_matrix(&ds, &names(&["x", "y", "z"]), None, MissingValueStrategy::Listwise).unwrap();
        assert_eq!(ex.case_indices, vec![0, 2, 4]);
        assert!(ex.valid_mask.is_none());
        assert_eq!(ex.matrix.dim(), (3, 3));
        assert_abs_diff_eq!(ex.matrix[[1, 1]], 5.0);
    }

    #[test]
    fn test_pairwise_keeps_cases_with_a_mask() {
        let ds = dataset_with_gaps();
        let ex = extract_data_matrix(&ds, &names(&["x", "y"]), None, MissingValueStrategy::Pairwise).unwrap();
        assert_eq!(ex.case_indices, vec![0, 1, 2, 3, 4]);
        let mask = ex.valid_mask.as_ref().unwrap();
        assert!(!mask[[3, 0]]);
        assert!(!mask[[1, 1]]);
        assert!(mask[[4, 1]]);
    }

    #[test]
    fn test_mean_substitution() {
        let ds = dataset_with_gaps();
        let ex = extract_data_matrix(&ds, &names(&["x", "y"]), None, MissingValueStrategy::ReplaceWithMean).unwrap();
        assert!(ex.valid_mask.is_none());
        assert_abs_diff_eq!(ex.matrix[[3, 0]], 2.75, epsilon = 1e-12);
        assert_abs_diff_eq!(ex.matrix[[1, 1]], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_case_filter() {
        let ds = dataset_with_gaps();
        let filter = CaseFilter {
            variable: "sel".to_string(),
            value: 1.0,
        };
        let ex = extract_data_matrix(&ds, &names(&["z"]), Some(&filter), MissingValueStrategy::Listwise).unwrap();
        assert_eq!(ex.case_indices, vec![0, 1, 3, 4]);

        let missing_filter = CaseFilter {
            variable: "nope".to_string(),
            value: 1.0,
        };
        assert!(matches!(
            extract_data_matrix(&ds, &names(&["z"]), Some(&missing_filter), MissingValueStrategy::Listwise),
            Err(StatsError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_errors() {
        let ds = dataset_with_gaps();
        assert!(matches!(
            extract_data_matrix(&ds, &[], None, MissingValueStrategy::Listwise),
            Err(StatsError::InvalidConfig(_))
        ));
        assert!(matches!(
            extract_data_matrix(&ds, &names(&["x", "x"]), None, MissingValueStrategy::Listwise),
            Err(StatsError::DuplicateVariable(_))
        ));
        assert!(matches!(
            extract_data_matrix(&ds, &names(&["x", "w"]), None, MissingValueStrategy::Listwise),
            Err(StatsError::UnknownVariable(_))
        ));

        let sparse = Dataset::new(vec![
            Variable::new("a", vec![Some(1.0), None, Some(3.0)]),
            Variable::new("b", vec![None, Some(2.0), Some(3.0)]),
        ])
        .unwrap();
        assert!(matches!(
            extract_data_matrix(&sparse, &names(&["a", "b"]), None, MissingValueStrategy::Listwise),
            Err(StatsError::InsufficientData(_))
        ));
    }
}
