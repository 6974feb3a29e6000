// Boundary validation of generation requests

use crate::handlers::metadata::GenerateMetadataRequest;
use crate::utils::ApiError;

fn request_json(table: &str, sample_size: usize) -> GenerateMetadataRequest {
    serde_json::from_value(serde_json::json!({
        "db_name": "mem",
        "schema_name": "main",
        "table_name": table,
        "sample_size": sample_size,
    }))
    .unwrap()
}

#[test]
fn defaults_apply_and_validate() {
    let request: GenerateMetadataRequest = serde_json::from_value(serde_json::json!({
        "db_name": "mem",
        "table_name": "t",
    }))
    .unwrap();
    assert_eq!(request.schema_name, "public");
    assert_eq!(request.sample_size, 20);
    assert_eq!(request.num_samples, 5);
    assert_eq!(request.max_partitions, 10);
    assert!(request.include_relationships);
    assert!(request.check().is_ok());

    let options = request.options();
    assert!(options.sections.categorical_definitions);
}

#[test]
fn injection_attempts_are_rejected_at_the_boundary() {
    let request = request_json("t; DROP TABLE users", 10);
    let err = request.check().unwrap_err();
    assert!(matches!(err, ApiError::InvalidIdentifier(_)));
}

#[test]
fn sample_size_bounds_are_enforced() {
    let request = request_json("t", 0);
    assert!(matches!(request.check().unwrap_err(), ApiError::ValidationError(_)));

    let request = request_json("t", 10_001);
    assert!(matches!(request.check().unwrap_err(), ApiError::ValidationError(_)));

    let request = request_json("t", 10_000);
    assert!(request.check().is_ok());
}

#[test]
fn section_flags_map_through() {
    let request: GenerateMetadataRequest = serde_json::from_value(serde_json::json!({
        "db_name": "mem",
        "table_name": "t",
        "include_relationships": false,
        "include_query_examples": false,
        "include_categorical_definitions": false,
    }))
    .unwrap();
    let sections = request.options().sections;
    assert!(!sections.relationships);
    assert!(!sections.query_examples);
    assert!(!sections.categorical_definitions);
    assert!(sections.business_rules);
    assert!(sections.data_quality);
}
