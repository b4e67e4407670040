//! File-backed step configuration store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use work_order_engine::{ConfigError, ParseOptions, StepConfigStore};

const CANCEL_ORDER: &str = r#"{
    "work_order_type": "cancel_order",
    "description": "Cancel a user's order",
    "steps": [
        {"step": 1, "operation": "QUERY", "table": "orders", "where": "user_id={uid}", "output_fields": ["status"]},
        {"step": 2, "operation": "GENERATE_DML", "type": "UPDATE", "table": "orders",
         "set": {"status": "'cancelled'"}, "where": "user_id={uid}"}
    ]
}"#;

const DANGLING: &str = r#"{
    "work_order_type": "dangling",
    "steps": [
        {"step": 1, "operation": "QUERY", "table": "t", "next_step": 5}
    ]
}"#;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn populated() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cancel_order.json", CANCEL_ORDER);
    write(dir.path(), "schema.json", r#"{"type": "object"}"#);
    write(dir.path(), "README.md", "not a configuration");
    dir
}

#[tokio::test]
async fn lists_types_without_schema() {
    let dir = populated();
    write(dir.path(), "broken.json", "{ not json");

    let store = StepConfigStore::new(dir.path(), ParseOptions::default());
    let types = store.list_types().await.unwrap();

    assert_eq!(types, vec!["broken", "cancel_order"]);
}

#[tokio::test]
async fn get_parses_once_and_caches() {
    let dir = populated();
    let store = StepConfigStore::new(dir.path(), ParseOptions::default());

    let first = store.get("cancel_order").await.unwrap();
    let second = store.get("cancel_order").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.parse_count(), 1);
    assert_eq!(first.work_order_type, "cancel_order");
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn concurrent_first_access_shares_one_parse() {
    let dir = populated();
    let store = Arc::new(StepConfigStore::new(dir.path(), ParseOptions::default()));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.get("cancel_order").await.unwrap() })
        })
        .collect();

    let mut configs = Vec::new();
    for handle in handles {
        configs.push(handle.await.unwrap());
    }

    assert_eq!(store.parse_count(), 1);
    assert!(configs.iter().all(|c| Arc::ptr_eq(c, &configs[0])));
}

#[tokio::test]
async fn missing_configuration_is_not_found() {
    let dir = populated();
    let store = StepConfigStore::new(dir.path(), ParseOptions::default());

    let err = store.get("refund_order").await.unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(ref name) if name == "refund_order"));

    let err = store.get("../cancel_order").await.unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[tokio::test]
async fn malformed_file_is_parse_error_and_not_cached() {
    let dir = populated();
    write(dir.path(), "broken.json", "{ not json");
    let store = StepConfigStore::new(dir.path(), ParseOptions::default());

    let err = store.get("broken").await.unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));

    write(dir.path(), "broken.json", &CANCEL_ORDER.replace("cancel_order", "broken"));
    let config = store.get("broken").await.unwrap();
    assert_eq!(config.work_order_type, "broken");
    assert_eq!(store.parse_count(), 2);
}

#[tokio::test]
async fn reference_checking_follows_options() {
    let dir = populated();
    write(dir.path(), "dangling.json", DANGLING);

    let strict = StepConfigStore::new(dir.path(), ParseOptions::default());
    let err = strict.get("dangling").await.unwrap_err();
    assert!(matches!(err, ConfigError::DanglingReference { target: 5, .. }));

    let lenient = StepConfigStore::new(
        dir.path(),
        ParseOptions {
            check_references: false,
        },
    );
    assert!(lenient.get("dangling").await.is_ok());
}

#[tokio::test]
async fn validate_all_reports_each_file() {
    let dir = populated();
    write(dir.path(), "dangling.json", DANGLING);
    let store = StepConfigStore::new(dir.path(), ParseOptions::default());

    let results = store.validate_all().await.unwrap();
    let summary: Vec<(&str, bool)> = results
        .iter()
        .map(|(name, result)| (name.as_str(), result.is_ok()))
        .collect();

    assert_eq!(summary, vec![("cancel_order", true), ("dangling", false)]);
}
