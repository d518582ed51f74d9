//! Integration tests for the quarry binary commands.
//!
//! Each command opens the on-disk index itself, so these check what
//! survives between invocations.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use quarry_daemon::{open_index, run_rebuild, run_search, run_stats, Resolution, SearchArgs};
use quarry_types::{ExternalRecord, FieldSettings, Settings};

struct TestHarness {
    temp_dir: TempDir,
    settings: Settings,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = Settings {
            index_path: temp_dir.path().join("index").to_string_lossy().to_string(),
            index_id: "integration".to_string(),
            record_types: vec!["Documents".to_string()],
            fields: vec![
                FieldSettings::new("Title"),
                FieldSettings::new("DateCreated").with_type("DateTime"),
            ],
            ..Settings::default()
        };
        Self { temp_dir, settings }
    }

    fn write_records(&self, name: &str, records: &[ExternalRecord]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let lines: Vec<String> = records.iter().map(|r| r.to_json().unwrap()).collect();
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }
}

fn document(title: &str, created: &str) -> ExternalRecord {
    ExternalRecord::new(ulid::Ulid::new().to_string(), "Documents")
        .with_field("Title", title)
        .with_field("DateCreated", created)
}

fn search_args() -> SearchArgs {
    SearchArgs {
        field: None,
        value: None,
        from: None,
        to: None,
        resolution: Resolution::Day,
        record_type: None,
        id: None,
        limit: Some(100),
    }
}

async fn rebuild(harness: &TestHarness, path: &Path) -> u64 {
    run_rebuild(&harness.settings, path).await.unwrap().num_docs
}

#[tokio::test]
async fn test_rebuild_persists_between_commands() {
    let harness = TestHarness::new();
    let first = document("Budget review", "2022-02-14T09:30:00Z");
    let records = harness.write_records(
        "records.jsonl",
        &[
            first.clone(),
            document("Travel plans", "2022-03-01"),
            document("Budget appendix", "2023-06-30"),
        ],
    );

    assert_eq!(rebuild(&harness, &records).await, 3);

    let stats = run_stats(&harness.settings).unwrap();
    assert_eq!(stats.num_docs, 3);

    let results = run_search(
        &harness.settings,
        &SearchArgs {
            field: Some("Title".into()),
            value: Some("budget".into()),
            ..search_args()
        },
    )
    .unwrap();
    assert_eq!(results.total_hits, 2);

    let results = run_search(
        &harness.settings,
        &SearchArgs {
            id: Some(first.id.clone()),
            ..search_args()
        },
    )
    .unwrap();
    assert_eq!(results.node_ids(), vec![first.id.as_str()]);
}

#[tokio::test]
async fn test_second_rebuild_replaces_contents() {
    let harness = TestHarness::new();
    let big = harness.write_records(
        "big.jsonl",
        &[
            document("One", "2021-01-01"),
            document("Two", "2021-01-02"),
            document("Three", "2021-01-03"),
        ],
    );
    let small = harness.write_records("small.jsonl", &[document("Four", "2021-01-04")]);

    assert_eq!(rebuild(&harness, &big).await, 3);
    assert_eq!(rebuild(&harness, &small).await, 1);

    let results = run_search(
        &harness.settings,
        &SearchArgs {
            field: Some("DateCreated".into()),
            from: Some("2021-01-01".into()),
            to: Some("2021-01-03".into()),
            ..search_args()
        },
    )
    .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_reopen_with_changed_schema_fails() {
    let harness = TestHarness::new();
    let records = harness.write_records("records.jsonl", &[document("Only", "2020-01-01")]);
    rebuild(&harness, &records).await;

    let mut changed = harness.settings.clone();
    changed.fields.push(FieldSettings::new("Author"));
    assert!(open_index(&changed).is_err());
}
