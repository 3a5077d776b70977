//! End-to-end tests: configuration file to store round trips.
//!
//! Each test loads a `docflow.toml`, builds an executor over the in-memory
//! store and drives several operations in sequence, the way a workflow would.

use bson::{doc, Bson};
use docflow_core::{
    DocflowConfig, Error, Executor, FilterNode, FilterSet, InputBag, MatchOp, MemoryStore,
    NestedFieldKind, SortField,
};
use std::fs;
use tempfile::TempDir;

const CONFIG: &str = r#"
[server]
connection_string = "memory://local"
database = "crm"
document_type = "Customer"

[[types]]
name = "Customer"
fields = { id = "string", Name = "string", Tier = "int32", Address = "document", Since = "date_time" }

[limits]
max_batch_size = 3
"#;

fn load_executor(dir: &TempDir) -> Executor<MemoryStore> {
    let path = dir.path().join("docflow.toml");
    fs::write(&path, CONFIG).expect("write config");
    let config = DocflowConfig::load_required(&path).expect("load config");
    config.validate().expect("valid config");
    Executor::from_config(MemoryStore::new(), &config)
}

fn collection() -> InputBag {
    InputBag::new().with("Collection Name", "customers")
}

fn customer(name: &str, tier: i32, city: &str) -> Bson {
    Bson::Document(doc! { "Name": name, "Tier": tier, "Address": { "City": city } })
}

fn names(outcome: &docflow_core::StepOutcome) -> Vec<String> {
    outcome
        .output("Documents")
        .and_then(Bson::as_array)
        .into_iter()
        .flatten()
        .filter_map(Bson::as_document)
        .filter_map(|d| d.get_str("Name").ok().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_insert_fetch_replace_delete_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let executor = load_executor(&dir);

    // Insert a batch; the store assigns ObjectIds
    let inserted = executor
        .insert_documents(&collection().with(
            "Documents",
            vec![
                customer("Ada", 2, "Paris"),
                customer("Brian", 1, "Lyon"),
                customer("Chloe", 3, "Paris"),
            ],
        ))
        .await
        .expect("insert");
    let ids = inserted
        .output("Document IDs")
        .and_then(Bson::as_array)
        .cloned()
        .expect("ids");
    assert_eq!(ids.len(), 3);

    // Nested filter on the city, OR'ed with a tier threshold, sorted by name
    let filters = FilterSet::any(vec![
        FilterNode::nested("Address.City", NestedFieldKind::String, MatchOp::Equals)
            .with_alias("City"),
        FilterNode::field("Tier", MatchOp::Gte),
    ]);
    let inputs = collection().with("City", "Lyon").with("Tier", 3);
    let fetched = executor
        .fetch(&filters, &[SortField::descending("Name")], &inputs)
        .await
        .expect("fetch");
    assert_eq!(names(&fetched), vec!["Chloe", "Brian"]);

    // Identifiers come back as hex text under the record's own member
    let first = fetched.output("Documents").and_then(Bson::as_array).expect("docs")[0]
        .as_document()
        .expect("doc")
        .clone();
    let hex = first.get_str("id").expect("id member").to_string();
    assert_eq!(hex.len(), 24);

    // Replace by hex id matches the ObjectId-keyed document
    executor
        .replace_document(
            &collection()
                .with("Document ID", hex.clone())
                .with("Document", doc! { "Name": "Chloe", "Tier": 4 }),
            false,
        )
        .await
        .expect("replace");
    let by_id = executor
        .get_document(&collection().with("Document ID", hex.clone()))
        .await
        .expect("get");
    let stored = by_id.output("Document").and_then(Bson::as_document).expect("doc");
    assert_eq!(stored.get_i32("Tier").expect("tier"), 4);
    assert!(stored.get("Address").is_none());

    // Bulk delete by the ids returned on insert
    let deleted = executor
        .delete_documents(&collection().with("Document IDs", ids), true)
        .await
        .expect("delete");
    assert!(deleted.is_success());
    let rest = executor
        .fetch(&FilterSet::default(), &[], &collection())
        .await
        .expect("fetch");
    assert!(names(&rest).is_empty());
}

#[tokio::test]
async fn test_batch_limit_rejects_before_writing() {
    let dir = TempDir::new().expect("temp dir");
    let executor = load_executor(&dir);

    let result = executor
        .insert_documents(&collection().with(
            "Documents",
            vec![
                customer("A", 1, "X"),
                customer("B", 1, "X"),
                customer("C", 1, "X"),
                customer("D", 1, "X"),
            ],
        ))
        .await;

    assert!(matches!(result, Err(Error::BatchValidation { index: 3, .. })));
    assert!(executor.store().documents("crm", "customers").is_empty());
}

#[tokio::test]
async fn test_conflicting_inputs_fail_before_store_access() {
    let dir = TempDir::new().expect("temp dir");
    let executor = load_executor(&dir);
    executor.store().fail_next("server unreachable");

    // "Name" is bound both as a string field and as an int32 field
    let filters = FilterSet::all(vec![
        FilterNode::field("Name", MatchOp::Equals),
        FilterNode::field("Tier", MatchOp::Equals).with_alias("Name"),
    ]);
    let result = executor
        .fetch(&filters, &[], &collection().with("Name", "Ada"))
        .await;

    assert!(matches!(result, Err(Error::AmbiguousInput(ref n)) if n == "Name"));
    // The pending store failure was never consumed
    let next = executor.fetch(&FilterSet::default(), &[], &collection()).await;
    assert!(matches!(next, Err(Error::Store(_))));
}

#[tokio::test]
async fn test_filter_on_deferred_collection_input_shares_value() {
    let dir = TempDir::new().expect("temp dir");
    let executor = load_executor(&dir);

    // A string filter reusing the reserved input name only warns
    let filters = FilterSet::all(vec![
        FilterNode::field("Name", MatchOp::Equals).with_alias("Collection Name"),
    ]);
    let issues = executor.fetch_validation_issues(&filters, &[]);
    assert!(issues.iter().all(|i| !i.is_fatal()));
    assert!(issues.iter().any(|i| i.input_name.as_deref() == Some("Collection Name")));

    let outcome = executor
        .fetch(&filters, &[], &collection())
        .await
        .expect("fetch");
    assert!(names(&outcome).is_empty());
}
