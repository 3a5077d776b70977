//! Tests for executor module

#[cfg(test)]
mod tests {
    use crate::config::DocflowConfig;
    use crate::error::Error;
    use crate::executor::*;
    use crate::filter::{FilterNode, FilterSet, MatchOp, NestedFieldKind};
    use crate::inputs::{InputBag, COLLECTION_NAME_INPUT};
    use crate::sort::SortField;
    use crate::schema::SchemaRegistry;
    use crate::store::MemoryStore;
    use crate::validation::BreakLevel;
    use bson::{doc, oid::ObjectId, Bson, Decimal128};
    use std::str::FromStr;
    use std::sync::Arc;

    const PRODUCTS: &str = r#"
[server]
connection_string = "memory://"
database = "shop"
collection = "products"
document_type = "Product"

[[types]]
name = "Product"
fields = { Id = "int64", Name = "string", Price = "float64", Stock = "int32" }

[[types]]
name = "Loose"
fields = { Label = "string" }
"#;

    fn config() -> DocflowConfig {
        DocflowConfig::from_toml(PRODUCTS).expect("config")
    }

    fn executor() -> Executor<MemoryStore> {
        let executor = Executor::from_config(MemoryStore::new(), &config());
        executor.store().seed(
            "shop",
            "products",
            vec![
                doc! { "_id": 1_i64, "Name": "Desk", "Price": 120.0, "Stock": 3 },
                doc! { "_id": 2_i64, "Name": "Lamp", "Price": 20.0, "Stock": 10 },
                doc! { "_id": 3_i64, "Name": "Pen", "Price": 1.5, "Stock": 100 },
            ],
        );
        executor
    }

    fn executor_with(edit: impl FnOnce(&mut DocflowConfig)) -> Executor<MemoryStore> {
        let mut config = config();
        edit(&mut config);
        Executor::from_config(MemoryStore::new(), &config)
    }

    fn names(outcome: &StepOutcome, output: &str) -> Vec<String> {
        outcome
            .output(output)
            .and_then(Bson::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|d| d.get_str("Name").ok())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // Settings validation
    // =========================================================================

    #[test]
    fn test_validation_requires_document_type() {
        // Arrange
        let executor = executor_with(|c| c.server.document_type = None);

        // Act
        let issues = executor.validation_issues();

        // Assert
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, BreakLevel::Fatal);
        assert_eq!(issues[0].message, "No document type chosen");
    }

    #[test]
    fn test_validation_unknown_document_type() {
        // Arrange
        let executor = executor_with(|c| c.server.document_type = Some("Ghost".into()));

        // Act
        let issues = executor.validation_issues();

        // Assert
        assert!(issues[0].is_fatal());
        assert_eq!(issues[0].message, "Document type not found");
    }

    #[test]
    fn test_validation_warns_on_type_without_identifier() {
        // Arrange
        let executor = executor_with(|c| c.server.document_type = Some("Loose".into()));

        // Act
        let issues = executor.validation_issues();

        // Assert
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, BreakLevel::Warning);
        assert!(issues[0].message.contains("Id, id, or _id"));
    }

    #[test]
    fn test_fetch_validation_collects_filter_and_sort_issues() {
        // Arrange
        let executor = executor();
        let filters = FilterSet::all(vec![FilterNode::and(vec![FilterNode::field(
            "Name",
            MatchOp::Equals,
        )])]);
        let sort = vec![SortField::ascending("")];

        // Act
        let issues = executor.fetch_validation_issues(&filters, &sort);

        // Assert
        assert!(issues.iter().any(|i| !i.is_fatal() && i.message.contains("only one filter")));
        assert!(issues.iter().any(|i| i.is_fatal() && i.path == "sort[0]"));
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[tokio::test]
    async fn test_fetch_filters_sorts_and_restores_identifier() {
        // Arrange
        let executor = executor();
        let filters = FilterSet::all(vec![FilterNode::field("Price", MatchOp::Gte)]);
        let inputs = InputBag::new().with("Price", 10);

        // Act
        let outcome = executor
            .fetch(&filters, &[SortField::ascending("Price")], &inputs)
            .await
            .expect("fetch");

        // Assert
        assert!(outcome.is_success());
        assert_eq!(names(&outcome, "Documents"), vec!["Lamp", "Desk"]);
        let first = outcome.output("Documents").and_then(Bson::as_array).expect("docs")[0]
            .as_document()
            .expect("doc")
            .clone();
        assert_eq!(first.get("Id"), Some(&Bson::Int64(2)));
        assert!(first.get("_id").is_none());
    }

    #[tokio::test]
    async fn test_fetch_on_identifier_field() {
        // Arrange
        let executor = executor();
        let filters = FilterSet::all(vec![FilterNode::field("Id", MatchOp::Equals)]);
        let inputs = InputBag::new().with("Id", "3");

        // Act
        let outcome = executor.fetch(&filters, &[], &inputs).await.expect("fetch");

        // Assert
        assert_eq!(names(&outcome, "Documents"), vec!["Pen"]);
    }

    const SKUS: &str = r#"
[server]
database = "shop"
collection = "skus"
document_type = "Sku"
id_kind_override = "int64"

[[types]]
name = "Sku"
fields = { Id = "string", Name = "string", Price = "decimal" }
"#;

    fn sku_executor() -> Executor<MemoryStore> {
        let config = DocflowConfig::from_toml(SKUS).expect("config");
        Executor::from_config(MemoryStore::new(), &config)
    }

    #[tokio::test]
    async fn test_fetch_on_identifier_field_honors_id_kind_override() {
        // Arrange
        let executor = sku_executor();
        executor
            .insert_document(&InputBag::new().with(DOCUMENT_INPUT, doc! { "Id": "5", "Name": "Bolt" }))
            .await
            .expect("insert");
        let filters = FilterSet::all(vec![FilterNode::field("Id", MatchOp::Equals)]);

        // Act
        let by_filter = executor
            .fetch(&filters, &[], &InputBag::new().with("Id", "5"))
            .await
            .expect("fetch");
        let by_id = executor
            .get_document(&InputBag::new().with(DOCUMENT_ID_INPUT, "5"))
            .await
            .expect("get");

        // Assert
        assert_eq!(executor.store().documents("shop", "skus")[0].get("_id"), Some(&Bson::Int64(5)));
        assert_eq!(names(&by_filter, "Documents"), vec!["Bolt"]);
        assert!(by_id.output("Document").and_then(Bson::as_document).is_some());
    }

    #[tokio::test]
    async fn test_fetch_compares_decimal_fields() {
        // Arrange
        let executor = sku_executor();
        let decimal = |text: &str| Decimal128::from_str(text).expect("decimal");
        executor.store().seed(
            "shop",
            "skus",
            vec![
                doc! { "_id": 1_i64, "Name": "Bolt", "Price": decimal("5") },
                doc! { "_id": 2_i64, "Name": "Nut", "Price": decimal("0.25") },
            ],
        );
        let at_least = FilterSet::all(vec![FilterNode::field("Price", MatchOp::Gte)]);
        let below = FilterSet::all(vec![FilterNode::nested(
            "Price",
            NestedFieldKind::Decimal,
            MatchOp::Lt,
        )]);

        // Act
        let expensive = executor
            .fetch(&at_least, &[], &InputBag::new().with("Price", "1"))
            .await
            .expect("fetch");
        let cheap = executor
            .fetch(&below, &[], &InputBag::new().with("Price", decimal("5")))
            .await
            .expect("fetch");

        // Assert
        assert_eq!(names(&expensive, "Documents"), vec!["Bolt"]);
        assert_eq!(names(&cheap, "Documents"), vec!["Nut"]);
    }

    #[tokio::test]
    async fn test_fetch_empty_filter_set_returns_everything() {
        // Arrange
        let executor = executor();

        // Act
        let outcome = executor
            .fetch(&FilterSet::default(), &[SortField::descending("Stock")], &InputBag::new())
            .await
            .expect("fetch");

        // Assert
        assert_eq!(names(&outcome, "Documents"), vec!["Pen", "Lamp", "Desk"]);
    }

    #[tokio::test]
    async fn test_fetch_reads_deferred_collection_from_inputs() {
        // Arrange
        let executor = executor_with(|c| c.server.collection = None);
        executor
            .store()
            .seed("shop", "archive", vec![doc! { "_id": 9_i64, "Name": "Old" }]);
        let inputs = InputBag::new().with(COLLECTION_NAME_INPUT, "archive");

        // Act
        let outcome = executor
            .fetch(&FilterSet::default(), &[], &inputs)
            .await
            .expect("fetch");

        // Assert
        assert_eq!(names(&outcome, "Documents"), vec!["Old"]);
    }

    #[tokio::test]
    async fn test_fetch_missing_deferred_setting() {
        // Arrange
        let executor = executor_with(|c| c.server.collection = None);

        // Act
        let result = executor.fetch(&FilterSet::default(), &[], &InputBag::new()).await;

        // Assert
        assert!(matches!(result, Err(Error::MissingInput(ref n)) if n == COLLECTION_NAME_INPUT));
    }

    #[tokio::test]
    async fn test_fetch_without_document_type_fails() {
        // Arrange
        let executor = executor_with(|c| c.server.document_type = None);

        // Act
        let result = executor.fetch(&FilterSet::default(), &[], &InputBag::new()).await;

        // Assert
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_fetch_missing_filter_input() {
        // Arrange
        let executor = executor();
        let filters = FilterSet::all(vec![FilterNode::field("Name", MatchOp::Equals)]);

        // Act
        let result = executor.fetch(&filters, &[], &InputBag::new()).await;

        // Assert
        assert!(matches!(result, Err(Error::MissingInput(ref n)) if n == "Name"));
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        // Arrange
        let executor = executor();
        executor.store().fail_next("connection reset");

        // Act
        let result = executor.fetch(&FilterSet::default(), &[], &InputBag::new()).await;

        // Assert
        let err = result.unwrap_err();
        assert!(err.is_store_error());
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_get_document_by_id() {
        // Arrange
        let executor = executor();

        // Act
        let found = executor
            .get_document(&InputBag::new().with(DOCUMENT_ID_INPUT, 2_i64))
            .await
            .expect("get");
        let missing = executor
            .get_document(&InputBag::new().with(DOCUMENT_ID_INPUT, 42_i64))
            .await
            .expect("get");

        // Assert
        let document = found.output(DOCUMENT_INPUT).and_then(Bson::as_document).expect("doc");
        assert_eq!(document.get_str("Name").expect("name"), "Lamp");
        assert_eq!(document.get("Id"), Some(&Bson::Int64(2)));
        assert_eq!(missing.output(DOCUMENT_INPUT), Some(&Bson::Null));
    }

    #[tokio::test]
    async fn test_get_document_requires_id() {
        // Arrange
        let executor = executor();

        // Act
        let result = executor
            .get_document(&InputBag::new().with(DOCUMENT_ID_INPUT, ""))
            .await;

        // Assert
        assert!(matches!(result, Err(Error::MissingInput(ref n)) if n == DOCUMENT_ID_INPUT));
    }

    #[tokio::test]
    async fn test_get_raw_document_as_json() {
        // Arrange
        let executor = executor_with(|c| c.server.document_type = None);
        let oid = ObjectId::new();
        executor
            .store()
            .seed("shop", "products", vec![doc! { "_id": oid, "Name": "Raw" }]);

        // Act
        let outcome = executor
            .get_raw_document(&InputBag::new().with(DOCUMENT_ID_INPUT, oid.to_hex()))
            .await
            .expect("raw");

        // Assert
        let text = outcome
            .output(DOCUMENT_INPUT)
            .and_then(Bson::as_str)
            .expect("json text");
        let value: serde_json::Value = serde_json::from_str(text).expect("valid json");
        assert_eq!(value["Name"], "Raw");
        assert_eq!(value["_id"]["$oid"], oid.to_hex());
    }

    #[tokio::test]
    async fn test_executors_share_registry_cache() {
        // Arrange
        let config = config();
        let registry = Arc::new(SchemaRegistry::new());
        registry.register_definitions(&config.types);
        let first = Executor::new(
            MemoryStore::new(),
            Arc::clone(&registry),
            config.server.clone(),
            config.limits.clone(),
        );
        let second = Executor::new(
            MemoryStore::new(),
            Arc::clone(&registry),
            config.server.clone(),
            config.limits.clone(),
        );

        // Act
        first
            .fetch(&FilterSet::default(), &[], &InputBag::new())
            .await
            .expect("fetch");
        let cached = first.registry().resolve("Product").expect("cached");
        let shared = second.registry().resolve("Product").expect("shared");

        // Assert
        assert!(Arc::ptr_eq(&cached, &shared));
    }

    // =========================================================================
    // Writes
    // =========================================================================

    #[tokio::test]
    async fn test_insert_document_folds_identifier() {
        // Arrange
        let executor = executor_with(|_| {});
        let inputs = InputBag::new().with(DOCUMENT_INPUT, doc! { "Id": 10_i64, "Name": "Rug" });

        // Act
        let outcome = executor.insert_document(&inputs).await.expect("insert");

        // Assert
        assert_eq!(outcome.output(DOCUMENT_ID_INPUT), Some(&Bson::Int64(10)));
        let stored = executor.store().documents("shop", "products");
        assert_eq!(stored, vec![doc! { "_id": 10_i64, "Name": "Rug" }]);
    }

    #[tokio::test]
    async fn test_insert_document_missing() {
        // Arrange
        let executor = executor();

        // Act
        let result = executor
            .insert_document(&InputBag::new().with(DOCUMENT_INPUT, Bson::Null))
            .await;

        // Assert
        assert!(matches!(result, Err(Error::MissingInput(ref n)) if n == DOCUMENT_INPUT));
    }

    #[tokio::test]
    async fn test_insert_documents_rejects_whole_batch() {
        // Arrange
        let executor = executor_with(|_| {});
        let inputs = InputBag::new().with(
            "Documents",
            vec![
                Bson::Document(doc! { "Name": "Ok" }),
                Bson::Document(doc! { "Colour": "red" }),
            ],
        );

        // Act
        let result = executor.insert_documents(&inputs).await;

        // Assert
        assert!(matches!(result, Err(Error::BatchValidation { index: 1, .. })));
        assert!(executor.store().documents("shop", "products").is_empty());
    }

    #[tokio::test]
    async fn test_insert_documents_returns_ids() {
        // Arrange
        let executor = executor_with(|_| {});
        let inputs = InputBag::new().with(
            "Documents",
            vec![
                Bson::Document(doc! { "Id": 5_i64, "Name": "A" }),
                Bson::Document(doc! { "Name": "B" }),
            ],
        );

        // Act
        let outcome = executor.insert_documents(&inputs).await.expect("insert");

        // Assert
        let ids = outcome.output("Document IDs").and_then(Bson::as_array).expect("ids");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], Bson::Int64(5));
        assert!(matches!(ids[1], Bson::ObjectId(_)));
    }

    #[tokio::test]
    async fn test_replace_document_not_found_without_upsert() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new()
            .with(DOCUMENT_ID_INPUT, 42_i64)
            .with(DOCUMENT_INPUT, doc! { "Name": "Ghost" });

        // Act
        let result = executor.replace_document(&inputs, false).await;

        // Assert
        let err = result.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(ref id) if id == "42"));
        assert!(!err.is_store_error());
        assert_eq!(executor.store().documents("shop", "products").len(), 3);
    }

    #[tokio::test]
    async fn test_replace_document_upserts() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new()
            .with(DOCUMENT_ID_INPUT, 42_i64)
            .with(DOCUMENT_INPUT, doc! { "Name": "Stool" });

        // Act
        let outcome = executor.replace_document(&inputs, true).await.expect("replace");

        // Assert
        assert!(outcome.is_success());
        let stored = executor.store().documents("shop", "products");
        assert_eq!(stored.len(), 4);
        assert!(stored.contains(&doc! { "_id": 42_i64, "Name": "Stool" }));
    }

    #[tokio::test]
    async fn test_replace_document_overwrites_existing() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new()
            .with(DOCUMENT_ID_INPUT, 1_i64)
            .with(DOCUMENT_INPUT, doc! { "Id": 1_i64, "Name": "Standing desk", "Price": 300.0 });

        // Act
        executor.replace_document(&inputs, false).await.expect("replace");

        // Assert
        let stored = executor.store().documents("shop", "products");
        assert_eq!(stored[0], doc! { "_id": 1_i64, "Name": "Standing desk", "Price": 300.0 });
    }

    #[tokio::test]
    async fn test_replace_documents_reports_unmatched_id() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new().with(
            "Documents",
            vec![
                Bson::Document(doc! { "Id": 1_i64, "Document": { "Name": "Desk v2" } }),
                Bson::Document(doc! { "Id": 77_i64, "Document": { "Name": "Nope" } }),
            ],
        );

        // Act
        let result = executor.replace_documents(&inputs, false).await;

        // Assert
        assert!(matches!(result, Err(Error::DocumentNotFound(ref id)) if id == "77"));
    }

    #[tokio::test]
    async fn test_replace_documents_validates_before_writing() {
        // Arrange
        let executor = executor();
        let items: Vec<Bson> = (1..=5_i64)
            .map(|i| {
                if i == 3 {
                    Bson::Document(doc! { "Document": { "Name": "no id" } })
                } else {
                    Bson::Document(doc! { "Id": i, "Document": { "Name": format!("p{i}") } })
                }
            })
            .collect();
        let inputs = InputBag::new().with("Documents", items);

        // Act
        let result = executor.replace_documents(&inputs, true).await;

        // Assert
        assert!(matches!(result, Err(Error::BatchValidation { index: 2, .. })));
        let names: Vec<_> = executor
            .store()
            .documents("shop", "products")
            .iter()
            .filter_map(|d| d.get_str("Name").ok().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["Desk", "Lamp", "Pen"]);
    }

    #[tokio::test]
    async fn test_replace_documents_malformed_item_reports_index() {
        // Arrange
        let executor = executor();
        let items = vec![
            Bson::Document(doc! { "Id": 1_i64, "Document": { "Name": "Desk" } }),
            Bson::Document(doc! { "Id": 2_i64, "Document": "not a document" }),
        ];
        let inputs = InputBag::new().with("Documents", items);

        // Act
        let result = executor.replace_documents(&inputs, false).await;

        // Assert
        match result {
            Err(err @ Error::BatchValidation { index: 1, .. }) => {
                assert_eq!(err.code(), "DOCFLOW-005");
                assert!(err.to_string().contains("invalid replace item"));
            }
            other => panic!("expected batch validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replace_documents_upserts_batch() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new().with(
            "Documents",
            vec![
                Bson::Document(doc! { "Id": 2_i64, "Document": { "Name": "Lamp", "Price": 25.0 } }),
                Bson::Document(doc! { "Id": 8_i64, "Document": { "Name": "Shelf" } }),
            ],
        );

        // Act
        let outcome = executor.replace_documents(&inputs, true).await.expect("replace");

        // Assert
        assert!(outcome.is_success());
        let stored = executor.store().documents("shop", "products");
        assert_eq!(stored.len(), 4);
        assert!(stored.contains(&doc! { "_id": 2_i64, "Name": "Lamp", "Price": 25.0 }));
    }

    #[tokio::test]
    async fn test_delete_document() {
        // Arrange
        let executor = executor();

        // Act
        let outcome = executor
            .delete_document(&InputBag::new().with(DOCUMENT_ID_INPUT, 1_i64))
            .await
            .expect("delete");

        // Assert
        assert_eq!(outcome.output(DELETED_COUNT_OUTPUT), Some(&Bson::Int64(1)));
        assert_eq!(executor.store().documents("shop", "products").len(), 2);
    }

    #[tokio::test]
    async fn test_delete_documents_error_path_when_nothing_deleted() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new().with("Document IDs", vec![Bson::Int64(90), Bson::Int64(91)]);

        // Act
        let strict = executor.delete_documents(&inputs, true).await.expect("delete");
        let lenient = executor.delete_documents(&inputs, false).await.expect("delete");

        // Assert
        assert_eq!(strict.path, OutcomePath::Error);
        assert_eq!(lenient.path, OutcomePath::Success);
    }

    #[tokio::test]
    async fn test_delete_documents_removes_listed() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new().with("Document IDs", vec![Bson::Int64(1), Bson::Int64(3)]);

        // Act
        let outcome = executor.delete_documents(&inputs, true).await.expect("delete");

        // Assert
        assert!(outcome.is_success());
        assert_eq!(outcome.output(DELETED_COUNT_OUTPUT), Some(&Bson::Int64(2)));
        let remaining = executor.store().documents("shop", "products");
        assert_eq!(remaining, vec![doc! { "_id": 2_i64, "Name": "Lamp", "Price": 20.0, "Stock": 10 }]);
    }

    #[tokio::test]
    async fn test_delete_documents_empty_list() {
        // Arrange
        let executor = executor();
        let inputs = InputBag::new().with("Document IDs", Vec::<Bson>::new());

        // Act
        let result = executor.delete_documents(&inputs, false).await;

        // Assert
        assert!(matches!(result, Err(Error::NothingToDelete(_))));
    }

    // =========================================================================
    // Administration
    // =========================================================================

    #[tokio::test]
    async fn test_list_rename_and_drop() {
        // Arrange
        let executor = executor();
        executor.store().seed("crm", "people", vec![doc! { "_id": 1 }]);

        // Act
        let databases = executor.list_databases(&InputBag::new()).await.expect("dbs");
        executor
            .rename_collection(
                &InputBag::new()
                    .with(OLD_COLLECTION_NAME_INPUT, "products")
                    .with(NEW_COLLECTION_NAME_INPUT, "catalog"),
            )
            .await
            .expect("rename");
        let collections = executor.list_collections(&InputBag::new()).await.expect("colls");
        let dropped = executor
            .drop_database(&InputBag::new())
            .await
            .expect("drop");

        // Assert
        assert_eq!(
            databases.output(DATABASE_NAMES_OUTPUT),
            Some(&Bson::Array(vec!["crm".into(), "shop".into()]))
        );
        assert_eq!(
            collections.output(COLLECTION_NAMES_OUTPUT),
            Some(&Bson::Array(vec!["catalog".into()]))
        );
        assert!(dropped.is_success());
        let after_drop = executor.list_databases(&InputBag::new()).await.expect("dbs");
        assert_eq!(
            after_drop.output(DATABASE_NAMES_OUTPUT),
            Some(&Bson::Array(vec!["crm".into()]))
        );
    }

    #[tokio::test]
    async fn test_rename_requires_names() {
        // Arrange
        let executor = executor();

        // Act
        let result = executor
            .rename_collection(&InputBag::new().with(OLD_COLLECTION_NAME_INPUT, "products"))
            .await;

        // Assert
        assert!(matches!(result, Err(Error::MissingInput(ref n)) if n == NEW_COLLECTION_NAME_INPUT));
    }
}
