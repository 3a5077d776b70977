//! Operation executor.
//!
//! An [`Executor`] binds one step configuration (connection settings and
//! record type) to a [`DocumentStore`]. Each operation takes an [`InputBag`],
//! compiles or plans what it needs, issues the store calls and reports a
//! [`StepOutcome`].

use std::sync::Arc;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::{self, IdentifierKind};
use crate::compiler::FilterCompiler;
use crate::config::{DocflowConfig, LimitsConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::inputs::{
    InputBag, COLLECTION_NAME_INPUT, CONNECTION_STRING_INPUT, DATABASE_NAME_INPUT,
};
use crate::planner::{ReplaceItem, WritePlanner, DOCUMENTS_INPUT, DOCUMENT_IDS_INPUT};
use crate::schema::{SchemaDescriptor, SchemaRegistry};
use crate::sort::{self, SortField};
use crate::store::{CollectionTarget, DocumentStore};
use crate::validation::{self, ValidationIssue};

/// Input carrying a single document.
pub const DOCUMENT_INPUT: &str = "Document";
/// Input carrying a single identifier.
pub const DOCUMENT_ID_INPUT: &str = "Document ID";
/// Input naming the collection to rename.
pub const OLD_COLLECTION_NAME_INPUT: &str = "Old Collection Name";
/// Input naming the renamed collection.
pub const NEW_COLLECTION_NAME_INPUT: &str = "New Collection Name";
/// Output listing database names.
pub const DATABASE_NAMES_OUTPUT: &str = "Database Names";
/// Output listing collection names.
pub const COLLECTION_NAMES_OUTPUT: &str = "Collection Names";
/// Output counting deleted documents.
pub const DELETED_COUNT_OUTPUT: &str = "Deleted Count";

/// Outcome path taken by an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomePath {
    /// The operation completed.
    #[default]
    Success,
    /// The operation ran but reported a handled failure.
    Error,
}

impl OutcomePath {
    /// Display name of the path.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Error => "Error",
        }
    }
}

/// Result of one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Path taken.
    pub path: OutcomePath,
    /// Named output values.
    pub outputs: InputBag,
}

impl StepOutcome {
    /// Success without outputs.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Error path without outputs.
    #[must_use]
    pub fn error() -> Self {
        Self {
            path: OutcomePath::Error,
            outputs: InputBag::new(),
        }
    }

    /// Adds an output, builder style.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.outputs.insert(name, value);
        self
    }

    /// Returns true for the success path.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.path == OutcomePath::Success
    }

    /// Looks up an output.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Bson> {
        self.outputs.get(name)
    }
}

/// Runs configured operations against a store.
pub struct Executor<S: DocumentStore> {
    store: S,
    registry: Arc<SchemaRegistry>,
    server: ServerConfig,
    limits: LimitsConfig,
}

impl<S: DocumentStore> Executor<S> {
    /// Creates an executor sharing an existing registry.
    #[must_use]
    pub fn new(
        store: S,
        registry: Arc<SchemaRegistry>,
        server: ServerConfig,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            registry,
            server,
            limits,
        }
    }

    /// Creates an executor whose registry holds the configured types.
    #[must_use]
    pub fn from_config(store: S, config: &DocflowConfig) -> Self {
        let registry = SchemaRegistry::new();
        registry.register_definitions(&config.types);
        Self::new(
            store,
            Arc::new(registry),
            config.server.clone(),
            config.limits.clone(),
        )
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Schema registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Connection settings.
    #[must_use]
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Reports configuration issues of the step settings.
    #[must_use]
    pub fn validation_issues(&self) -> Vec<ValidationIssue> {
        let Some(type_name) = self.server.document_type.as_deref() else {
            return vec![ValidationIssue::fatal("document_type", "No document type chosen")];
        };
        match self.registry.resolve(type_name) {
            Some(schema) => schema.validation_issues(),
            None => vec![ValidationIssue::fatal(
                "document_type",
                "Document type not found",
            )],
        }
    }

    /// Reports configuration issues of a fetch, including its filters and sort.
    #[must_use]
    pub fn fetch_validation_issues(
        &self,
        filters: &FilterSet,
        sort_fields: &[SortField],
    ) -> Vec<ValidationIssue> {
        let mut issues = self.validation_issues();
        let schema = self
            .server
            .document_type
            .as_deref()
            .and_then(|name| self.registry.resolve(name));
        if let Some(schema) = schema {
            issues.extend(filters.validation_issues(
                &schema,
                &self.server.reserved_inputs(),
                self.limits.max_filter_depth,
            ));
        }
        issues.extend(sort::validation_issues(sort_fields));
        issues
    }

    /// Returns documents matching the filters, in record form, as `Documents`.
    ///
    /// # Errors
    ///
    /// Configuration errors of the filters or sort, input errors while
    /// compiling and [`Error::Store`] from the store.
    pub async fn fetch(
        &self,
        filters: &FilterSet,
        sort_fields: &[SortField],
        inputs: &InputBag,
    ) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        validation::into_warnings(sort::validation_issues(sort_fields))?;

        let compiled = FilterCompiler::new(&schema, inputs)
            .with_id_kind_override(self.server.id_kind_override)
            .compile_set(
            filters,
            &self.server.reserved_inputs(),
            self.limits.max_filter_depth,
        )?;
        let sort_spec = sort::sort_document(sort_fields);
        let found = self
            .store
            .find(&target, &compiled.predicate, sort_spec.as_ref())
            .await?;

        info!(
            database = %target.database,
            collection = %target.collection,
            count = found.len(),
            "Fetched documents"
        );
        let planner = self.planner(&schema);
        let documents: Vec<Bson> = found
            .into_iter()
            .map(|document| Bson::Document(planner.record_form(document)))
            .collect();
        Ok(StepOutcome::success().with_output(DOCUMENTS_INPUT, documents))
    }

    /// Looks up one document by identifier as `Document` (null when absent).
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] without `Document ID`, otherwise codec and
    /// store errors.
    pub async fn get_document(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let found = self.find_by_id(&target, &schema, inputs).await?;

        info!(
            collection = %target.collection,
            found = found.is_some(),
            "Fetched document by ID"
        );
        let document = found.map_or(Bson::Null, |document| {
            Bson::Document(self.planner(&schema).record_form(document))
        });
        Ok(StepOutcome::success().with_output(DOCUMENT_INPUT, document))
    }

    /// Looks up one document by identifier, untyped, as relaxed extended JSON text.
    ///
    /// # Errors
    ///
    /// As [`Executor::get_document`], without requiring a record type.
    pub async fn get_raw_document(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let schema = SchemaDescriptor::untyped();
        let target = self.target(inputs)?;
        let found = self.find_by_id(&target, &schema, inputs).await?;

        info!(
            collection = %target.collection,
            found = found.is_some(),
            "Fetched raw document by ID"
        );
        let text = found.map_or(Bson::Null, |document| {
            Bson::String(Bson::Document(document).into_relaxed_extjson().to_string())
        });
        Ok(StepOutcome::success().with_output(DOCUMENT_INPUT, text))
    }

    /// Inserts the `Document` input, returning its identifier as `Document ID`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] without a document, [`Error::BatchValidation`]
    /// if it does not fit the record type, and store errors.
    pub async fn insert_document(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let document = document_input(inputs, DOCUMENT_INPUT)?;

        let mut planned = self
            .planner(&schema)
            .plan_insertions(std::slice::from_ref(&document))?;
        let stored = planned.pop().unwrap_or_default();
        let id = self.store.insert_one(&target, stored).await?;

        info!(collection = %target.collection, id = %codec::display_identifier(&id), "Inserted document");
        Ok(StepOutcome::success().with_output(DOCUMENT_ID_INPUT, id))
    }

    /// Inserts every document of the `Documents` input.
    ///
    /// # Errors
    ///
    /// [`Error::BatchValidation`] for the first unfit document; nothing is
    /// written in that case.
    pub async fn insert_documents(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let documents = document_list_input(inputs, DOCUMENTS_INPUT)?;

        let planned = self.planner(&schema).plan_insertions(&documents)?;
        let ids = self.store.insert_many(&target, planned).await?;

        info!(collection = %target.collection, count = ids.len(), "Inserted documents");
        Ok(StepOutcome::success().with_output(DOCUMENT_IDS_INPUT, ids))
    }

    /// Replaces the document named by `Document ID` with `Document`.
    ///
    /// # Errors
    ///
    /// [`Error::DocumentNotFound`] if nothing matched and `upsert` is off.
    pub async fn replace_document(&self, inputs: &InputBag, upsert: bool) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let document = document_input(inputs, DOCUMENT_INPUT)?;
        let id = inputs.require(DOCUMENT_ID_INPUT)?;
        if codec::is_blank_identifier(Some(id)) {
            return Err(Error::MissingInput(DOCUMENT_ID_INPUT.to_string()));
        }

        let item = ReplaceItem::new(id.clone(), document);
        let mut operations = self
            .planner(&schema)
            .plan_replacements(std::slice::from_ref(&item), upsert)?;
        let Some(operation) = operations.pop() else {
            return Err(Error::MissingInput(DOCUMENT_INPUT.to_string()));
        };
        let result = self
            .store
            .replace_one(&target, &operation.filter, operation.replacement, upsert)
            .await?;

        if !upsert && result.matched_count == 0 {
            return Err(Error::DocumentNotFound(codec::display_identifier(id)));
        }
        info!(
            collection = %target.collection,
            id = %codec::display_identifier(id),
            upserted = result.upserted_id.is_some(),
            "Replaced document"
        );
        Ok(StepOutcome::success())
    }

    /// Replaces every item of the `Documents` input as one unordered batch.
    ///
    /// Items are `{Id, Document}` pairs. The whole batch is validated before
    /// any write.
    ///
    /// # Errors
    ///
    /// [`Error::BatchValidation`] for the first invalid item, and
    /// [`Error::DocumentNotFound`] for the first item that matched nothing
    /// while `upsert` is off.
    pub async fn replace_documents(&self, inputs: &InputBag, upsert: bool) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let items = replace_items_input(inputs)?;

        let operations = self.planner(&schema).plan_replacements(&items, upsert)?;
        let ids: Vec<Bson> = operations.iter().map(|op| op.id.clone()).collect();
        let result = self.store.bulk_write(&target, operations, false).await?;

        if !upsert {
            if let Some(index) = result.unmatched().first().copied() {
                let id = ids.get(index).map_or_else(String::new, codec::display_identifier);
                return Err(Error::DocumentNotFound(id));
            }
        }
        info!(
            collection = %target.collection,
            matched = result.matched_count(),
            modified = result.modified_count(),
            upserted = result.upserted_count(),
            "Replaced documents"
        );
        Ok(StepOutcome::success())
    }

    /// Deletes the document named by `Document ID`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] without an identifier, and store errors.
    pub async fn delete_document(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let filter = self.id_filter(&schema, inputs)?;

        let deleted = self.store.delete_one(&target, &filter).await?;
        info!(collection = %target.collection, deleted, "Deleted document");
        Ok(StepOutcome::success().with_output(DELETED_COUNT_OUTPUT, count_value(deleted)))
    }

    /// Deletes every document named in `Document IDs`.
    ///
    /// With `error_on_none`, a call that deleted nothing takes the
    /// [`OutcomePath::Error`] path.
    ///
    /// # Errors
    ///
    /// [`Error::NothingToDelete`] for an empty list, codec and store errors.
    pub async fn delete_documents(
        &self,
        inputs: &InputBag,
        error_on_none: bool,
    ) -> Result<StepOutcome> {
        let schema = self.schema()?;
        let target = self.target(inputs)?;
        let ids = match inputs.require(DOCUMENT_IDS_INPUT)? {
            Bson::Array(ids) => ids.clone(),
            Bson::Null => return Err(Error::MissingInput(DOCUMENT_IDS_INPUT.to_string())),
            other => return Err(Error::coercion(other, "identifier list")),
        };

        let filter = self.planner(&schema).plan_deletions(&ids)?;
        let deleted = self.store.delete_many(&target, &filter).await?;
        info!(collection = %target.collection, requested = ids.len(), deleted, "Deleted documents");

        let outcome = if deleted == 0 && error_on_none {
            StepOutcome::error()
        } else {
            StepOutcome::success()
        };
        Ok(outcome.with_output(DELETED_COUNT_OUTPUT, count_value(deleted)))
    }

    /// Lists databases as `Database Names`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] without a connection string, and store errors.
    pub async fn list_databases(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let connection_string = self.connection_string(inputs)?;
        let names = self.store.list_database_names(connection_string).await?;
        info!(count = names.len(), "Listed databases");
        Ok(StepOutcome::success().with_output(DATABASE_NAMES_OUTPUT, names))
    }

    /// Lists collections of the database as `Collection Names`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] without connection string or database.
    pub async fn list_collections(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let connection_string = self.connection_string(inputs)?;
        let database = self.database(inputs)?;
        let names = self
            .store
            .list_collection_names(connection_string, database)
            .await?;
        info!(database, count = names.len(), "Listed collections");
        Ok(StepOutcome::success().with_output(COLLECTION_NAMES_OUTPUT, names))
    }

    /// Drops the database.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] without connection string or database.
    pub async fn drop_database(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let connection_string = self.connection_string(inputs)?;
        let database = self.database(inputs)?;
        self.store.drop_database(connection_string, database).await?;
        info!(database, "Dropped database");
        Ok(StepOutcome::success())
    }

    /// Renames `Old Collection Name` to `New Collection Name`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInput`] for any absent name, and store errors.
    pub async fn rename_collection(&self, inputs: &InputBag) -> Result<StepOutcome> {
        let connection_string = self.connection_string(inputs)?;
        let database = self.database(inputs)?;
        let old_name = inputs.require_str(OLD_COLLECTION_NAME_INPUT)?;
        let new_name = inputs.require_str(NEW_COLLECTION_NAME_INPUT)?;

        self.store
            .rename_collection(connection_string, database, old_name, new_name)
            .await?;
        info!(database, old_name, new_name, "Renamed collection");
        Ok(StepOutcome::success())
    }

    /// Resolves the configured record type.
    fn schema(&self) -> Result<Arc<SchemaDescriptor>> {
        let type_name = self
            .server
            .document_type
            .as_deref()
            .ok_or_else(|| Error::Configuration("No document type chosen".to_string()))?;
        self.registry.require(type_name)
    }

    fn id_kind(&self, schema: &SchemaDescriptor) -> IdentifierKind {
        IdentifierKind::resolve(schema, self.server.id_kind_override)
    }

    fn planner<'s>(&self, schema: &'s SchemaDescriptor) -> WritePlanner<'s> {
        WritePlanner::new(schema, self.id_kind(schema))
            .with_max_batch_size(self.limits.max_batch_size)
    }

    fn id_filter(&self, schema: &SchemaDescriptor, inputs: &InputBag) -> Result<Document> {
        let id = inputs.require(DOCUMENT_ID_INPUT)?;
        if codec::is_blank_identifier(Some(id)) {
            return Err(Error::MissingInput(DOCUMENT_ID_INPUT.to_string()));
        }
        codec::match_filter(id, self.id_kind(schema))
    }

    async fn find_by_id(
        &self,
        target: &CollectionTarget,
        schema: &SchemaDescriptor,
        inputs: &InputBag,
    ) -> Result<Option<Document>> {
        let filter = self.id_filter(schema, inputs)?;
        let found = self.store.find(target, &filter, None).await?;
        Ok(found.into_iter().next())
    }

    fn target(&self, inputs: &InputBag) -> Result<CollectionTarget> {
        Ok(CollectionTarget::new(
            self.connection_string(inputs)?,
            self.database(inputs)?,
            setting(&self.server.collection, inputs, COLLECTION_NAME_INPUT)?,
        ))
    }

    fn connection_string<'i>(&'i self, inputs: &'i InputBag) -> Result<&'i str> {
        setting(&self.server.connection_string, inputs, CONNECTION_STRING_INPUT)
    }

    fn database<'i>(&'i self, inputs: &'i InputBag) -> Result<&'i str> {
        setting(&self.server.database, inputs, DATABASE_NAME_INPUT)
    }
}

impl<S: DocumentStore> std::fmt::Debug for Executor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("server", &self.server)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Configured value, or the named input when the setting is deferred.
fn setting<'a>(configured: &'a Option<String>, inputs: &'a InputBag, input: &str) -> Result<&'a str> {
    match configured {
        Some(value) => Ok(value),
        None => inputs.require_str(input),
    }
}

fn document_input(inputs: &InputBag, name: &str) -> Result<Document> {
    match inputs.require(name)? {
        Bson::Document(document) => Ok(document.clone()),
        Bson::Null => Err(Error::MissingInput(name.to_string())),
        other => Err(Error::coercion(other, "document")),
    }
}

fn document_list_input(inputs: &InputBag, name: &str) -> Result<Vec<Document>> {
    let values = match inputs.require(name)? {
        Bson::Array(values) => values,
        Bson::Null => return Err(Error::MissingInput(name.to_string())),
        other => return Err(Error::coercion(other, "document list")),
    };
    values
        .iter()
        .enumerate()
        .map(|(index, value)| match value {
            Bson::Document(document) => Ok(document.clone()),
            other => Err(Error::BatchValidation {
                index,
                reason: format!("expected a document, found {:?}", other.element_type()),
            }),
        })
        .collect()
}

fn replace_items_input(inputs: &InputBag) -> Result<Vec<ReplaceItem>> {
    document_list_input(inputs, DOCUMENTS_INPUT)?
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            bson::from_document::<ReplaceItem>(item).map_err(|e| Error::BatchValidation {
                index,
                reason: format!("invalid replace item: {e}"),
            })
        })
        .collect()
}

fn count_value(count: u64) -> Bson {
    i64::try_from(count).map_or(Bson::Int64(i64::MAX), Bson::Int64)
}
