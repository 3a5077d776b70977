//! Document store connectors.
//!
//! The engine never talks to a server itself. Every read and write goes
//! through [`DocumentStore`]; each call is one opaque request that yields one
//! result or one [`crate::Error::Store`] failure, and is never retried here.

pub mod memory;


use async_trait::async_trait;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::planner::ReplaceOperation;

pub use memory::MemoryStore;

/// Location of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionTarget {
    /// Connection string of the server.
    pub connection_string: String,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl CollectionTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(
        connection_string: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            connection_string: connection_string.into(),
            database: database.into(),
            collection: collection.into(),
        }
    }
}

/// Outcome of one replace-one write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplaceResult {
    /// Documents matched by the filter (0 or 1).
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// Identifier of the inserted document, when the write upserted.
    pub upserted_id: Option<Bson>,
}

/// Per-item outcomes of a bulk write, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkWriteResult {
    /// One result per operation.
    pub results: Vec<ReplaceResult>,
}

impl BulkWriteResult {
    /// Total matched documents.
    #[must_use]
    pub fn matched_count(&self) -> u64 {
        self.results.iter().map(|r| r.matched_count).sum()
    }

    /// Total modified documents.
    #[must_use]
    pub fn modified_count(&self) -> u64 {
        self.results.iter().map(|r| r.modified_count).sum()
    }

    /// Number of operations that inserted a new document.
    #[must_use]
    pub fn upserted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.upserted_id.is_some())
            .count()
    }

    /// Positions of operations that neither matched nor upserted.
    #[must_use]
    pub fn unmatched(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.matched_count == 0 && r.upserted_id.is_none())
            .map(|(index, _)| index)
            .collect()
    }
}

/// Connector to a schemaless document store.
///
/// Implement this trait to run the engine against a real server.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns documents matching `filter`, ordered by `sort` when given.
    async fn find(
        &self,
        target: &CollectionTarget,
        filter: &Document,
        sort: Option<&Document>,
    ) -> Result<Vec<Document>>;

    /// Inserts one document, returning its identifier.
    async fn insert_one(&self, target: &CollectionTarget, document: Document) -> Result<Bson>;

    /// Inserts documents, returning their identifiers in order.
    async fn insert_many(
        &self,
        target: &CollectionTarget,
        documents: Vec<Document>,
    ) -> Result<Vec<Bson>>;

    /// Replaces the first document matching `filter`.
    async fn replace_one(
        &self,
        target: &CollectionTarget,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<ReplaceResult>;

    /// Submits replace operations as one batch.
    ///
    /// With `ordered = false` the store may apply them in any order.
    async fn bulk_write(
        &self,
        target: &CollectionTarget,
        operations: Vec<ReplaceOperation>,
        ordered: bool,
    ) -> Result<BulkWriteResult>;

    /// Deletes the first document matching `filter`, returning the count (0 or 1).
    async fn delete_one(&self, target: &CollectionTarget, filter: &Document) -> Result<u64>;

    /// Deletes every document matching `filter`, returning the count.
    async fn delete_many(&self, target: &CollectionTarget, filter: &Document) -> Result<u64>;

    /// Lists database names on the server.
    async fn list_database_names(&self, connection_string: &str) -> Result<Vec<String>>;

    /// Lists collection names of a database.
    async fn list_collection_names(
        &self,
        connection_string: &str,
        database: &str,
    ) -> Result<Vec<String>>;

    /// Drops a database.
    async fn drop_database(&self, connection_string: &str, database: &str) -> Result<()>;

    /// Renames a collection within its database.
    async fn rename_collection(
        &self,
        connection_string: &str,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()>;
}
