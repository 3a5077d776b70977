//! In-process document store.
//!
//! Evaluates the query documents produced by the compiler and planner against
//! documents held in memory, so whole operations can run without a server.
//! Supported query syntax: `{f: v}` shorthand (with array membership), `$eq`,
//! `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`, `$and`,
//! `$or`, `$nor` and dotted paths into embedded documents.
//!
//! The connection string is ignored; databases are keyed by name only.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{BulkWriteResult, CollectionTarget, DocumentStore, ReplaceResult};
use crate::error::{Error, Result};
use crate::planner::ReplaceOperation;
use crate::schema::STORE_ID_FIELD;

type Collections = BTreeMap<String, Vec<Document>>;

/// Document store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: RwLock<BTreeMap<String, Collections>>,
    pending_failure: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds documents to a collection without any checks, creating it if needed.
    pub fn seed(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut databases = self.databases.write();
        databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Snapshot of a collection's documents in insertion order.
    #[must_use]
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next store call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.pending_failure.lock() = Some(message.into());
    }

    fn check_failure(&self) -> Result<()> {
        match self.pending_failure.lock().take() {
            Some(message) => Err(Error::Store(message)),
            None => Ok(()),
        }
    }

    fn with_collection<T>(
        &self,
        target: &CollectionTarget,
        f: impl FnOnce(&mut Vec<Document>) -> Result<T>,
    ) -> Result<T> {
        let mut databases = self.databases.write();
        let collection = databases
            .entry(target.database.clone())
            .or_default()
            .entry(target.collection.clone())
            .or_default();
        f(collection)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        target: &CollectionTarget,
        filter: &Document,
        sort: Option<&Document>,
    ) -> Result<Vec<Document>> {
        self.check_failure()?;
        let mut found: Vec<Document> = self
            .databases
            .read()
            .get(&target.database)
            .and_then(|db| db.get(&target.collection))
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
            .unwrap_or_default();
        if let Some(sort) = sort {
            found.sort_by(|a, b| compare_by_sort(a, b, sort));
        }
        debug!(collection = %target.collection, found = found.len(), "find");
        Ok(found)
    }

    async fn insert_one(&self, target: &CollectionTarget, document: Document) -> Result<Bson> {
        self.check_failure()?;
        self.with_collection(target, |collection| insert(collection, document))
    }

    async fn insert_many(
        &self,
        target: &CollectionTarget,
        documents: Vec<Document>,
    ) -> Result<Vec<Bson>> {
        self.check_failure()?;
        self.with_collection(target, |collection| {
            documents
                .into_iter()
                .map(|document| insert(collection, document))
                .collect()
        })
    }

    async fn replace_one(
        &self,
        target: &CollectionTarget,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<ReplaceResult> {
        self.check_failure()?;
        self.with_collection(target, |collection| {
            replace(collection, filter, replacement, upsert)
        })
    }

    async fn bulk_write(
        &self,
        target: &CollectionTarget,
        operations: Vec<ReplaceOperation>,
        ordered: bool,
    ) -> Result<BulkWriteResult> {
        self.check_failure()?;
        self.with_collection(target, |collection| {
            let mut results = Vec::with_capacity(operations.len());
            let mut first_error = None;
            for op in operations {
                match replace(collection, &op.filter, op.replacement, op.upsert) {
                    Ok(result) => results.push(result),
                    Err(err) if ordered => return Err(err),
                    Err(err) => {
                        results.push(ReplaceResult::default());
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(BulkWriteResult { results }),
            }
        })
    }

    async fn delete_one(&self, target: &CollectionTarget, filter: &Document) -> Result<u64> {
        self.check_failure()?;
        self.with_collection(target, |collection| {
            match collection.iter().position(|d| matches(d, filter)) {
                Some(index) => {
                    collection.remove(index);
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    async fn delete_many(&self, target: &CollectionTarget, filter: &Document) -> Result<u64> {
        self.check_failure()?;
        self.with_collection(target, |collection| {
            let before = collection.len();
            collection.retain(|d| !matches(d, filter));
            Ok((before - collection.len()) as u64)
        })
    }

    async fn list_database_names(&self, _connection_string: &str) -> Result<Vec<String>> {
        self.check_failure()?;
        Ok(self.databases.read().keys().cloned().collect())
    }

    async fn list_collection_names(
        &self,
        _connection_string: &str,
        database: &str,
    ) -> Result<Vec<String>> {
        self.check_failure()?;
        Ok(self
            .databases
            .read()
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn drop_database(&self, _connection_string: &str, database: &str) -> Result<()> {
        self.check_failure()?;
        self.databases.write().remove(database);
        Ok(())
    }

    async fn rename_collection(
        &self,
        _connection_string: &str,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.check_failure()?;
        let mut databases = self.databases.write();
        let db = databases
            .get_mut(database)
            .ok_or_else(|| Error::Store(format!("database '{database}' does not exist")))?;
        if db.contains_key(new_name) {
            return Err(Error::Store(format!(
                "target namespace '{database}.{new_name}' exists"
            )));
        }
        let documents = db.remove(old_name).ok_or_else(|| {
            Error::Store(format!("source namespace '{database}.{old_name}' does not exist"))
        })?;
        db.insert(new_name.to_string(), documents);
        Ok(())
    }
}

fn insert(collection: &mut Vec<Document>, document: Document) -> Result<Bson> {
    let document = with_id(document, || Bson::ObjectId(ObjectId::new()));
    let id = document.get(STORE_ID_FIELD).cloned().unwrap_or(Bson::Null);
    if collection
        .iter()
        .any(|d| d.get(STORE_ID_FIELD).is_some_and(|existing| values_equal(existing, &id)))
    {
        return Err(Error::Store(format!(
            "E11000 duplicate key error: _id {id}"
        )));
    }
    collection.push(document);
    Ok(id)
}

fn replace(
    collection: &mut Vec<Document>,
    filter: &Document,
    replacement: Document,
    upsert: bool,
) -> Result<ReplaceResult> {
    if let Some(existing) = collection.iter_mut().find(|d| matches(d, filter)) {
        let current_id = existing.get(STORE_ID_FIELD).cloned().unwrap_or(Bson::Null);
        if let Some(new_id) = replacement.get(STORE_ID_FIELD) {
            if !values_equal(new_id, &current_id) {
                return Err(Error::Store(
                    "the (immutable) field '_id' was found to have been altered".to_string(),
                ));
            }
        }
        let replacement = with_id(replacement, || current_id);
        let modified = u64::from(*existing != replacement);
        *existing = replacement;
        return Ok(ReplaceResult {
            matched_count: 1,
            modified_count: modified,
            upserted_id: None,
        });
    }

    if !upsert {
        return Ok(ReplaceResult::default());
    }

    // Upserted documents take the identifier of an `_id` equality filter.
    let filter_id = filter
        .get(STORE_ID_FIELD)
        .filter(|v| !is_operator_document(v))
        .cloned();
    let replacement = with_id(replacement, || {
        filter_id.unwrap_or_else(|| Bson::ObjectId(ObjectId::new()))
    });
    let id = insert(collection, replacement)?;
    Ok(ReplaceResult {
        matched_count: 0,
        modified_count: 0,
        upserted_id: Some(id),
    })
}

/// Puts `_id` first, generating it when absent.
fn with_id(document: Document, id: impl FnOnce() -> Bson) -> Document {
    if document.contains_key(STORE_ID_FIELD) {
        return document;
    }
    let mut stored = Document::new();
    stored.insert(STORE_ID_FIELD, id());
    for (key, value) in document {
        stored.insert(key, value);
    }
    stored
}

// =============================================================================
// Query evaluation
// =============================================================================

/// Evaluates a query document against a stored document.
///
/// An empty filter matches everything.
#[must_use]
pub fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => sub_filters(condition).all(|f| matches(document, f)),
        "$or" => sub_filters(condition).any(|f| matches(document, f)),
        "$nor" => !sub_filters(condition).any(|f| matches(document, f)),
        op if op.starts_with('$') => {
            warn!(operator = op, "Unsupported top-level query operator");
            false
        }
        path => field_matches(get_path(document, path), condition),
    })
}

fn sub_filters(condition: &Bson) -> impl Iterator<Item = &Document> {
    let items: &[Bson] = match condition {
        Bson::Array(items) => items,
        _ => &[],
    };
    items.iter().filter_map(Bson::as_document)
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Gets a value by dotted path, descending through embedded documents.
fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> bool {
    match condition {
        Bson::Document(ops) if is_operator_document(condition) => ops
            .iter()
            .all(|(op, argument)| operator_matches(value, op, argument)),
        expected => equals_or_contains(value, expected),
    }
}

fn operator_matches(value: Option<&Bson>, op: &str, argument: &Bson) -> bool {
    match op {
        "$eq" => equals_or_contains(value, argument),
        "$ne" => !equals_or_contains(value, argument),
        "$gt" => compares(value, argument, |o| o == Ordering::Greater),
        "$gte" => compares(value, argument, |o| o != Ordering::Less),
        "$lt" => compares(value, argument, |o| o == Ordering::Less),
        "$lte" => compares(value, argument, |o| o != Ordering::Greater),
        "$in" => in_list(value, argument),
        "$nin" => !in_list(value, argument),
        "$exists" => value.is_some() == truthy(argument),
        other => {
            warn!(operator = other, "Unsupported query operator");
            false
        }
    }
}

/// Equality, where a missing field equals `null` and arrays match any element.
fn equals_or_contains(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) => {
            values_equal(&Bson::Array(items.clone()), expected)
                || items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn in_list(value: Option<&Bson>, argument: &Bson) -> bool {
    match argument {
        Bson::Array(candidates) => candidates.iter().any(|c| equals_or_contains(value, c)),
        _ => false,
    }
}

fn compares(value: Option<&Bson>, argument: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, argument).is_some_and(&accept)),
        Some(actual) => compare_values(actual, argument).is_some_and(accept),
        None => false,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(f) => *f != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        // Display yields plain or exponent notation, both of which f64 parses.
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Compares two values for equality; numbers compare across widths.
fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Orders two values of the same type class; `None` if not comparable.
fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Rank of a value's type in cross-type sort order.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 2,
        Some(Bson::String(_) | Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        Some(_) => 11,
    }
}

fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let (x, y) = (get_path(a, path), get_path(b, path));
        let ordering = type_rank(x).cmp(&type_rank(y)).then_with(|| match (x, y) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        });
        let ordering = if as_number(direction).is_some_and(|d| d < 0.0) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
