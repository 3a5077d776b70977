//! Bulk write planner.
//!
//! Every batch is validated as a whole before a single operation is built: a
//! bad item anywhere rejects the batch with [`Error::BatchValidation`] and
//! nothing reaches the store.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{self, IdentifierKind};
use crate::error::{Error, Result};
use crate::schema::{FieldKind, SchemaDescriptor, STORE_ID_FIELD};

/// Input name of bulk document lists.
pub const DOCUMENTS_INPUT: &str = "Documents";
/// Input name of identifier lists.
pub const DOCUMENT_IDS_INPUT: &str = "Document IDs";

/// One element of a bulk replace: the target identifier and the new document.
///
/// Carried in invocation inputs as `{Id: ..., Document: {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplaceItem {
    /// Identifier of the document to replace.
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Bson>,
    /// Replacement document.
    #[serde(rename = "Document", default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ReplaceItem {
    /// Creates a complete item.
    #[must_use]
    pub fn new(id: impl Into<Bson>, document: Document) -> Self {
        Self {
            id: Some(id.into()),
            document: Some(document),
        }
    }
}

/// A single replace-one write.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOperation {
    /// Identifier as supplied by the caller, for messages.
    pub id: Bson,
    /// `{_id: ...}` predicate.
    pub filter: Document,
    /// Document written in place of the match.
    pub replacement: Document,
    /// Insert when nothing matches.
    pub upsert: bool,
}

/// Plans validated write batches for one record type.
#[derive(Debug, Clone, Copy)]
pub struct WritePlanner<'a> {
    schema: &'a SchemaDescriptor,
    id_kind: IdentifierKind,
    max_batch_size: usize,
}

impl<'a> WritePlanner<'a> {
    /// Creates a planner without batch size limit.
    #[must_use]
    pub fn new(schema: &'a SchemaDescriptor, id_kind: IdentifierKind) -> Self {
        Self {
            schema,
            id_kind,
            max_batch_size: 0,
        }
    }

    /// Limits batches to `max` items (0 = unlimited).
    #[must_use]
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Identifier kind used for predicates.
    #[must_use]
    pub fn id_kind(&self) -> IdentifierKind {
        self.id_kind
    }

    /// Plans replace-one operations, in input order.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingInput`] for an empty batch
    /// - [`Error::BatchValidation`] for the first invalid item; no operation
    ///   is returned in that case
    pub fn plan_replacements(
        &self,
        items: &[ReplaceItem],
        upsert: bool,
    ) -> Result<Vec<ReplaceOperation>> {
        if items.is_empty() {
            return Err(Error::MissingInput(DOCUMENTS_INPUT.to_string()));
        }
        self.check_batch_size(items.len())?;

        let mut checked = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let entry = self
                .check_replace_item(item)
                .map_err(|reason| Error::BatchValidation { index, reason })?;
            checked.push(entry);
        }

        let operations: Vec<ReplaceOperation> = checked
            .into_iter()
            .map(|(id, encoded, document)| ReplaceOperation {
                id: id.clone(),
                filter: doc! { STORE_ID_FIELD: encoded.clone() },
                replacement: self.replacement(document, encoded),
                upsert,
            })
            .collect();
        debug!(
            operations = operations.len(),
            upsert,
            type_name = self.schema.type_name(),
            "Planned replacements"
        );
        Ok(operations)
    }

    /// Plans a membership predicate over the identifiers to delete.
    ///
    /// # Errors
    ///
    /// - [`Error::NothingToDelete`] for an empty list
    /// - [`Error::TypeCoercion`] for an identifier of the wrong kind
    pub fn plan_deletions(&self, ids: &[Bson]) -> Result<Document> {
        if ids.is_empty() {
            return Err(Error::NothingToDelete(DOCUMENT_IDS_INPUT.to_string()));
        }
        self.check_batch_size(ids.len())?;
        let filter = codec::membership_filter(ids, self.id_kind)?;
        debug!(ids = ids.len(), "Planned deletions");
        Ok(filter)
    }

    /// Checks and converts documents for insertion.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingInput`] for an empty batch
    /// - [`Error::BatchValidation`] for the first document that does not fit
    ///   the record type or holds an invalid identifier
    pub fn plan_insertions(&self, documents: &[Document]) -> Result<Vec<Document>> {
        if documents.is_empty() {
            return Err(Error::MissingInput(DOCUMENTS_INPUT.to_string()));
        }
        self.check_batch_size(documents.len())?;

        let mut planned = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            let stored = self
                .check_insert(document)
                .map_err(|reason| Error::BatchValidation { index, reason })?;
            planned.push(stored);
        }
        debug!(documents = planned.len(), "Planned insertions");
        Ok(planned)
    }

    /// Converts a stored document back to the record shape: `_id` is copied to
    /// the identifier member and string identifiers held as ObjectIds are
    /// rendered as hex.
    #[must_use]
    pub fn record_form(&self, stored: Document) -> Document {
        let Some(identifier) = self.schema.identifier_field() else {
            return stored;
        };
        let mut record = Document::new();
        for (key, value) in stored {
            if key == STORE_ID_FIELD {
                let value = match (identifier.kind, value) {
                    (FieldKind::String, Bson::ObjectId(oid)) => Bson::String(oid.to_hex()),
                    (_, other) => other,
                };
                record.insert(identifier.name.clone(), value);
            } else {
                record.insert(key, value);
            }
        }
        record
    }

    fn check_batch_size(&self, len: usize) -> Result<()> {
        if self.max_batch_size > 0 && len > self.max_batch_size {
            return Err(Error::BatchValidation {
                index: self.max_batch_size,
                reason: format!(
                    "batch holds {len} items but at most {} are allowed",
                    self.max_batch_size
                ),
            });
        }
        Ok(())
    }

    fn check_replace_item<'i>(
        &self,
        item: &'i ReplaceItem,
    ) -> std::result::Result<(&'i Bson, Bson, &'i Document), String> {
        if codec::is_blank_identifier(item.id.as_ref()) {
            return Err("replace item is missing its 'Id' value".to_string());
        }
        let Some(document) = item.document.as_ref() else {
            return Err("replace item 'Document' is null/missing".to_string());
        };
        self.schema
            .check_document(document)
            .map_err(|reason| format!("document does not match type: {reason}"))?;

        let id = item.id.as_ref().unwrap_or(&Bson::Null);
        let encoded = codec::encode_identifier(id, self.id_kind).map_err(|e| e.to_string())?;
        Ok((id, encoded, document))
    }

    fn check_insert(&self, document: &Document) -> std::result::Result<Document, String> {
        self.schema
            .check_document(document)
            .map_err(|reason| format!("document does not match type: {reason}"))?;

        let supplied = self
            .identifier_member(document)
            .filter(|id| !codec::is_blank_identifier(Some(id)))
            .cloned();
        match supplied {
            Some(id) => {
                let encoded =
                    codec::encode_identifier(&id, self.id_kind).map_err(|e| e.to_string())?;
                Ok(self.replacement(document, encoded))
            }
            // Blank identifiers are dropped so the store generates one.
            None => Ok(self.without_identifier(document)),
        }
    }

    /// Identifier value held by the record, under its member name or `_id`.
    fn identifier_member<'d>(&self, document: &'d Document) -> Option<&'d Bson> {
        self.schema
            .identifier_field()
            .and_then(|id| document.get(&id.name))
            .or_else(|| document.get(STORE_ID_FIELD))
    }

    /// Document with `_id` first and the identifier member folded into it.
    fn replacement(&self, document: &Document, id: Bson) -> Document {
        let mut stored = Document::new();
        stored.insert(STORE_ID_FIELD, id);
        for (key, value) in self.without_identifier(document) {
            stored.insert(key, value);
        }
        stored
    }

    fn without_identifier(&self, document: &Document) -> Document {
        let member = self.schema.identifier_field().map(|id| id.name);
        document
            .iter()
            .filter(|(key, _)| {
                key.as_str() != STORE_ID_FIELD && member.as_deref() != Some(key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
