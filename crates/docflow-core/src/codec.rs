//! Identifier codec.
//!
//! Maps a logical identifier kind to its concrete value representation and
//! builds equality and membership predicates over the `_id` field.
//!
//! `StringOrForeignId` identifiers are dual: the `_id` field may hold either an
//! externally generated string or a store-generated ObjectId serialized as 24
//! hex characters. Text that parses as an ObjectId is matched as one, anything
//! else as a plain string, so callers never need to know which they hold.

use bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::error::{Error, Result};
use crate::schema::{FieldKind, SchemaDescriptor, STORE_ID_FIELD};

/// Logical identifier representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// String, or ObjectId when the text parses as one.
    #[default]
    StringOrForeignId,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Single precision float.
    Float32,
    /// Double precision float.
    Float64,
}

impl IdentifierKind {
    /// All identifier kinds.
    pub const ALL: [Self; 5] = [
        Self::StringOrForeignId,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
    ];

    /// Concrete value type used for identifiers of this kind.
    #[must_use]
    pub const fn value_type(self) -> FieldKind {
        match self {
            Self::StringOrForeignId => FieldKind::String,
            Self::Int32 => FieldKind::Int32,
            Self::Int64 => FieldKind::Int64,
            Self::Float32 => FieldKind::Float32,
            Self::Float64 => FieldKind::Float64,
        }
    }

    /// Infers the identifier kind from a schema's identifier field.
    ///
    /// Unresolved schemas, schemas without identifier field and non-numeric
    /// identifier fields all map to [`IdentifierKind::StringOrForeignId`].
    #[must_use]
    pub fn from_schema(schema: &SchemaDescriptor) -> Self {
        match schema.identifier_field().map(|field| field.kind) {
            Some(FieldKind::Int32) => Self::Int32,
            Some(FieldKind::Int64) => Self::Int64,
            Some(FieldKind::Float32) => Self::Float32,
            Some(FieldKind::Float64) => Self::Float64,
            _ => Self::StringOrForeignId,
        }
    }

    /// Uses the explicit override when present, otherwise infers from the schema.
    #[must_use]
    pub fn resolve(schema: &SchemaDescriptor, override_kind: Option<Self>) -> Self {
        override_kind.unwrap_or_else(|| Self::from_schema(schema))
    }

    /// Short name used in configuration and messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StringOrForeignId => "string_or_foreign_id",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts an identifier value to the representation of `kind`.
///
/// # Errors
///
/// Returns [`Error::TypeCoercion`] if the value cannot represent an identifier
/// of this kind. `null` is never a valid identifier.
pub fn encode_identifier(id: &Bson, kind: IdentifierKind) -> Result<Bson> {
    match (kind, id) {
        (_, Bson::Null) => Err(Error::coercion(id, kind.name())),
        (IdentifierKind::StringOrForeignId, Bson::String(text)) => {
            match ObjectId::parse_str(text) {
                Ok(oid) => {
                    trace!(id = %text, "Identifier parsed as ObjectId");
                    Ok(Bson::ObjectId(oid))
                }
                Err(_) => Ok(Bson::String(text.clone())),
            }
        }
        (IdentifierKind::StringOrForeignId, Bson::ObjectId(oid)) => Ok(Bson::ObjectId(*oid)),
        (IdentifierKind::StringOrForeignId, _) => Err(Error::coercion(id, kind.name())),
        (numeric, value) => numeric
            .value_type()
            .coerce(value)
            .map_err(|_| Error::coercion(id, numeric.name())),
    }
}

/// Builds an equality predicate `{_id: id}`.
///
/// # Errors
///
/// Returns [`Error::TypeCoercion`] if the identifier cannot be encoded.
pub fn match_filter(id: &Bson, kind: IdentifierKind) -> Result<Document> {
    let encoded = encode_identifier(id, kind)?;
    Ok(doc! { STORE_ID_FIELD: encoded })
}

/// Builds a membership predicate `{_id: {$in: [...]}}`.
///
/// Elements are encoded one by one; for `StringOrForeignId` ObjectIds and plain
/// strings may be mixed in the same set.
///
/// # Errors
///
/// Returns [`Error::TypeCoercion`] for the first element that cannot be encoded.
pub fn membership_filter(ids: &[Bson], kind: IdentifierKind) -> Result<Document> {
    let encoded = ids
        .iter()
        .map(|id| encode_identifier(id, kind))
        .collect::<Result<Vec<_>>>()?;
    Ok(doc! { STORE_ID_FIELD: { "$in": encoded } })
}

/// Renders an identifier for user-facing messages (strings without quotes).
#[must_use]
pub fn display_identifier(id: &Bson) -> String {
    match id {
        Bson::String(text) => text.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// Returns true if an identifier value is absent for practical purposes.
#[must_use]
pub fn is_blank_identifier(id: Option<&Bson>) -> bool {
    match id {
        None | Some(Bson::Null) => true,
        Some(Bson::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}
