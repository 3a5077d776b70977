//! Runtime record schemas.
//!
//! The record type of a collection is chosen by name at run time. Instead of
//! reflecting over an open-ended type universe, every supported type registers
//! a constructor with a [`SchemaRegistry`]; resolving a name produces a
//! [`SchemaDescriptor`] that the compiler, codec and planner consult.
//!
//! ```rust,ignore
//! use docflow_core::schema::{FieldKind, SchemaDescriptor, SchemaRegistry};
//!
//! let registry = SchemaRegistry::new();
//! registry.register_descriptor(
//!     SchemaDescriptor::new("Customer")
//!         .field("Id", FieldKind::Int64)
//!         .field("Name", FieldKind::String),
//! );
//! let schema = registry.resolve("Customer").unwrap();
//! assert_eq!(schema.identifier_field().unwrap().name, "Id");
//! ```

use bson::{oid::ObjectId, Bson, Decimal128, Document};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::TypeDefinition;
use crate::error::{Error, Result};
use crate::validation::{IssueKind, ValidationIssue};

/// Candidate names for the identifier member, in probe order.
pub const IDENTIFIER_CANDIDATES: [&str; 3] = ["Id", "id", "_id"];

/// Name of the identifier field in stored documents.
pub const STORE_ID_FIELD: &str = "_id";

/// Declared kind of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// UTF-8 string.
    String,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Single precision float (stored as a BSON double).
    Float32,
    /// Double precision float.
    Float64,
    /// Decimal number.
    Decimal,
    /// Boolean.
    Boolean,
    /// UTC date-time.
    DateTime,
    /// Store-generated 12-byte object id.
    ObjectId,
    /// Embedded document.
    Document,
    /// Array of values.
    Array,
    /// Any value, no checks.
    Any,
}

impl FieldKind {
    /// Returns the lowercase name used in configuration files and messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::DateTime => "date_time",
            Self::ObjectId => "object_id",
            Self::Document => "document",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    /// Returns true if a stored value of this shape can be assigned to the field.
    ///
    /// `null` is assignable to every kind.
    #[must_use]
    pub fn accepts(self, value: &Bson) -> bool {
        match (self, value) {
            (_, Bson::Null) | (Self::Any, _) => true,
            (Self::String, Bson::String(_))
            | (Self::Int32, Bson::Int32(_))
            | (Self::Int64, Bson::Int32(_) | Bson::Int64(_))
            | (
                Self::Float32 | Self::Float64,
                Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_),
            )
            | (
                Self::Decimal,
                Bson::Decimal128(_) | Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_),
            )
            | (Self::Boolean, Bson::Boolean(_))
            | (Self::DateTime, Bson::DateTime(_))
            | (Self::ObjectId, Bson::ObjectId(_))
            | (Self::Document, Bson::Document(_))
            | (Self::Array, Bson::Array(_)) => true,
            _ => false,
        }
    }

    /// Converts a caller-supplied value to the representation of this kind.
    ///
    /// Numeric kinds accept any numeric value or numeric text that fits the
    /// target width; integral kinds reject fractional values. `null` passes
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeCoercion`] if the value cannot be represented.
    pub fn coerce(self, value: &Bson) -> Result<Bson> {
        if matches!(value, Bson::Null) {
            return Ok(Bson::Null);
        }

        let coerced = match (self, value) {
            (Self::Any, v) => Some(v.clone()),
            (Self::String, Bson::String(s)) => Some(Bson::String(s.clone())),
            (Self::Int32, v) => integral(v)
                .and_then(|n| i32::try_from(n).ok())
                .map(Bson::Int32),
            (Self::Int64, v) => integral(v).map(Bson::Int64),
            (Self::Float32, v) => numeric(v).and_then(narrow_f32).map(Bson::Double),
            (Self::Float64, v) => numeric(v).map(Bson::Double),
            (Self::Decimal, Bson::Decimal128(d)) => Some(Bson::Decimal128(*d)),
            (Self::Decimal, v) => decimal(v).map(Bson::Decimal128),
            (Self::Boolean, Bson::Boolean(b)) => Some(Bson::Boolean(*b)),
            (Self::Boolean, Bson::String(s)) => s.trim().parse::<bool>().ok().map(Bson::Boolean),
            (Self::DateTime, Bson::DateTime(d)) => Some(Bson::DateTime(*d)),
            (Self::DateTime, Bson::String(s)) => bson::DateTime::parse_rfc3339_str(s.trim())
                .ok()
                .map(Bson::DateTime),
            (Self::DateTime, Bson::Int64(ms)) => {
                Some(Bson::DateTime(bson::DateTime::from_millis(*ms)))
            }
            (Self::ObjectId, Bson::ObjectId(oid)) => Some(Bson::ObjectId(*oid)),
            (Self::ObjectId, Bson::String(s)) => {
                ObjectId::parse_str(s.trim()).ok().map(Bson::ObjectId)
            }
            (Self::Document, Bson::Document(d)) => Some(Bson::Document(d.clone())),
            (Self::Array, Bson::Array(a)) => Some(Bson::Array(a.clone())),
            _ => None,
        };

        coerced.ok_or_else(|| Error::coercion(value, self.name()))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reads an integer out of a numeric value or numeric text.
fn integral(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.is_finite() && f.fract() == 0.0 => {
            // i64::MAX is not representable as f64; stay strictly below 2^63.
            if *f >= -9_223_372_036_854_775_808.0 && *f < 9_223_372_036_854_775_808.0 {
                Some(*f as i64)
            } else {
                None
            }
        }
        Bson::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Reads a float out of a numeric value or numeric text.
fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        Bson::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Reads a decimal out of a numeric value or decimal text without going
/// through binary floating point for text and integers.
fn decimal(value: &Bson) -> Option<Decimal128> {
    let text = match value {
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => format!("{f:e}"),
        Bson::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal128::from_str(&text).ok()
}

/// Rounds to single precision, rejecting finite values outside the f32 range.
fn narrow_f32(value: f64) -> Option<f64> {
    let narrowed = value as f32;
    if value.is_finite() && narrowed.is_infinite() {
        None
    } else {
        Some(f64::from(narrowed))
    }
}

/// A named field of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as it appears in documents.
    pub name: String,
    /// Declared kind.
    pub kind: FieldKind,
}

/// Structural description of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    type_name: String,
    fields: IndexMap<String, FieldKind>,
    #[serde(default)]
    open: bool,
    #[serde(default)]
    untyped: bool,
}

impl SchemaDescriptor {
    /// Creates an empty, closed schema for the given type name.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
            open: false,
            untyped: false,
        }
    }

    /// Schema used when the record type is unresolved: documents are treated
    /// as untyped blobs and no identifier field is known.
    #[must_use]
    pub fn untyped() -> Self {
        Self {
            type_name: "(untyped)".to_string(),
            fields: IndexMap::new(),
            open: true,
            untyped: true,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Allows fields not declared by the schema.
    #[must_use]
    pub fn open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the declared fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &IndexMap<String, FieldKind> {
        &self.fields
    }

    /// Returns the declared field names in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    /// Returns true if undeclared fields are accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns true for the placeholder built by [`SchemaDescriptor::untyped`].
    #[must_use]
    pub fn is_untyped(&self) -> bool {
        self.untyped
    }

    /// Locates the identifier member by probing [`IDENTIFIER_CANDIDATES`] in order.
    #[must_use]
    pub fn identifier_field(&self) -> Option<FieldDescriptor> {
        IDENTIFIER_CANDIDATES.iter().find_map(|candidate| {
            self.field_kind(candidate).map(|kind| FieldDescriptor {
                name: (*candidate).to_string(),
                kind,
            })
        })
    }

    /// Checks that a document is structurally assignable to this type.
    ///
    /// Every field present must be declared (unless the schema is open) and
    /// hold a value of a compatible shape. Missing fields are allowed.
    ///
    /// # Errors
    ///
    /// Returns the reason the document was rejected.
    pub fn check_document(&self, document: &Document) -> std::result::Result<(), String> {
        let identifier = self.identifier_field();
        for (key, value) in document {
            let kind = match self.field_kind(key) {
                Some(kind) => kind,
                None if key == STORE_ID_FIELD => match &identifier {
                    Some(id) => id.kind,
                    None => continue,
                },
                None if self.open => continue,
                None => {
                    return Err(format!(
                        "field '{key}' is not defined on type '{}'",
                        self.type_name
                    ))
                }
            };

            // Identifier members may hold a store-generated ObjectId.
            let is_identifier = identifier.as_ref().is_some_and(|id| id.name == *key)
                || key == STORE_ID_FIELD;
            if is_identifier && matches!(value, Bson::ObjectId(_)) {
                continue;
            }

            if !kind.accepts(value) {
                return Err(format!(
                    "field '{key}' expects {kind} but the document holds {:?}",
                    value.element_type()
                ));
            }
        }
        Ok(())
    }

    /// Reports configuration issues for this type.
    #[must_use]
    pub fn validation_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if !self.untyped && self.identifier_field().is_none() {
            issues.push(
                ValidationIssue::warning(
                    "document_type",
                    format!(
                        "Type '{}' has no field named Id, id, or _id, and will not have its ID field loaded",
                        self.type_name
                    ),
                )
                .with_kind(IssueKind::Schema),
            );
        }
        issues
    }
}

impl From<&TypeDefinition> for SchemaDescriptor {
    fn from(def: &TypeDefinition) -> Self {
        Self {
            type_name: def.name.clone(),
            fields: def.fields.clone(),
            open: def.open,
            untyped: false,
        }
    }
}

/// A Rust type that can describe itself as a record schema.
pub trait DocumentType {
    /// Name the type is registered under.
    const TYPE_NAME: &'static str;

    /// Builds the schema descriptor.
    fn describe() -> SchemaDescriptor;
}

type SchemaConstructor = Arc<dyn Fn() -> SchemaDescriptor + Send + Sync>;

/// Registry of supported record types with a lazily populated cache.
#[derive(Default)]
pub struct SchemaRegistry {
    constructors: RwLock<HashMap<String, SchemaConstructor>>,
    cache: DashMap<String, Arc<SchemaDescriptor>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema constructor under `type_name`, replacing any previous one.
    pub fn register_constructor<F>(&self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> SchemaDescriptor + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!(type_name = %type_name, "Registering document type");
        self.constructors
            .write()
            .insert(type_name.clone(), Arc::new(constructor));
        self.cache.remove(&type_name);
    }

    /// Registers a Rust type.
    pub fn register<T: DocumentType + 'static>(&self) {
        self.register_constructor(T::TYPE_NAME, T::describe);
    }

    /// Registers a prebuilt descriptor under its own type name.
    pub fn register_descriptor(&self, descriptor: SchemaDescriptor) {
        let type_name = descriptor.type_name().to_string();
        self.register_constructor(type_name, move || descriptor.clone());
    }

    /// Registers every type definition from configuration.
    pub fn register_definitions(&self, definitions: &[TypeDefinition]) {
        for def in definitions {
            self.register_descriptor(SchemaDescriptor::from(def));
        }
    }

    /// Resolves a type name.
    ///
    /// Concurrent misses for the same name may each run the constructor; the
    /// last insert wins, which is harmless since constructors are deterministic.
    #[must_use]
    pub fn resolve(&self, type_name: &str) -> Option<Arc<SchemaDescriptor>> {
        if let Some(hit) = self.cache.get(type_name) {
            trace!(type_name, "Schema cache hit");
            return Some(Arc::clone(hit.value()));
        }

        let constructor = self.constructors.read().get(type_name).cloned()?;
        let descriptor = Arc::new(constructor());
        self.cache
            .insert(type_name.to_string(), Arc::clone(&descriptor));
        debug!(type_name, fields = descriptor.fields().len(), "Schema resolved");
        Some(descriptor)
    }

    /// Resolves a type name, failing when it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaNotFound`].
    pub fn require(&self, type_name: &str) -> Result<Arc<SchemaDescriptor>> {
        self.resolve(type_name)
            .ok_or_else(|| Error::SchemaNotFound(type_name.to_string()))
    }

    /// Resolves a type name, falling back to [`SchemaDescriptor::untyped`].
    #[must_use]
    pub fn resolve_or_untyped(&self, type_name: Option<&str>) -> Arc<SchemaDescriptor> {
        type_name
            .and_then(|name| self.resolve(name))
            .unwrap_or_else(|| Arc::new(SchemaDescriptor::untyped()))
    }

    /// Returns the registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of cached descriptors.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("types", &self.type_names())
            .field("cached", &self.cached_len())
            .finish()
    }
}
