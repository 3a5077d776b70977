//! Filter compiler.
//!
//! Turns a [`FilterNode`] tree, the runtime record schema and the invocation
//! inputs into a native query document:
//!
//! | Operator    | Output                      |
//! |-------------|-----------------------------|
//! | `Equals`    | `{f: v}`                    |
//! | `NotEquals` | `{f: {$ne: v}}`             |
//! | `Gt`..`Lte` | `{f: {$gt: v}}` etc.        |
//! | `Exists`    | `{f: {$exists: true}}`      |
//! | AND / OR    | `{$and: [...]}` / `{$or: [...]}` |
//!
//! A combinator whose children leave a single predicate yields that predicate
//! unchanged; one that leaves none yields no predicate at all.

use bson::{doc, Bson, Document};
use tracing::{debug, warn};

use crate::codec::{self, IdentifierKind};
use crate::error::{Error, Result};
use crate::filter::{
    resolve_field_kind, Combinator, FilterNode, FilterSet, InputDeclaration, MatchOp,
};
use crate::inputs::InputBag;
use crate::schema::{FieldKind, SchemaDescriptor, STORE_ID_FIELD};
use crate::validation::{self, ValidationIssue};

/// Result of compiling a filter set.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    /// Query document; `{}` matches everything.
    pub predicate: Document,
    /// Non-fatal validation findings.
    pub warnings: Vec<ValidationIssue>,
}

/// Compiles filters against one schema and one set of inputs.
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler<'a> {
    schema: &'a SchemaDescriptor,
    inputs: &'a InputBag,
    id_kind_override: Option<IdentifierKind>,
}

impl<'a> FilterCompiler<'a> {
    /// Creates a compiler.
    #[must_use]
    pub fn new(schema: &'a SchemaDescriptor, inputs: &'a InputBag) -> Self {
        Self {
            schema,
            inputs,
            id_kind_override: None,
        }
    }

    /// Encodes inputs for the identifier member as `kind` instead of the
    /// member's declared field kind, matching how writes store `_id`.
    #[must_use]
    pub fn with_id_kind_override(mut self, kind: Option<IdentifierKind>) -> Self {
        self.id_kind_override = kind;
        self
    }

    /// Compiles one tree. `None` means the tree contributes no predicate.
    ///
    /// # Errors
    ///
    /// - [`Error::FieldNotFound`] for a field the schema does not declare
    /// - [`Error::MissingInput`] for an absent input value
    /// - [`Error::TypeCoercion`] for an input that does not fit the field kind
    pub fn compile(&self, node: &FilterNode) -> Result<Option<Document>> {
        match node {
            FilterNode::FieldMatch {
                field_name,
                match_op,
                ..
            } => {
                let kind = resolve_field_kind(self.schema, field_name).ok_or_else(|| {
                    Error::FieldNotFound {
                        field: field_name.clone(),
                        type_name: self.schema.type_name().to_string(),
                    }
                })?;
                let identifier = self
                    .schema
                    .identifier_field()
                    .filter(|id| id.name == *field_name);
                let key = if identifier.is_some() {
                    STORE_ID_FIELD
                } else {
                    field_name.as_str()
                };
                self.leaf(node, key, kind, *match_op, identifier.is_some())
                    .map(Some)
            }
            FilterNode::NestedFieldMatch {
                field_path,
                field_value_kind,
                match_op,
                ..
            } => self
                .leaf(node, field_path, field_value_kind.field_kind(), *match_op, false)
                .map(Some),
            FilterNode::CombineAnd { children } => self.compile_all(children, Combinator::And),
            FilterNode::CombineOr { children } => self.compile_all(children, Combinator::Or),
        }
    }

    /// Compiles a list of trees and joins the resulting predicates.
    ///
    /// # Errors
    ///
    /// Propagates the first error of any tree.
    pub fn compile_all(
        &self,
        nodes: &[FilterNode],
        combinator: Combinator,
    ) -> Result<Option<Document>> {
        let mut predicates = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(predicate) = self.compile(node)? {
                predicates.push(predicate);
            }
        }
        Ok(combine(predicates, combinator))
    }

    /// Validates and compiles a top-level filter set.
    ///
    /// Structural validation and duplicate-input detection run first; the
    /// first fatal issue aborts before any predicate is built. `reserved`
    /// lists inputs already read by the operation.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] or [`Error::AmbiguousInput`] for fatal
    /// validation issues, otherwise as [`FilterCompiler::compile`].
    pub fn compile_set(
        &self,
        set: &FilterSet,
        reserved: &[InputDeclaration],
        max_depth: usize,
    ) -> Result<CompiledFilter> {
        let warnings = validation::into_warnings(set.validation_issues(
            self.schema,
            reserved,
            max_depth,
        ))?;
        for issue in &warnings {
            warn!(path = %issue.path, "{}", issue.message);
        }

        let predicate = self
            .compile_all(&set.filters, set.combinator)?
            .unwrap_or_default();
        debug!(
            filters = set.filters.len(),
            predicate = %predicate,
            "Compiled filter set"
        );
        Ok(CompiledFilter {
            predicate,
            warnings,
        })
    }

    fn leaf(
        &self,
        node: &FilterNode,
        key: &str,
        kind: FieldKind,
        match_op: MatchOp,
        is_identifier: bool,
    ) -> Result<Document> {
        match match_op {
            MatchOp::Exists => return Ok(doc! { key: { "$exists": true } }),
            MatchOp::NotExists => return Ok(doc! { key: { "$exists": false } }),
            _ => {}
        }

        let input_name = node.input_name().unwrap_or(key);
        let raw = self.inputs.require(input_name)?;
        let value = self.coerce(raw, kind, is_identifier)?;

        Ok(match match_op.query_operator() {
            Some(operator) => doc! { key: { operator: value } },
            None => doc! { key: value },
        })
    }

    fn coerce(&self, raw: &Bson, kind: FieldKind, is_identifier: bool) -> Result<Bson> {
        if !is_identifier || matches!(raw, Bson::Null) {
            return kind.coerce(raw);
        }
        match self.id_kind_override {
            Some(id_kind) => codec::encode_identifier(raw, id_kind),
            // String identifiers may be stored as ObjectIds.
            None if kind == FieldKind::String => {
                codec::encode_identifier(raw, IdentifierKind::StringOrForeignId)
            }
            None => kind.coerce(raw),
        }
    }
}

/// Joins predicates with `$and`/`$or`; a single predicate is returned as is.
#[must_use]
pub fn combine(mut predicates: Vec<Document>, combinator: Combinator) -> Option<Document> {
    match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => {
            let joined: Vec<Bson> = predicates.into_iter().map(Bson::Document).collect();
            Some(doc! { combinator.query_operator(): joined })
        }
    }
}
