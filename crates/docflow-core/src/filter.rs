//! Declarative document filters.
//!
//! A filter is a tree: leaves match one field against a named input value,
//! `CombineAnd`/`CombineOr` nodes join their children. Trees are built per
//! invocation (usually deserialized from JSON) and compiled by
//! [`crate::compiler::FilterCompiler`] into a native query document.
//!
//! ```rust,ignore
//! use docflow_core::filter::{FilterNode, MatchOp, NestedFieldKind};
//!
//! let filter = FilterNode::and(vec![
//!     FilterNode::field("Status", MatchOp::Equals),
//!     FilterNode::nested("address.zip", NestedFieldKind::String, MatchOp::Exists),
//! ]);
//! assert_eq!(filter.to_string(), "Status Equals AND address.zip Exists");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::schema::{FieldKind, SchemaDescriptor};
use crate::validation::{IssueKind, ValidationIssue};

/// Comparison applied by a leaf filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    /// field == value
    #[default]
    Equals,
    /// field != value
    NotEquals,
    /// field >= value
    Gte,
    /// field <= value
    Lte,
    /// field > value
    Gt,
    /// field < value
    Lt,
    /// field is present
    Exists,
    /// field is absent
    NotExists,
}

impl MatchOp {
    /// Returns true if the operator compares against an input value.
    #[must_use]
    pub const fn needs_input(self) -> bool {
        !matches!(self, Self::Exists | Self::NotExists)
    }

    /// Query operator for comparisons; `None` for `Equals`, which uses the
    /// `{field: value}` shorthand, and for the existence checks.
    #[must_use]
    pub const fn query_operator(self) -> Option<&'static str> {
        match self {
            Self::NotEquals => Some("$ne"),
            Self::Gte => Some("$gte"),
            Self::Lte => Some("$lte"),
            Self::Gt => Some("$gt"),
            Self::Lt => Some("$lt"),
            Self::Equals | Self::Exists | Self::NotExists => None,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Equals => "Equals",
            Self::NotEquals => "NotEquals",
            Self::Gte => "Gte",
            Self::Lte => "Lte",
            Self::Gt => "Gt",
            Self::Lt => "Lt",
            Self::Exists => "Exists",
            Self::NotExists => "NotExists",
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value kind of a nested field, which the record schema cannot describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedFieldKind {
    /// Text.
    #[default]
    String,
    /// 32-bit integer.
    Integer,
    /// UTC date-time.
    DateTime,
    /// Boolean.
    Boolean,
    /// Decimal number.
    Decimal,
}

impl NestedFieldKind {
    /// Field kind input values are coerced to.
    #[must_use]
    pub const fn field_kind(self) -> FieldKind {
        match self {
            Self::String => FieldKind::String,
            Self::Integer => FieldKind::Int32,
            Self::DateTime => FieldKind::DateTime,
            Self::Boolean => FieldKind::Boolean,
            Self::Decimal => FieldKind::Decimal,
        }
    }
}

/// How a list of filters is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// All filters must match.
    #[default]
    And,
    /// Any filter may match.
    Or,
}

impl Combinator {
    /// Query operator joining the predicates.
    #[must_use]
    pub const fn query_operator(self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
        }
    }

    const fn separator(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A node of a filter tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterNode {
    /// Match a top-level field declared by the record type.
    FieldMatch {
        /// Field name on the record type.
        field_name: String,
        /// Comparison.
        #[serde(default)]
        match_op: MatchOp,
        /// Input name override; defaults to the field name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_alias: Option<String>,
    },
    /// Match a field inside embedded documents by dotted path.
    NestedFieldMatch {
        /// Dotted path, e.g. `address.zip`.
        field_path: String,
        /// Kind input values are coerced to.
        #[serde(default)]
        field_value_kind: NestedFieldKind,
        /// Comparison.
        #[serde(default)]
        match_op: MatchOp,
        /// Input name override; defaults to the field path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_alias: Option<String>,
    },
    /// All children must match.
    CombineAnd {
        /// Child filters.
        #[serde(default)]
        children: Vec<FilterNode>,
    },
    /// Any child may match.
    CombineOr {
        /// Child filters.
        #[serde(default)]
        children: Vec<FilterNode>,
    },
}

impl FilterNode {
    /// Creates a top-level field match.
    #[must_use]
    pub fn field(field_name: impl Into<String>, match_op: MatchOp) -> Self {
        Self::FieldMatch {
            field_name: field_name.into(),
            match_op,
            input_alias: None,
        }
    }

    /// Creates a nested field match.
    #[must_use]
    pub fn nested(
        field_path: impl Into<String>,
        field_value_kind: NestedFieldKind,
        match_op: MatchOp,
    ) -> Self {
        Self::NestedFieldMatch {
            field_path: field_path.into(),
            field_value_kind,
            match_op,
            input_alias: None,
        }
    }

    /// Creates an AND combinator.
    #[must_use]
    pub fn and(children: Vec<Self>) -> Self {
        Self::CombineAnd { children }
    }

    /// Creates an OR combinator.
    #[must_use]
    pub fn or(children: Vec<Self>) -> Self {
        Self::CombineOr { children }
    }

    /// Sets the input alias of a leaf. Combinators are returned unchanged.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        match &mut self {
            Self::FieldMatch { input_alias, .. } | Self::NestedFieldMatch { input_alias, .. } => {
                *input_alias = Some(alias.into());
            }
            Self::CombineAnd { .. } | Self::CombineOr { .. } => {}
        }
        self
    }

    /// Returns true for `CombineAnd`/`CombineOr`.
    #[must_use]
    pub fn is_combinator(&self) -> bool {
        matches!(self, Self::CombineAnd { .. } | Self::CombineOr { .. })
    }

    /// Externally visible input name of a leaf: the alias if non-empty,
    /// otherwise the field name or path. `None` for combinators.
    #[must_use]
    pub fn input_name(&self) -> Option<&str> {
        let (field, alias) = match self {
            Self::FieldMatch {
                field_name,
                input_alias,
                ..
            } => (field_name, input_alias),
            Self::NestedFieldMatch {
                field_path,
                input_alias,
                ..
            } => (field_path, input_alias),
            Self::CombineAnd { .. } | Self::CombineOr { .. } => return None,
        };
        Some(
            alias
                .as_deref()
                .filter(|a| !a.is_empty())
                .unwrap_or(field.as_str()),
        )
    }

    /// Structural issues of this subtree.
    ///
    /// `path` locates the node in messages; `max_depth` bounds the nesting
    /// (a lone leaf has depth 1).
    #[must_use]
    pub fn validation_issues(&self, path: &str, max_depth: usize) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        self.collect_issues(path, 1, max_depth, &mut issues);
        issues
    }

    fn collect_issues(
        &self,
        path: &str,
        depth: usize,
        max_depth: usize,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if depth > max_depth {
            issues.push(ValidationIssue::fatal(
                path,
                format!("Filter nesting exceeds the maximum depth of {max_depth}"),
            ));
            return;
        }

        match self {
            Self::FieldMatch { field_name, .. } if field_name.trim().is_empty() => {
                issues.push(ValidationIssue::fatal(path, "Field name is required"));
            }
            Self::NestedFieldMatch { field_path, .. } if field_path.trim().is_empty() => {
                issues.push(ValidationIssue::fatal(path, "Field path is required"));
            }
            Self::FieldMatch { .. } | Self::NestedFieldMatch { .. } => {}
            Self::CombineAnd { children } | Self::CombineOr { children } => {
                match children.len() {
                    0 => issues.push(ValidationIssue::fatal(
                        path,
                        "At least one filter is required",
                    )),
                    1 => issues.push(ValidationIssue::warning(
                        path,
                        "Combine Filters is selected, but only one filter is defined",
                    )),
                    _ => {}
                }
                for (index, child) in children.iter().enumerate() {
                    let child_path = format!("{path}.children[{index}]");
                    child.collect_issues(&child_path, depth + 1, max_depth, issues);
                }
            }
        }
    }

    /// Inputs this subtree reads, in tree order.
    ///
    /// Existence checks read nothing. Field matches on fields the schema does
    /// not declare read nothing either, unless the schema is open, in which
    /// case the input is untyped.
    #[must_use]
    pub fn input_declarations(&self, schema: &SchemaDescriptor) -> Vec<InputDeclaration> {
        let mut declarations = Vec::new();
        self.collect_inputs(schema, &mut declarations);
        declarations
    }

    fn collect_inputs(&self, schema: &SchemaDescriptor, out: &mut Vec<InputDeclaration>) {
        match self {
            Self::FieldMatch {
                field_name,
                match_op,
                ..
            } => {
                if field_name.is_empty() || !match_op.needs_input() {
                    return;
                }
                if let Some(kind) = resolve_field_kind(schema, field_name) {
                    if let Some(name) = self.input_name() {
                        out.push(InputDeclaration::new(name, kind));
                    }
                }
            }
            Self::NestedFieldMatch {
                field_path,
                field_value_kind,
                match_op,
                ..
            } => {
                if field_path.is_empty() || !match_op.needs_input() {
                    return;
                }
                if let Some(name) = self.input_name() {
                    out.push(InputDeclaration::new(name, field_value_kind.field_kind()));
                }
            }
            Self::CombineAnd { children } | Self::CombineOr { children } => {
                for child in children {
                    child.collect_inputs(schema, out);
                }
            }
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        match self {
            Self::FieldMatch { match_op, .. } | Self::NestedFieldMatch { match_op, .. } => {
                write!(f, "{} {match_op}", self.input_name().unwrap_or_default())
            }
            Self::CombineAnd { children } => fmt_children(f, children, Combinator::And, nested),
            Self::CombineOr { children } => fmt_children(f, children, Combinator::Or, nested),
        }
    }
}

fn fmt_children(
    f: &mut fmt::Formatter<'_>,
    children: &[FilterNode],
    combinator: Combinator,
    nested: bool,
) -> fmt::Result {
    match children {
        [] => f.write_str("(No filters)"),
        [only] => only.fmt_nested(f, false),
        _ => {
            if nested {
                f.write_str("(")?;
            }
            for (index, child) in children.iter().enumerate() {
                if index > 0 {
                    f.write_str(combinator.separator())?;
                }
                child.fmt_nested(f, true)?;
            }
            if nested {
                f.write_str(")")?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for FilterNode {
    /// Renders e.g. `Field2 Exists AND (Desc Equals OR Name Equals)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, false)
    }
}

/// Field kind a top-level field match compares against: the declared kind, or
/// `Any` for undeclared fields of an open schema.
pub(crate) fn resolve_field_kind(schema: &SchemaDescriptor, field_name: &str) -> Option<FieldKind> {
    schema
        .field_kind(field_name)
        .or_else(|| schema.is_open().then_some(FieldKind::Any))
}

/// An input an operation reads, with the kind its value is coerced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDeclaration {
    /// Input name.
    pub name: String,
    /// Expected kind.
    pub kind: FieldKind,
}

impl InputDeclaration {
    /// Creates a declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Structural issues of a whole filter set, located as `filters[i]...`.
#[must_use]
pub fn set_validation_issues(filters: &[FilterNode], max_depth: usize) -> Vec<ValidationIssue> {
    filters
        .iter()
        .enumerate()
        .flat_map(|(index, filter)| filter.validation_issues(&format!("filters[{index}]"), max_depth))
        .collect()
}

/// Reports input names bound more than once across a filter set.
///
/// `reserved` lists inputs the operation already reads (deferred connection
/// settings); they take precedence in declaration order. A name reused with
/// the same kind is a warning, with a different kind a fatal issue. Each name
/// is reported once; warnings come before fatal issues.
#[must_use]
pub fn detect_duplicate_inputs(
    filters: &[FilterNode],
    schema: &SchemaDescriptor,
    reserved: &[InputDeclaration],
) -> Vec<ValidationIssue> {
    let mut declared: HashMap<String, FieldKind> = HashMap::new();
    for input in reserved {
        declared.entry(input.name.clone()).or_insert(input.kind);
    }

    let mut reused = BTreeSet::new();
    let mut conflicting = BTreeSet::new();
    for input in filters.iter().flat_map(|f| f.input_declarations(schema)) {
        match declared.get(&input.name) {
            None => {
                declared.insert(input.name, input.kind);
            }
            Some(kind) if *kind == input.kind => {
                reused.insert(input.name);
            }
            Some(_) => {
                conflicting.insert(input.name);
            }
        }
    }

    let warnings = reused.into_iter().map(|name| {
        let mut issue = ValidationIssue::warning(
            "filters",
            format!("Multiple filters use the name '{name}'. The same input value will be used for each."),
        )
        .with_kind(IssueKind::DuplicateInput);
        issue.input_name = Some(name);
        issue
    });
    let fatals = conflicting.into_iter().map(|name| {
        let mut issue = ValidationIssue::fatal(
            "filters",
            format!("Multiple filters use the name '{name}' and the types do not match."),
        )
        .with_kind(IssueKind::DuplicateInput);
        issue.input_name = Some(name);
        issue
    });
    warnings.chain(fatals).collect()
}

/// A top-level list of filters joined by one combinator.
///
/// An empty set matches every document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    /// Filters, compiled in order.
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    /// How the filters are joined.
    #[serde(default)]
    pub combinator: Combinator,
}

impl FilterSet {
    /// Creates a set.
    #[must_use]
    pub fn new(filters: Vec<FilterNode>, combinator: Combinator) -> Self {
        Self {
            filters,
            combinator,
        }
    }

    /// Creates an AND-joined set.
    #[must_use]
    pub fn all(filters: Vec<FilterNode>) -> Self {
        Self::new(filters, Combinator::And)
    }

    /// Creates an OR-joined set.
    #[must_use]
    pub fn any(filters: Vec<FilterNode>) -> Self {
        Self::new(filters, Combinator::Or)
    }

    /// Returns true if the set has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Structural and duplicate-input issues of the whole set.
    #[must_use]
    pub fn validation_issues(
        &self,
        schema: &SchemaDescriptor,
        reserved: &[InputDeclaration],
        max_depth: usize,
    ) -> Vec<ValidationIssue> {
        let mut issues = set_validation_issues(&self.filters, max_depth);
        issues.extend(detect_duplicate_inputs(&self.filters, schema, reserved));
        issues
    }

    /// Inputs the set reads, first declaration of each name only.
    #[must_use]
    pub fn input_declarations(&self, schema: &SchemaDescriptor) -> Vec<InputDeclaration> {
        let mut seen = BTreeSet::new();
        self.filters
            .iter()
            .flat_map(|f| f.input_declarations(schema))
            .filter(|d| seen.insert(d.name.clone()))
            .collect()
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_children(f, &self.filters, self.combinator, false)
    }
}
