//! Sort lists for fetch operations.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::validation::ValidationIssue;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortOrder {
    /// Value used in a sort document.
    #[must_use]
    pub const fn direction(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Field name or dotted path.
    pub field_name: String,
    /// Direction.
    #[serde(default)]
    pub order: SortOrder,
}

impl SortField {
    /// Ascending sort on `field_name`.
    #[must_use]
    pub fn ascending(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Descending sort on `field_name`.
    #[must_use]
    pub fn descending(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            order: SortOrder::Descending,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            SortOrder::Ascending => write!(f, "{} (ASC)", self.field_name),
            SortOrder::Descending => write!(f, "{} (DESC)", self.field_name),
        }
    }
}

/// Builds the ordered sort document; `None` for an empty list.
#[must_use]
pub fn sort_document(fields: &[SortField]) -> Option<Document> {
    if fields.is_empty() {
        return None;
    }
    let mut sort = Document::new();
    for field in fields {
        sort.insert(field.field_name.clone(), Bson::Int32(field.order.direction()));
    }
    Some(sort)
}

/// Reports sort keys without a field name.
#[must_use]
pub fn validation_issues(fields: &[SortField]) -> Vec<ValidationIssue> {
    fields
        .iter()
        .enumerate()
        .filter(|(_, field)| field.field_name.trim().is_empty())
        .map(|(index, _)| ValidationIssue::fatal(format!("sort[{index}]"), "Field name is required"))
        .collect()
}
