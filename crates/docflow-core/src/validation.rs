//! Configuration-time validation issues.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakLevel {
    /// The configuration works but is probably not what was intended.
    Warning,
    /// The configuration cannot run.
    Fatal,
}

/// Kind of problem a [`ValidationIssue`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Malformed filter, sort or step setting.
    Structure,
    /// Input name bound more than once.
    DuplicateInput,
    /// Record type problem.
    Schema,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Severity.
    pub level: BreakLevel,
    /// Problem category.
    pub kind: IssueKind,
    /// Location in the configuration, e.g. `filters[0].children[1]`.
    pub path: String,
    /// Human readable message.
    pub message: String,
    /// Input name involved, for duplicate-input issues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_name: Option<String>,
}

impl ValidationIssue {
    /// Creates a fatal structural issue.
    #[must_use]
    pub fn fatal(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: BreakLevel::Fatal,
            kind: IssueKind::Structure,
            path: path.into(),
            message: message.into(),
            input_name: None,
        }
    }

    /// Creates a structural warning.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: BreakLevel::Warning,
            ..Self::fatal(path, message)
        }
    }

    /// Sets the issue kind.
    #[must_use]
    pub fn with_kind(mut self, kind: IssueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns true for fatal issues.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.level == BreakLevel::Fatal
    }

    /// Converts a fatal issue into the matching error.
    #[must_use]
    pub fn into_error(self) -> Error {
        match (self.kind, self.input_name) {
            (IssueKind::DuplicateInput, Some(name)) => Error::AmbiguousInput(name),
            _ => Error::Configuration(format!("{}: {}", self.path, self.message)),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            BreakLevel::Warning => "warning",
            BreakLevel::Fatal => "fatal",
        };
        write!(f, "{level} [{}] {}", self.path, self.message)
    }
}

/// Splits issues into the first fatal one (as an error) and the warnings.
///
/// # Errors
///
/// Returns the first fatal issue converted into an [`Error`].
pub fn into_warnings(issues: Vec<ValidationIssue>) -> Result<Vec<ValidationIssue>, Error> {
    let (fatal, warnings): (Vec<_>, Vec<_>) = issues.into_iter().partition(ValidationIssue::is_fatal);
    match fatal.into_iter().next() {
        Some(issue) => Err(issue.into_error()),
        None => Ok(warnings),
    }
}
