//! # Docflow Core
//!
//! Filter compiler, identifier codec and bulk write planner for schemaless
//! document stores.
//!
//! Workflow steps describe what to read or write declaratively: a tree of
//! field filters, a sort list, a record type chosen by name and a bag of
//! named input values. This crate turns that description into native query
//! documents and validated write batches, and runs them through a
//! [`DocumentStore`] connector.
//!
//! ## Features
//!
//! - **Filter trees**: field, nested-path and AND/OR nodes with structural
//!   validation and duplicate-input detection
//! - **Identifier codec**: string, ObjectId and numeric identifiers mapped to
//!   `_id` predicates
//! - **Bulk planning**: whole-batch validation before any write
//! - **Runtime schemas**: record types registered by name, resolved lazily
//! - **In-memory store**: run every operation without a server
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docflow_core::{DocflowConfig, Executor, FilterNode, FilterSet, InputBag, MatchOp, MemoryStore};
//!
//! let config = DocflowConfig::load()?;
//! let executor = Executor::from_config(MemoryStore::new(), &config);
//!
//! let filters = FilterSet::all(vec![FilterNode::field("Status", MatchOp::Equals)]);
//! let inputs = InputBag::new().with("Status", "open");
//! let outcome = executor.fetch(&filters, &[], &inputs).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Identifier and count conversions go through try_from; the remaining casts
// are float narrowing checked at the call site.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

pub mod codec;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
#[cfg(test)]
mod executor_tests;
pub mod filter;
pub mod inputs;
pub mod planner;
pub mod schema;
pub mod sort;
pub mod store;
pub mod validation;

pub use codec::IdentifierKind;
pub use compiler::{CompiledFilter, FilterCompiler};
pub use config::{ConfigError, DocflowConfig};
pub use error::{Error, Result};
pub use executor::{Executor, OutcomePath, StepOutcome};
pub use filter::{Combinator, FilterNode, FilterSet, InputDeclaration, MatchOp, NestedFieldKind};
pub use inputs::InputBag;
pub use planner::{ReplaceItem, ReplaceOperation, WritePlanner};
pub use schema::{DocumentType, FieldKind, SchemaDescriptor, SchemaRegistry};
pub use sort::{SortField, SortOrder};
pub use store::{CollectionTarget, DocumentStore, MemoryStore};
pub use validation::{BreakLevel, ValidationIssue};
