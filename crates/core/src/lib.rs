//! warehouse-core
//!
//! Core library for a content-addressed warehouse of static-analysis
//! reports.
//!
//! A report is a tree rooted at an [`model::Analysis`]: which tool ran
//! ([`model::Generator`]), what it ran against ([`model::Sut`]), and a list
//! of findings with source locations. This crate ingests such trees into a
//! SQLite database while guaranteeing that structurally identical subtrees
//! are stored exactly once:
//!
//! - [`hash`] assigns every node a deterministic content id, bottom-up.
//! - [`unique`] replaces every subtree with the canonical persisted row,
//!   looked up either by a semantic unique key or by content id.
//! - [`db`] owns the relational schema and its unique indexes.
//! - [`parse`] deserializes the XML wire format into the document model.
//! - [`import`] drives parse -> idify -> uniquify -> commit per document,
//!   fail-soft across a batch.
//!
//! All substantive logic lives here so it is fully testable and reusable
//! from multiple frontends (CLI, bindings, etc.).

pub mod model;
pub mod hash;
pub mod unique;
pub mod db;
pub mod parse;
pub mod import;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
