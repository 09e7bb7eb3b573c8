//! Batch import driver: parse -> idify -> uniquify -> commit, per document.
//!
//! A batch is fail-soft per item: one malformed or unstorable document is
//! recorded against its identifier and the batch moves on. Each document
//! gets its own transaction and its own [`Resolver`] (and therefore its
//! own resolution cache), so an aborted document leaves no partial rows
//! and no stale cache state behind. Every attempt is also recorded as an
//! `import_runs` bookkeeping row.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DbError, DbResult, ImportRunRecord, ReportDb};
use crate::hash::Idify;
use crate::parse::{self, ParseError};
use crate::unique::Resolver;

/// Error type for a single document import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Could not read the input at all.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or empty document.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Database error during resolution or commit.
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Db(DbError::Sql(err))
    }
}

/// One successfully imported document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportedDocument {
    /// Document identifier (path, or `-` for standard input).
    pub input: String,
    /// Content id of the analysis root.
    pub root_hash: String,
    /// Row id of the analysis in storage.
    pub analysis_row: i64,
    /// Rows this import actually created; 0 means the document was
    /// already fully present.
    pub rows_inserted: u64,
}

/// One failed document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportFailure {
    pub input: String,
    pub error: String,
}

/// Tally for a whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: Vec<ImportedDocument>,
    pub failed: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.imported.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Import one in-memory document.
///
/// Runs the full pipeline inside one transaction; on any error the
/// transaction rolls back and nothing of this document persists.
pub fn import_document(
    db: &ReportDb,
    input: &str,
    xml: &str,
) -> Result<ImportedDocument, ImportError> {
    let mut analysis = parse::parse_report(xml)?;
    let root_hash = analysis.idify();

    let tx = db.transaction()?;
    let (analysis_row, rows_inserted) = {
        let mut resolver = Resolver::new(&tx);
        let row = resolver.resolve_analysis(&analysis)?;
        (row, resolver.stats().inserts)
    };
    tx.commit()?;

    Ok(ImportedDocument { input: input.to_string(), root_hash, analysis_row, rows_inserted })
}

/// One batch input: a file on disk, or standard input (`-` on the
/// command line).
#[derive(Debug, Clone)]
pub enum ImportInput {
    Path(PathBuf),
    Stdin,
}

impl ImportInput {
    /// The document identifier used in reports and bookkeeping rows.
    pub fn label(&self) -> String {
        match self {
            ImportInput::Path(path) => path.display().to_string(),
            ImportInput::Stdin => "-".to_string(),
        }
    }

    fn read(&self) -> std::io::Result<String> {
        match self {
            ImportInput::Path(path) => fs::read_to_string(path),
            ImportInput::Stdin => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

/// Import a batch of report documents.
///
/// Per-document failures are collected in the returned report; only a
/// failure to write the bookkeeping rows themselves (a broken store)
/// aborts the batch.
pub fn import_inputs(db: &ReportDb, inputs: &[ImportInput]) -> DbResult<ImportReport> {
    let mut report = ImportReport::default();

    for source in inputs {
        let input = source.label();
        let outcome = source
            .read()
            .map_err(ImportError::from)
            .and_then(|xml| import_document(db, &input, &xml));

        match outcome {
            Ok(doc) => {
                db.insert_import_run(&ImportRunRecord {
                    input: input.clone(),
                    status: "imported".to_string(),
                    root_hash: Some(doc.root_hash.clone()),
                    error: None,
                    imported_at: Utc::now().to_rfc3339(),
                })?;
                report.imported.push(doc);
            }
            Err(err) => {
                let error = err.to_string();
                db.insert_import_run(&ImportRunRecord {
                    input: input.clone(),
                    status: "failed".to_string(),
                    root_hash: None,
                    error: Some(error.clone()),
                    imported_at: Utc::now().to_rfc3339(),
                })?;
                report.failed.push(ImportFailure { input, error });
            }
        }
    }

    Ok(report)
}
