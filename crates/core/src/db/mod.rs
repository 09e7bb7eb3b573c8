//! SQLite persistence for hash-identified report trees.
//!
//! This module wraps a SQLite database storing:
//! - One row per distinct generator, sut, file, location, ... (the
//!   semantically-keyed types)
//! - One row per distinct analysis, finding, trace and custom-field bag
//!   (the content-hash-keyed types)
//! - Import-run bookkeeping rows
//!
//! Every semantic key tuple and every content-hash column carries a unique
//! index: the resolver's lookups run against these indexes, and they are
//! the schema-level backstop against duplicate rows from concurrent
//! sessions. Within one session the resolver (see [`crate::unique`]) never
//! relies on the constraints firing.

use std::path::Path;

use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Tables holding report content, in dependency order (parents of foreign
/// keys first). Used by `reset` (dropped in reverse) and by row-count
/// reporting.
pub const CONTENT_TABLES: &[&str] = &[
    "generator",
    "sut",
    "stats",
    "message",
    "notes",
    "checksum",
    "file",
    "function",
    "point",
    "source_range",
    "location",
    "trace",
    "state",
    "customfields",
    "intfield",
    "strfield",
    "metadata",
    "analysis",
    "finding",
];

/// Error type for warehouse database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    ///
    /// This is intentionally explicit so callers can surface a clear message
    /// instead of silently clobbering or misinterpreting data.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    /// A row-count request named a table outside the fixed schema.
    #[error("Unknown table: {name}")]
    UnknownTable { name: String },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// Bookkeeping record for one attempted document import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRunRecord {
    /// Document identifier (path, or `-` for standard input).
    pub input: String,
    /// `imported` or `failed`.
    pub status: String,
    /// Content id of the analysis root, when hashing got that far.
    pub root_hash: Option<String>,
    /// Error text for failed imports.
    pub error: Option<String>,
    /// RFC 3339 timestamp of the attempt.
    pub imported_at: String,
}

/// SQLite-backed report warehouse.
///
/// This is a thin wrapper around `rusqlite::Connection` that is responsible
/// for:
/// - Opening/creating the DB file.
/// - Applying schema migrations.
/// - Providing small, testable helpers for counts and bookkeeping.
///
/// The substantive insert/lookup logic lives in [`crate::unique`], which
/// runs against a [`Transaction`] obtained from [`ReportDb::transaction`].
#[derive(Debug)]
pub struct ReportDb {
    conn: Connection,
}

impl ReportDb {
    /// Open (or create) a warehouse database at the given path and ensure
    /// the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open a fresh in-memory warehouse. Mainly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer higher-level helpers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start the per-document transaction the resolver runs inside.
    ///
    /// One commit per document: either the whole resolved tree lands, or
    /// none of it does.
    pub fn transaction(&self) -> DbResult<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Drop and recreate the whole schema (full reimport / testing).
    pub fn reset(&self) -> DbResult<()> {
        for table in CONTENT_TABLES.iter().rev() {
            self.conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        }
        self.conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS import_runs;
            PRAGMA user_version = 0;
            "#,
        )?;
        apply_migrations(&self.conn)
    }

    /// Row count of one content table.
    ///
    /// Table names are interpolated into SQL, so only the fixed schema
    /// tables are accepted.
    pub fn count(&self, table: &str) -> DbResult<i64> {
        if !CONTENT_TABLES.contains(&table) {
            return Err(DbError::UnknownTable { name: table.to_string() });
        }
        let count: i64 =
            self.conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Row counts for every content table, in schema order.
    pub fn table_counts(&self) -> DbResult<Vec<(String, i64)>> {
        let mut out = Vec::with_capacity(CONTENT_TABLES.len());
        for table in CONTENT_TABLES {
            out.push((table.to_string(), self.count(table)?));
        }
        Ok(out)
    }

    /// Insert an import-run bookkeeping record and return its row id.
    pub fn insert_import_run(&self, record: &ImportRunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO import_runs (input, status, root_hash, error, imported_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![record.input, record.status, record.root_hash, record.error, record.imported_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all import runs (ordered by id).
    pub fn list_import_runs(&self) -> DbResult<Vec<ImportRunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT input, status, root_hash, error, imported_at
            FROM import_runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ImportRunRecord {
                input: row.get(0)?,
                status: row.get(1)?,
                root_hash: row.get(2)?,
                error: row.get(3)?,
                imported_at: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: full report schema + import_runs
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        // Initial schema. Both polymorphic hierarchies (sut, finding) use
        // single-table inheritance with a `kind` discriminator column.
        // `point.column` is stored as `col` and the range table as
        // `source_range` to stay clear of SQL keywords.
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS generator (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                name    TEXT NOT NULL,
                version TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_generator_name_version
                ON generator(name, version);

            CREATE TABLE IF NOT EXISTS sut (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                kind      TEXT NOT NULL,
                name      TEXT NOT NULL,
                version   TEXT NOT NULL,
                "release" TEXT,
                buildarch TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_sut_key
                ON sut(kind, name, version, "release", buildarch);

            CREATE TABLE IF NOT EXISTS stats (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                wallclocktime REAL NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_stats_wallclocktime
                ON stats(wallclocktime);

            CREATE TABLE IF NOT EXISTS message (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_message_text ON message(text);

            CREATE TABLE IF NOT EXISTS notes (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_notes_text ON notes(text);

            CREATE TABLE IF NOT EXISTS checksum (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                alg       TEXT NOT NULL,
                hexdigest TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_checksum_key
                ON checksum(alg, hexdigest);

            CREATE TABLE IF NOT EXISTS file (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                givenpath   TEXT NOT NULL,
                abspath     TEXT,
                checksum_id INTEGER REFERENCES checksum(id)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_file_key
                ON file(givenpath, abspath, checksum_id);

            CREATE TABLE IF NOT EXISTS function (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_function_name ON function(name);

            CREATE TABLE IF NOT EXISTS point (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                line INTEGER NOT NULL,
                col  INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_point_line_col ON point(line, col);

            CREATE TABLE IF NOT EXISTS source_range (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                start_id INTEGER NOT NULL REFERENCES point(id),
                end_id   INTEGER NOT NULL REFERENCES point(id)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_source_range_key
                ON source_range(start_id, end_id);

            CREATE TABLE IF NOT EXISTS location (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id     INTEGER NOT NULL REFERENCES file(id),
                function_id INTEGER REFERENCES function(id),
                point_id    INTEGER REFERENCES point(id),
                range_id    INTEGER REFERENCES source_range(id)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_location_key
                ON location(file_id, function_id, point_id, range_id);

            CREATE TABLE IF NOT EXISTS trace (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_trace_hash ON trace(hash);

            CREATE TABLE IF NOT EXISTS state (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id    INTEGER REFERENCES trace(id),
                location_id INTEGER NOT NULL REFERENCES location(id),
                notes_id    INTEGER REFERENCES notes(id)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_state_key
                ON state(location_id, notes_id);

            CREATE TABLE IF NOT EXISTS customfields (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_customfields_hash
                ON customfields(hash);

            CREATE TABLE IF NOT EXISTS intfield (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                customfields_id INTEGER NOT NULL REFERENCES customfields(id),
                name            TEXT NOT NULL,
                value           INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_intfield_customfields
                ON intfield(customfields_id);

            CREATE TABLE IF NOT EXISTS strfield (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                customfields_id INTEGER NOT NULL REFERENCES customfields(id),
                name            TEXT NOT NULL,
                value           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_strfield_customfields
                ON strfield(customfields_id);

            CREATE TABLE IF NOT EXISTS metadata (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                generator_id INTEGER NOT NULL REFERENCES generator(id),
                sut_id       INTEGER REFERENCES sut(id),
                file_id      INTEGER REFERENCES file(id),
                stats_id     INTEGER REFERENCES stats(id)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_metadata_key
                ON metadata(generator_id, sut_id, file_id, stats_id);

            CREATE TABLE IF NOT EXISTS analysis (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                hash            TEXT NOT NULL,
                metadata_id     INTEGER NOT NULL REFERENCES metadata(id),
                customfields_id INTEGER REFERENCES customfields(id)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_analysis_hash ON analysis(hash);

            CREATE TABLE IF NOT EXISTS finding (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                hash            TEXT NOT NULL,
                analysis_id     INTEGER NOT NULL REFERENCES analysis(id),
                kind            TEXT NOT NULL,
                cwe             INTEGER,
                testid          TEXT,
                severity        TEXT,
                message_id      INTEGER REFERENCES message(id),
                notes_id        INTEGER REFERENCES notes(id),
                location_id     INTEGER REFERENCES location(id),
                trace_id        INTEGER REFERENCES trace(id),
                customfields_id INTEGER REFERENCES customfields(id),
                failureid       TEXT,
                infoid          TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_finding_hash ON finding(hash);
            CREATE INDEX IF NOT EXISTS ix_finding_analysis ON finding(analysis_id);
            CREATE INDEX IF NOT EXISTS ix_finding_kind ON finding(kind);

            CREATE TABLE IF NOT EXISTS import_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                input       TEXT NOT NULL,
                status      TEXT NOT NULL,
                root_hash   TEXT,
                error       TEXT,
                imported_at TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
