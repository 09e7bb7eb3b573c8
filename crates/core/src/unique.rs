//! Unique-object resolution: merge a hash-identified tree into storage.
//!
//! Given a transaction and an idified tree, the [`Resolver`] replaces
//! every subtree with the canonical persisted row, creating rows only for
//! subtrees the store has never seen. Two identity schemes drive this,
//! selected per node type:
//!
//! - *Semantic key*: a fixed subset of the type's attributes whose
//!   equality defines "the same logical entity" — e.g. a generator is the
//!   same generator if name and version match, wherever it appears. Key
//!   attributes that are child references use the child's resolved row id,
//!   so children are always resolved before the parent lookup.
//! - *Content hash*: types whose identity is "this exact content"
//!   (analysis, finding, trace, custom-field bags) are looked up by the
//!   content id assigned in [`crate::hash`]. A hit proves the entire
//!   subtree is already stored, so its children are skipped wholesale.
//!
//! A per-transaction cache keyed by `(table, key)` keeps resolution
//! amortized O(1) per distinct node: at most one store lookup is issued
//! per distinct key, however often it recurs in the tree. The cache is
//! owned by the resolver and dies with it; it must never outlive the
//! transaction it was filled from.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Transaction};

use crate::db::DbResult;
use crate::model::{
    Analysis, Checksum, CustomFields, Failure, FieldValue, File, Finding, Function, Generator,
    Info, Issue, Location, Message, Metadata, Notes, Point, Range, State, Stats, Sut, SutKind,
    Trace,
};

/// Counters for the resolution work done inside one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Store lookups issued (cache misses).
    pub lookups: u64,
    /// Resolutions answered from the cache.
    pub cache_hits: u64,
    /// Rows inserted (lookups that found nothing).
    pub inserts: u64,
}

/// Resolution context for one document-import transaction.
///
/// Owns the resolution cache; create one per transaction and discard it on
/// any error path so no partial state leaks into a later import.
pub struct Resolver<'tx> {
    tx: &'tx Transaction<'tx>,
    cache: HashMap<(&'static str, String), i64>,
    stats: ResolverStats,
}

impl<'tx> Resolver<'tx> {
    pub fn new(tx: &'tx Transaction<'tx>) -> Self {
        Self { tx, cache: HashMap::new(), stats: ResolverStats::default() }
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Resolve a whole report tree and return the analysis row id.
    ///
    /// Requires the tree to be idified first; an empty root id is a
    /// caller contract violation.
    pub fn resolve_analysis(&mut self, analysis: &Analysis) -> DbResult<i64> {
        assert!(!analysis.id.is_empty(), "resolve_analysis requires an idified tree");

        if let Some(id) = self.cached("analysis", &analysis.id) {
            return Ok(id);
        }
        if let Some(id) = self.find_by_hash("analysis", &analysis.id)? {
            return Ok(self.remember("analysis", &analysis.id, id));
        }

        let metadata_id = self.resolve_metadata(&analysis.metadata)?;
        let customfields_id = self.resolve_opt_customfields(analysis.customfields.as_ref())?;

        self.stats.inserts += 1;
        self.tx.execute(
            r#"
            INSERT INTO analysis (hash, metadata_id, customfields_id)
            VALUES (?1, ?2, ?3)
            "#,
            params![analysis.id, metadata_id, customfields_id],
        )?;
        let analysis_id = self.tx.last_insert_rowid();

        // Finding rows carry the analysis foreign key, so they land after
        // the parent row. Order within the list is preserved by row id.
        for finding in &analysis.results {
            self.resolve_finding(finding, analysis_id)?;
        }

        Ok(self.remember("analysis", &analysis.id, analysis_id))
    }

    fn resolve_metadata(&mut self, metadata: &Metadata) -> DbResult<i64> {
        let generator_id = self.resolve_generator(&metadata.generator)?;
        let sut_id = metadata.sut.as_ref().map(|s| self.resolve_sut(s)).transpose()?;
        let file_id = metadata.file.as_ref().map(|f| self.resolve_file(f)).transpose()?;
        let stats_id = metadata.stats.as_ref().map(|s| self.resolve_stats(s)).transpose()?;

        let key = format!("{:?}", (generator_id, sut_id, file_id, stats_id));
        self.resolve_row(
            "metadata",
            key,
            |tx| {
                tx.query_row(
                    r#"
                    SELECT id FROM metadata
                    WHERE generator_id = ?1 AND sut_id IS ?2
                      AND file_id IS ?3 AND stats_id IS ?4
                    "#,
                    params![generator_id, sut_id, file_id, stats_id],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    r#"
                    INSERT INTO metadata (generator_id, sut_id, file_id, stats_id)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![generator_id, sut_id, file_id, stats_id],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_generator(&mut self, generator: &Generator) -> DbResult<i64> {
        let key = format!("{:?}", (&generator.name, &generator.version));
        self.resolve_row(
            "generator",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM generator WHERE name = ?1 AND version IS ?2",
                    params![generator.name, generator.version],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO generator (name, version) VALUES (?1, ?2)",
                    params![generator.name, generator.version],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    /// The unique key tuple depends on the variant: debian-source packages
    /// have no buildarch, so it is not part of their identity.
    fn resolve_sut(&mut self, sut: &Sut) -> DbResult<i64> {
        let kind = sut.kind.as_str();
        let key = match sut.kind {
            SutKind::DebianSource => {
                format!("{:?}", (kind, &sut.name, &sut.version, &sut.release))
            }
            SutKind::SourceRpm | SutKind::DebianBinary => {
                format!("{:?}", (kind, &sut.name, &sut.version, &sut.release, &sut.buildarch))
            }
        };
        let with_buildarch = !matches!(sut.kind, SutKind::DebianSource);
        self.resolve_row(
            "sut",
            key,
            |tx| {
                if with_buildarch {
                    tx.query_row(
                        r#"
                        SELECT id FROM sut
                        WHERE kind = ?1 AND name = ?2 AND version = ?3
                          AND "release" IS ?4 AND buildarch IS ?5
                        "#,
                        params![kind, sut.name, sut.version, sut.release, sut.buildarch],
                        |row| row.get(0),
                    )
                    .optional()
                } else {
                    tx.query_row(
                        r#"
                        SELECT id FROM sut
                        WHERE kind = ?1 AND name = ?2 AND version = ?3
                          AND "release" IS ?4
                        "#,
                        params![kind, sut.name, sut.version, sut.release],
                        |row| row.get(0),
                    )
                    .optional()
                }
            },
            |tx| {
                tx.execute(
                    r#"
                    INSERT INTO sut (kind, name, version, "release", buildarch)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![kind, sut.name, sut.version, sut.release, sut.buildarch],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_stats(&mut self, stats: &Stats) -> DbResult<i64> {
        let key = format!("{:?}", stats.wallclocktime);
        self.resolve_row(
            "stats",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM stats WHERE wallclocktime = ?1",
                    params![stats.wallclocktime],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO stats (wallclocktime) VALUES (?1)",
                    params![stats.wallclocktime],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_finding(&mut self, finding: &Finding, analysis_id: i64) -> DbResult<i64> {
        if let Some(id) = self.cached("finding", finding.id()) {
            return Ok(id);
        }
        if let Some(id) = self.find_by_hash("finding", finding.id())? {
            return Ok(self.remember("finding", finding.id(), id));
        }

        let row_id = match finding {
            Finding::Issue(issue) => self.insert_issue(issue, analysis_id)?,
            Finding::Failure(failure) => self.insert_failure(failure, analysis_id)?,
            Finding::Info(info) => self.insert_info(info, analysis_id)?,
        };
        Ok(self.remember("finding", finding.id(), row_id))
    }

    fn insert_issue(&mut self, issue: &Issue, analysis_id: i64) -> DbResult<i64> {
        let message_id = self.resolve_message(&issue.message)?;
        let notes_id = self.resolve_opt_notes(issue.notes.as_ref())?;
        let location_id = self.resolve_location(&issue.location)?;
        let trace_id = issue.trace.as_ref().map(|t| self.resolve_trace(t)).transpose()?;
        let customfields_id = self.resolve_opt_customfields(issue.customfields.as_ref())?;

        self.stats.inserts += 1;
        self.tx.execute(
            r#"
            INSERT INTO finding
                (hash, analysis_id, kind, cwe, testid, severity,
                 message_id, notes_id, location_id, trace_id, customfields_id)
            VALUES (?1, ?2, 'issue', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                issue.id,
                analysis_id,
                issue.cwe,
                issue.testid,
                issue.severity,
                message_id,
                notes_id,
                location_id,
                trace_id,
                customfields_id
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn insert_failure(&mut self, failure: &Failure, analysis_id: i64) -> DbResult<i64> {
        let location_id =
            failure.location.as_ref().map(|l| self.resolve_location(l)).transpose()?;
        let message_id = failure.message.as_ref().map(|m| self.resolve_message(m)).transpose()?;
        let customfields_id = self.resolve_opt_customfields(failure.customfields.as_ref())?;

        self.stats.inserts += 1;
        self.tx.execute(
            r#"
            INSERT INTO finding
                (hash, analysis_id, kind, failureid, location_id, message_id, customfields_id)
            VALUES (?1, ?2, 'failure', ?3, ?4, ?5, ?6)
            "#,
            params![
                failure.id,
                analysis_id,
                failure.failureid,
                location_id,
                message_id,
                customfields_id
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn insert_info(&mut self, info: &Info, analysis_id: i64) -> DbResult<i64> {
        let location_id = info.location.as_ref().map(|l| self.resolve_location(l)).transpose()?;
        let message_id = info.message.as_ref().map(|m| self.resolve_message(m)).transpose()?;
        let customfields_id = self.resolve_opt_customfields(info.customfields.as_ref())?;

        self.stats.inserts += 1;
        self.tx.execute(
            r#"
            INSERT INTO finding
                (hash, analysis_id, kind, infoid, location_id, message_id, customfields_id)
            VALUES (?1, ?2, 'info', ?3, ?4, ?5, ?6)
            "#,
            params![info.id, analysis_id, info.infoid, location_id, message_id, customfields_id],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn resolve_message(&mut self, message: &Message) -> DbResult<i64> {
        let key = format!("{:?}", &message.text);
        self.resolve_row(
            "message",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM message WHERE text = ?1",
                    params![message.text],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute("INSERT INTO message (text) VALUES (?1)", params![message.text])?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_notes(&mut self, notes: &Notes) -> DbResult<i64> {
        let key = format!("{:?}", &notes.text);
        self.resolve_row(
            "notes",
            key,
            |tx| {
                tx.query_row("SELECT id FROM notes WHERE text = ?1", params![notes.text], |row| {
                    row.get(0)
                })
                .optional()
            },
            |tx| {
                tx.execute("INSERT INTO notes (text) VALUES (?1)", params![notes.text])?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_opt_notes(&mut self, notes: Option<&Notes>) -> DbResult<Option<i64>> {
        notes.map(|n| self.resolve_notes(n)).transpose()
    }

    fn resolve_trace(&mut self, trace: &Trace) -> DbResult<i64> {
        if let Some(id) = self.cached("trace", &trace.id) {
            return Ok(id);
        }
        if let Some(id) = self.find_by_hash("trace", &trace.id)? {
            return Ok(self.remember("trace", &trace.id, id));
        }

        self.stats.inserts += 1;
        self.tx.execute("INSERT INTO trace (hash) VALUES (?1)", params![trace.id])?;
        let trace_id = self.tx.last_insert_rowid();

        for state in &trace.states {
            self.resolve_state(state, trace_id)?;
        }

        Ok(self.remember("trace", &trace.id, trace_id))
    }

    fn resolve_state(&mut self, state: &State, trace_id: i64) -> DbResult<i64> {
        let location_id = self.resolve_location(&state.location)?;
        let notes_id = self.resolve_opt_notes(state.notes.as_ref())?;

        let key = format!("{:?}", (location_id, notes_id));
        self.resolve_row(
            "state",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM state WHERE location_id = ?1 AND notes_id IS ?2",
                    params![location_id, notes_id],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO state (trace_id, location_id, notes_id) VALUES (?1, ?2, ?3)",
                    params![trace_id, location_id, notes_id],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_location(&mut self, location: &Location) -> DbResult<i64> {
        let file_id = self.resolve_file(&location.file)?;
        let function_id =
            location.function.as_ref().map(|f| self.resolve_function(f)).transpose()?;
        let point_id = location.point.as_ref().map(|p| self.resolve_point(p)).transpose()?;
        let range_id = location.range.as_ref().map(|r| self.resolve_range(r)).transpose()?;

        let key = format!("{:?}", (file_id, function_id, point_id, range_id));
        self.resolve_row(
            "location",
            key,
            |tx| {
                tx.query_row(
                    r#"
                    SELECT id FROM location
                    WHERE file_id = ?1 AND function_id IS ?2
                      AND point_id IS ?3 AND range_id IS ?4
                    "#,
                    params![file_id, function_id, point_id, range_id],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    r#"
                    INSERT INTO location (file_id, function_id, point_id, range_id)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![file_id, function_id, point_id, range_id],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_file(&mut self, file: &File) -> DbResult<i64> {
        let checksum_id = file.hash.as_ref().map(|c| self.resolve_checksum(c)).transpose()?;

        let key = format!("{:?}", (&file.givenpath, &file.abspath, checksum_id));
        self.resolve_row(
            "file",
            key,
            |tx| {
                tx.query_row(
                    r#"
                    SELECT id FROM file
                    WHERE givenpath = ?1 AND abspath IS ?2 AND checksum_id IS ?3
                    "#,
                    params![file.givenpath, file.abspath, checksum_id],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO file (givenpath, abspath, checksum_id) VALUES (?1, ?2, ?3)",
                    params![file.givenpath, file.abspath, checksum_id],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_checksum(&mut self, checksum: &Checksum) -> DbResult<i64> {
        let key = format!("{:?}", (&checksum.alg, &checksum.hexdigest));
        self.resolve_row(
            "checksum",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM checksum WHERE alg = ?1 AND hexdigest = ?2",
                    params![checksum.alg, checksum.hexdigest],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO checksum (alg, hexdigest) VALUES (?1, ?2)",
                    params![checksum.alg, checksum.hexdigest],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_function(&mut self, function: &Function) -> DbResult<i64> {
        let key = format!("{:?}", &function.name);
        self.resolve_row(
            "function",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM function WHERE name = ?1",
                    params![function.name],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute("INSERT INTO function (name) VALUES (?1)", params![function.name])?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_point(&mut self, point: &Point) -> DbResult<i64> {
        let key = format!("{:?}", (point.line, point.column));
        self.resolve_row(
            "point",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM point WHERE line = ?1 AND col = ?2",
                    params![point.line, point.column],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO point (line, col) VALUES (?1, ?2)",
                    params![point.line, point.column],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_range(&mut self, range: &Range) -> DbResult<i64> {
        let start_id = self.resolve_point(&range.start)?;
        let end_id = self.resolve_point(&range.end)?;

        let key = format!("{:?}", (start_id, end_id));
        self.resolve_row(
            "source_range",
            key,
            |tx| {
                tx.query_row(
                    "SELECT id FROM source_range WHERE start_id = ?1 AND end_id = ?2",
                    params![start_id, end_id],
                    |row| row.get(0),
                )
                .optional()
            },
            |tx| {
                tx.execute(
                    "INSERT INTO source_range (start_id, end_id) VALUES (?1, ?2)",
                    params![start_id, end_id],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    fn resolve_customfields(&mut self, customfields: &CustomFields) -> DbResult<i64> {
        if let Some(id) = self.cached("customfields", &customfields.id) {
            return Ok(id);
        }
        if let Some(id) = self.find_by_hash("customfields", &customfields.id)? {
            return Ok(self.remember("customfields", &customfields.id, id));
        }

        self.stats.inserts += 1;
        self.tx.execute("INSERT INTO customfields (hash) VALUES (?1)", params![customfields.id])?;
        let bag_id = self.tx.last_insert_rowid();

        // Field rows are plain children of the bag, not uniquified on
        // their own; the bag's content hash already dedupes whole bags.
        // They still count as inserts.
        for field in &customfields.fields {
            self.stats.inserts += 1;
            match &field.value {
                FieldValue::Int(value) => {
                    self.tx.execute(
                        "INSERT INTO intfield (customfields_id, name, value) VALUES (?1, ?2, ?3)",
                        params![bag_id, field.name, value],
                    )?;
                }
                FieldValue::Str(value) => {
                    self.tx.execute(
                        "INSERT INTO strfield (customfields_id, name, value) VALUES (?1, ?2, ?3)",
                        params![bag_id, field.name, value],
                    )?;
                }
            }
        }

        Ok(self.remember("customfields", &customfields.id, bag_id))
    }

    fn resolve_opt_customfields(
        &mut self,
        customfields: Option<&CustomFields>,
    ) -> DbResult<Option<i64>> {
        customfields.map(|cf| self.resolve_customfields(cf)).transpose()
    }

    /// Cache -> lookup -> insert ladder shared by every semantically-keyed
    /// type. `find` and `insert` see the same transaction the cache is
    /// scoped to.
    fn resolve_row(
        &mut self,
        table: &'static str,
        key: String,
        find: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<Option<i64>>,
        insert: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<i64>,
    ) -> DbResult<i64> {
        if let Some(id) = self.cached(table, &key) {
            return Ok(id);
        }

        self.stats.lookups += 1;
        let row_id = match find(self.tx)? {
            Some(id) => id,
            None => {
                self.stats.inserts += 1;
                insert(self.tx)?
            }
        };
        Ok(self.remember(table, &key, row_id))
    }

    fn cached(&mut self, table: &'static str, key: &str) -> Option<i64> {
        let hit = self.cache.get(&(table, key.to_string())).copied();
        if hit.is_some() {
            self.stats.cache_hits += 1;
        }
        hit
    }

    /// Content-hash lookup for the hash-keyed tables. Counts as one store
    /// lookup whether or not it finds a row.
    fn find_by_hash(&mut self, table: &'static str, hash: &str) -> DbResult<Option<i64>> {
        self.stats.lookups += 1;
        let sql = match table {
            "analysis" => "SELECT id FROM analysis WHERE hash = ?1",
            "finding" => "SELECT id FROM finding WHERE hash = ?1",
            "trace" => "SELECT id FROM trace WHERE hash = ?1",
            "customfields" => "SELECT id FROM customfields WHERE hash = ?1",
            other => unreachable!("no content-hash lookup for table {other}"),
        };
        Ok(self.tx.query_row(sql, params![hash], |row| row.get(0)).optional()?)
    }

    fn remember(&mut self, table: &'static str, key: &str, row_id: i64) -> i64 {
        self.cache.insert((table, key.to_string()), row_id);
        row_id
    }
}
