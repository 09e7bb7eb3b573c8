use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use report_warehouse::{short_hash, to_import_inputs};
use warehouse_core::db::ReportDb;
use warehouse_core::hash::Idify;

/// Content-addressed warehouse for static-analysis reports.
///
/// This CLI is a thin wrapper around `warehouse-core` (exposed in code as
/// `warehouse_core`). All substantive logic lives in the library so it can
/// be tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "report-warehouse",
    version,
    about = "Content-addressed warehouse for static-analysis reports",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one or more report files into a warehouse database.
    ///
    /// A batch continues past per-document errors and reports a tally at
    /// the end; use `-` to read a single document from standard input.
    Import {
        /// Path to the warehouse database (created if absent).
        #[arg(long)]
        db: PathBuf,

        /// Drop and recreate the schema before importing (full reimport).
        #[arg(long, default_value_t = false)]
        reset: bool,

        /// Emit the batch report as JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Report files to import (`-` for standard input).
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Show per-table row counts for a warehouse database.
    Stats {
        /// Path to the warehouse database.
        #[arg(long)]
        db: PathBuf,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded import runs.
    Runs {
        /// Path to the warehouse database.
        #[arg(long)]
        db: PathBuf,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Parse a report and print its root content id without importing.
    Hash {
        /// Report file (`-` for standard input).
        input: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Import { db, reset, json, inputs } => import_command(&db, reset, json, &inputs),
        Command::Stats { db, json } => stats_command(&db, json),
        Command::Runs { db, json } => runs_command(&db, json),
        Command::Hash { input } => hash_command(&input),
    }
}

/// Batch-import reports. Per-document failures are printed and tallied
/// but never abort the batch or the process.
fn import_command(db_path: &Path, reset: bool, json: bool, inputs: &[String]) -> Result<()> {
    let db = ReportDb::open(db_path)
        .with_context(|| format!("Failed to open warehouse database at {}", db_path.display()))?;

    if reset {
        db.reset().context("Failed to reset warehouse schema")?;
    }

    let batch = to_import_inputs(inputs);
    let report = warehouse_core::import::import_inputs(&db, &batch)
        .context("Failed to record import bookkeeping")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for doc in &report.imported {
        println!(
            "  {} -> analysis {} ({} new row(s))",
            doc.input,
            short_hash(&doc.root_hash),
            doc.rows_inserted
        );
    }
    for failure in &report.failed {
        eprintln!("  FAILED {}: {}", failure.input, failure.error);
    }
    println!(
        "Imported {} report(s), {} failure(s)",
        report.imported.len(),
        report.failed.len()
    );

    Ok(())
}

/// Show row counts per content table.
fn stats_command(db_path: &Path, json: bool) -> Result<()> {
    let db = ReportDb::open(db_path)
        .with_context(|| format!("Failed to open warehouse database at {}", db_path.display()))?;

    let counts = db.table_counts().context("Failed to count rows")?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(table, count)| (table, serde_json::Value::from(count)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (table, count) in counts {
            println!("{table}: {count}");
        }
    }

    Ok(())
}

/// List import-run bookkeeping records.
fn runs_command(db_path: &Path, json: bool) -> Result<()> {
    let db = ReportDb::open(db_path)
        .with_context(|| format!("Failed to open warehouse database at {}", db_path.display()))?;

    let runs = db.list_import_runs().context("Failed to list import runs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!("Import runs ({}):", runs.len());
    if runs.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for run in runs {
        match (&run.root_hash, &run.error) {
            (Some(hash), _) => {
                println!("  - {} [{}] {} {}", run.input, run.status, short_hash(hash), run.imported_at)
            }
            (None, Some(error)) => {
                println!("  - {} [{}] {} ({})", run.input, run.status, run.imported_at, error)
            }
            (None, None) => println!("  - {} [{}] {}", run.input, run.status, run.imported_at),
        }
    }

    Ok(())
}

/// Parse and idify a report, printing the root content id.
fn hash_command(input: &str) -> Result<()> {
    let xml = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("Failed to read standard input")?;
        buf
    } else {
        fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?
    };

    let mut analysis = warehouse_core::parse::parse_report(&xml)
        .with_context(|| format!("Failed to parse {input}"))?;
    let root_hash = analysis.idify();
    println!("{root_hash}");

    Ok(())
}
