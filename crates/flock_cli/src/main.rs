//! Operator entry point for the education engine.
//!
//! # Responsibility
//! - Drain due participant-cleanup messages from a database file.
//! - Audit one term's cached counters and matrix against live rows.
//! - Backfill a term's missing attendance cells.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flock_core::{
    in_transaction, init_logging, open_db, AttendanceMatrixManager, CleanupHandler, EngineConfig,
    EngineError, SqliteEducationRepository, TermAggregateManager, TermAudit, TenantId, TermId,
};
use log::info;

/// Maintenance commands for a flock database.
#[derive(Debug, Parser)]
#[command(
    name = "flock",
    version = flock_core::core_version(),
    about = "Education program consistency engine"
)]
struct Cli {
    /// Directory for rotating log files; logging stays off when unset.
    #[arg(long, env = "FLOCK_LOG_DIR", global = true)]
    log_dir: Option<String>,

    /// Log level for the file backend.
    #[arg(long, env = "FLOCK_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Optional engine config (JSON, camelCase keys).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deliver every participant-cleanup message that is due now.
    DrainCleanup {
        /// Path to the SQLite database.
        db: PathBuf,
    },
    /// Compare a term's cached counters with its live rows.
    Audit {
        db: PathBuf,
        tenant: TenantId,
        term: TermId,
    },
    /// Create the attendance cells a term is missing.
    Reconcile {
        db: PathBuf,
        tenant: TenantId,
        term: TermId,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli
            .log_level
            .as_deref()
            .unwrap_or_else(|| flock_core::default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::DrainCleanup { db } => drain_cleanup(&db, &config),
        Command::Audit { db, tenant, term } => audit(&db, tenant, term),
        Command::Reconcile { db, tenant, term } => reconcile(&db, tenant, term),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    EngineConfig::from_json_str(&raw)
        .with_context(|| format!("invalid config {}", path.display()))
}

fn drain_cleanup(db: &Path, config: &EngineConfig) -> Result<()> {
    let mut conn = open_db(db).with_context(|| format!("failed to open {}", db.display()))?;
    let handler = CleanupHandler::new(config.cleanup.clone());
    let report = handler.process_due(&mut conn, flock_core::service::now_epoch_ms())?;

    info!(
        "event=cli_drain module=cli status=ok attempted={} completed={}",
        report.attempted, report.completed
    );
    println!(
        "attempted={} completed={} retried={} abandoned={} skipped={} enrollments_removed={}",
        report.attempted,
        report.completed,
        report.retried,
        report.abandoned,
        report.skipped,
        report.enrollments_removed
    );
    Ok(())
}

fn audit(db: &Path, tenant: TenantId, term: TermId) -> Result<()> {
    let conn = open_db(db).with_context(|| format!("failed to open {}", db.display()))?;
    let repo = SqliteEducationRepository::try_new(&conn, tenant)?;
    let report = TermAggregateManager::new(&repo).audit(term)?;

    print_audit(&report);
    if !report.is_consistent() {
        bail!("term {term} has drifted");
    }
    Ok(())
}

fn reconcile(db: &Path, tenant: TenantId, term: TermId) -> Result<()> {
    let mut conn = open_db(db).with_context(|| format!("failed to open {}", db.display()))?;
    let report = in_transaction(&mut conn, |tx| -> Result<_, EngineError> {
        let repo = SqliteEducationRepository::try_new(tx, tenant)?;
        AttendanceMatrixManager::new(&repo).reconcile(term)
    })
    .with_context(|| format!("reconcile of term {term} failed"))?;

    println!(
        "term={} expected={} created={}",
        report.term_id, report.expected, report.created
    );
    Ok(())
}

fn print_audit(report: &TermAudit) {
    let (cached, live) = (&report.cached, &report.live);
    println!("term={}", report.term_id);
    println!(
        "sessions cached={} live={}",
        cached.number_of_sessions, live.number_of_sessions
    );
    println!(
        "enrollments cached={} live={}",
        cached.enrollment_count, live.enrollment_count
    );
    println!(
        "status cached={}/{}/{} live={}/{}/{}",
        cached.in_progress_count,
        cached.completed_count,
        cached.incomplete_count,
        live.in_progress_count,
        live.completed_count,
        live.incomplete_count
    );
    println!(
        "done cached={} live={}",
        cached.is_done_count, live.is_done_count
    );
    for counter in report.drifted_counters() {
        println!(
            "counter_drift {} cached={} live={}",
            counter.column(),
            cached.get(counter),
            live.get(counter)
        );
    }
    println!("numbering_contiguous={}", report.numbering_contiguous());
    println!("missing_cells={}", report.missing_cells.len());
    println!("stray_cells={}", report.stray_cells.len());
    for drift in &report.tally_drift {
        println!(
            "tally_drift enrollment={} cached={} actual={}",
            drift.enrollment_id, drift.cached, drift.actual
        );
    }
    println!("consistent={}", report.is_consistent());
}
