//! Connection bootstrap. Every returned connection has `foreign_keys=ON`, a
//! busy timeout and the current schema. File databases run in WAL mode so the
//! cleanup worker can keep its own connection next to request handlers.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating if needed) the database file at `path`.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    ready(Connection::open(path), true, &path.display().to_string())
}

/// Opens a private in-memory database, used by tests and tooling.
pub fn open_db_in_memory() -> DbResult<Connection> {
    ready(Connection::open_in_memory(), false, ":memory:")
}

fn ready(opened: rusqlite::Result<Connection>, wal: bool, target: &str) -> DbResult<Connection> {
    let started = Instant::now();
    let result: DbResult<Connection> = opened.map_err(Into::into).and_then(|mut conn| {
        configure(&mut conn, wal)?;
        Ok(conn)
    });
    let elapsed_ms = started.elapsed().as_millis();
    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok target={} wal={} duration_ms={}",
            target, wal, elapsed_ms
        ),
        Err(err) => error!(
            "event=db_open module=db status=error target={} duration_ms={} error={}",
            target, elapsed_ms, err
        ),
    }
    result
}

fn configure(conn: &mut Connection, wal: bool) -> DbResult<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    if wal {
        // Answers with the resulting mode, so it needs the query form.
        let _: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)
}
