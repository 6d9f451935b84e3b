//! Versioned schema. Step `n` in [`STEPS`] moves `PRAGMA user_version` from
//! `n - 1` to `n`; steps are append-only.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, TransactionBehavior};

/// `(name, sql)` per schema version, starting at version 1.
const STEPS: &[(&str, &str)] = &[
    ("education", include_str!("0001_education.sql")),
    ("cleanup_outbox", include_str!("0002_cleanup_outbox.sql")),
];

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = STEPS.len() as u32;

/// Brings `conn` up to [`SCHEMA_VERSION`] in one transaction.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(DbError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (version, &(name, sql)) in (1..).zip(STEPS).skip(found as usize) {
        tx.execute_batch(sql)
            .and_then(|()| tx.pragma_update(None, "user_version", version))
            .map_err(|source| DbError::Migration {
                version,
                name,
                source,
            })?;
        info!(
            "event=schema_step module=db status=ok version={} name={}",
            version, name
        );
    }
    tx.commit()?;
    Ok(())
}

/// Reads `PRAGMA user_version`.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
