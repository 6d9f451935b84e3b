//! Atomic transaction scope shared by every engine mutation.
//!
//! # Invariants
//! - The closure either commits as a whole or leaves no trace.
//! - Scopes are `IMMEDIATE`, so writers are serialized before the first read
//!   and read-then-insert sequences (next session number) cannot interleave.

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Runs `work` inside one IMMEDIATE transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`.
pub fn in_transaction<T, E, F>(conn: &mut Connection, work: F) -> Result<T, E>
where
    E: From<rusqlite::Error>,
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    match work(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            // Rollback failure is secondary to `err`.
            let _ = tx.rollback();
            Err(err)
        }
    }
}
