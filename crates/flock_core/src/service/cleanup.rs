//! Cascading cleanup for the participant-removed notification.
//!
//! # Responsibility
//! - Queue notifications in the durable outbox.
//! - Deliver due notifications, each in its own transaction.
//! - Schedule retries with capped exponential backoff and abandon messages
//!   whose attempts are exhausted.
//!
//! # Invariants
//! - A delivery either removes every live enrollment of the participant or
//!   none of them.
//! - Claiming a message (`pending -> completed`) happens inside the delivery
//!   transaction, so a rolled-back attempt leaves it `pending`.

use super::enrollment_manager::EnrollmentManager;
use super::error::EngineResult;
use crate::config::CleanupConfig;
use crate::db::in_transaction;
use crate::model::cleanup::{AttemptOutcome, CleanupState, ParticipantRemoved};
use crate::model::{ParticipantId, TenantId};
use crate::repo::{
    EducationRepository, OutboxEntry, SqliteEducationRepository, SqliteOutboxRepository,
};
use log::{error, info, warn};
use rusqlite::Connection;
use std::time::{SystemTime, UNIX_EPOCH};

/// Most messages delivered per `process_due` pass.
const DISPATCH_BATCH: u32 = 100;

/// Counts from one `process_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub completed: usize,
    pub retried: usize,
    pub abandoned: usize,
    /// Messages another dispatcher moved first.
    pub skipped: usize,
    pub enrollments_removed: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.attempted == 0 && self.skipped == 0
    }
}

/// Deletes every live enrollment of `participant_id` in the repository's
/// tenant through the full enrollment cascade.
///
/// Runs inside the caller's transaction; returns the number removed.
pub fn remove_participant<R: EducationRepository>(
    repo: &R,
    participant_id: ParticipantId,
) -> EngineResult<usize> {
    let manager = EnrollmentManager::new(repo);
    let enrollments = manager.list_participant_enrollments(participant_id)?;
    for enrollment in &enrollments {
        manager.delete_enrollment(enrollment.id)?;
    }
    Ok(enrollments.len())
}

pub struct CleanupHandler {
    config: CleanupConfig,
}

impl CleanupHandler {
    pub fn new(config: CleanupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Queues a notification, deliverable immediately.
    ///
    /// Call after the transaction that removed the participant has committed.
    pub fn publish_participant_removed(
        &self,
        conn: &Connection,
        tenant_id: TenantId,
        participant_id: ParticipantId,
        now_ms: i64,
    ) -> EngineResult<OutboxEntry> {
        let message = ParticipantRemoved::new(tenant_id, participant_id, self.config.max_attempts);
        let entry = SqliteOutboxRepository::try_new(conn)?.enqueue(&message, now_ms)?;
        info!(
            "event=cleanup_publish module=cleanup status=ok message_id={} tenant_id={} participant_id={}",
            entry.message_id, tenant_id, participant_id
        );
        Ok(entry)
    }

    /// Delivers every message due at `now_ms`, oldest first.
    pub fn process_due(&self, conn: &mut Connection, now_ms: i64) -> EngineResult<DispatchReport> {
        let due = SqliteOutboxRepository::try_new(conn)?.due_entries(now_ms, DISPATCH_BATCH)?;
        let mut report = DispatchReport::default();
        for entry in due {
            self.dispatch(conn, entry, now_ms, &mut report)?;
        }
        Ok(report)
    }

    fn dispatch(
        &self,
        conn: &mut Connection,
        entry: OutboxEntry,
        now_ms: i64,
        report: &mut DispatchReport,
    ) -> EngineResult<()> {
        let message = entry.message;
        let Some(state) = entry.state.on_due() else {
            report.skipped += 1;
            return Ok(());
        };
        if state != entry.state {
            let changed = SqliteOutboxRepository::try_new(conn)?.transition(
                entry.message_id,
                entry.state,
                state,
                &message,
                entry.available_at,
                entry.last_error.as_deref(),
            )?;
            if changed == 0 {
                report.skipped += 1;
                return Ok(());
            }
        }

        report.attempted += 1;
        let attempt: EngineResult<Option<usize>> = in_transaction(conn, |tx| {
            let claimed = SqliteOutboxRepository::try_new(tx)?.transition(
                entry.message_id,
                CleanupState::Pending,
                CleanupState::Completed,
                &message,
                now_ms,
                None,
            )?;
            if claimed == 0 {
                return Ok(None);
            }
            let repo = SqliteEducationRepository::try_new(tx, message.tenant_id)?;
            remove_participant(&repo, message.participant_id).map(Some)
        });

        match attempt {
            Ok(Some(removed)) => {
                report.completed += 1;
                report.enrollments_removed += removed;
                info!(
                    "event=cleanup_deliver module=cleanup status=ok message_id={} participant_id={} attempt={} enrollments={}",
                    entry.message_id, message.participant_id, message.attempt, removed
                );
            }
            Ok(None) => report.skipped += 1,
            Err(err) => self.record_failure(conn, &entry, now_ms, &err.to_string(), report)?,
        }
        Ok(())
    }

    fn record_failure(
        &self,
        conn: &Connection,
        entry: &OutboxEntry,
        now_ms: i64,
        reason: &str,
        report: &mut DispatchReport,
    ) -> EngineResult<()> {
        let message = entry.message;
        let outcome = AttemptOutcome::Failed {
            attempts_left: message.has_attempts_left(),
        };
        let outbox = SqliteOutboxRepository::try_new(conn)?;

        match CleanupState::Pending.after_attempt(outcome) {
            Some(CleanupState::Retrying) => {
                let delay_ms = self.config.backoff_ms(message.attempt);
                let available_at =
                    now_ms.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));
                let changed = outbox.transition(
                    entry.message_id,
                    CleanupState::Pending,
                    CleanupState::Retrying,
                    &message.next_attempt(),
                    available_at,
                    Some(reason),
                )?;
                if changed == 0 {
                    report.skipped += 1;
                    return Ok(());
                }
                report.retried += 1;
                warn!(
                    "event=cleanup_deliver module=cleanup status=retry message_id={} participant_id={} attempt={} max_attempts={} delay_ms={}",
                    entry.message_id, message.participant_id, message.attempt, message.max_attempts, delay_ms
                );
            }
            _ => {
                let changed = outbox.transition(
                    entry.message_id,
                    CleanupState::Pending,
                    CleanupState::Abandoned,
                    &message,
                    now_ms,
                    Some(reason),
                )?;
                if changed == 0 {
                    report.skipped += 1;
                    return Ok(());
                }
                report.abandoned += 1;
                error!(
                    "event=cleanup_deliver module=cleanup status=abandoned message_id={} tenant_id={} participant_id={} attempt={}",
                    entry.message_id, message.tenant_id, message.participant_id, message.attempt
                );
            }
        }
        Ok(())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
