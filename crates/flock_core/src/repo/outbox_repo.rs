//! Durable outbox behind the participant-removed notification channel.
//!
//! # Responsibility
//! - Persist notifications with their delivery state and next due time.
//! - Apply state transitions conditionally on the state they leave.
//!
//! # Invariants
//! - `payload` is the JSON wire message; `attempt` lives only there.
//! - Transitions are compare-and-set on `state`, so two dispatchers cannot
//!   both claim one message.

use super::{parse_uuid, require_schema, RepoError, RepoResult};
use crate::model::cleanup::{CleanupState, ParticipantRemoved};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const OUTBOX_SELECT_SQL: &str = "SELECT
    message_id,
    payload,
    state,
    available_at,
    last_error,
    created_at,
    updated_at
FROM participant_cleanup_outbox";

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub message_id: Uuid,
    pub message: ParticipantRemoved,
    pub state: CleanupState,
    /// Epoch ms at which the message becomes deliverable.
    pub available_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outbox storage. Not tenant-scoped: one dispatcher serves every tenant.
pub struct SqliteOutboxRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOutboxRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        require_schema(conn)?;
        Ok(Self { conn })
    }

    /// Queues `message` as `pending`, deliverable from `available_at`.
    pub fn enqueue(
        &self,
        message: &ParticipantRemoved,
        available_at: i64,
    ) -> RepoResult<OutboxEntry> {
        let message_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO participant_cleanup_outbox (
                message_id,
                tenant_id,
                participant_id,
                payload,
                state,
                available_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                message_id.to_string(),
                message.tenant_id.to_string(),
                message.participant_id.to_string(),
                encode_payload(message)?,
                CleanupState::Pending.as_db(),
                available_at,
            ],
        )?;

        self.find_entry(message_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("outbox message {message_id} not readable after insert"))
        })
    }

    pub fn find_entry(&self, message_id: Uuid) -> RepoResult<Option<OutboxEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{OUTBOX_SELECT_SQL} WHERE message_id = ?1;"))?;
        let mut rows = stmt.query([message_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_outbox_row(row)?));
        }
        Ok(None)
    }

    /// Non-terminal messages whose due time has passed, oldest first.
    pub fn due_entries(&self, now_ms: i64, limit: u32) -> RepoResult<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OUTBOX_SELECT_SQL}
             WHERE state IN ('pending', 'retrying')
               AND available_at <= ?1
             ORDER BY available_at ASC, rowid ASC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![now_ms, i64::from(limit)])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_outbox_row(row)?);
        }
        Ok(entries)
    }

    /// Messages currently in `state`, oldest first.
    pub fn list_by_state(&self, state: CleanupState) -> RepoResult<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OUTBOX_SELECT_SQL}
             WHERE state = ?1
             ORDER BY created_at ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query([state.as_db()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_outbox_row(row)?);
        }
        Ok(entries)
    }

    /// Moves a message from `from` to `to`, rewriting payload, due time and
    /// error. Returns affected rows; zero means the message left `from`.
    pub fn transition(
        &self,
        message_id: Uuid,
        from: CleanupState,
        to: CleanupState,
        message: &ParticipantRemoved,
        available_at: i64,
        last_error: Option<&str>,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE participant_cleanup_outbox
             SET state = ?3,
                 payload = ?4,
                 available_at = ?5,
                 last_error = ?6,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE message_id = ?1
               AND state = ?2;",
            params![
                message_id.to_string(),
                from.as_db(),
                to.as_db(),
                encode_payload(message)?,
                available_at,
                last_error,
            ],
        )?;
        Ok(changed)
    }
}

fn encode_payload(message: &ParticipantRemoved) -> RepoResult<String> {
    serde_json::to_string(message)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode cleanup message: {err}")))
}

fn parse_outbox_row(row: &Row<'_>) -> RepoResult<OutboxEntry> {
    let id_text: String = row.get("message_id")?;
    let payload: String = row.get("payload")?;
    let message: ParticipantRemoved = serde_json::from_str(&payload).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid payload in participant_cleanup_outbox.payload: {err}"
        ))
    })?;

    let state_text: String = row.get("state")?;
    let state = CleanupState::parse_db(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid state `{state_text}` in participant_cleanup_outbox.state"
        ))
    })?;

    Ok(OutboxEntry {
        message_id: parse_uuid(&id_text, "participant_cleanup_outbox.message_id")?,
        message,
        state,
        available_at: row.get("available_at")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
