//! Session persistence, including the set-based renumbering shift.
//!
//! # Invariants
//! - Listing is deterministic: `session_number ASC, id ASC`.
//! - Renumbering is one `UPDATE` over every later session of the term.

use super::{
    count_to_u64, parse_is_deleted, parse_optional_uuid, parse_uuid, RepoError, RepoResult,
    SqliteEducationRepository,
};
use crate::model::page::{Page, PageRequest};
use crate::model::session::{NewSession, Session, SessionDetails, SessionId, SessionStatus};
use crate::model::term::TermId;
use rusqlite::{params, Row};
use uuid::Uuid;

const SESSION_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    term_id,
    session_number,
    status,
    starts_at,
    ends_at,
    responsible_person_id,
    is_deleted,
    created_at,
    updated_at
FROM sessions";

/// Live session count and highest live number of one term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub live_count: i64,
    pub max_number: i64,
}

/// Storage contract for sessions.
pub trait SessionRepository {
    fn session_stats(&self, term_id: TermId) -> RepoResult<SessionStats>;
    /// Inserts one session at `number`.
    fn insert_session(
        &self,
        term_id: TermId,
        number: i64,
        session: &NewSession,
    ) -> RepoResult<Session>;
    /// Loads one live session.
    fn find_session(&self, session_id: SessionId) -> RepoResult<Option<Session>>;
    fn list_sessions(&self, term_id: TermId, page: PageRequest) -> RepoResult<Page<Session>>;
    fn live_session_ids(&self, term_id: TermId) -> RepoResult<Vec<SessionId>>;
    /// Live session numbers in ascending order.
    fn live_session_numbers(&self, term_id: TermId) -> RepoResult<Vec<i64>>;
    fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> RepoResult<usize>;
    fn update_session_details(
        &self,
        session_id: SessionId,
        details: &SessionDetails,
    ) -> RepoResult<usize>;
    fn soft_delete_session(&self, session_id: SessionId) -> RepoResult<usize>;
    /// Decrements every live session numbered above `deleted_number`.
    fn shift_sessions_down(&self, term_id: TermId, deleted_number: i64) -> RepoResult<usize>;
    fn soft_delete_sessions_for_term(&self, term_id: TermId) -> RepoResult<usize>;
}

impl SessionRepository for SqliteEducationRepository<'_> {
    fn session_stats(&self, term_id: TermId) -> RepoResult<SessionStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(MAX(session_number), 0)
             FROM sessions
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![term_id.to_string(), self.tenant()],
            |row| {
                Ok(SessionStats {
                    live_count: row.get(0)?,
                    max_number: row.get(1)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn insert_session(
        &self,
        term_id: TermId,
        number: i64,
        session: &NewSession,
    ) -> RepoResult<Session> {
        let session_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO sessions (
                id,
                tenant_id,
                term_id,
                session_number,
                status,
                starts_at,
                ends_at,
                responsible_person_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                session_id.to_string(),
                self.tenant(),
                term_id.to_string(),
                number,
                session.status.as_db(),
                session.starts_at,
                session.ends_at,
                session.responsible_person_id.map(|value| value.to_string()),
            ],
        )?;

        self.find_session(session_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("session {session_id} not readable after insert"))
        })
    }

    fn find_session(&self, session_id: SessionId) -> RepoResult<Option<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SESSION_SELECT_SQL}
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![session_id.to_string(), self.tenant()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_session_row(row)?));
        }
        Ok(None)
    }

    fn list_sessions(&self, term_id: TermId, page: PageRequest) -> RepoResult<Page<Session>> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM sessions
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![term_id.to_string(), self.tenant()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "{SESSION_SELECT_SQL}
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY session_number ASC, id ASC
             LIMIT ?3 OFFSET ?4;"
        ))?;
        let mut rows = stmt.query(params![
            term_id.to_string(),
            self.tenant(),
            page.sql_limit(),
            page.sql_offset()
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_session_row(row)?);
        }

        Ok(Page {
            items,
            total_count: count_to_u64(total),
        })
    }

    fn live_session_ids(&self, term_id: TermId) -> RepoResult<Vec<SessionId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM sessions
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY session_number ASC, id ASC;",
        )?;
        let mut rows = stmt.query(params![term_id.to_string(), self.tenant()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "sessions.id")?);
        }
        Ok(ids)
    }

    fn live_session_numbers(&self, term_id: TermId) -> RepoResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_number
             FROM sessions
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY session_number ASC;",
        )?;
        let numbers = stmt
            .query_map(params![term_id.to_string(), self.tenant()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(numbers)
    }

    fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE sessions
             SET status = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![session_id.to_string(), self.tenant(), status.as_db()],
        )?;
        Ok(changed)
    }

    fn update_session_details(
        &self,
        session_id: SessionId,
        details: &SessionDetails,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE sessions
             SET starts_at = ?3,
                 ends_at = ?4,
                 responsible_person_id = ?5,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![
                session_id.to_string(),
                self.tenant(),
                details.starts_at,
                details.ends_at,
                details.responsible_person_id.map(|value| value.to_string()),
            ],
        )?;
        Ok(changed)
    }

    fn soft_delete_session(&self, session_id: SessionId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE sessions
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![session_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn shift_sessions_down(&self, term_id: TermId, deleted_number: i64) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE sessions
             SET session_number = session_number - 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
               AND session_number > ?3;",
            params![term_id.to_string(), self.tenant(), deleted_number],
        )?;
        Ok(changed)
    }

    fn soft_delete_sessions_for_term(&self, term_id: TermId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE sessions
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![term_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }
}

fn parse_session_row(row: &Row<'_>) -> RepoResult<Session> {
    let id_text: String = row.get("id")?;
    let tenant_text: String = row.get("tenant_id")?;
    let term_text: String = row.get("term_id")?;

    let status_text: String = row.get("status")?;
    let status = SessionStatus::parse_db(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid session status `{status_text}` in sessions.status"
        ))
    })?;

    Ok(Session {
        id: parse_uuid(&id_text, "sessions.id")?,
        tenant_id: parse_uuid(&tenant_text, "sessions.tenant_id")?,
        term_id: parse_uuid(&term_text, "sessions.term_id")?,
        number: row.get("session_number")?,
        status,
        starts_at: row.get("starts_at")?,
        ends_at: row.get("ends_at")?,
        responsible_person_id: parse_optional_uuid(
            row.get("responsible_person_id")?,
            "sessions.responsible_person_id",
        )?,
        is_deleted: parse_is_deleted(row.get("is_deleted")?, "sessions.is_deleted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
