//! Enrollment persistence and attendance tally primitives.
//!
//! # Invariants
//! - `attendance_count` is only moved by `UPDATE ... SET c = c + ?`.
//! - The live (term, participant) unique index backs duplicate rejection.

use super::{
    count_to_u64, map_unique, parse_is_deleted, parse_uuid, RepoError, RepoResult,
    SqliteEducationRepository,
};
use crate::model::enrollment::{Enrollment, EnrollmentFilter, EnrollmentId, EnrollmentStatus};
use crate::model::page::{Page, PageRequest};
use crate::model::session::SessionId;
use crate::model::term::TermId;
use crate::model::ParticipantId;
use rusqlite::{params, Row};
use uuid::Uuid;

const ENROLLMENT_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    term_id,
    participant_id,
    status,
    attendance_count,
    note,
    is_deleted,
    created_at,
    updated_at
FROM enrollments";

/// Storage contract for enrollments.
pub trait EnrollmentRepository {
    fn insert_enrollment(
        &self,
        term_id: TermId,
        participant_id: ParticipantId,
        status: EnrollmentStatus,
        note: Option<&str>,
    ) -> RepoResult<Enrollment>;
    /// Loads one live enrollment.
    fn find_enrollment(&self, enrollment_id: EnrollmentId) -> RepoResult<Option<Enrollment>>;
    /// Loads the live enrollment of a participant in a term, if any.
    fn find_participant_enrollment(
        &self,
        term_id: TermId,
        participant_id: ParticipantId,
    ) -> RepoResult<Option<Enrollment>>;
    fn list_enrollments(
        &self,
        term_id: TermId,
        filter: EnrollmentFilter,
        page: PageRequest,
    ) -> RepoResult<Page<Enrollment>>;
    /// Live enrollments of one participant across every term of the tenant.
    fn list_participant_enrollments(
        &self,
        participant_id: ParticipantId,
    ) -> RepoResult<Vec<Enrollment>>;
    fn live_enrollment_ids(&self, term_id: TermId) -> RepoResult<Vec<EnrollmentId>>;
    fn update_enrollment_status(
        &self,
        enrollment_id: EnrollmentId,
        status: EnrollmentStatus,
    ) -> RepoResult<usize>;
    fn update_enrollment_note(
        &self,
        enrollment_id: EnrollmentId,
        note: Option<&str>,
    ) -> RepoResult<usize>;
    /// Adds `delta` to a live enrollment's tally; returns affected rows.
    fn adjust_attendance_count(&self, enrollment_id: EnrollmentId, delta: i64)
        -> RepoResult<usize>;
    /// Decrements the tally of every live enrollment holding a live present
    /// cell in `session_id`; returns affected rows.
    fn decrement_tallies_for_session(&self, session_id: SessionId) -> RepoResult<usize>;
    fn soft_delete_enrollment(&self, enrollment_id: EnrollmentId) -> RepoResult<usize>;
    fn soft_delete_enrollments_for_term(&self, term_id: TermId) -> RepoResult<usize>;
}

impl EnrollmentRepository for SqliteEducationRepository<'_> {
    fn insert_enrollment(
        &self,
        term_id: TermId,
        participant_id: ParticipantId,
        status: EnrollmentStatus,
        note: Option<&str>,
    ) -> RepoResult<Enrollment> {
        let enrollment_id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO enrollments (
                    id,
                    tenant_id,
                    term_id,
                    participant_id,
                    status,
                    note
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    enrollment_id.to_string(),
                    self.tenant(),
                    term_id.to_string(),
                    participant_id.to_string(),
                    status.as_db(),
                    note,
                ],
            )
            .map_err(|err| map_unique(err, "idx_enrollments_term_participant_live"))?;

        self.find_enrollment(enrollment_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "enrollment {enrollment_id} not readable after insert"
            ))
        })
    }

    fn find_enrollment(&self, enrollment_id: EnrollmentId) -> RepoResult<Option<Enrollment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENROLLMENT_SELECT_SQL}
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![enrollment_id.to_string(), self.tenant()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_enrollment_row(row)?));
        }
        Ok(None)
    }

    fn find_participant_enrollment(
        &self,
        term_id: TermId,
        participant_id: ParticipantId,
    ) -> RepoResult<Option<Enrollment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENROLLMENT_SELECT_SQL}
             WHERE term_id = ?1
               AND participant_id = ?2
               AND tenant_id = ?3
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![
            term_id.to_string(),
            participant_id.to_string(),
            self.tenant()
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_enrollment_row(row)?));
        }
        Ok(None)
    }

    fn list_enrollments(
        &self,
        term_id: TermId,
        filter: EnrollmentFilter,
        page: PageRequest,
    ) -> RepoResult<Page<Enrollment>> {
        let status = filter.status.map(EnrollmentStatus::as_db);
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM enrollments
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
               AND (?3 IS NULL OR status = ?3);",
            params![term_id.to_string(), self.tenant(), status],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "{ENROLLMENT_SELECT_SQL}
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?4 OFFSET ?5;"
        ))?;
        let mut rows = stmt.query(params![
            term_id.to_string(),
            self.tenant(),
            status,
            page.sql_limit(),
            page.sql_offset()
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_enrollment_row(row)?);
        }

        Ok(Page {
            items,
            total_count: count_to_u64(total),
        })
    }

    fn list_participant_enrollments(
        &self,
        participant_id: ParticipantId,
    ) -> RepoResult<Vec<Enrollment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENROLLMENT_SELECT_SQL}
             WHERE participant_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY created_at ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query(params![participant_id.to_string(), self.tenant()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_enrollment_row(row)?);
        }
        Ok(items)
    }

    fn live_enrollment_ids(&self, term_id: TermId) -> RepoResult<Vec<EnrollmentId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM enrollments
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY created_at ASC, rowid ASC;",
        )?;
        let mut rows = stmt.query(params![term_id.to_string(), self.tenant()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "enrollments.id")?);
        }
        Ok(ids)
    }

    fn update_enrollment_status(
        &self,
        enrollment_id: EnrollmentId,
        status: EnrollmentStatus,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET status = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![enrollment_id.to_string(), self.tenant(), status.as_db()],
        )?;
        Ok(changed)
    }

    fn update_enrollment_note(
        &self,
        enrollment_id: EnrollmentId,
        note: Option<&str>,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET note = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![enrollment_id.to_string(), self.tenant(), note],
        )?;
        Ok(changed)
    }

    fn adjust_attendance_count(
        &self,
        enrollment_id: EnrollmentId,
        delta: i64,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET attendance_count = attendance_count + ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![enrollment_id.to_string(), self.tenant(), delta],
        )?;
        Ok(changed)
    }

    fn decrement_tallies_for_session(&self, session_id: SessionId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET attendance_count = attendance_count - 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE tenant_id = ?2
               AND is_deleted = 0
               AND id IN (
                 SELECT enrollment_id
                 FROM attendance_cells
                 WHERE session_id = ?1
                   AND tenant_id = ?2
                   AND is_deleted = 0
                   AND presence = 1
               );",
            params![session_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn soft_delete_enrollment(&self, enrollment_id: EnrollmentId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![enrollment_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn soft_delete_enrollments_for_term(&self, term_id: TermId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE enrollments
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

fn parse_enrollment_row(row: &Row<'_>) -> RepoResult<Enrollment> {
    let id_text: String = row.get("id")?;
    let tenant_text: String = row.get("tenant_id")?;
    let term_text: String = row.get("term_id")?;
    let participant_text: String = row.get("participant_id")?;

    let status_text: String = row.get("status")?;
    let status = EnrollmentStatus::parse_db(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid enrollment status `{status_text}` in enrollments.status"
        ))
    })?;

    Ok(Enrollment {
        id: parse_uuid(&id_text, "enrollments.id")?,
        tenant_id: parse_uuid(&tenant_text, "enrollments.tenant_id")?,
        term_id: parse_uuid(&term_text, "enrollments.term_id")?,
        participant_id: parse_uuid(&participant_text, "enrollments.participant_id")?,
        status,
        attendance_count: row.get("attendance_count")?,
        note: row.get("note")?,
        is_deleted: parse_is_deleted(row.get("is_deleted")?, "enrollments.is_deleted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
