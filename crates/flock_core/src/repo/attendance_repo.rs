//! Attendance cell persistence for the sparse session x enrollment matrix.
//!
//! # Invariants
//! - Cells are addressed by row id or by their (session, enrollment) key.
//! - Bulk inserts use `INSERT OR IGNORE` against the live-pair unique index,
//!   so pairs that already hold a live cell are skipped.

use super::{parse_is_deleted, parse_uuid, RepoError, RepoResult, SqliteEducationRepository};
use crate::model::attendance::{AttendanceCell, CellId, CellKey, Presence};
use crate::model::enrollment::EnrollmentId;
use crate::model::session::SessionId;
use crate::model::term::TermId;
use rusqlite::{params, params_from_iter, Row};

const CELL_SELECT_SQL: &str = "SELECT
    cell_id,
    tenant_id,
    term_id,
    session_id,
    enrollment_id,
    presence,
    note,
    is_deleted,
    created_at,
    updated_at
FROM attendance_cells";

/// Rows per multi-row insert; four bound values per row.
const INSERT_CHUNK_ROWS: usize = 500;

/// Enrollment whose cached tally disagrees with its present cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyDrift {
    pub enrollment_id: EnrollmentId,
    pub cached: i64,
    pub actual: i64,
}

/// Storage contract for attendance cells.
pub trait AttendanceRepository {
    /// Bulk-inserts unknown/no-note cells; returns how many were created.
    fn insert_cells(&self, term_id: TermId, keys: &[CellKey]) -> RepoResult<usize>;
    fn find_cell(&self, cell_id: CellId) -> RepoResult<Option<AttendanceCell>>;
    fn find_cell_by_key(
        &self,
        session_id: SessionId,
        enrollment_id: EnrollmentId,
    ) -> RepoResult<Option<AttendanceCell>>;
    /// Keys of every live cell in the term.
    fn live_cell_keys(&self, term_id: TermId) -> RepoResult<Vec<CellKey>>;
    fn count_present_cells(&self, session_id: SessionId) -> RepoResult<i64>;
    fn update_cell_presence(&self, cell_id: CellId, presence: Presence) -> RepoResult<usize>;
    fn update_cell_note(&self, cell_id: CellId, note: Option<&str>) -> RepoResult<usize>;
    fn soft_delete_cells_for_session(&self, session_id: SessionId) -> RepoResult<usize>;
    fn soft_delete_cells_for_enrollment(&self, enrollment_id: EnrollmentId) -> RepoResult<usize>;
    fn soft_delete_cells_for_term(&self, term_id: TermId) -> RepoResult<usize>;
    fn list_session_cells(&self, session_id: SessionId) -> RepoResult<Vec<AttendanceCell>>;
    fn list_enrollment_cells(&self, enrollment_id: EnrollmentId)
        -> RepoResult<Vec<AttendanceCell>>;
    /// Live enrollments of the term whose tally is off.
    fn tally_drift(&self, term_id: TermId) -> RepoResult<Vec<TallyDrift>>;
}

impl AttendanceRepository for SqliteEducationRepository<'_> {
    fn insert_cells(&self, term_id: TermId, keys: &[CellKey]) -> RepoResult<usize> {
        let mut inserted = 0;
        for chunk in keys.chunks(INSERT_CHUNK_ROWS) {
            let placeholders = (0..chunk.len())
                .map(|index| {
                    let base = index * 4;
                    format!("(?{}, ?{}, ?{}, ?{})", base + 1, base + 2, base + 3, base + 4)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let mut values = Vec::with_capacity(chunk.len() * 4);
            for (session_id, enrollment_id) in chunk {
                values.push(self.tenant());
                values.push(term_id.to_string());
                values.push(session_id.to_string());
                values.push(enrollment_id.to_string());
            }

            inserted += self.conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO attendance_cells (
                        tenant_id,
                        term_id,
                        session_id,
                        enrollment_id
                    ) VALUES {placeholders};"
                ),
                params_from_iter(values),
            )?;
        }
        Ok(inserted)
    }

    fn find_cell(&self, cell_id: CellId) -> RepoResult<Option<AttendanceCell>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CELL_SELECT_SQL}
             WHERE cell_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![cell_id, self.tenant()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_cell_row(row)?));
        }
        Ok(None)
    }

    fn find_cell_by_key(
        &self,
        session_id: SessionId,
        enrollment_id: EnrollmentId,
    ) -> RepoResult<Option<AttendanceCell>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CELL_SELECT_SQL}
             WHERE session_id = ?1
               AND enrollment_id = ?2
               AND tenant_id = ?3
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![
            session_id.to_string(),
            enrollment_id.to_string(),
            self.tenant()
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_cell_row(row)?));
        }
        Ok(None)
    }

    fn live_cell_keys(&self, term_id: TermId) -> RepoResult<Vec<CellKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, enrollment_id
             FROM attendance_cells
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
        )?;
        let mut rows = stmt.query(params![term_id.to_string(), self.tenant()])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            let session_text: String = row.get(0)?;
            let enrollment_text: String = row.get(1)?;
            keys.push((
                parse_uuid(&session_text, "attendance_cells.session_id")?,
                parse_uuid(&enrollment_text, "attendance_cells.enrollment_id")?,
            ));
        }
        Ok(keys)
    }

    fn count_present_cells(&self, session_id: SessionId) -> RepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*)
             FROM attendance_cells
             WHERE session_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
               AND presence = 1;",
            params![session_id.to_string(), self.tenant()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn update_cell_presence(&self, cell_id: CellId, presence: Presence) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE attendance_cells
             SET presence = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE cell_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![cell_id, self.tenant(), presence.to_db()],
        )?;
        Ok(changed)
    }

    fn update_cell_note(&self, cell_id: CellId, note: Option<&str>) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE attendance_cells
             SET note = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE cell_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![cell_id, self.tenant(), note],
        )?;
        Ok(changed)
    }

    fn soft_delete_cells_for_session(&self, session_id: SessionId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE attendance_cells
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE session_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![session_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn soft_delete_cells_for_enrollment(&self, enrollment_id: EnrollmentId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE attendance_cells
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE enrollment_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![enrollment_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn soft_delete_cells_for_term(&self, term_id: TermId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE attendance_cells
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE term_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![term_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn list_session_cells(&self, session_id: SessionId) -> RepoResult<Vec<AttendanceCell>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CELL_SELECT_SQL}
             WHERE session_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY cell_id ASC;"
        ))?;
        let mut rows = stmt.query(params![session_id.to_string(), self.tenant()])?;
        let mut cells = Vec::new();
        while let Some(row) = rows.next()? {
            cells.push(parse_cell_row(row)?);
        }
        Ok(cells)
    }

    fn list_enrollment_cells(
        &self,
        enrollment_id: EnrollmentId,
    ) -> RepoResult<Vec<AttendanceCell>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CELL_SELECT_SQL}
             WHERE enrollment_id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0
             ORDER BY cell_id ASC;"
        ))?;
        let mut rows = stmt.query(params![enrollment_id.to_string(), self.tenant()])?;
        let mut cells = Vec::new();
        while let Some(row) = rows.next()? {
            cells.push(parse_cell_row(row)?);
        }
        Ok(cells)
    }

    fn tally_drift(&self, term_id: TermId) -> RepoResult<Vec<TallyDrift>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.attendance_count, COUNT(c.cell_id)
             FROM enrollments e
             LEFT JOIN attendance_cells c
               ON c.enrollment_id = e.id
              AND c.is_deleted = 0
              AND c.presence = 1
             WHERE e.term_id = ?1
               AND e.tenant_id = ?2
               AND e.is_deleted = 0
             GROUP BY e.id, e.attendance_count
             HAVING e.attendance_count != COUNT(c.cell_id);",
        )?;
        let mut rows = stmt.query(params![term_id.to_string(), self.tenant()])?;
        let mut drift = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            drift.push(TallyDrift {
                enrollment_id: parse_uuid(&id_text, "enrollments.id")?,
                cached: row.get(1)?,
                actual: row.get(2)?,
            });
        }
        Ok(drift)
    }
}

fn parse_cell_row(row: &Row<'_>) -> RepoResult<AttendanceCell> {
    let tenant_text: String = row.get("tenant_id")?;
    let term_text: String = row.get("term_id")?;
    let session_text: String = row.get("session_id")?;
    let enrollment_text: String = row.get("enrollment_id")?;

    let raw_presence: Option<i64> = row.get("presence")?;
    let presence = Presence::from_db(raw_presence).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid presence value `{raw_presence:?}` in attendance_cells.presence"
        ))
    })?;

    Ok(AttendanceCell {
        id: row.get("cell_id")?,
        tenant_id: parse_uuid(&tenant_text, "attendance_cells.tenant_id")?,
        term_id: parse_uuid(&term_text, "attendance_cells.term_id")?,
        session_id: parse_uuid(&session_text, "attendance_cells.session_id")?,
        enrollment_id: parse_uuid(&enrollment_text, "attendance_cells.enrollment_id")?,
        presence,
        note: row.get("note")?,
        is_deleted: parse_is_deleted(row.get("is_deleted")?, "attendance_cells.is_deleted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
