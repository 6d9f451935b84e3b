//! Term persistence and atomic counter primitives.
//!
//! # Invariants
//! - Counters are changed by one `UPDATE ... SET c = c + ?` statement;
//!   nothing here reads a counter in order to write it.
//! - `CHECK (c >= 0)` on every counter column rejects underflow.

use super::{
    count_to_u64, map_unique, parse_is_deleted, parse_uuid, RepoError, RepoResult,
    SqliteEducationRepository,
};
use crate::model::page::{Page, PageRequest};
use crate::model::term::{NewTerm, Term, TermCounter, TermCounters, TermId};
use crate::model::ProgramId;
use rusqlite::{params, Row};
use uuid::Uuid;

const TERM_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    program_id,
    term_number,
    starts_on,
    ends_on,
    number_of_sessions,
    enrollment_count,
    in_progress_count,
    completed_count,
    incomplete_count,
    is_done_count,
    is_deleted,
    created_at,
    updated_at
FROM terms";

/// Storage contract for the term row and its counters.
pub trait TermRepository {
    /// Inserts a term with zero counters.
    fn insert_term(&self, term: &NewTerm) -> RepoResult<Term>;
    /// Loads one term by id within the tenant.
    fn find_term(&self, term_id: TermId, include_deleted: bool) -> RepoResult<Option<Term>>;
    /// Whether a live term already uses `term_number` in the program.
    fn term_number_taken(&self, program_id: ProgramId, term_number: i64) -> RepoResult<bool>;
    /// Lists live terms of a program ordered by term number.
    fn list_terms(&self, program_id: ProgramId, page: PageRequest) -> RepoResult<Page<Term>>;
    /// Rewrites the schedule; returns affected rows.
    fn update_term_schedule(
        &self,
        term_id: TermId,
        starts_on: Option<i64>,
        ends_on: Option<i64>,
    ) -> RepoResult<usize>;
    /// Adds `delta` to one counter of a live term; returns affected rows.
    fn adjust_term_counter(
        &self,
        term_id: TermId,
        counter: TermCounter,
        delta: i64,
    ) -> RepoResult<usize>;
    /// Soft-deletes the term row only; returns affected rows.
    fn soft_delete_term(&self, term_id: TermId) -> RepoResult<usize>;
    /// Recomputes every counter from live child rows.
    fn live_term_counters(&self, term_id: TermId) -> RepoResult<TermCounters>;
}

impl TermRepository for SqliteEducationRepository<'_> {
    fn insert_term(&self, term: &NewTerm) -> RepoResult<Term> {
        let term_id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO terms (
                    id,
                    tenant_id,
                    program_id,
                    term_number,
                    starts_on,
                    ends_on
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    term_id.to_string(),
                    self.tenant(),
                    term.program_id.to_string(),
                    term.term_number,
                    term.starts_on,
                    term.ends_on,
                ],
            )
            .map_err(|err| map_unique(err, "idx_terms_program_number_live"))?;

        self.find_term(term_id, false)?.ok_or_else(|| {
            RepoError::InvalidData(format!("term {term_id} not readable after insert"))
        })
    }

    fn find_term(&self, term_id: TermId, include_deleted: bool) -> RepoResult<Option<Term>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TERM_SELECT_SQL}
             WHERE id = ?1
               AND tenant_id = ?2
               AND (?3 = 1 OR is_deleted = 0);"
        ))?;
        let mut rows = stmt.query(params![
            term_id.to_string(),
            self.tenant(),
            i64::from(include_deleted)
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_term_row(row)?));
        }
        Ok(None)
    }

    fn term_number_taken(&self, program_id: ProgramId, term_number: i64) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM terms
                WHERE tenant_id = ?1
                  AND program_id = ?2
                  AND term_number = ?3
                  AND is_deleted = 0
            );",
            params![self.tenant(), program_id.to_string(), term_number],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn list_terms(&self, program_id: ProgramId, page: PageRequest) -> RepoResult<Page<Term>> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM terms
             WHERE tenant_id = ?1
               AND program_id = ?2
               AND is_deleted = 0;",
            params![self.tenant(), program_id.to_string()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "{TERM_SELECT_SQL}
             WHERE tenant_id = ?1
               AND program_id = ?2
               AND is_deleted = 0
             ORDER BY term_number ASC, id ASC
             LIMIT ?3 OFFSET ?4;"
        ))?;
        let mut rows = stmt.query(params![
            self.tenant(),
            program_id.to_string(),
            page.sql_limit(),
            page.sql_offset()
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_term_row(row)?);
        }

        Ok(Page {
            items,
            total_count: count_to_u64(total),
        })
    }

    fn update_term_schedule(
        &self,
        term_id: TermId,
        starts_on: Option<i64>,
        ends_on: Option<i64>,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE terms
             SET starts_on = ?3,
                 ends_on = ?4,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![term_id.to_string(), self.tenant(), starts_on, ends_on],
        )?;
        Ok(changed)
    }

    fn adjust_term_counter(
        &self,
        term_id: TermId,
        counter: TermCounter,
        delta: i64,
    ) -> RepoResult<usize> {
        let column = counter.column();
        let changed = self.conn.execute(
            &format!(
                "UPDATE terms
                 SET {column} = {column} + ?3,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1
                   AND tenant_id = ?2
                   AND is_deleted = 0;"
            ),
            params![term_id.to_string(), self.tenant(), delta],
        )?;
        Ok(changed)
    }

    fn soft_delete_term(&self, term_id: TermId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE terms
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND tenant_id = ?2
               AND is_deleted = 0;",
            params![term_id.to_string(), self.tenant()],
        )?;
        Ok(changed)
    }

    fn live_term_counters(&self, term_id: TermId) -> RepoResult<TermCounters> {
        let counters = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM sessions
                  WHERE term_id = ?1 AND tenant_id = ?2 AND is_deleted = 0),
                (SELECT COUNT(*) FROM sessions
                  WHERE term_id = ?1 AND tenant_id = ?2 AND is_deleted = 0
                    AND status = 'done'),
                (SELECT COUNT(*) FROM enrollments
                  WHERE term_id = ?1 AND tenant_id = ?2 AND is_deleted = 0),
                (SELECT COUNT(*) FROM enrollments
                  WHERE term_id = ?1 AND tenant_id = ?2 AND is_deleted = 0
                    AND status = 'in_progress'),
                (SELECT COUNT(*) FROM enrollments
                  WHERE term_id = ?1 AND tenant_id = ?2 AND is_deleted = 0
                    AND status = 'completed'),
                (SELECT COUNT(*) FROM enrollments
                  WHERE term_id = ?1 AND tenant_id = ?2 AND is_deleted = 0
                    AND status = 'incomplete');",
            params![term_id.to_string(), self.tenant()],
            |row| {
                Ok(TermCounters {
                    number_of_sessions: row.get(0)?,
                    is_done_count: row.get(1)?,
                    enrollment_count: row.get(2)?,
                    in_progress_count: row.get(3)?,
                    completed_count: row.get(4)?,
                    incomplete_count: row.get(5)?,
                })
            },
        )?;
        Ok(counters)
    }
}

fn parse_term_row(row: &Row<'_>) -> RepoResult<Term> {
    let id_text: String = row.get("id")?;
    let tenant_text: String = row.get("tenant_id")?;
    let program_text: String = row.get("program_id")?;

    Ok(Term {
        id: parse_uuid(&id_text, "terms.id")?,
        tenant_id: parse_uuid(&tenant_text, "terms.tenant_id")?,
        program_id: parse_uuid(&program_text, "terms.program_id")?,
        term_number: row.get("term_number")?,
        starts_on: row.get("starts_on")?,
        ends_on: row.get("ends_on")?,
        counters: TermCounters {
            number_of_sessions: row.get("number_of_sessions")?,
            enrollment_count: row.get("enrollment_count")?,
            in_progress_count: row.get("in_progress_count")?,
            completed_count: row.get("completed_count")?,
            incomplete_count: row.get("incomplete_count")?,
            is_done_count: row.get("is_done_count")?,
        },
        is_deleted: parse_is_deleted(row.get("is_deleted")?, "terms.is_deleted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
