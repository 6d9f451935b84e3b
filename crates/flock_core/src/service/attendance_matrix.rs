//! Attendance matrix manager: the sparse Session x Enrollment relation.
//!
//! # Responsibility
//! - Materialize cells when a session or enrollment is added.
//! - Apply presence changes and propagate the tally delta.
//! - Backfill missing cells on request.
//!
//! # Invariants
//! - Cell creation is idempotent; existing live pairs are skipped.
//! - A cell only joins a live session and a live enrollment of one term.
//! - Presence is written before the tally, and the tally only moves through
//!   a single atomic `UPDATE`.
//! - Normal write paths never fill holes in the matrix; only `reconcile` does.

use super::error::{Conflict, EngineError, EngineResult, EntityRef, InvariantViolation};
use crate::model::attendance::{AttendanceCell, CellId, CellKey, Presence};
use crate::model::enrollment::{Enrollment, EnrollmentId};
use crate::model::session::{Session, SessionId};
use crate::model::term::TermId;
use crate::model::validation::normalize_note;
use crate::repo::EducationRepository;
use log::{debug, info, warn};
use std::collections::HashSet;

/// Outcome of a successful `reconcile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub term_id: TermId,
    /// Live sessions x live enrollments at reconcile time.
    pub expected: usize,
    /// Cells created to close the gap.
    pub created: usize,
}

pub struct AttendanceMatrixManager<'r, R: EducationRepository> {
    repo: &'r R,
}

impl<'r, R: EducationRepository> AttendanceMatrixManager<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// Creates one unknown cell per enrollment for a freshly added session.
    ///
    /// Returns the number of cells actually inserted.
    pub fn create_cells_for_new_session(
        &self,
        session: &Session,
        enrollments: &[EnrollmentId],
    ) -> EngineResult<usize> {
        let keys: Vec<CellKey> = enrollments
            .iter()
            .map(|enrollment_id| (session.id, *enrollment_id))
            .collect();
        self.insert_keys(session.term_id, &keys)
    }

    /// Creates one unknown cell per session for a freshly added enrollment.
    pub fn create_cells_for_new_enrollment(
        &self,
        enrollment: &Enrollment,
        sessions: &[SessionId],
    ) -> EngineResult<usize> {
        let keys: Vec<CellKey> = sessions
            .iter()
            .map(|session_id| (*session_id, enrollment.id))
            .collect();
        self.insert_keys(enrollment.term_id, &keys)
    }

    fn insert_keys(&self, term_id: TermId, keys: &[CellKey]) -> EngineResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.require_term_members(term_id, keys)?;
        let inserted = self.repo.insert_cells(term_id, keys)?;
        debug!(
            "event=cells_create module=education status=ok term_id={} requested={} inserted={}",
            term_id,
            keys.len(),
            inserted
        );
        Ok(inserted)
    }

    /// Every session and enrollment in `keys` must be live and belong to
    /// `term_id`; otherwise the first offender is `NotFound`.
    fn require_term_members(&self, term_id: TermId, keys: &[CellKey]) -> EngineResult<()> {
        let (sessions, enrollments) = self.live_members(term_id)?;
        for (session_id, enrollment_id) in keys {
            if !sessions.contains(session_id) {
                return Err(EngineError::NotFound(EntityRef::Session(*session_id)));
            }
            if !enrollments.contains(enrollment_id) {
                return Err(EngineError::NotFound(EntityRef::Enrollment(*enrollment_id)));
            }
        }
        Ok(())
    }

    fn live_members(
        &self,
        term_id: TermId,
    ) -> EngineResult<(HashSet<SessionId>, HashSet<EnrollmentId>)> {
        Ok((
            self.repo.live_session_ids(term_id)?.into_iter().collect(),
            self.repo.live_enrollment_ids(term_id)?.into_iter().collect(),
        ))
    }

    /// Sets a cell's presence and moves the owning enrollment's tally.
    ///
    /// Setting the current value again is a no-op.
    ///
    /// # Errors
    /// - `NotFound` when the cell is absent or deleted.
    /// - `InvariantViolation` when the cell or its enrollment vanished
    ///   between read and write.
    pub fn set_presence(&self, cell_id: CellId, presence: Presence) -> EngineResult<AttendanceCell> {
        let cell = self.require_cell(cell_id)?;
        self.apply_presence(cell, presence)
    }

    fn apply_presence(&self, cell: AttendanceCell, presence: Presence) -> EngineResult<AttendanceCell> {
        if cell.presence == presence {
            return Ok(cell);
        }

        if self.repo.update_cell_presence(cell.id, presence)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Cell(cell.id)).into());
        }

        let delta = cell.presence.tally_delta(presence);
        if delta != 0 && self.repo.adjust_attendance_count(cell.enrollment_id, delta)? == 0 {
            warn!(
                "event=cell_presence_set module=education status=error cell_id={} enrollment_id={} delta={} error_code=tally_missed",
                cell.id, cell.enrollment_id, delta
            );
            return Err(InvariantViolation::EnrollmentTallyMissed {
                enrollment_id: cell.enrollment_id,
            }
            .into());
        }

        self.require_cell(cell.id)
    }

    /// Applies presence for several enrollments of one session.
    ///
    /// Each mark goes through the same path as `set_presence`; the first
    /// failure aborts the batch and the caller's transaction.
    pub fn mark_session(
        &self,
        session_id: SessionId,
        marks: &[(EnrollmentId, Presence)],
    ) -> EngineResult<Vec<AttendanceCell>> {
        if self.repo.find_session(session_id)?.is_none() {
            return Err(EngineError::NotFound(EntityRef::Session(session_id)));
        }

        let mut updated = Vec::with_capacity(marks.len());
        for (enrollment_id, presence) in marks {
            let cell = self
                .repo
                .find_cell_by_key(session_id, *enrollment_id)?
                .ok_or(EngineError::NotFound(EntityRef::CellAt {
                    session_id,
                    enrollment_id: *enrollment_id,
                }))?;
            updated.push(self.apply_presence(cell, *presence)?);
        }

        info!(
            "event=session_mark module=education status=ok session_id={} marks={}",
            session_id,
            updated.len()
        );
        Ok(updated)
    }

    /// Replaces a cell's note; blank clears it.
    pub fn set_cell_note(&self, cell_id: CellId, note: Option<String>) -> EngineResult<AttendanceCell> {
        let note = normalize_note(note)?;
        self.require_cell(cell_id)?;
        if self.repo.update_cell_note(cell_id, note.as_deref())? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Cell(cell_id)).into());
        }
        self.require_cell(cell_id)
    }

    /// Drops a deleted session's cells, first taking back every present mark
    /// from the owning enrollments' tallies.
    pub(crate) fn remove_cells_for_session(&self, session: &Session) -> EngineResult<usize> {
        let present_cells = self.repo.count_present_cells(session.id)?;
        let updated = self.repo.decrement_tallies_for_session(session.id)?;
        if i64::try_from(updated).ok() != Some(present_cells) {
            return Err(InvariantViolation::TallyMismatch {
                session_id: session.id,
                present_cells,
                updated,
            }
            .into());
        }
        Ok(self.repo.soft_delete_cells_for_session(session.id)?)
    }

    /// Drops a deleted enrollment's cells. Its tally goes with it.
    pub(crate) fn remove_cells_for_enrollment(&self, enrollment: &Enrollment) -> EngineResult<usize> {
        Ok(self.repo.soft_delete_cells_for_enrollment(enrollment.id)?)
    }

    /// Live (session, enrollment) pairs of the term that have no live cell,
    /// ordered by session then enrollment.
    pub fn missing_cells(&self, term_id: TermId) -> EngineResult<Vec<CellKey>> {
        let sessions = self.repo.live_session_ids(term_id)?;
        let enrollments = self.repo.live_enrollment_ids(term_id)?;
        let existing: HashSet<CellKey> = self.repo.live_cell_keys(term_id)?.into_iter().collect();

        let mut missing = Vec::new();
        for session_id in &sessions {
            for enrollment_id in &enrollments {
                let key = (*session_id, *enrollment_id);
                if !existing.contains(&key) {
                    missing.push(key);
                }
            }
        }
        Ok(missing)
    }

    /// Live cells filed under the term whose session or enrollment is not a
    /// live member of it.
    pub fn stray_cells(&self, term_id: TermId) -> EngineResult<Vec<CellKey>> {
        let (sessions, enrollments) = self.live_members(term_id)?;
        Ok(self
            .repo
            .live_cell_keys(term_id)?
            .into_iter()
            .filter(|(session_id, enrollment_id)| {
                !sessions.contains(session_id) || !enrollments.contains(enrollment_id)
            })
            .collect())
    }

    /// Backfills exactly the missing cells of a term.
    ///
    /// # Errors
    /// - `Conflict::AlreadyComplete` when nothing is missing.
    /// - `InvariantViolation::CellInsertShortfall` when the insert created
    ///   fewer cells than were missing.
    pub fn reconcile(&self, term_id: TermId) -> EngineResult<ReconcileReport> {
        if self.repo.find_term(term_id, false)?.is_none() {
            return Err(EngineError::NotFound(EntityRef::Term(term_id)));
        }

        let sessions = self.repo.live_session_ids(term_id)?.len();
        let enrollments = self.repo.live_enrollment_ids(term_id)?.len();
        let missing = self.missing_cells(term_id)?;
        if missing.is_empty() {
            return Err(Conflict::AlreadyComplete { term_id }.into());
        }

        let created = self.repo.insert_cells(term_id, &missing)?;
        if created != missing.len() {
            return Err(InvariantViolation::CellInsertShortfall {
                term_id,
                missing: missing.len(),
                inserted: created,
            }
            .into());
        }

        info!(
            "event=matrix_reconcile module=education status=ok term_id={} sessions={} enrollments={} created={}",
            term_id, sessions, enrollments, created
        );
        Ok(ReconcileReport {
            term_id,
            expected: sessions * enrollments,
            created,
        })
    }

    pub fn require_cell(&self, cell_id: CellId) -> EngineResult<AttendanceCell> {
        self.repo
            .find_cell(cell_id)?
            .ok_or(EngineError::NotFound(EntityRef::Cell(cell_id)))
    }

    pub fn get_cell(&self, cell_id: CellId) -> EngineResult<AttendanceCell> {
        self.require_cell(cell_id)
    }

    /// Live cells of one session in creation order.
    pub fn list_session_cells(&self, session_id: SessionId) -> EngineResult<Vec<AttendanceCell>> {
        if self.repo.find_session(session_id)?.is_none() {
            return Err(EngineError::NotFound(EntityRef::Session(session_id)));
        }
        Ok(self.repo.list_session_cells(session_id)?)
    }

    /// Live cells of one enrollment in creation order.
    pub fn list_enrollment_cells(
        &self,
        enrollment_id: EnrollmentId,
    ) -> EngineResult<Vec<AttendanceCell>> {
        if self.repo.find_enrollment(enrollment_id)?.is_none() {
            return Err(EngineError::NotFound(EntityRef::Enrollment(enrollment_id)));
        }
        Ok(self.repo.list_enrollment_cells(enrollment_id)?)
    }
}
