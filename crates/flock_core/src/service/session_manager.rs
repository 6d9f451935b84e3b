//! Session manager: contiguous numbering of sessions within a term.
//!
//! # Invariants
//! - New sessions take `max(live numbers) + 1`; callers hold an IMMEDIATE
//!   transaction, so two creates cannot read the same maximum.
//! - Deleting session `k` shifts every later live session down by one in a
//!   single statement, keeping live numbers at `1..=N`.
//! - Every session insert/delete is paired with counter and matrix updates.

use super::attendance_matrix::AttendanceMatrixManager;
use super::error::{Conflict, EngineError, EngineResult, EntityRef, InvariantViolation};
use super::term_aggregate::TermAggregateManager;
use crate::config::EngineConfig;
use crate::model::enrollment::EnrollmentId;
use crate::model::page::{Page, PageRequest};
use crate::model::session::{NewSession, Session, SessionDetails, SessionId, SessionStatus};
use crate::model::term::{TermCounter, TermId};
use crate::model::validation::ValidationError;
use crate::repo::EducationRepository;
use log::info;

pub struct SessionManager<'r, R: EducationRepository> {
    repo: &'r R,
    max_sessions: u32,
}

impl<'r, R: EducationRepository> SessionManager<'r, R> {
    pub fn new(repo: &'r R, config: &EngineConfig) -> Self {
        Self {
            repo,
            max_sessions: config.max_sessions_per_term,
        }
    }

    fn terms(&self) -> TermAggregateManager<'r, R> {
        TermAggregateManager::new(self.repo)
    }

    fn matrix(&self) -> AttendanceMatrixManager<'r, R> {
        AttendanceMatrixManager::new(self.repo)
    }

    /// Appends one session after the current last one.
    ///
    /// # Errors
    /// - `NotFound` when the term is absent.
    /// - `Conflict::CapacityExceeded` when the term is full.
    pub fn create_session(&self, term_id: TermId, session: &NewSession) -> EngineResult<Session> {
        session.validate()?;
        let next_number = self.reserve_numbers(term_id, 1)?;
        let enrollments = self.repo.live_enrollment_ids(term_id)?;

        let created = self.insert_with_cells(term_id, next_number, session, &enrollments)?;
        self.record_added(term_id, 1, session.status)?;

        info!(
            "event=session_create module=education status=ok term_id={} session_id={} session_number={} cells={}",
            term_id,
            created.id,
            created.number,
            enrollments.len()
        );
        Ok(created)
    }

    /// Appends `count` sessions in one go, capacity-checked as a batch.
    pub fn provision_sessions(
        &self,
        term_id: TermId,
        count: u32,
        template: &NewSession,
    ) -> EngineResult<Vec<Session>> {
        if count == 0 {
            return Err(ValidationError::EmptyBatch.into());
        }
        template.validate()?;
        let first_number = self.reserve_numbers(term_id, count)?;
        let enrollments = self.repo.live_enrollment_ids(term_id)?;

        let mut created = Vec::with_capacity(count as usize);
        for number in first_number..first_number + i64::from(count) {
            created.push(self.insert_with_cells(term_id, number, template, &enrollments)?);
        }
        self.record_added(term_id, count, template.status)?;

        info!(
            "event=session_provision module=education status=ok term_id={} count={} first_number={}",
            term_id, count, first_number
        );
        Ok(created)
    }

    /// Checks capacity for `count` more sessions; returns the first free number.
    fn reserve_numbers(&self, term_id: TermId, count: u32) -> EngineResult<i64> {
        self.terms().require_term(term_id)?;
        let stats = self.repo.session_stats(term_id)?;
        if stats.live_count + i64::from(count) > i64::from(self.max_sessions) {
            return Err(Conflict::CapacityExceeded {
                term_id,
                max_sessions: self.max_sessions,
            }
            .into());
        }
        Ok(stats.max_number + 1)
    }

    fn insert_with_cells(
        &self,
        term_id: TermId,
        number: i64,
        template: &NewSession,
        enrollments: &[EnrollmentId],
    ) -> EngineResult<Session> {
        let session = self.repo.insert_session(term_id, number, template)?;
        self.matrix()
            .create_cells_for_new_session(&session, enrollments)?;
        Ok(session)
    }

    fn record_added(&self, term_id: TermId, count: u32, status: SessionStatus) -> EngineResult<()> {
        let terms = self.terms();
        terms.increment(term_id, TermCounter::NumberOfSessions, count)?;
        if status.is_done() {
            terms.increment(term_id, TermCounter::IsDone, count)?;
        }
        Ok(())
    }

    /// Soft-deletes a session and closes the gap it leaves.
    ///
    /// Returns the session as it was before deletion.
    pub fn delete_session(&self, session_id: SessionId) -> EngineResult<Session> {
        let session = self.require_session(session_id)?;

        if self.repo.soft_delete_session(session_id)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Session(session_id)).into());
        }
        let shifted = self.repo.shift_sessions_down(session.term_id, session.number)?;
        let cells = self.matrix().remove_cells_for_session(&session)?;

        let terms = self.terms();
        terms.decrement(session.term_id, TermCounter::NumberOfSessions, 1)?;
        if session.status.is_done() {
            terms.decrement(session.term_id, TermCounter::IsDone, 1)?;
        }

        info!(
            "event=session_delete module=education status=ok term_id={} session_id={} session_number={} shifted={} cells={}",
            session.term_id, session_id, session.number, shifted, cells
        );
        Ok(session)
    }

    /// Changes status; moving into or out of `done` adjusts `is_done_count`.
    pub fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> EngineResult<Session> {
        let session = self.require_session(session_id)?;
        if session.status == status {
            return Ok(session);
        }

        let terms = self.terms();
        match (session.status.is_done(), status.is_done()) {
            (false, true) => terms.increment(session.term_id, TermCounter::IsDone, 1)?,
            (true, false) => terms.decrement(session.term_id, TermCounter::IsDone, 1)?,
            _ => {}
        }
        if self.repo.update_session_status(session_id, status)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Session(session_id)).into());
        }
        self.require_session(session_id)
    }

    pub fn update_session_details(
        &self,
        session_id: SessionId,
        details: &SessionDetails,
    ) -> EngineResult<Session> {
        details.validate()?;
        self.require_session(session_id)?;
        if self.repo.update_session_details(session_id, details)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Session(session_id)).into());
        }
        self.require_session(session_id)
    }

    /// Loads a live session or fails with `NotFound`.
    pub fn require_session(&self, session_id: SessionId) -> EngineResult<Session> {
        self.repo
            .find_session(session_id)?
            .ok_or(EngineError::NotFound(EntityRef::Session(session_id)))
    }

    pub fn get_session(&self, session_id: SessionId) -> EngineResult<Session> {
        self.require_session(session_id)
    }

    /// Lists live sessions ordered by number.
    pub fn list_sessions(&self, term_id: TermId, page: PageRequest) -> EngineResult<Page<Session>> {
        self.terms().require_term(term_id)?;
        Ok(self.repo.list_sessions(term_id, page)?)
    }
}
