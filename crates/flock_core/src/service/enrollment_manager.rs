//! Enrollment manager: one participant's registration in a term.
//!
//! # Invariants
//! - At most one live enrollment per (term, participant).
//! - Creating or deleting an enrollment moves `enrollment_count` and the
//!   matching status counter together.
//! - Session counters are never touched here.

use super::attendance_matrix::AttendanceMatrixManager;
use super::error::{Conflict, EngineError, EngineResult, EntityRef, InvariantViolation};
use super::term_aggregate::TermAggregateManager;
use crate::model::enrollment::{Enrollment, EnrollmentFilter, EnrollmentId, EnrollmentStatus};
use crate::model::page::{Page, PageRequest};
use crate::model::term::{TermCounter, TermId};
use crate::model::validation::normalize_note;
use crate::model::ParticipantId;
use crate::repo::{EducationRepository, RepoError};
use log::info;

pub struct EnrollmentManager<'r, R: EducationRepository> {
    repo: &'r R,
}

impl<'r, R: EducationRepository> EnrollmentManager<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    fn terms(&self) -> TermAggregateManager<'r, R> {
        TermAggregateManager::new(self.repo)
    }

    fn matrix(&self) -> AttendanceMatrixManager<'r, R> {
        AttendanceMatrixManager::new(self.repo)
    }

    /// Enrolls a participant and gives them a cell in every live session.
    ///
    /// # Errors
    /// - `NotFound` when the term is absent.
    /// - `Conflict::AlreadyEnrolled` when a live enrollment exists for the pair.
    pub fn create_enrollment(
        &self,
        term_id: TermId,
        participant_id: ParticipantId,
        status: EnrollmentStatus,
        note: Option<String>,
    ) -> EngineResult<Enrollment> {
        let note = normalize_note(note)?;
        self.terms().require_term(term_id)?;

        let already_enrolled = Conflict::AlreadyEnrolled {
            term_id,
            participant_id,
        };
        if self
            .repo
            .find_participant_enrollment(term_id, participant_id)?
            .is_some()
        {
            return Err(already_enrolled.into());
        }

        let enrollment =
            match self
                .repo
                .insert_enrollment(term_id, participant_id, status, note.as_deref())
            {
                Ok(enrollment) => enrollment,
                Err(RepoError::Duplicate(_)) => return Err(already_enrolled.into()),
                Err(err) => return Err(err.into()),
            };

        let sessions = self.repo.live_session_ids(term_id)?;
        let cells = self
            .matrix()
            .create_cells_for_new_enrollment(&enrollment, &sessions)?;

        let terms = self.terms();
        terms.increment(term_id, TermCounter::EnrollmentCount, 1)?;
        terms.increment(term_id, TermCounter::for_status(status), 1)?;

        info!(
            "event=enrollment_create module=education status=ok term_id={} enrollment_id={} enrollment_status={} cells={}",
            term_id,
            enrollment.id,
            status.as_db(),
            cells
        );
        Ok(enrollment)
    }

    /// Moves an enrollment to another status bucket.
    ///
    /// Counters move before the row is rewritten; the same status is a no-op.
    pub fn update_enrollment_status(
        &self,
        enrollment_id: EnrollmentId,
        status: EnrollmentStatus,
    ) -> EngineResult<Enrollment> {
        let enrollment = self.require_enrollment(enrollment_id)?;
        if enrollment.status == status {
            return Ok(enrollment);
        }

        self.terms()
            .move_status(enrollment.term_id, enrollment.status, status)?;
        if self.repo.update_enrollment_status(enrollment_id, status)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Enrollment(enrollment_id)).into());
        }

        info!(
            "event=enrollment_status module=education status=ok enrollment_id={} from={} to={}",
            enrollment_id,
            enrollment.status.as_db(),
            status.as_db()
        );
        self.require_enrollment(enrollment_id)
    }

    pub fn update_enrollment_note(
        &self,
        enrollment_id: EnrollmentId,
        note: Option<String>,
    ) -> EngineResult<Enrollment> {
        let note = normalize_note(note)?;
        self.require_enrollment(enrollment_id)?;
        if self
            .repo
            .update_enrollment_note(enrollment_id, note.as_deref())?
            == 0
        {
            return Err(InvariantViolation::RowVanished(EntityRef::Enrollment(enrollment_id)).into());
        }
        self.require_enrollment(enrollment_id)
    }

    /// Soft-deletes an enrollment with its cells.
    ///
    /// Returns the enrollment as it was before deletion.
    pub fn delete_enrollment(&self, enrollment_id: EnrollmentId) -> EngineResult<Enrollment> {
        let enrollment = self.require_enrollment(enrollment_id)?;

        if self.repo.soft_delete_enrollment(enrollment_id)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Enrollment(enrollment_id)).into());
        }
        let cells = self.matrix().remove_cells_for_enrollment(&enrollment)?;

        let terms = self.terms();
        terms.decrement(enrollment.term_id, TermCounter::EnrollmentCount, 1)?;
        terms.decrement(
            enrollment.term_id,
            TermCounter::for_status(enrollment.status),
            1,
        )?;

        info!(
            "event=enrollment_delete module=education status=ok term_id={} enrollment_id={} cells={}",
            enrollment.term_id, enrollment_id, cells
        );
        Ok(enrollment)
    }

    pub fn require_enrollment(&self, enrollment_id: EnrollmentId) -> EngineResult<Enrollment> {
        self.repo
            .find_enrollment(enrollment_id)?
            .ok_or(EngineError::NotFound(EntityRef::Enrollment(enrollment_id)))
    }

    pub fn get_enrollment(&self, enrollment_id: EnrollmentId) -> EngineResult<Enrollment> {
        self.require_enrollment(enrollment_id)
    }

    pub fn list_enrollments(
        &self,
        term_id: TermId,
        filter: EnrollmentFilter,
        page: PageRequest,
    ) -> EngineResult<Page<Enrollment>> {
        self.terms().require_term(term_id)?;
        Ok(self.repo.list_enrollments(term_id, filter, page)?)
    }

    /// Live enrollments of a participant across every term of the tenant.
    pub fn list_participant_enrollments(
        &self,
        participant_id: ParticipantId,
    ) -> EngineResult<Vec<Enrollment>> {
        Ok(self.repo.list_participant_enrollments(participant_id)?)
    }
}
