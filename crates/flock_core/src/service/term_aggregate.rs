//! Term aggregate manager: the term row, its lifecycle and its counters.
//!
//! # Responsibility
//! - Own every mutation of the denormalized term counters.
//! - Create, reschedule and cascade-delete terms.
//! - Audit cached aggregates against live rows.
//!
//! # Invariants
//! - Each counter change is one conditional `UPDATE`; zero affected rows is
//!   `InvariantViolation::TermNotFound`, never ignored.
//! - No method reads a counter in order to write it.

use super::attendance_matrix::AttendanceMatrixManager;
use super::error::{Conflict, EngineResult, EntityRef, EngineError, InvariantViolation};
use super::session_manager::SessionManager;
use crate::config::EngineConfig;
use crate::model::attendance::CellKey;
use crate::model::enrollment::EnrollmentStatus;
use crate::model::page::{Page, PageRequest};
use crate::model::session::NewSession;
use crate::model::term::{NewTerm, Term, TermCounter, TermCounters, TermId};
use crate::model::validation::validate_range;
use crate::model::ProgramId;
use crate::repo::{EducationRepository, RepoError, TallyDrift};
use log::{info, warn};

/// Drift report comparing cached term aggregates with live rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermAudit {
    pub term_id: TermId,
    /// Counters stored on the term row.
    pub cached: TermCounters,
    /// Counters recomputed from live sessions and enrollments.
    pub live: TermCounters,
    /// Live session numbers, ascending.
    pub session_numbers: Vec<i64>,
    /// Live (session, enrollment) pairs without a live cell.
    pub missing_cells: Vec<CellKey>,
    /// Live cells pointing outside the term's live sessions or enrollments.
    pub stray_cells: Vec<CellKey>,
    pub tally_drift: Vec<TallyDrift>,
}

impl TermAudit {
    pub fn counters_match(&self) -> bool {
        self.cached == self.live && self.cached.status_total() == self.cached.enrollment_count
    }

    /// Counters whose cached value differs from the live recount.
    pub fn drifted_counters(&self) -> Vec<TermCounter> {
        TermCounter::ALL
            .into_iter()
            .filter(|counter| self.cached.get(*counter) != self.live.get(*counter))
            .collect()
    }

    /// Live numbers are exactly `1..=N`.
    pub fn numbering_contiguous(&self) -> bool {
        self.session_numbers
            .iter()
            .enumerate()
            .all(|(index, number)| *number == index as i64 + 1)
    }

    pub fn is_consistent(&self) -> bool {
        self.counters_match()
            && self.numbering_contiguous()
            && self.missing_cells.is_empty()
            && self.stray_cells.is_empty()
            && self.tally_drift.is_empty()
    }
}

/// Term row owner. Borrows a repository bound to the caller's transaction.
pub struct TermAggregateManager<'r, R: EducationRepository> {
    repo: &'r R,
}

impl<'r, R: EducationRepository> TermAggregateManager<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// Adds `by` to one counter.
    pub fn increment(&self, term_id: TermId, counter: TermCounter, by: u32) -> EngineResult<()> {
        self.adjust(term_id, counter, i64::from(by))
    }

    /// Subtracts `by` from one counter.
    pub fn decrement(&self, term_id: TermId, counter: TermCounter, by: u32) -> EngineResult<()> {
        self.adjust(term_id, counter, -i64::from(by))
    }

    /// Moves one enrollment between status buckets.
    pub fn move_status(
        &self,
        term_id: TermId,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    ) -> EngineResult<()> {
        if from == to {
            return Ok(());
        }
        self.decrement(term_id, TermCounter::for_status(from), 1)?;
        self.increment(term_id, TermCounter::for_status(to), 1)
    }

    fn adjust(&self, term_id: TermId, counter: TermCounter, delta: i64) -> EngineResult<()> {
        if delta == 0 {
            return Ok(());
        }
        let changed = self.repo.adjust_term_counter(term_id, counter, delta)?;
        if changed == 0 {
            warn!(
                "event=term_counter_adjust module=education status=error term_id={} counter={} delta={} error_code=term_not_found",
                term_id,
                counter.column(),
                delta
            );
            return Err(InvariantViolation::TermNotFound { term_id, counter }.into());
        }
        Ok(())
    }

    /// Loads a live term or fails with `NotFound`.
    pub fn require_term(&self, term_id: TermId) -> EngineResult<Term> {
        self.repo
            .find_term(term_id, false)?
            .ok_or(EngineError::NotFound(EntityRef::Term(term_id)))
    }

    pub fn get_term(&self, term_id: TermId) -> EngineResult<Term> {
        self.require_term(term_id)
    }

    pub fn list_terms(&self, program_id: ProgramId, page: PageRequest) -> EngineResult<Page<Term>> {
        Ok(self.repo.list_terms(program_id, page)?)
    }

    /// Creates a term with zero counters and provisions its initial sessions.
    pub fn create_term(&self, new_term: &NewTerm, config: &EngineConfig) -> EngineResult<Term> {
        new_term.validate()?;
        let taken = Conflict::TermNumberTaken {
            program_id: new_term.program_id,
            term_number: new_term.term_number,
        };
        if self
            .repo
            .term_number_taken(new_term.program_id, new_term.term_number)?
        {
            return Err(taken.into());
        }

        let term = match self.repo.insert_term(new_term) {
            Ok(term) => term,
            Err(RepoError::Duplicate(_)) => return Err(taken.into()),
            Err(err) => return Err(err.into()),
        };

        if new_term.initial_sessions > 0 {
            SessionManager::new(self.repo, config).provision_sessions(
                term.id,
                new_term.initial_sessions,
                &NewSession::default(),
            )?;
        }

        info!(
            "event=term_create module=education status=ok term_id={} term_number={} initial_sessions={}",
            term.id, term.term_number, new_term.initial_sessions
        );
        self.require_term(term.id)
    }

    /// Rewrites the term's date range.
    pub fn update_schedule(
        &self,
        term_id: TermId,
        starts_on: Option<i64>,
        ends_on: Option<i64>,
    ) -> EngineResult<Term> {
        validate_range(starts_on, ends_on)?;
        self.require_term(term_id)?;
        if self.repo.update_term_schedule(term_id, starts_on, ends_on)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Term(term_id)).into());
        }
        self.require_term(term_id)
    }

    /// Soft-deletes the term with its sessions, enrollments and cells.
    pub fn delete_term(&self, term_id: TermId) -> EngineResult<Term> {
        let term = self.require_term(term_id)?;
        if self.repo.soft_delete_term(term_id)? == 0 {
            return Err(InvariantViolation::RowVanished(EntityRef::Term(term_id)).into());
        }
        let cells = self.repo.soft_delete_cells_for_term(term_id)?;
        let sessions = self.repo.soft_delete_sessions_for_term(term_id)?;
        let enrollments = self.repo.soft_delete_enrollments_for_term(term_id)?;

        info!(
            "event=term_delete module=education status=ok term_id={} sessions={} enrollments={} cells={}",
            term_id, sessions, enrollments, cells
        );
        Ok(term)
    }

    /// Compares cached aggregates with live rows. Read-only.
    pub fn audit(&self, term_id: TermId) -> EngineResult<TermAudit> {
        let term = self.require_term(term_id)?;
        let matrix = AttendanceMatrixManager::new(self.repo);
        let audit = TermAudit {
            term_id,
            cached: term.counters,
            live: self.repo.live_term_counters(term_id)?,
            session_numbers: self.repo.live_session_numbers(term_id)?,
            missing_cells: matrix.missing_cells(term_id)?,
            stray_cells: matrix.stray_cells(term_id)?,
            tally_drift: self.repo.tally_drift(term_id)?,
        };

        if !audit.is_consistent() {
            warn!(
                "event=term_audit module=education status=drift term_id={} drifted_counters={} numbering_contiguous={} missing_cells={} stray_cells={} tally_drift={}",
                term_id,
                audit
                    .drifted_counters()
                    .iter()
                    .map(|counter| counter.column())
                    .collect::<Vec<_>>()
                    .join(","),
                audit.numbering_contiguous(),
                audit.missing_cells.len(),
                audit.stray_cells.len(),
                audit.tally_drift.len()
            );
        }
        Ok(audit)
    }
}
