//! Error type returned by every engine operation.
//!
//! # Invariants
//! - `NotFound` and `Conflict` are returned to callers unchanged.
//! - `InvariantViolation` means a write hit zero rows where one was expected;
//!   the caller's transaction must be rolled back.

use crate::db::DbError;
use crate::model::attendance::CellId;
use crate::model::enrollment::EnrollmentId;
use crate::model::session::SessionId;
use crate::model::term::{TermCounter, TermId};
use crate::model::validation::ValidationError;
use crate::model::{ParticipantId, ProgramId};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

/// Reference to one engine entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Term(TermId),
    Session(SessionId),
    Enrollment(EnrollmentId),
    Cell(CellId),
    /// Cell addressed by its matrix coordinate.
    CellAt {
        session_id: SessionId,
        enrollment_id: EnrollmentId,
    },
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Term(id) => write!(f, "term {id}"),
            Self::Session(id) => write!(f, "session {id}"),
            Self::Enrollment(id) => write!(f, "enrollment {id}"),
            Self::Cell(id) => write!(f, "attendance cell {id}"),
            Self::CellAt {
                session_id,
                enrollment_id,
            } => write!(
                f,
                "attendance cell for session {session_id} and enrollment {enrollment_id}"
            ),
        }
    }
}

/// Request conflicts with current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    AlreadyEnrolled {
        term_id: TermId,
        participant_id: ParticipantId,
    },
    CapacityExceeded {
        term_id: TermId,
        max_sessions: u32,
    },
    /// `reconcile` found no missing cells.
    AlreadyComplete { term_id: TermId },
    TermNumberTaken {
        program_id: ProgramId,
        term_number: i64,
    },
}

impl Display for Conflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyEnrolled {
                term_id,
                participant_id,
            } => write!(
                f,
                "participant {participant_id} is already enrolled in term {term_id}"
            ),
            Self::CapacityExceeded {
                term_id,
                max_sessions,
            } => write!(
                f,
                "term {term_id} already has the maximum of {max_sessions} sessions"
            ),
            Self::AlreadyComplete { term_id } => {
                write!(f, "attendance matrix of term {term_id} is already complete")
            }
            Self::TermNumberTaken {
                program_id,
                term_number,
            } => write!(
                f,
                "program {program_id} already has a live term number {term_number}"
            ),
        }
    }
}

/// A write that must touch rows touched none (or the wrong number).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Counter update matched no live term.
    TermNotFound {
        term_id: TermId,
        counter: TermCounter,
    },
    /// Tally update matched no live enrollment.
    EnrollmentTallyMissed { enrollment_id: EnrollmentId },
    /// Row loaded earlier in the transaction was gone at write time.
    RowVanished(EntityRef),
    /// Tally decrements after a session delete did not match present cells.
    TallyMismatch {
        session_id: SessionId,
        present_cells: i64,
        updated: usize,
    },
    /// Bulk cell insert created fewer cells than were missing.
    CellInsertShortfall {
        term_id: TermId,
        missing: usize,
        inserted: usize,
    },
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TermNotFound { term_id, counter } => write!(
                f,
                "term not found while updating `{}` on term {term_id}",
                counter.column()
            ),
            Self::EnrollmentTallyMissed { enrollment_id } => write!(
                f,
                "attendance tally update matched no live enrollment {enrollment_id}"
            ),
            Self::RowVanished(entity) => write!(f, "{entity} vanished mid-transaction"),
            Self::TallyMismatch {
                session_id,
                present_cells,
                updated,
            } => write!(
                f,
                "session {session_id} had {present_cells} present cells but {updated} tallies were decremented"
            ),
            Self::CellInsertShortfall {
                term_id,
                missing,
                inserted,
            } => write!(
                f,
                "term {term_id} was missing {missing} cells but only {inserted} were inserted"
            ),
        }
    }
}

/// Errors from engine operations.
#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    /// Referenced entity is absent, soft-deleted, or owned by another tenant.
    NotFound(EntityRef),
    Conflict(Conflict),
    InvariantViolation(InvariantViolation),
    /// Storage failure.
    Repo(RepoError),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::Conflict(conflict) => write!(f, "{conflict}"),
            Self::InvariantViolation(violation) => write!(f, "invariant violation: {violation}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Repo(value.into())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl From<Conflict> for EngineError {
    fn from(value: Conflict) -> Self {
        Self::Conflict(value)
    }
}

impl From<InvariantViolation> for EngineError {
    fn from(value: InvariantViolation) -> Self {
        Self::InvariantViolation(value)
    }
}
