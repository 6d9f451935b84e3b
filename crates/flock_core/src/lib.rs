//! Education program consistency engine.
//! Terms, numbered sessions, enrollments and the attendance matrix, with
//! every cached aggregate kept in step with the rows it summarizes.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{CleanupConfig, ConfigError, EngineConfig};
pub use db::{in_transaction, open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, LoggingError};
pub use model::attendance::{AttendanceCell, CellId, CellKey, Presence};
pub use model::cleanup::{CleanupState, ParticipantRemoved};
pub use model::enrollment::{Enrollment, EnrollmentFilter, EnrollmentId, EnrollmentStatus};
pub use model::page::{Page, PageRequest};
pub use model::session::{NewSession, Session, SessionDetails, SessionId, SessionStatus};
pub use model::term::{NewTerm, Term, TermCounter, TermCounters, TermId};
pub use model::validation::ValidationError;
pub use model::{ParticipantId, PersonId, ProgramId, TenantId};
pub use repo::{EducationRepository, RepoError, RepoResult, SqliteEducationRepository};
pub use service::{
    AttendanceMatrixManager, CleanupHandler, CleanupWorker, Conflict, DispatchReport,
    EngineError, EngineResult, EnrollmentManager, EntityRef, InvariantViolation,
    ReconcileReport, SessionManager, TermAggregateManager, TermAudit,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
