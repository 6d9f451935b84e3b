//! Engine components.
//!
//! # Responsibility
//! - Pair every row mutation with its counter and matrix side effects.
//! - Run against a repository bound to the caller's transaction.
//!
//! Every manager borrows an `EducationRepository`; the caller opens the
//! transaction (`db::in_transaction`), builds a `SqliteEducationRepository`
//! on it, and commits or rolls back as a whole. Only the cleanup handler
//! opens transactions of its own.

pub mod attendance_matrix;
pub mod cleanup;
pub mod cleanup_worker;
pub mod enrollment_manager;
pub mod error;
pub mod session_manager;
pub mod term_aggregate;

pub use attendance_matrix::{AttendanceMatrixManager, ReconcileReport};
pub use cleanup::{now_epoch_ms, remove_participant, CleanupHandler, DispatchReport};
pub use cleanup_worker::CleanupWorker;
pub use enrollment_manager::EnrollmentManager;
pub use error::{Conflict, EngineError, EngineResult, EntityRef, InvariantViolation};
pub use session_manager::SessionManager;
pub use term_aggregate::{TermAggregateManager, TermAudit};
