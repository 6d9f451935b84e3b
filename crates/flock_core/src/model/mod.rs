//! Domain model for education program terms and their attendance matrix.
//!
//! # Responsibility
//! - Define the canonical records shared by the repository and managers.
//! - Own the pure rules that do not need storage (status buckets, presence
//!   deltas, cleanup state transitions, input validation).
//!
//! # Invariants
//! - Every term, session and enrollment is identified by a stable UUID.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod attendance;
pub mod cleanup;
pub mod enrollment;
pub mod page;
pub mod session;
pub mod term;
pub mod validation;

use uuid::Uuid;

/// Organization that owns every row; all lookups are scoped by it.
pub type TenantId = Uuid;
/// Recurring education program a term belongs to.
pub type ProgramId = Uuid;
/// Church member registered in terms; owned by the membership module.
pub type ParticipantId = Uuid;
/// Member responsible for running a session.
pub type PersonId = Uuid;
