//! Attendance matrix cells and the tri-state presence value.
//!
//! # Invariants
//! - At most one live cell per (session, enrollment) pair.
//! - Presence transitions change the owning enrollment's tally only as
//!   described by `Presence::tally_delta`.

use super::enrollment::EnrollmentId;
use super::session::SessionId;
use super::term::TermId;
use super::TenantId;
use serde::{Deserialize, Serialize};

/// Row id of an attendance cell.
pub type CellId = i64;

/// Presence recorded for one participant at one session.
///
/// Persisted as nullable integer: `NULL` unknown, `1` present, `0` absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Unknown,
    Present,
    Absent,
}

impl Presence {
    /// Change to the enrollment's `attendance_count` when a cell moves from
    /// `self` to `to`. Unlisted transitions (same value) change nothing.
    ///
    /// | from    | to      | delta |
    /// |---------|---------|-------|
    /// | unknown | present | +1    |
    /// | unknown | absent  | 0     |
    /// | present | unknown | -1    |
    /// | present | absent  | -1    |
    /// | absent  | unknown | 0     |
    /// | absent  | present | +1    |
    pub fn tally_delta(self, to: Presence) -> i64 {
        match (self, to) {
            (Self::Unknown, Self::Present) => 1,
            (Self::Unknown, Self::Absent) => 0,
            (Self::Present, Self::Unknown) => -1,
            (Self::Present, Self::Absent) => -1,
            (Self::Absent, Self::Unknown) => 0,
            (Self::Absent, Self::Present) => 1,
            _ => 0,
        }
    }

    pub fn to_db(self) -> Option<i64> {
        match self {
            Self::Unknown => None,
            Self::Present => Some(1),
            Self::Absent => Some(0),
        }
    }

    pub fn from_db(value: Option<i64>) -> Option<Self> {
        match value {
            None => Some(Self::Unknown),
            Some(1) => Some(Self::Present),
            Some(0) => Some(Self::Absent),
            Some(_) => None,
        }
    }
}

/// Presence record for one (session, enrollment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceCell {
    pub id: CellId,
    pub tenant_id: TenantId,
    pub term_id: TermId,
    pub session_id: SessionId,
    pub enrollment_id: EnrollmentId,
    pub presence: Presence,
    pub note: Option<String>,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Sparse matrix coordinate.
pub type CellKey = (SessionId, EnrollmentId);
