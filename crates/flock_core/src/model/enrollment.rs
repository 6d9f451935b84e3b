//! Enrollment domain model.
//!
//! # Invariants
//! - At most one live enrollment per (term, participant).
//! - `attendance_count` equals the enrollment's live cells marked present.

use super::term::TermId;
use super::{ParticipantId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EnrollmentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    InProgress,
    Completed,
    Incomplete,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 3] = [
        EnrollmentStatus::InProgress,
        EnrollmentStatus::Completed,
        EnrollmentStatus::Incomplete,
    ];

    pub fn as_db(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "incomplete" => Some(Self::Incomplete),
            _ => None,
        }
    }
}

/// One participant's registration in a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub tenant_id: TenantId,
    pub term_id: TermId,
    pub participant_id: ParticipantId,
    pub status: EnrollmentStatus,
    /// Cached count of this enrollment's cells marked present.
    pub attendance_count: i64,
    pub note: Option<String>,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// List filter for enrollments of one term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentFilter {
    pub status: Option<EnrollmentStatus>,
}
