//! Term domain model and its denormalized counters.
//!
//! # Invariants
//! - Once a transaction commits, every counter equals the live cardinality of
//!   the child set it summarizes.
//! - `in_progress + completed + incomplete == enrollment_count`.
//! - Counters are only changed through `TermAggregateManager`.

use super::enrollment::EnrollmentStatus;
use super::validation::{validate_range, ValidationError};
use super::{ProgramId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TermId = Uuid;

/// Cached aggregates kept on the term row for O(1) reporting reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermCounters {
    pub number_of_sessions: i64,
    pub enrollment_count: i64,
    pub in_progress_count: i64,
    pub completed_count: i64,
    pub incomplete_count: i64,
    /// Sessions whose status is `done`.
    pub is_done_count: i64,
}

impl TermCounters {
    /// Sum of the per-status buckets.
    pub fn status_total(&self) -> i64 {
        self.in_progress_count + self.completed_count + self.incomplete_count
    }

    pub fn get(&self, counter: TermCounter) -> i64 {
        match counter {
            TermCounter::NumberOfSessions => self.number_of_sessions,
            TermCounter::EnrollmentCount => self.enrollment_count,
            TermCounter::InProgress => self.in_progress_count,
            TermCounter::Completed => self.completed_count,
            TermCounter::Incomplete => self.incomplete_count,
            TermCounter::IsDone => self.is_done_count,
        }
    }
}

/// One counter column on the term row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermCounter {
    NumberOfSessions,
    EnrollmentCount,
    InProgress,
    Completed,
    Incomplete,
    IsDone,
}

impl TermCounter {
    pub const ALL: [TermCounter; 6] = [
        TermCounter::NumberOfSessions,
        TermCounter::EnrollmentCount,
        TermCounter::InProgress,
        TermCounter::Completed,
        TermCounter::Incomplete,
        TermCounter::IsDone,
    ];

    /// Bucket that tracks enrollments in `status`.
    pub fn for_status(status: EnrollmentStatus) -> Self {
        match status {
            EnrollmentStatus::InProgress => Self::InProgress,
            EnrollmentStatus::Completed => Self::Completed,
            EnrollmentStatus::Incomplete => Self::Incomplete,
        }
    }

    /// Column name on `terms`. Closed set, safe to splice into SQL.
    pub fn column(self) -> &'static str {
        match self {
            Self::NumberOfSessions => "number_of_sessions",
            Self::EnrollmentCount => "enrollment_count",
            Self::InProgress => "in_progress_count",
            Self::Completed => "completed_count",
            Self::Incomplete => "incomplete_count",
            Self::IsDone => "is_done_count",
        }
    }
}

/// One cohort of a recurring program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: TermId,
    pub tenant_id: TenantId,
    pub program_id: ProgramId,
    /// Ordinal, unique among live terms of the program.
    pub term_number: i64,
    /// Epoch ms.
    pub starts_on: Option<i64>,
    /// Epoch ms. Not earlier than `starts_on` when both are set.
    pub ends_on: Option<i64>,
    #[serde(flatten)]
    pub counters: TermCounters,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTerm {
    pub program_id: ProgramId,
    pub term_number: i64,
    pub starts_on: Option<i64>,
    pub ends_on: Option<i64>,
    /// Sessions provisioned together with the term, numbered `1..=n`.
    pub initial_sessions: u32,
}

impl NewTerm {
    pub fn new(program_id: ProgramId, term_number: i64) -> Self {
        Self {
            program_id,
            term_number,
            starts_on: None,
            ends_on: None,
            initial_sessions: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.term_number < 1 {
            return Err(ValidationError::InvalidTermNumber(self.term_number));
        }
        validate_range(self.starts_on, self.ends_on)
    }
}
