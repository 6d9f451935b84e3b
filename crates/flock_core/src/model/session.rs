//! Session domain model.
//!
//! # Invariants
//! - For a term with N live sessions, live `number`s are exactly `1..=N`.
//! - `ends_at` is not earlier than `starts_at` when both are set.

use super::term::TermId;
use super::validation::{validate_range, ValidationError};
use super::{PersonId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Scheduled, not started.
    Reserved,
    InProgress,
    /// Held; counted in the term's `is_done_count`.
    Done,
}

impl SessionStatus {
    pub fn is_done(self) -> bool {
        self == Self::Done
    }

    pub fn as_db(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "reserved" => Some(Self::Reserved),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// One numbered meeting of a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub term_id: TermId,
    /// 1-based position inside the term.
    #[serde(rename = "session")]
    pub number: i64,
    pub status: SessionStatus,
    pub starts_at: Option<i64>,
    pub ends_at: Option<i64>,
    pub responsible_person_id: Option<PersonId>,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for appending a session; the number is assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub status: SessionStatus,
    pub starts_at: Option<i64>,
    pub ends_at: Option<i64>,
    pub responsible_person_id: Option<PersonId>,
}

impl Default for NewSession {
    fn default() -> Self {
        Self {
            status: SessionStatus::Reserved,
            starts_at: None,
            ends_at: None,
            responsible_person_id: None,
        }
    }
}

impl NewSession {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_range(self.starts_at, self.ends_at)
    }
}

/// Editable schedule fields of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDetails {
    pub starts_at: Option<i64>,
    pub ends_at: Option<i64>,
    pub responsible_person_id: Option<PersonId>,
}

impl SessionDetails {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_range(self.starts_at, self.ends_at)
    }
}
