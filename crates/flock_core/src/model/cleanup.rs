//! Participant-removed notification and its delivery state machine.
//!
//! ```text
//! pending --ok--------------------------> completed
//! pending --err, attempts left----------> retrying --due--> pending
//! pending --err, attempts exhausted-----> abandoned
//! ```
//!
//! `completed` and `abandoned` are terminal. `abandoned` needs manual repair.

use super::{ParticipantId, TenantId};
use serde::{Deserialize, Serialize};

/// Message carried on the cleanup channel.
///
/// Wire shape: `{"tenantId", "participantId", "attempt", "maxAttempts"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRemoved {
    pub tenant_id: TenantId,
    pub participant_id: ParticipantId,
    /// 1-based delivery attempt.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ParticipantRemoved {
    /// First delivery of a fresh notification.
    pub fn new(tenant_id: TenantId, participant_id: ParticipantId, max_attempts: u32) -> Self {
        Self {
            tenant_id,
            participant_id,
            attempt: 1,
            max_attempts,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Copy re-emitted after a failed attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupState {
    Pending,
    Retrying,
    Abandoned,
    Completed,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { attempts_left: bool },
}

impl CleanupState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Abandoned | Self::Completed)
    }

    /// Transition taken after an attempt made from this state.
    ///
    /// Returns `None` when no attempt may be made from this state.
    pub fn after_attempt(self, outcome: AttemptOutcome) -> Option<Self> {
        if self != Self::Pending {
            return None;
        }
        Some(match outcome {
            AttemptOutcome::Succeeded => Self::Completed,
            AttemptOutcome::Failed {
                attempts_left: true,
            } => Self::Retrying,
            AttemptOutcome::Failed {
                attempts_left: false,
            } => Self::Abandoned,
        })
    }

    /// Transition taken once a retrying message's backoff has elapsed.
    pub fn on_due(self) -> Option<Self> {
        match self {
            Self::Retrying => Some(Self::Pending),
            Self::Pending => Some(Self::Pending),
            Self::Abandoned | Self::Completed => None,
        }
    }

    pub fn as_db(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Abandoned => "abandoned",
            Self::Completed => "completed",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "abandoned" => Some(Self::Abandoned),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}
