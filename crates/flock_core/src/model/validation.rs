//! Input validation shared by term, session and enrollment writes.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Longest free-text note accepted on enrollments and attendance cells.
pub const MAX_NOTE_CHARS: usize = 1000;

/// Rejected input, reported before any row is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Term numbers are 1-based ordinals.
    InvalidTermNumber(i64),
    /// `end` is earlier than `start`.
    InvalidDateRange { start: i64, end: i64 },
    /// Note exceeds `MAX_NOTE_CHARS`.
    NoteTooLong { chars: usize },
    /// Bulk provisioning was asked for zero sessions.
    EmptyBatch,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTermNumber(value) => {
                write!(f, "term number must be >= 1, got {value}")
            }
            Self::InvalidDateRange { start, end } => {
                write!(f, "date range end {end} is earlier than start {start}")
            }
            Self::NoteTooLong { chars } => write!(
                f,
                "note has {chars} characters; at most {MAX_NOTE_CHARS} are allowed"
            ),
            Self::EmptyBatch => write!(f, "batch must contain at least one session"),
        }
    }
}

impl Error for ValidationError {}

/// Checks an optional `[start, end]` pair of epoch milliseconds.
pub fn validate_range(start: Option<i64>, end: Option<i64>) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
    }
    Ok(())
}

/// Trims a note; blank input clears it.
pub fn normalize_note(note: Option<String>) -> Result<Option<String>, ValidationError> {
    let Some(note) = note else {
        return Ok(None);
    };
    let trimmed = note.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let chars = trimmed.chars().count();
    if chars > MAX_NOTE_CHARS {
        return Err(ValidationError::NoteTooLong { chars });
    }
    Ok(Some(trimmed.to_string()))
}
