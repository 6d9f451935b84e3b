//! Offset pagination primitives returned by list queries.
//!
//! Callers wrap `Page` into their own offset or cursor envelope.

use serde::{Deserialize, Serialize};

/// Offset/limit window. `limit = None` returns everything after `offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: Option<u32>,
}

impl PageRequest {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// `LIMIT` value for SQLite; `-1` means unbounded.
    pub fn sql_limit(&self) -> i64 {
        self.limit.map_or(-1, i64::from)
    }

    pub fn sql_offset(&self) -> i64 {
        i64::from(self.offset)
    }
}

/// One page of items plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}
