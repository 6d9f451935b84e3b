//! Storage contracts the managers consume, with one tenant-scoped SQLite
//! implementation.
//!
//! Reads skip tombstoned rows unless a method says otherwise. Writes return
//! the number of rows they touched and leave the meaning of zero to the
//! caller.

pub mod attendance_repo;
pub mod enrollment_repo;
pub mod outbox_repo;
pub mod session_repo;
pub mod term_repo;

use crate::db::migrations::{schema_version, SCHEMA_VERSION};
use crate::db::DbError;
use crate::model::TenantId;
use rusqlite::{Connection, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub use attendance_repo::{AttendanceRepository, TallyDrift};
pub use enrollment_repo::EnrollmentRepository;
pub use outbox_repo::{OutboxEntry, SqliteOutboxRepository};
pub use session_repo::{SessionRepository, SessionStats};
pub use term_repo::TermRepository;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// A live-row unique index rejected the write.
    Duplicate(&'static str),
    /// The connection was not opened through `open_db*`.
    SchemaNotReady { found: u32 },
    /// A stored value does not fit the model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Duplicate(index) => write!(f, "duplicate live row rejected by `{index}`"),
            Self::SchemaNotReady { found } => write!(
                f,
                "connection is at schema version {found}, engine needs {SCHEMA_VERSION}"
            ),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// SQLite storage for one tenant's terms, sessions, enrollments and cells.
///
/// Borrows a plain connection or, through deref, a `Transaction`.
pub struct SqliteEducationRepository<'conn> {
    conn: &'conn Connection,
    tenant_id: TenantId,
}

impl<'conn> SqliteEducationRepository<'conn> {
    pub fn try_new(conn: &'conn Connection, tenant_id: TenantId) -> RepoResult<Self> {
        require_schema(conn)?;
        Ok(Self { conn, tenant_id })
    }

    fn tenant(&self) -> String {
        self.tenant_id.to_string()
    }
}

fn require_schema(conn: &Connection) -> RepoResult<()> {
    match schema_version(conn)? {
        SCHEMA_VERSION => Ok(()),
        found => Err(RepoError::SchemaNotReady { found }),
    }
}

/// Maps unique-index failures to `RepoError::Duplicate(index)`.
fn map_unique(err: rusqlite::Error, index: &'static str) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            RepoError::Duplicate(index)
        }
        _ => err.into(),
    }
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn parse_optional_uuid(value: Option<String>, column: &'static str) -> RepoResult<Option<Uuid>> {
    value.map(|value| parse_uuid(&value, column)).transpose()
}

fn parse_is_deleted(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid is_deleted value `{other}` in {column}"
        ))),
    }
}

fn count_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Everything the managers need from storage, behind one bound.
pub trait EducationRepository:
    TermRepository + SessionRepository + EnrollmentRepository + AttendanceRepository
{
}

impl<T> EducationRepository for T where
    T: TermRepository + SessionRepository + EnrollmentRepository + AttendanceRepository
{
}
