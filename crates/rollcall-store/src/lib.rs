//! rollcall-store: SQLite persistence for enrolled identities, attendance
//! and administrator credentials.
//!
//! # Storage layout
//!
//! | table        | key                                       | notes                          |
//! |--------------|-------------------------------------------|--------------------------------|
//! | `students`   | `student_id` (UNIQUE)                     | descriptor lives in a file     |
//! | `attendance` | UNIQUE `(student_id, date, lecture_number)` | cascades on student removal  |
//! | `admins`     | `username`                                | salted SHA-256                 |
//!
//! Descriptors are JSON files under the descriptor directory, one per student.

pub mod admins;
pub mod identities;
pub mod ledger;
pub mod reports;

pub use identities::Student;
pub use reports::{
    report_file_name, AttendanceReport, Attendee, LectureSummary, ReportProjector, ReportRow,
    Statistics, TextTableProjector,
};

use rollcall_core::{IdentityCache, IdentitySnapshot};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),
    #[error("descriptor file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("descriptor encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("student {0} is already enrolled")]
    DuplicateIdentity(String),
    #[error("student {0} is not enrolled")]
    UnknownStudent(String),
    #[error("invalid student id {0:?}")]
    InvalidStudentId(String),
    #[error("student name must not be empty")]
    EmptyName,
    #[error("descriptor is empty")]
    EmptyDescriptor,
    #[error("descriptor contains NaN or infinite values")]
    NonFiniteDescriptor,
    #[error("no lecture number after {0} is available for this date")]
    LectureNumberExhausted(u32),
    #[error("descriptor has {got} dimensions, enrolled descriptors have {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("username and password must not be empty")]
    EmptyCredentials,
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// SQLite-backed store plus the in-memory identity snapshot it maintains.
pub struct Store {
    conn: Connection,
    descriptor_dir: PathBuf,
    cache: IdentityCache,
}

impl Store {
    /// Open (or create) the database at `db_path`, storing descriptor files
    /// under `descriptor_dir`, and load the identity snapshot.
    pub fn open(db_path: &Path, descriptor_dir: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = Connection::open(db_path)?;
        tracing::info!(path = %db_path.display(), "opened attendance database");
        Self::with_connection(conn, descriptor_dir)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory(descriptor_dir: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, descriptor_dir)
    }

    fn with_connection(conn: Connection, descriptor_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(descriptor_dir).map_err(|e| StoreError::io(descriptor_dir, e))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            conn,
            descriptor_dir: descriptor_dir.to_path_buf(),
            cache: IdentityCache::default(),
        };
        store.init_schema()?;
        store.reload_identities()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS students (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id      TEXT NOT NULL UNIQUE,
                name            TEXT NOT NULL,
                descriptor_path TEXT NOT NULL,
                enrolled_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attendance (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id     TEXT NOT NULL
                               REFERENCES students(student_id) ON DELETE CASCADE,
                date           TEXT NOT NULL,
                lecture_number INTEGER NOT NULL,
                timestamp      TEXT NOT NULL,
                UNIQUE(student_id, date, lecture_number)
            );

            CREATE TABLE IF NOT EXISTS admins (
                username      TEXT NOT NULL PRIMARY KEY,
                salt          TEXT NOT NULL,
                password_hash TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attendance_student_id ON attendance(student_id);
            CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
            CREATE INDEX IF NOT EXISTS idx_attendance_lecture ON attendance(lecture_number);",
        )?;
        Ok(())
    }

    /// The identity snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<IdentitySnapshot> {
        self.cache.current()
    }
}

/// True if `err` is a SQLite constraint failure with the given extended code.
pub(crate) fn is_constraint(err: &rusqlite::Error, extended_code: std::os::raw::c_int) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation && e.extended_code == extended_code
    )
}
