//! Attendance ledger: one row per `(student, date, lecture)`.
//!
//! Duplicate suppression is the table's UNIQUE constraint, not a prior
//! lookup, so two writers racing on the same event cannot both insert.

use crate::{is_constraint, Store, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{AttendanceLedger, AttendanceRecord, LectureKey, LectureSelection, Outcome};
use rusqlite::params;

impl Store {
    /// Insert an attendance event if none exists for the tuple yet.
    pub fn record_attendance(
        &self,
        student_id: &str,
        date: NaiveDate,
        lecture_number: u32,
        timestamp: NaiveDateTime,
    ) -> Result<Outcome, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO attendance (student_id, date, lecture_number, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![student_id, date, lecture_number, timestamp],
        );

        match inserted {
            Ok(_) => {
                tracing::debug!(student_id, %date, lecture_number, "attendance row inserted");
                Ok(Outcome::Inserted)
            }
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                tracing::debug!(student_id, %date, lecture_number, "attendance already recorded");
                Ok(Outcome::AlreadyRecorded)
            }
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                Err(StoreError::UnknownStudent(student_id.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Highest lecture number recorded on `date`, plus one (1 if none).
    pub fn next_lecture_number(&self, date: NaiveDate) -> Result<u32, StoreError> {
        let last: Option<u32> = self.conn.query_row(
            "SELECT MAX(lecture_number) FROM attendance WHERE date = ?1",
            params![date],
            |row| row.get(0),
        )?;
        match last {
            None => Ok(1),
            Some(n) => n.checked_add(1).ok_or(StoreError::LectureNumberExhausted(n)),
        }
    }

    /// Fix the lecture a session on `date` will write to.
    pub fn resolve_lecture(
        &self,
        date: NaiveDate,
        selection: LectureSelection,
    ) -> Result<LectureKey, StoreError> {
        let lecture_number = match selection {
            LectureSelection::Explicit(n) => n,
            LectureSelection::NextForDate => self.next_lecture_number(date)?,
        };
        Ok(LectureKey {
            date,
            lecture_number,
        })
    }

    /// Every attendance event for one student, oldest first.
    pub fn attendance_for_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, date, lecture_number, timestamp
             FROM attendance WHERE student_id = ?1
             ORDER BY date, lecture_number",
        )?;
        let records = stmt
            .query_map(params![student_id], |row| {
                Ok(AttendanceRecord {
                    student_id: row.get(0)?,
                    date: row.get(1)?,
                    lecture_number: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl AttendanceLedger for Store {
    type Error = StoreError;

    /// A student removed since the session started yields
    /// [`Outcome::NotEnrolled`] rather than an error, so one stale identity
    /// cannot stall a scan.
    fn record(&mut self, record: &AttendanceRecord) -> Result<Outcome, StoreError> {
        match self.record_attendance(
            &record.student_id,
            record.date,
            record.lecture_number,
            record.timestamp,
        ) {
            Err(StoreError::UnknownStudent(_)) => Ok(Outcome::NotEnrolled),
            other => other,
        }
    }
}
