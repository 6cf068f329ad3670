//! Identity store: enrolled students and their descriptor files.

use crate::{is_constraint, Store, StoreError};
use chrono::{Local, NaiveDateTime};
use rollcall_core::{Descriptor, EnrolledIdentity, Enrollment, IdentitySnapshot};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An enrolled student as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub descriptor_path: PathBuf,
    pub enrolled_at: NaiveDateTime,
}

impl Store {
    /// Enroll a student.
    ///
    /// The row is inserted first, inside a transaction, so a duplicate id is
    /// refused before any descriptor file is touched. The descriptor file is
    /// then written and the transaction committed; the new snapshot is
    /// installed before returning.
    pub fn add_identity(
        &mut self,
        student_id: &str,
        name: &str,
        descriptor: &Descriptor,
    ) -> Result<(), StoreError> {
        validate_student_id(student_id)?;
        if name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }
        if descriptor.is_empty() {
            return Err(StoreError::EmptyDescriptor);
        }
        if descriptor.values.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::NonFiniteDescriptor);
        }
        if let Some(expected) = self.snapshot().dimension() {
            if descriptor.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: descriptor.len(),
                });
            }
        }

        let path = self.descriptor_path(student_id);
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO students (student_id, name, descriptor_path, enrolled_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                student_id,
                name,
                path.to_string_lossy().into_owned(),
                Local::now().naive_local(),
            ],
        );
        match inserted {
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                tracing::warn!(student_id, "enrollment refused: id already enrolled");
                return Err(StoreError::DuplicateIdentity(student_id.to_owned()));
            }
            other => other?,
        };

        write_descriptor(&path, descriptor)?;
        if let Err(e) = tx.commit() {
            remove_descriptor_file(&path);
            return Err(e.into());
        }

        tracing::info!(student_id, path = %path.display(), "student enrolled");
        self.reload_identities()?;
        Ok(())
    }

    /// Persist a finished enrollment workflow.
    pub fn enroll(&mut self, enrollment: &Enrollment) -> Result<(), StoreError> {
        self.add_identity(&enrollment.student_id, &enrollment.name, &enrollment.descriptor)
    }

    /// Remove a student, their descriptor file and (by cascade) their
    /// attendance. Returns whether the student existed.
    pub fn remove_identity(&mut self, student_id: &str) -> Result<bool, StoreError> {
        let path: Option<String> = self
            .conn
            .query_row(
                "SELECT descriptor_path FROM students WHERE student_id = ?1",
                params![student_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(path) = path else {
            return Ok(false);
        };

        self.conn.execute(
            "DELETE FROM students WHERE student_id = ?1",
            params![student_id],
        )?;
        remove_descriptor_file(Path::new(&path));

        tracing::info!(student_id, "student removed");
        self.reload_identities()?;
        Ok(true)
    }

    /// Load every enrolled identity, in enrollment order.
    ///
    /// A student whose descriptor file is missing or unreadable is skipped
    /// and logged; only a database failure fails the load.
    pub fn load_identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT student_id, descriptor_path FROM students ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut identities = Vec::with_capacity(rows.len());
        for (student_id, path) in rows {
            match read_descriptor(Path::new(&path)) {
                Ok(descriptor) => identities.push(EnrolledIdentity {
                    student_id,
                    descriptor,
                }),
                Err(reason) => tracing::warn!(
                    %student_id,
                    %path,
                    %reason,
                    "corrupt descriptor; student is unrecognizable until re-enrolled"
                ),
            }
        }
        Ok(identities)
    }

    /// Rebuild the identity snapshot from storage and swap it in.
    pub fn reload_identities(&self) -> Result<Arc<IdentitySnapshot>, StoreError> {
        let snapshot = IdentitySnapshot::new(self.load_identities()?);
        tracing::info!(identities = snapshot.len(), "identity snapshot loaded");
        self.cache.replace(snapshot);
        Ok(self.cache.current())
    }

    pub fn student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        let student = self
            .conn
            .query_row(
                "SELECT student_id, name, descriptor_path, enrolled_at
                 FROM students WHERE student_id = ?1",
                params![student_id],
                row_to_student,
            )
            .optional()?;
        Ok(student)
    }

    /// All students ordered by id.
    pub fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, name, descriptor_path, enrolled_at
             FROM students ORDER BY student_id",
        )?;
        let students = stmt
            .query_map([], row_to_student)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(students)
    }

    fn descriptor_path(&self, student_id: &str) -> PathBuf {
        self.descriptor_dir.join(format!("{student_id}.json"))
    }
}

fn row_to_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        student_id: row.get(0)?,
        name: row.get(1)?,
        descriptor_path: PathBuf::from(row.get::<_, String>(2)?),
        enrolled_at: row.get(3)?,
    })
}

/// Student ids name files, so they must be a single plain path component.
fn validate_student_id(student_id: &str) -> Result<(), StoreError> {
    let bad = student_id.trim().is_empty()
        || student_id != student_id.trim()
        || student_id == "."
        || student_id == ".."
        || student_id.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(StoreError::InvalidStudentId(student_id.to_owned()));
    }
    Ok(())
}

/// Write via a temporary file and rename, so readers never see a partial file.
fn write_descriptor(path: &Path, descriptor: &Descriptor) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(descriptor)?;
    std::fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        remove_descriptor_file(&tmp);
        StoreError::io(path, e)
    })
}

fn read_descriptor(path: &Path) -> Result<Descriptor, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let descriptor: Descriptor = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    if descriptor.is_empty() {
        return Err("descriptor has no values".into());
    }
    if descriptor.values.iter().any(|v| !v.is_finite()) {
        return Err("descriptor contains non-finite values".into());
    }
    Ok(descriptor)
}

fn remove_descriptor_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove descriptor file"),
    }
}
