//! Report row sets and attendance statistics.

use crate::{Store, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::params;
use serde::Serialize;
use std::fmt::Write as _;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_WIDTH: usize = 19;
const RECENT_LECTURES: i64 = 5;
const TOP_ATTENDEES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub student_id: String,
    pub name: String,
    pub timestamp: NaiveDateTime,
}

/// Everyone recorded for one lecture, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceReport {
    pub date: NaiveDate,
    pub lecture_number: u32,
    pub rows: Vec<ReportRow>,
}

impl AttendanceReport {
    pub fn total(&self) -> usize {
        self.rows.len()
    }
}

/// Renders a report for humans. Layout is up to the implementation.
pub trait ReportProjector {
    /// File extension for rendered output, without the dot.
    fn extension(&self) -> &'static str;

    fn render(&self, report: &AttendanceReport) -> String;
}

/// Fixed-width plain text table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTableProjector;

impl ReportProjector for TextTableProjector {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, report: &AttendanceReport) -> String {
        let id_w = report
            .rows
            .iter()
            .map(|r| r.student_id.chars().count())
            .chain(["Student ID".len()])
            .max()
            .unwrap_or(0);
        let name_w = report
            .rows
            .iter()
            .map(|r| r.name.chars().count())
            .chain(["Name".len()])
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(out, "Attendance Report - Lecture {}", report.lecture_number);
        let _ = writeln!(out, "Date: {}", report.date);
        let _ = writeln!(out, "Total Students: {}", report.total());
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<id_w$}  {:<name_w$}  Time", "Student ID", "Name");
        let _ = writeln!(out, "{}", "-".repeat(id_w + name_w + 4 + TIME_WIDTH));
        for row in &report.rows {
            let _ = writeln!(
                out,
                "{:<id_w$}  {:<name_w$}  {}",
                row.student_id,
                row.name,
                row.timestamp.format(TIME_FORMAT)
            );
        }
        out
    }
}

/// `attendance_<date>_lecture<n>.<ext>`
pub fn report_file_name(date: NaiveDate, lecture_number: u32, extension: &str) -> String {
    format!("attendance_{date}_lecture{lecture_number}.{extension}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LectureSummary {
    pub date: NaiveDate,
    pub lecture_number: u32,
    pub students: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attendee {
    pub student_id: String,
    pub name: String,
    pub attendances: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_students: u32,
    /// Distinct students seen on the reference day.
    pub attending_today: u32,
    pub recent_lectures: Vec<LectureSummary>,
    pub top_attendees: Vec<Attendee>,
}

impl Store {
    /// Row set for one lecture, joined with student names, by timestamp.
    pub fn attendance_report(
        &self,
        date: NaiveDate,
        lecture_number: u32,
    ) -> Result<AttendanceReport, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT students.student_id, students.name, attendance.timestamp
             FROM attendance JOIN students ON attendance.student_id = students.student_id
             WHERE attendance.date = ?1 AND attendance.lecture_number = ?2
             ORDER BY attendance.timestamp, attendance.id",
        )?;
        let rows = stmt
            .query_map(params![date, lecture_number], |row| {
                Ok(ReportRow {
                    student_id: row.get(0)?,
                    name: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AttendanceReport {
            date,
            lecture_number,
            rows,
        })
    }

    /// Dashboard numbers relative to `today`.
    pub fn statistics(&self, today: NaiveDate) -> Result<Statistics, StoreError> {
        let total_students: u32 =
            self.conn
                .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        let attending_today: u32 = self.conn.query_row(
            "SELECT COUNT(DISTINCT student_id) FROM attendance WHERE date = ?1",
            params![today],
            |row| row.get(0),
        )?;

        let recent_lectures = self
            .conn
            .prepare(
                "SELECT date, lecture_number, COUNT(DISTINCT student_id)
                 FROM attendance GROUP BY date, lecture_number
                 ORDER BY date DESC, lecture_number DESC LIMIT ?1",
            )?
            .query_map(params![RECENT_LECTURES], |row| {
                Ok(LectureSummary {
                    date: row.get(0)?,
                    lecture_number: row.get(1)?,
                    students: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let top_attendees = self
            .conn
            .prepare(
                "SELECT students.student_id, students.name, COUNT(*) AS n
                 FROM attendance JOIN students ON attendance.student_id = students.student_id
                 GROUP BY students.student_id
                 ORDER BY n DESC, students.student_id LIMIT ?1",
            )?
            .query_map(params![TOP_ATTENDEES], |row| {
                Ok(Attendee {
                    student_id: row.get(0)?,
                    name: row.get(1)?,
                    attendances: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Statistics {
            total_students,
            attending_today,
            recent_lectures,
            top_attendees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Descriptor;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, 0).unwrap()
    }

    fn seeded() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_in_memory(dir.path()).unwrap();
        for (id, name) in [("S001", "Ada"), ("S002", "Grace"), ("S003", "Alan")] {
            store.add_identity(id, name, &Descriptor::new(vec![0.0])).unwrap();
        }
        store.record_attendance("S002", day(19), 1, at(19, 9, 2)).unwrap();
        store.record_attendance("S001", day(19), 1, at(19, 9, 1)).unwrap();
        store.record_attendance("S001", day(19), 2, at(19, 11, 0)).unwrap();
        store.record_attendance("S001", day(18), 1, at(18, 9, 0)).unwrap();
        (store, dir)
    }

    #[test]
    fn test_report_rows_in_arrival_order() {
        let (store, _dir) = seeded();
        let report = store.attendance_report(day(19), 1).unwrap();

        let ids: Vec<_> = report.rows.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S001", "S002"]);
        assert_eq!(report.rows[0].name, "Ada");
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn test_empty_report() {
        let (store, _dir) = seeded();
        assert!(store.attendance_report(day(19), 9).unwrap().rows.is_empty());
    }

    #[test]
    fn test_text_projection() {
        let (store, _dir) = seeded();
        let text = TextTableProjector.render(&store.attendance_report(day(19), 1).unwrap());

        assert!(text.starts_with("Attendance Report - Lecture 1\nDate: 2026-10-19\nTotal Students: 2\n"));
        assert!(text.contains("S001        Ada    2026-10-19 09:01:00"));
        assert!(text.contains("S002        Grace  2026-10-19 09:02:00"));
    }

    #[test]
    fn test_report_file_name() {
        assert_eq!(
            report_file_name(day(19), 3, TextTableProjector.extension()),
            "attendance_2026-10-19_lecture3.txt"
        );
    }

    #[test]
    fn test_statistics() {
        let (store, _dir) = seeded();
        let stats = store.statistics(day(19)).unwrap();

        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.attending_today, 2);
        assert_eq!(
            stats.recent_lectures,
            vec![
                LectureSummary { date: day(19), lecture_number: 2, students: 1 },
                LectureSummary { date: day(19), lecture_number: 1, students: 2 },
                LectureSummary { date: day(18), lecture_number: 1, students: 1 },
            ]
        );
        assert_eq!(stats.top_attendees[0].student_id, "S001");
        assert_eq!(stats.top_attendees[0].attendances, 3);
        assert_eq!(stats.top_attendees.len(), 2, "students without attendance are left out");
    }
}
