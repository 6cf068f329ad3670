//! Scan session: one tick per admitted frame, from detections to ledger writes.

use crate::gallery::IdentitySnapshot;
use crate::matcher::Matcher;
use crate::session::{FrameThrottle, SessionTracker};
use crate::types::{AttendanceRecord, BoundingBox, Detection};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use std::time::Duration;
use uuid::Uuid;

/// Result of an idempotent ledger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Inserted,
    AlreadyRecorded,
    /// The student was removed after the session took its snapshot; no row
    /// was written.
    NotEnrolled,
}

/// Persistent record of attendance, at most one row per
/// `(student, date, lecture)`.
pub trait AttendanceLedger {
    type Error: std::error::Error + 'static;

    fn record(&mut self, record: &AttendanceRecord) -> Result<Outcome, Self::Error>;
}

/// Which lecture a session takes attendance for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LectureSelection {
    /// Operator-supplied lecture number.
    Explicit(u32),
    /// One past the highest lecture already recorded for the date.
    NextForDate,
}

/// Date and lecture a session writes to; fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LectureKey {
    pub date: NaiveDate,
    pub lecture_number: u32,
}

/// What happened to one face in a processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum FaceDecision {
    /// Descriptor length does not fit the enrolled gallery.
    Rejected { bbox: BoundingBox, len: usize },
    /// No enrolled student close enough.
    Unknown { bbox: BoundingBox, distance: f32 },
    /// Matched a student already handled earlier in this session.
    AlreadySeen {
        bbox: BoundingBox,
        student_id: String,
        distance: f32,
    },
    /// Matched a student the ledger no longer knows; nothing was written.
    NotEnrolled {
        bbox: BoundingBox,
        student_id: String,
        distance: f32,
    },
    /// First match this session; the ledger was written.
    Recorded {
        bbox: BoundingBox,
        student_id: String,
        distance: f32,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub tick: u64,
    pub decisions: Vec<FaceDecision>,
}

impl FrameReport {
    /// Students newly written to the ledger in this tick.
    pub fn inserted(&self) -> impl Iterator<Item = &str> {
        self.decisions.iter().filter_map(|d| match d {
            FaceDecision::Recorded {
                student_id,
                outcome: Outcome::Inserted,
                ..
            } => Some(student_id.as_str()),
            _ => None,
        })
    }
}

/// A tick stopped by a ledger failure.
///
/// `partial` holds the decisions made before the failing write; rows those
/// decisions recorded are already in the ledger.
#[derive(Error, Debug)]
#[error("tick {} aborted: {error}", .partial.tick)]
pub struct TickAborted<E: std::error::Error + 'static> {
    pub partial: FrameReport,
    #[source]
    pub error: E,
}

/// One live scanning session.
///
/// Holds the identity snapshot taken at start; later enrollments are not seen
/// until the next session. Ticks must be driven sequentially.
pub struct ScanSession<M: Matcher> {
    snapshot: Arc<IdentitySnapshot>,
    matcher: M,
    distance_threshold: f32,
    lecture: LectureKey,
    tracker: SessionTracker,
    throttle: FrameThrottle,
    ticks: u64,
}

impl<M: Matcher> ScanSession<M> {
    pub fn new(
        snapshot: Arc<IdentitySnapshot>,
        matcher: M,
        distance_threshold: f32,
        lecture: LectureKey,
        process_interval: Duration,
    ) -> Self {
        let tracker = SessionTracker::new();
        tracing::info!(
            session = %tracker.id(),
            date = %lecture.date,
            lecture = lecture.lecture_number,
            identities = snapshot.len(),
            threshold = distance_threshold,
            "scan session started"
        );
        Self {
            snapshot,
            matcher,
            distance_threshold,
            lecture,
            tracker,
            throttle: FrameThrottle::new(process_interval),
            ticks: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.tracker.id()
    }

    pub fn lecture(&self) -> LectureKey {
        self.lecture
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn students_processed(&self) -> usize {
        self.tracker.processed_count()
    }

    /// Whether the frame captured at `elapsed` (since session start) is due
    /// for matching. Frames refused here are display-only.
    pub fn admit_frame(&mut self, elapsed: Duration) -> bool {
        self.throttle.admit(elapsed)
    }

    /// Run one tick stamped with the local wall clock.
    pub fn process_frame<L: AttendanceLedger>(
        &mut self,
        detections: &[Detection],
        ledger: &mut L,
    ) -> Result<FrameReport, TickAborted<L::Error>> {
        self.process_frame_at(detections, chrono::Local::now().naive_local(), ledger)
    }

    /// Run one tick: match every face, write first-time matches to the ledger.
    ///
    /// A ledger error aborts the tick. Students whose write failed stay
    /// unprocessed, so a later tick retries them. A student the ledger reports
    /// as no longer enrolled is marked processed and the tick carries on.
    pub fn process_frame_at<L: AttendanceLedger>(
        &mut self,
        detections: &[Detection],
        now: NaiveDateTime,
        ledger: &mut L,
    ) -> Result<FrameReport, TickAborted<L::Error>> {
        self.ticks += 1;
        let tick = self.ticks;
        let mut decisions = Vec::with_capacity(detections.len());

        for detection in detections {
            let query = &detection.descriptor;
            let bbox = detection.bbox;

            if let Some(dim) = self.snapshot.dimension() {
                if query.len() != dim {
                    tracing::warn!(
                        session = %self.tracker.id(),
                        tick,
                        len = query.len(),
                        expected = dim,
                        "query descriptor length mismatch; face skipped"
                    );
                    decisions.push(FaceDecision::Rejected { bbox, len: query.len() });
                    continue;
                }
            }

            let result =
                self.matcher
                    .compare(query, self.snapshot.identities(), self.distance_threshold);
            let student_id = match result.student_id {
                Some(id) if result.matched => id,
                _ => {
                    tracing::debug!(tick, distance = result.distance, "unknown face");
                    decisions.push(FaceDecision::Unknown {
                        bbox,
                        distance: result.distance,
                    });
                    continue;
                }
            };

            if !self.tracker.should_process(&student_id) {
                decisions.push(FaceDecision::AlreadySeen {
                    bbox,
                    student_id,
                    distance: result.distance,
                });
                continue;
            }

            let record = AttendanceRecord {
                student_id,
                date: self.lecture.date,
                lecture_number: self.lecture.lecture_number,
                timestamp: now,
            };
            let outcome = match ledger.record(&record) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        session = %self.tracker.id(),
                        tick,
                        student_id = %record.student_id,
                        error = %e,
                        "ledger write failed; tick aborted"
                    );
                    return Err(TickAborted {
                        partial: FrameReport { tick, decisions },
                        error: e,
                    });
                }
            };
            self.tracker.record_processed(&record.student_id);

            match outcome {
                Outcome::Inserted => tracing::info!(
                    session = %self.tracker.id(),
                    student_id = %record.student_id,
                    distance = result.distance,
                    "attendance recorded"
                ),
                Outcome::AlreadyRecorded => tracing::info!(
                    session = %self.tracker.id(),
                    student_id = %record.student_id,
                    "attendance already recorded for this lecture"
                ),
                Outcome::NotEnrolled => {
                    tracing::warn!(
                        session = %self.tracker.id(),
                        student_id = %record.student_id,
                        "matched student is no longer enrolled; nothing recorded"
                    );
                    decisions.push(FaceDecision::NotEnrolled {
                        bbox,
                        student_id: record.student_id,
                        distance: result.distance,
                    });
                    continue;
                }
            }

            decisions.push(FaceDecision::Recorded {
                bbox,
                student_id: record.student_id,
                distance: result.distance,
                outcome,
            });
        }

        Ok(FrameReport { tick, decisions })
    }

    /// End the session, discarding its state.
    pub fn finish(self) -> SessionSummary {
        let summary = SessionSummary {
            session_id: self.tracker.id(),
            lecture: self.lecture,
            ticks: self.ticks,
            students_processed: self.tracker.processed_count(),
        };
        tracing::info!(
            session = %summary.session_id,
            ticks = summary.ticks,
            students = summary.students_processed,
            "scan session ended"
        );
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub lecture: LectureKey,
    pub ticks: u64,
    pub students_processed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EuclideanMatcher;
    use crate::types::{Descriptor, EnrolledIdentity};
    use std::fmt;

    #[derive(Debug)]
    struct Offline;

    impl fmt::Display for Offline {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("storage offline")
        }
    }

    impl std::error::Error for Offline {}

    /// In-memory ledger that counts calls and can be switched offline.
    #[derive(Default)]
    struct CountingLedger {
        calls: Vec<AttendanceRecord>,
        rows: Vec<(String, NaiveDate, u32)>,
        offline: bool,
        /// Writes for this student fail as if storage went away.
        fail_for: Option<String>,
        /// Students deleted from the ledger's student table.
        removed: Vec<String>,
    }

    impl AttendanceLedger for CountingLedger {
        type Error = Offline;

        fn record(&mut self, record: &AttendanceRecord) -> Result<Outcome, Offline> {
            if self.offline || self.fail_for.as_deref() == Some(record.student_id.as_str()) {
                return Err(Offline);
            }
            self.calls.push(record.clone());
            if self.removed.contains(&record.student_id) {
                return Ok(Outcome::NotEnrolled);
            }
            let key = (record.student_id.clone(), record.date, record.lecture_number);
            if self.rows.contains(&key) {
                Ok(Outcome::AlreadyRecorded)
            } else {
                self.rows.push(key);
                Ok(Outcome::Inserted)
            }
        }
    }

    const BOX: BoundingBox = BoundingBox { x: 10.0, y: 10.0, width: 80.0, height: 80.0 };

    fn query_face(values: Vec<f32>) -> Detection {
        Detection { bbox: BOX, descriptor: Descriptor::new(values) }
    }

    fn lecture() -> LectureKey {
        LectureKey {
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            lecture_number: 1,
        }
    }

    fn now() -> NaiveDateTime {
        lecture().date.and_hms_opt(9, 15, 0).unwrap()
    }

    fn session() -> ScanSession<EuclideanMatcher> {
        let snapshot = IdentitySnapshot::new(vec![
            EnrolledIdentity { student_id: "S001".into(), descriptor: Descriptor::new(vec![0.0, 0.0]) },
            EnrolledIdentity { student_id: "S002".into(), descriptor: Descriptor::new(vec![1.0, 1.0]) },
        ]);
        ScanSession::new(Arc::new(snapshot), EuclideanMatcher, 0.6, lecture(), Duration::ZERO)
    }

    #[test]
    fn test_first_match_writes_ledger() {
        let mut session = session();
        let mut ledger = CountingLedger::default();

        let report = session.process_frame_at(&[query_face(vec![0.3, 0.0])], now(), &mut ledger).unwrap();

        assert_eq!(report.tick, 1);
        assert_eq!(report.inserted().collect::<Vec<_>>(), vec!["S001"]);
        assert_eq!(ledger.calls.len(), 1);
        assert_eq!(ledger.calls[0].date, lecture().date);
        assert_eq!(ledger.calls[0].lecture_number, 1);
        assert_eq!(ledger.calls[0].timestamp, now());
    }

    #[test]
    fn test_repeat_match_skips_ledger() {
        let mut session = session();
        let mut ledger = CountingLedger::default();

        session.process_frame_at(&[query_face(vec![0.3, 0.0])], now(), &mut ledger).unwrap();
        let report = session.process_frame_at(&[query_face(vec![0.2, 0.0])], now(), &mut ledger).unwrap();

        assert_eq!(ledger.calls.len(), 1);
        assert!(matches!(
            &report.decisions[0],
            FaceDecision::AlreadySeen { student_id, .. } if student_id == "S001"
        ));
    }

    #[test]
    fn test_unknown_face_not_recorded() {
        let mut session = session();
        let mut ledger = CountingLedger::default();

        let report = session.process_frame_at(&[query_face(vec![0.0, 0.7])], now(), &mut ledger).unwrap();

        assert!(ledger.calls.is_empty());
        assert!(matches!(report.decisions[0], FaceDecision::Unknown { .. }));
        assert_eq!(session.students_processed(), 0);
    }

    #[test]
    fn test_several_faces_in_one_frame() {
        let mut session = session();
        let mut ledger = CountingLedger::default();

        let report = session
            .process_frame_at(
                &[query_face(vec![0.1, 0.0]), query_face(vec![5.0, 5.0]), query_face(vec![0.9, 1.0])],
                now(),
                &mut ledger,
            )
            .unwrap();

        assert_eq!(report.inserted().collect::<Vec<_>>(), vec!["S001", "S002"]);
        assert!(matches!(report.decisions[1], FaceDecision::Unknown { .. }));
    }

    #[test]
    fn test_wrong_dimension_query_rejected() {
        let mut session = session();
        let mut ledger = CountingLedger::default();

        let report = session.process_frame_at(&[query_face(vec![0.0, 0.0, 0.0])], now(), &mut ledger).unwrap();

        assert!(matches!(report.decisions[0], FaceDecision::Rejected { len: 3, .. }));
        assert!(ledger.calls.is_empty());
    }

    #[test]
    fn test_ledger_failure_is_retried_next_tick() {
        let mut session = session();
        let mut ledger = CountingLedger { offline: true, ..Default::default() };

        assert!(session.process_frame_at(&[query_face(vec![0.3, 0.0])], now(), &mut ledger).is_err());
        assert_eq!(session.students_processed(), 0);

        ledger.offline = false;
        let report = session.process_frame_at(&[query_face(vec![0.3, 0.0])], now(), &mut ledger).unwrap();
        assert_eq!(report.inserted().count(), 1);
        assert_eq!(ledger.rows.len(), 1);
    }

    #[test]
    fn test_failure_mid_frame_keeps_earlier_decisions() {
        let mut session = session();
        let mut ledger = CountingLedger { fail_for: Some("S002".into()), ..Default::default() };
        let frame = [query_face(vec![0.0, 0.1]), query_face(vec![1.0, 0.9])];

        let aborted = session.process_frame_at(&frame, now(), &mut ledger).unwrap_err();
        assert_eq!(aborted.partial.tick, 1);
        assert_eq!(aborted.partial.inserted().collect::<Vec<_>>(), vec!["S001"]);
        assert_eq!(aborted.partial.decisions.len(), 1);
        assert_eq!(session.students_processed(), 1);

        ledger.fail_for = None;
        let report = session.process_frame_at(&frame, now(), &mut ledger).unwrap();
        assert!(matches!(report.decisions[0], FaceDecision::AlreadySeen { .. }));
        assert_eq!(report.inserted().collect::<Vec<_>>(), vec!["S002"]);
        assert_eq!(ledger.rows.len(), 2);
    }

    #[test]
    fn test_removed_student_does_not_block_others() {
        let mut session = session();
        let mut ledger = CountingLedger { removed: vec!["S001".into()], ..Default::default() };
        let frame = [query_face(vec![0.0, 0.1]), query_face(vec![1.0, 0.9])];

        let report = session.process_frame_at(&frame, now(), &mut ledger).unwrap();
        assert!(matches!(
            &report.decisions[0],
            FaceDecision::NotEnrolled { student_id, .. } if student_id == "S001"
        ));
        assert_eq!(report.inserted().collect::<Vec<_>>(), vec!["S002"]);

        // Neither student reaches the ledger again this session.
        for _ in 0..2 {
            let report = session.process_frame_at(&frame, now(), &mut ledger).unwrap();
            assert!(report
                .decisions
                .iter()
                .all(|d| matches!(d, FaceDecision::AlreadySeen { .. })));
        }
        assert_eq!(ledger.calls.len(), 2);
    }

    #[test]
    fn test_already_recorded_marks_student_processed() {
        let mut ledger = CountingLedger::default();
        ledger.rows.push(("S001".into(), lecture().date, 1));
        let mut session = session();

        let report = session.process_frame_at(&[query_face(vec![0.0, 0.1])], now(), &mut ledger).unwrap();
        assert!(matches!(
            report.decisions[0],
            FaceDecision::Recorded { outcome: Outcome::AlreadyRecorded, .. }
        ));

        session.process_frame_at(&[query_face(vec![0.0, 0.1])], now(), &mut ledger).unwrap();
        assert_eq!(ledger.calls.len(), 1);
    }

    #[test]
    fn test_empty_gallery_matches_nothing() {
        let mut session = ScanSession::new(
            Arc::new(IdentitySnapshot::default()),
            EuclideanMatcher,
            0.6,
            lecture(),
            Duration::ZERO,
        );
        let mut ledger = CountingLedger::default();

        let report = session.process_frame_at(&[query_face(vec![0.0, 0.0])], now(), &mut ledger).unwrap();
        assert!(matches!(report.decisions[0], FaceDecision::Unknown { .. }));
    }

    #[test]
    fn test_finish_summary() {
        let mut session = session();
        let mut ledger = CountingLedger::default();
        session.process_frame_at(&[query_face(vec![0.0, 0.0])], now(), &mut ledger).unwrap();
        session.process_frame_at(&[], now(), &mut ledger).unwrap();

        let id = session.id();
        let summary = session.finish();
        assert_eq!(summary.session_id, id);
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.students_processed, 1);
    }
}
