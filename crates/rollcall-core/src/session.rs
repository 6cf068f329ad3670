//! Per-session bookkeeping: who has already been handled, and which frames
//! are due for matching.

use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Default minimum spacing between frames that go through matching (~3 fps).
pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_millis(330);

/// Students already matched during one scanning session.
///
/// Transitions are one-way: once recorded, a student stays processed until
/// the tracker is dropped. A new session gets a new tracker.
#[derive(Debug)]
pub struct SessionTracker {
    id: Uuid,
    already_matched: HashSet<String>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            already_matched: HashSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True until [`record_processed`](Self::record_processed) is called for
    /// this student.
    pub fn should_process(&self, student_id: &str) -> bool {
        !self.already_matched.contains(student_id)
    }

    pub fn record_processed(&mut self, student_id: &str) {
        if self.already_matched.insert(student_id.to_owned()) {
            tracing::debug!(session = %self.id, student_id, "student marked processed");
        }
    }

    pub fn processed_count(&self) -> usize {
        self.already_matched.len()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Admits frames for matching at a fixed cadence, independent of capture rate.
///
/// Times are offsets from session start. Frames between admitted ones are
/// display-only.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_admitted: Option<Duration>,
}

impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    /// Returns true (and advances the cadence) if the frame captured at
    /// `elapsed` should be matched.
    pub fn admit(&mut self, elapsed: Duration) -> bool {
        let due = match self.last_admitted {
            None => true,
            Some(last) => elapsed.saturating_sub(last) >= self.interval,
        };
        if due {
            self.last_admitted = Some(elapsed);
        }
        due
    }
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_one_way() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.should_process("S001"));

        tracker.record_processed("S001");
        for _ in 0..3 {
            assert!(!tracker.should_process("S001"));
        }
        assert!(tracker.should_process("S002"));

        tracker.record_processed("S001");
        assert_eq!(tracker.processed_count(), 1);
    }

    #[test]
    fn test_new_session_starts_empty() {
        let mut first = SessionTracker::new();
        first.record_processed("S001");
        assert!(!first.should_process("S001"));

        let second = SessionTracker::new();
        assert!(second.should_process("S001"));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_throttle_first_frame_admitted() {
        let mut throttle = FrameThrottle::new(Duration::from_millis(330));
        assert!(throttle.admit(Duration::from_millis(5_000)));
    }

    #[test]
    fn test_throttle_cadence() {
        let mut throttle = FrameThrottle::new(Duration::from_millis(330));
        let admitted: Vec<u64> = (0..=1000)
            .step_by(33)
            .filter(|&ms| throttle.admit(Duration::from_millis(ms)))
            .collect();
        // 30 fps capture, ~3 fps processing
        assert_eq!(admitted, vec![0, 330, 660, 990]);
    }

    #[test]
    fn test_throttle_out_of_order_frame_not_admitted() {
        let mut throttle = FrameThrottle::new(Duration::from_millis(100));
        assert!(throttle.admit(Duration::from_millis(500)));
        assert!(!throttle.admit(Duration::from_millis(200)));
        assert!(throttle.admit(Duration::from_millis(600)));
    }
}
