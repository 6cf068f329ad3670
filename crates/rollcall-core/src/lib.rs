//! rollcall-core: Face-identity matching and attendance deduplication.
//!
//! Descriptors come from an external extractor; this crate decides who a
//! face belongs to and makes sure each student is written to the attendance
//! ledger at most once per scanning session.

pub mod enrollment;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod scan;
pub mod session;
pub mod types;

pub use enrollment::{CapturePolicy, EnrollError, Enrollment, EnrollmentState, EnrollmentWorkflow};
pub use extractor::{require_single_face, DescriptorExtractor, ExtractorError};
pub use gallery::{IdentityCache, IdentitySnapshot};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_DISTANCE_THRESHOLD};
pub use scan::{
    AttendanceLedger, FaceDecision, FrameReport, LectureKey, LectureSelection, Outcome,
    ScanSession, SessionSummary, TickAborted,
};
pub use session::{FrameThrottle, SessionTracker, DEFAULT_PROCESS_INTERVAL};
pub use types::{AttendanceRecord, BoundingBox, Descriptor, Detection, EnrolledIdentity, MatchResult};
