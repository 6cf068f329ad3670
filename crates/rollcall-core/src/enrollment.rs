//! Enrollment workflow: identity → samples → averaged descriptor → commit.
//!
//! Nothing is persisted here. [`EnrollmentWorkflow::commit`] hands back an
//! [`Enrollment`] for the store to write in one step, and
//! [`EnrollmentWorkflow::abort`] simply drops the collected samples, so an
//! abandoned enrollment never leaves partial state behind.

use crate::extractor::require_single_face;
use crate::types::{Descriptor, Detection};
use thiserror::Error;

pub const DEFAULT_ENROLL_SAMPLES: usize = 5;

#[derive(Error, Debug, PartialEq)]
pub enum EnrollError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected ({0}); exactly one is required")]
    MultipleFacesDetected(usize),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("sample has {got} dimensions, earlier samples have {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("empty descriptor")]
    EmptyDescriptor,
    #[error("descriptor contains NaN or infinite values")]
    NonFiniteDescriptor,
    #[error("only {got} usable samples captured, {need} required")]
    InsufficientSamples { got: usize, need: usize },
}

/// How many samples to collect and how many are enough to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    pub samples: usize,
    pub min_samples: usize,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            samples: DEFAULT_ENROLL_SAMPLES,
            min_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    /// Still collecting samples.
    Capturing,
    /// Target sample count reached; ready to commit.
    Ready,
}

/// A finished enrollment, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub student_id: String,
    pub name: String,
    pub descriptor: Descriptor,
    pub samples: usize,
}

#[derive(Debug)]
pub struct EnrollmentWorkflow {
    student_id: String,
    name: String,
    policy: CapturePolicy,
    samples: Vec<Descriptor>,
}

impl EnrollmentWorkflow {
    /// Start an enrollment for a student; id and name must be non-blank.
    pub fn begin(
        student_id: &str,
        name: &str,
        policy: CapturePolicy,
    ) -> Result<Self, EnrollError> {
        let student_id = student_id.trim();
        let name = name.trim();
        if student_id.is_empty() {
            return Err(EnrollError::InvalidIdentity("student id is empty".into()));
        }
        if name.is_empty() {
            return Err(EnrollError::InvalidIdentity("name is empty".into()));
        }

        let policy = CapturePolicy {
            samples: policy.samples.max(1),
            min_samples: policy.min_samples.clamp(1, policy.samples.max(1)),
        };
        tracing::info!(student_id, samples = policy.samples, "enrollment started");

        Ok(Self {
            student_id: student_id.to_owned(),
            name: name.to_owned(),
            policy,
            samples: Vec::with_capacity(policy.samples),
        })
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn state(&self) -> EnrollmentState {
        if self.samples.len() >= self.policy.samples {
            EnrollmentState::Ready
        } else {
            EnrollmentState::Capturing
        }
    }

    pub fn samples_collected(&self) -> usize {
        self.samples.len()
    }

    /// Offer one frame's detections as a sample.
    ///
    /// Frames without exactly one face are rejected with the reason; the
    /// workflow stays usable. Samples past the target count are ignored.
    pub fn add_sample(&mut self, detections: Vec<Detection>) -> Result<EnrollmentState, EnrollError> {
        if self.state() == EnrollmentState::Ready {
            return Ok(EnrollmentState::Ready);
        }

        let face = require_single_face(detections)?;
        let descriptor = face.descriptor;
        if descriptor.is_empty() {
            return Err(EnrollError::EmptyDescriptor);
        }
        if descriptor.values.iter().any(|v| !v.is_finite()) {
            return Err(EnrollError::NonFiniteDescriptor);
        }
        if let Some(first) = self.samples.first() {
            if first.len() != descriptor.len() {
                return Err(EnrollError::DimensionMismatch {
                    expected: first.len(),
                    got: descriptor.len(),
                });
            }
        }

        self.samples.push(descriptor);
        tracing::debug!(
            student_id = %self.student_id,
            collected = self.samples.len(),
            target = self.policy.samples,
            "enrollment sample accepted"
        );
        Ok(self.state())
    }

    /// Finish capture and produce the averaged descriptor.
    pub fn commit(self) -> Result<Enrollment, EnrollError> {
        let got = self.samples.len();
        if got < self.policy.min_samples {
            return Err(EnrollError::InsufficientSamples {
                got,
                need: self.policy.min_samples,
            });
        }

        let descriptor = Descriptor::mean(&self.samples).ok_or(EnrollError::EmptyDescriptor)?;
        if descriptor.values.iter().any(|v| !v.is_finite()) {
            return Err(EnrollError::NonFiniteDescriptor);
        }
        tracing::info!(student_id = %self.student_id, samples = got, "enrollment committed");

        Ok(Enrollment {
            student_id: self.student_id,
            name: self.name,
            descriptor,
            samples: got,
        })
    }

    /// Abandon the enrollment, discarding every sample.
    pub fn abort(self) {
        tracing::info!(
            student_id = %self.student_id,
            discarded = self.samples.len(),
            "enrollment aborted"
        );
    }
}
