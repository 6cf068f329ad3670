//! Descriptor extraction boundary.
//!
//! Detection and embedding are done elsewhere; this module only defines what
//! the rest of the crate expects from an extractor.

use crate::enrollment::EnrollError;
use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("malformed extractor output: {0}")]
    Malformed(String),
}

/// Turns one frame into zero or more faces.
///
/// Scanning accepts any number of detections per frame; enrollment narrows the
/// result with [`require_single_face`].
pub trait DescriptorExtractor {
    type Frame;

    fn extract(&mut self, frame: &Self::Frame) -> Result<Vec<Detection>, ExtractorError>;
}

/// Enrollment assertion: exactly one face in the frame.
pub fn require_single_face(mut detections: Vec<Detection>) -> Result<Detection, EnrollError> {
    match detections.len() {
        0 => Err(EnrollError::NoFaceDetected),
        1 => Ok(detections.remove(0)),
        n => Err(EnrollError::MultipleFacesDetected(n)),
    }
}
