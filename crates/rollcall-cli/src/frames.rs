//! Pre-extracted frames in JSON Lines form.
//!
//! Detection and embedding run in a separate tool; each line it emits is one
//! frame:
//!
//! ```text
//! {"offset_ms": 330, "detections": [{"bbox": {"x": 12, "y": 30, "width": 90, "height": 90},
//!                                    "descriptor": {"values": [0.01, -0.12, ...]}}]}
//! ```
//!
//! `offset_ms` is optional; without it the frame is timed on arrival.

use rollcall_core::{DescriptorExtractor, Detection, ExtractorError};
use serde::Deserialize;
use std::time::Duration;

/// One line of extractor output.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameLine {
    #[serde(default)]
    pub offset_ms: Option<u64>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl FrameLine {
    pub fn offset(&self) -> Option<Duration> {
        self.offset_ms.map(Duration::from_millis)
    }
}

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<FrameLine>, ExtractorError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| ExtractorError::Malformed(format!("line {line_no}: {e}")))
}

/// Extractor over detections that were computed upstream: it only checks
/// that what arrived is usable.
#[derive(Debug, Default)]
pub struct PrecomputedExtractor;

impl DescriptorExtractor for PrecomputedExtractor {
    type Frame = FrameLine;

    fn extract(&mut self, frame: &FrameLine) -> Result<Vec<Detection>, ExtractorError> {
        for (i, det) in frame.detections.iter().enumerate() {
            let values = &det.descriptor.values;
            if values.is_empty() {
                return Err(ExtractorError::Malformed(format!("detection {i}: empty descriptor")));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ExtractorError::Malformed(format!(
                    "detection {i}: non-finite descriptor value"
                )));
            }
            if values.len() != frame.detections[0].descriptor.values.len() {
                return Err(ExtractorError::Malformed(format!(
                    "detection {i}: descriptor length differs within frame"
                )));
            }
        }
        Ok(frame.detections.clone())
    }
}
