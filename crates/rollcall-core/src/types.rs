use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Bounding box of a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Fixed-length face descriptor produced by the extractor
/// (128-dimensional for dlib-style models, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model that produced this descriptor, if the extractor reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors of equal length.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of several samples.
    ///
    /// Returns `None` for an empty slice or when sample lengths disagree.
    /// The model version is kept only if every sample reports the same one.
    pub fn mean(samples: &[Descriptor]) -> Option<Descriptor> {
        let first = samples.first()?;
        let dim = first.len();
        if dim == 0 || samples.iter().any(|s| s.len() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for sample in samples {
            for (acc, v) in sum.iter_mut().zip(sample.values.iter()) {
                *acc += v;
            }
        }
        let n = samples.len() as f32;
        let values = sum.into_iter().map(|v| v / n).collect();

        let model_version = first
            .model_version
            .clone()
            .filter(|mv| samples.iter().all(|s| s.model_version.as_ref() == Some(mv)));

        Some(Descriptor {
            values,
            model_version,
        })
    }
}

/// One face found in a frame: where it is and what it looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

/// An enrolled student and their stored descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledIdentity {
    pub student_id: String,
    pub descriptor: Descriptor,
}

/// Result of matching a query descriptor against the enrolled identities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Student whose descriptor was closest, when within the threshold.
    pub student_id: Option<String>,
    /// Distance to the closest candidate; infinite when there were none.
    pub distance: f32,
}

impl MatchResult {
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            student_id: None,
            distance,
        }
    }
}

/// One attendance event: a student seen during a given lecture on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub lecture_number: u32,
    pub timestamp: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_mean_of_samples() {
        let samples = vec![
            Descriptor::new(vec![1.0, 0.0]),
            Descriptor::new(vec![3.0, 2.0]),
        ];
        let mean = Descriptor::mean(&samples).unwrap();
        assert_eq!(mean.values, vec![2.0, 1.0]);
        assert!(mean.model_version.is_none());
    }

    #[test]
    fn test_mean_keeps_shared_model_version() {
        let tagged = |v: Vec<f32>, mv: &str| Descriptor {
            values: v,
            model_version: Some(mv.into()),
        };
        let same = vec![tagged(vec![1.0], "dlib"), tagged(vec![2.0], "dlib")];
        assert_eq!(
            Descriptor::mean(&same).unwrap().model_version.as_deref(),
            Some("dlib")
        );

        let mixed = vec![tagged(vec![1.0], "dlib"), tagged(vec![2.0], "arcface")];
        assert!(Descriptor::mean(&mixed).unwrap().model_version.is_none());
    }

    #[test]
    fn test_mean_rejects_empty_and_ragged() {
        assert!(Descriptor::mean(&[]).is_none());
        let ragged = vec![Descriptor::new(vec![1.0]), Descriptor::new(vec![1.0, 2.0])];
        assert!(Descriptor::mean(&ragged).is_none());
    }

    #[test]
    fn test_descriptor_json_without_model_version() {
        let d: Descriptor = serde_json::from_str(r#"{"values":[0.5,0.25]}"#).unwrap();
        assert_eq!(d.values, vec![0.5, 0.25]);
        assert!(d.model_version.is_none());
        assert_eq!(serde_json::to_string(&d).unwrap(), r#"{"values":[0.5,0.25]}"#);
    }
}
