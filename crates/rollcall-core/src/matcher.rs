//! Probe-versus-gallery matching.

use crate::types::{Descriptor, EnrolledIdentity, MatchResult};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a query descriptor against the enrolled identities.
pub trait Matcher {
    fn compare(
        &self,
        query: &Descriptor,
        candidates: &[EnrolledIdentity],
        distance_threshold: f32,
    ) -> MatchResult;
}

/// Nearest-neighbour matcher on Euclidean distance.
///
/// The closest candidate wins. On an exact tie the earliest candidate in
/// iteration order is kept, so results are reproducible for a given gallery
/// order. A match requires `distance < distance_threshold`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Descriptor,
        candidates: &[EnrolledIdentity],
        distance_threshold: f32,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            assert_eq!(
                query.len(),
                candidate.descriptor.len(),
                "query dimension differs from enrolled descriptor of {}",
                candidate.student_id
            );
            let dist = query.euclidean_distance(&candidate.descriptor);
            // Strict `<` keeps the first of equally distant candidates.
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < distance_threshold => MatchResult {
                matched: true,
                student_id: Some(candidates[idx].student_id.clone()),
                distance: best_dist,
            },
            _ => MatchResult::no_match(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, values: Vec<f32>) -> EnrolledIdentity {
        EnrolledIdentity {
            student_id: id.into(),
            descriptor: Descriptor::new(values),
        }
    }

    fn next_above(x: f32) -> f32 {
        // Valid for positive finite values.
        f32::from_bits(x.to_bits() + 1)
    }

    #[test]
    fn test_empty_candidates_never_match() {
        let query = Descriptor::new(vec![0.1, 0.2]);
        let result = EuclideanMatcher.compare(&query, &[], DEFAULT_DISTANCE_THRESHOLD);
        assert!(!result.matched);
        assert!(result.student_id.is_none());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_closest_candidate_wins() {
        let query = Descriptor::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            identity("S001", vec![0.0, 1.0, 0.0]),
            identity("S002", vec![0.0, 0.0, 1.0]),
            identity("S003", vec![0.9, 0.0, 0.0]),
        ];

        let result = EuclideanMatcher.compare(&query, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("S003"));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_closest_beyond_threshold_is_no_match() {
        let query = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![identity("S001", vec![0.7, 0.0])];

        let result = EuclideanMatcher.compare(&query, &gallery, 0.6);
        assert!(!result.matched);
        assert!(result.student_id.is_none());
        assert!((result.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_first_candidate() {
        let query = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![
            identity("S010", vec![0.0, 0.3]),
            identity("S002", vec![0.3, 0.0]),
            identity("S005", vec![-0.3, 0.0]),
        ];

        let result = EuclideanMatcher.compare(&query, &gallery, 0.6);
        assert_eq!(result.student_id.as_deref(), Some("S010"));

        let reordered: Vec<_> = gallery.iter().rev().cloned().collect();
        let result = EuclideanMatcher.compare(&query, &reordered, 0.6);
        assert_eq!(result.student_id.as_deref(), Some("S005"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let query = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![identity("S001", vec![0.3, 0.4])];
        let dist = query.euclidean_distance(&gallery[0].descriptor);

        let at = EuclideanMatcher.compare(&query, &gallery, dist);
        assert!(!at.matched, "distance equal to the threshold must not match");

        let just_above = EuclideanMatcher.compare(&query, &gallery, next_above(dist));
        assert!(just_above.matched);
        assert_eq!(just_above.distance, dist);
    }

    #[test]
    fn test_compare_is_deterministic() {
        let query = Descriptor::new(vec![0.12, -0.4, 0.33, 0.9]);
        let gallery = vec![
            identity("A", vec![0.1, -0.4, 0.3, 0.8]),
            identity("B", vec![0.5, 0.5, 0.5, 0.5]),
            identity("C", vec![0.12, -0.41, 0.33, 0.91]),
        ];

        let first = EuclideanMatcher.compare(&query, &gallery, 0.6);
        for _ in 0..10 {
            assert_eq!(EuclideanMatcher.compare(&query, &gallery, 0.6), first);
        }
        assert_eq!(first.student_id.as_deref(), Some("C"));
    }

    #[test]
    #[should_panic(expected = "query dimension")]
    fn test_dimension_mismatch_panics() {
        let query = Descriptor::new(vec![0.0, 0.0, 0.0]);
        let gallery = vec![identity("S001", vec![0.0, 0.0])];
        EuclideanMatcher.compare(&query, &gallery, 0.6);
    }
}
