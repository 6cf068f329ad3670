//! Shared, read-mostly view of the enrolled identities.
//!
//! Matching reads an [`IdentitySnapshot`] that is never mutated. Enrollment
//! and removal build a fresh snapshot and swap it into the [`IdentityCache`];
//! sessions already holding the previous `Arc` keep using it until they end.

use crate::types::EnrolledIdentity;
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable set of enrolled identities, in enrollment order.
#[derive(Debug, Default)]
pub struct IdentitySnapshot {
    identities: Vec<EnrolledIdentity>,
    dimension: Option<usize>,
}

impl IdentitySnapshot {
    /// Build a snapshot. Identities whose descriptor length differs from the
    /// first one are dropped with a warning.
    pub fn new(identities: Vec<EnrolledIdentity>) -> Self {
        let dimension = identities.first().map(|i| i.descriptor.len());
        let identities = identities
            .into_iter()
            .filter(|i| {
                let keep = Some(i.descriptor.len()) == dimension;
                if !keep {
                    tracing::warn!(
                        student_id = %i.student_id,
                        len = i.descriptor.len(),
                        expected = ?dimension,
                        "descriptor length mismatch; identity left out of snapshot"
                    );
                }
                keep
            })
            .collect();

        Self {
            identities,
            dimension,
        }
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    /// Descriptor length shared by every identity, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, student_id: &str) -> bool {
        self.identities.iter().any(|i| i.student_id == student_id)
    }
}

/// Holder of the current snapshot, swapped wholesale on change.
#[derive(Debug, Default)]
pub struct IdentityCache {
    current: RwLock<Arc<IdentitySnapshot>>,
}

impl IdentityCache {
    pub fn new(snapshot: IdentitySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<IdentitySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new snapshot; returns the one it replaced.
    pub fn replace(&self, snapshot: IdentitySnapshot) -> Arc<IdentitySnapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }
}
