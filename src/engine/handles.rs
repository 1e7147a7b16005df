//! Opaque front-end handles consumed by the back-end.
//!
//! The front-end owns trajectories and submaps; the back-end never inspects
//! their contents beyond the small interfaces below and keys all of its
//! bookkeeping on handle *identity*, not value. Handles are cheap clones of a
//! shared pointer; two handles are equal exactly when they refer to the same
//! front-end object.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::core::types::Rigid3;

/// Marker trait for a trajectory owned by the front-end.
///
/// The back-end only ever uses a trajectory as an identity token, so there is
/// nothing to implement.
pub trait Trajectory: Send + Sync {}

/// A submap owned by the front-end.
pub trait Submap: Send + Sync {
    /// The submap's local frame. Stable for the lifetime of the submap.
    fn local_pose(&self) -> Rigid3;

    /// Whether the submap will receive further scans. Transitions false to
    /// true exactly once.
    fn finished(&self) -> bool;
}

/// Identity handle to a front-end trajectory.
#[derive(Clone)]
pub struct TrajectoryHandle(Arc<dyn Trajectory>);

impl TrajectoryHandle {
    /// Wrap a shared trajectory.
    pub fn new(trajectory: Arc<dyn Trajectory>) -> Self {
        Self(trajectory)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for TrajectoryHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TrajectoryHandle {}

impl Hash for TrajectoryHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for TrajectoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrajectoryHandle({:#x})", self.key())
    }
}

/// Identity handle to a front-end submap.
#[derive(Clone)]
pub struct SubmapHandle(Arc<dyn Submap>);

impl SubmapHandle {
    /// Wrap a shared submap.
    pub fn new(submap: Arc<dyn Submap>) -> Self {
        Self(submap)
    }

    /// The submap's local frame.
    pub fn local_pose(&self) -> Rigid3 {
        self.0.local_pose()
    }

    /// The submap's finished flag, read at call time.
    pub fn finished(&self) -> bool {
        self.0.finished()
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for SubmapHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SubmapHandle {}

impl Hash for SubmapHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for SubmapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubmapHandle({:#x})", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Dummy;
    impl Trajectory for Dummy {}
    impl Submap for Dummy {
        fn local_pose(&self) -> Rigid3 {
            Rigid3::identity()
        }
        fn finished(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_handle_identity_equality() {
        let a = Arc::new(Dummy);
        let h1 = TrajectoryHandle::new(a.clone());
        let h2 = TrajectoryHandle::new(a);
        let h3 = TrajectoryHandle::new(Arc::new(Dummy));

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_handles_as_map_keys() {
        let a = SubmapHandle::new(Arc::new(Dummy));
        let b = SubmapHandle::new(Arc::new(Dummy));

        let mut ids = HashMap::new();
        ids.insert(a.clone(), 0usize);
        ids.insert(b.clone(), 1usize);
        // Re-inserting the same handle keeps the map size.
        ids.entry(a.clone()).or_insert(7);

        assert_eq!(ids.len(), 2);
        assert_eq!(ids[&a], 0);
        assert_eq!(ids[&b], 1);
    }
}
