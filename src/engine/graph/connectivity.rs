//! Union-find over trajectory ids.
//!
//! Two trajectories are connected once any accepted constraint has ever
//! related them, directly or transitively. The structure is internally
//! synchronized because the constraint builder registers new cross-trajectory
//! links from its own worker threads while the core holds the graph mutex.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Thread-safe union-find over dense trajectory ids.
#[derive(Debug, Default)]
pub struct TrajectoryConnectivity {
    forest: Mutex<HashMap<usize, usize>>,
}

fn find_root(forest: &mut HashMap<usize, usize>, id: usize) -> usize {
    let mut current = id;
    loop {
        let parent = forest[&current];
        if parent == current {
            break;
        }
        // Path halving.
        let grandparent = forest[&parent];
        forest.insert(current, grandparent);
        current = parent;
    }
    current
}

impl TrajectoryConnectivity {
    /// Create an empty connectivity structure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trajectory as its own singleton component. Idempotent.
    pub fn add(&self, trajectory_id: usize) {
        let mut forest = self.forest.lock();
        forest.entry(trajectory_id).or_insert(trajectory_id);
    }

    /// Connect two trajectories, registering them if needed.
    pub fn connect(&self, a: usize, b: usize) {
        let mut forest = self.forest.lock();
        forest.entry(a).or_insert(a);
        forest.entry(b).or_insert(b);
        let root_a = find_root(&mut forest, a);
        let root_b = find_root(&mut forest, b);
        if root_a != root_b {
            forest.insert(root_a, root_b);
        }
    }

    /// Whether two trajectories are in the same connected component.
    pub fn transitively_connected(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        let mut forest = self.forest.lock();
        if !forest.contains_key(&a) || !forest.contains_key(&b) {
            return false;
        }
        find_root(&mut forest, a) == find_root(&mut forest, b)
    }

    /// All components, each sorted by id, ordered by their smallest member.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut forest = self.forest.lock();
        let ids: Vec<usize> = forest.keys().copied().collect();

        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for id in ids {
            let root = find_root(&mut forest, id);
            by_root.entry(root).or_default().push(id);
        }

        let mut components: Vec<Vec<usize>> = by_root.into_values().collect();
        for component in &mut components {
            component.sort_unstable();
        }
        components.sort_unstable_by_key(|c| c[0]);
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons() {
        let connectivity = TrajectoryConnectivity::new();
        connectivity.add(0);
        connectivity.add(1);
        connectivity.add(0);

        assert_eq!(connectivity.connected_components(), vec![vec![0], vec![1]]);
        assert!(!connectivity.transitively_connected(0, 1));
        assert!(connectivity.transitively_connected(0, 0));
    }

    #[test]
    fn test_connect_merges_components() {
        let connectivity = TrajectoryConnectivity::new();
        connectivity.add(0);
        connectivity.add(1);
        connectivity.add(2);
        connectivity.connect(0, 2);

        assert!(connectivity.transitively_connected(0, 2));
        assert!(!connectivity.transitively_connected(0, 1));
        assert_eq!(connectivity.connected_components(), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_transitivity() {
        let connectivity = TrajectoryConnectivity::new();
        connectivity.connect(0, 1);
        connectivity.connect(1, 2);

        assert!(connectivity.transitively_connected(0, 2));
        assert_eq!(connectivity.connected_components(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_unknown_ids_are_disconnected() {
        let connectivity = TrajectoryConnectivity::new();
        connectivity.add(0);

        assert!(!connectivity.transitively_connected(0, 7));
    }
}
