//! Sum tree over replay priorities
//!
//! A complete binary tree stored as a flat array: leaves hold per-slot
//! priorities, interior nodes hold subtree sums. Retrieval by prefix sum
//! walks from the root, so sampling a slot proportional to its priority
//! is O(log n), as is updating a priority.

/// Sum tree with a fixed number of leaf slots.
#[derive(Debug, Clone)]
pub struct SumTree {
    capacity: usize,
    /// 2 * capacity - 1 nodes; leaves occupy the trailing `capacity` entries
    nodes: Vec<f64>,
    /// Number of slots that have ever been written (monotone up to capacity)
    filled: usize,
}

impl SumTree {
    /// Create a tree with `capacity` leaf slots, all priorities zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sum tree capacity must be positive");
        Self { capacity, nodes: vec![0.0; 2 * capacity - 1], filled: 0 }
    }

    /// Number of leaf slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots holding a written priority.
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Whether no slot has been written yet.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Total priority mass.
    pub fn total(&self) -> f64 {
        self.nodes[0]
    }

    fn leaf(&self, slot: usize) -> usize {
        self.capacity - 1 + slot
    }

    /// Priority currently stored at `slot`.
    pub fn priority(&self, slot: usize) -> f64 {
        assert!(slot < self.capacity, "slot {slot} out of range");
        self.nodes[self.leaf(slot)]
    }

    /// Set the priority of `slot`, propagating the delta to the root.
    pub fn update(&mut self, slot: usize, priority: f64) {
        assert!(slot < self.capacity, "slot {slot} out of range");
        assert!(
            priority.is_finite() && priority >= 0.0,
            "priority must be finite and non-negative, got {priority}"
        );

        if slot >= self.filled {
            self.filled = slot + 1;
        }

        let mut idx = self.leaf(slot);
        let delta = priority - self.nodes[idx];
        self.nodes[idx] = priority;
        while idx > 0 {
            idx = (idx - 1) / 2;
            self.nodes[idx] += delta;
        }
    }

    /// Find the written slot whose cumulative priority interval contains
    /// `mass`, for `mass` in `[0, total)`.
    pub fn retrieve(&self, mass: f64) -> usize {
        debug_assert!(self.filled > 0, "retrieve on empty tree");

        // Guard against mass == total from float accumulation
        let mut mass = mass.min(self.total() * (1.0 - f64::EPSILON));
        let mut idx = 0;
        while idx < self.capacity - 1 {
            let left = 2 * idx + 1;
            if mass < self.nodes[left] {
                idx = left;
            } else {
                mass -= self.nodes[left];
                idx = left + 1;
            }
        }
        (idx - (self.capacity - 1)).min(self.filled - 1)
    }

    /// Largest priority among written slots (0 when empty).
    pub fn max_priority(&self) -> f64 {
        (0..self.filled)
            .map(|s| self.nodes[self.leaf(s)])
            .fold(0.0, f64::max)
    }

    /// Smallest priority among written slots (0 when empty).
    pub fn min_priority(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        (0..self.filled)
            .map(|s| self.nodes[self.leaf(s)])
            .fold(f64::INFINITY, f64::min)
    }

    /// Mean priority over written slots (0 when empty).
    pub fn mean_priority(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.total() / self.filled as f64
    }
}
