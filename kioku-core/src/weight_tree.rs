//! Binary sum tree for weighted random sampling.
//!
//! Leaves hold non-negative weights, internal nodes hold subtree sums.
//! Updating a leaf and drawing an index by cumulative weight are both
//! O(log capacity).

use crate::error::KiokuError;
use segment_tree::{
    ops::{MaxIgnoreNaN, MinIgnoreNaN},
    SegmentPoint,
};

/// A fixed-capacity binary sum tree.
///
/// Capacities that are not a power of two are padded to the next power of
/// two with zero-weight leaves; padding leaves carry no probability mass
/// and are never sampled.
///
/// # Examples
///
/// ```
/// use kioku_core::WeightTree;
///
/// let mut tree = WeightTree::new(4).unwrap();
/// tree.update(0, 1.0).unwrap();
/// tree.update(1, 3.0).unwrap();
/// assert_eq!(tree.total_weight(), 4.0);
/// ```
#[derive(Debug)]
pub struct WeightTree {
    /// Number of addressable leaves.
    capacity: usize,

    /// Leaf count after padding to a power of two.
    padded: usize,

    /// Flat tree, root at 0, leaves at `[padded - 1, 2 * padded - 1)`.
    tree: Vec<f32>,

    /// Minimum over leaf weights, for whole-buffer weight normalization.
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,

    /// Maximum over leaf weights.
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,
}

impl WeightTree {
    /// Creates a tree with all leaf weights zero.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, KiokuError> {
        if capacity == 0 {
            return Err(KiokuError::InvalidArgument(
                "weight tree capacity must be positive".into(),
            ));
        }
        let padded = capacity.next_power_of_two();
        Ok(Self {
            capacity,
            padded,
            tree: vec![0f32; 2 * padded - 1],
            min_tree: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
        })
    }

    /// Number of addressable leaves.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of all leaf weights.
    pub fn total_weight(&self) -> f32 {
        self.tree[0]
    }

    /// Current maximum over all leaf weights.
    pub fn max_weight(&self) -> f32 {
        self.max_tree.query(0, self.capacity)
    }

    /// Minimum leaf weight over the first `n` leaves.
    ///
    /// Callers pass the number of occupied slots so that never-written
    /// leaves do not contribute.
    pub fn min_weight(&self, n: usize) -> f32 {
        let n = n.min(self.capacity);
        if n == 0 {
            return f32::MAX;
        }
        self.min_tree.query(0, n)
    }

    /// Weight of leaf `ix`.
    pub fn weight(&self, ix: usize) -> f32 {
        self.tree[ix + self.padded - 1]
    }

    fn propagate(&mut self, ix: usize, change: f32) {
        let parent = (ix - 1) / 2;
        self.tree[parent] += change;
        if parent != 0 {
            self.propagate(parent, change);
        }
    }

    fn retrieve(&self, ix: usize, s: f32) -> usize {
        let left = 2 * ix + 1;
        let right = left + 1;

        if left >= self.tree.len() {
            return ix;
        }

        if s <= self.tree[left] || self.tree[right] == 0f32 {
            self.retrieve(left, s)
        } else {
            self.retrieve(right, s - self.tree[left])
        }
    }

    /// Sets the weight of leaf `ix` and fixes up all ancestor sums.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] if `ix` is out of range or
    /// `weight` is negative or not finite.
    pub fn update(&mut self, ix: usize, weight: f32) -> Result<(), KiokuError> {
        if ix >= self.capacity {
            return Err(KiokuError::InvalidArgument(format!(
                "leaf index {} out of range for capacity {}",
                ix, self.capacity
            )));
        }
        if !weight.is_finite() || weight < 0f32 {
            return Err(KiokuError::InvalidArgument(format!(
                "leaf weight must be finite and non-negative, got {}",
                weight
            )));
        }

        self.min_tree.modify(ix, weight);
        self.max_tree.modify(ix, weight);
        let ix = ix + self.padded - 1;
        let change = weight - self.tree[ix];
        self.tree[ix] = weight;
        // A capacity-1 tree has its single leaf at the root.
        if ix > 0 {
            self.propagate(ix, change);
        }
        Ok(())
    }

    /// Leaf index covering cumulative weight `s`.
    pub fn get(&self, s: f32) -> usize {
        let ix = self.retrieve(0, s);
        debug_assert!(ix >= self.padded - 1);
        ix + 1 - self.padded
    }

    /// Draws `n` leaf indices with replacement, each with probability
    /// proportional to its weight.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::EmptyTree`] if the total weight is zero or
    /// not finite.
    pub fn sample(&self, n: usize) -> Result<Vec<usize>, KiokuError> {
        let total = self.total_weight();
        if total <= 0f32 || !total.is_finite() {
            return Err(KiokuError::EmptyTree);
        }
        Ok((0..n)
            .map(|_| self.get(total * fastrand::f32()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_total() {
        let data = vec![0.5f32, 0.2, 0.8, 0.3, 1.1, 2.5, 3.9];
        let mut tree = WeightTree::new(8).unwrap();
        for (ix, w) in data.iter().enumerate() {
            tree.update(ix, *w).unwrap();
        }

        let sum: f32 = data.iter().sum();
        assert!((tree.total_weight() - sum).abs() < 1e-6);

        assert_eq!(tree.get(0.0), 0);
        assert_eq!(tree.get(0.4), 0);
        assert_eq!(tree.get(0.5), 0);
        assert_eq!(tree.get(0.6), 1);
        assert_eq!(tree.get(1.2), 2);
        assert_eq!(tree.get(1.6), 3);
        assert_eq!(tree.get(2.0), 4);
        assert_eq!(tree.get(2.8), 4);
    }

    #[test]
    fn test_no_drift_after_many_updates() {
        let mut tree = WeightTree::new(6).unwrap();
        let mut expected = vec![0f32; 6];
        fastrand::seed(42);
        for step in 0..10_000 {
            let ix = step % 6;
            let w = fastrand::f32() * 10.0;
            tree.update(ix, w).unwrap();
            expected[ix] = w;
        }
        let sum: f32 = expected.iter().sum();
        assert!((tree.total_weight() - sum).abs() < 1e-3);
    }

    #[test]
    fn test_capacity_one_tree() {
        let mut tree = WeightTree::new(1).unwrap();
        tree.update(0, 2.0).unwrap();
        assert_eq!(tree.total_weight(), 2.0);

        fastrand::seed(5);
        let ixs = tree.sample(4).unwrap();
        assert!(ixs.iter().all(|&ix| ix == 0));

        tree.update(0, 0.5).unwrap();
        assert_eq!(tree.total_weight(), 0.5);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut tree = WeightTree::new(4).unwrap();
        assert!(matches!(
            tree.update(0, -1.0),
            Err(KiokuError::InvalidArgument(_))
        ));
        assert_eq!(tree.total_weight(), 0.0);
    }

    #[test]
    fn test_sample_empty_tree_fails() {
        let tree = WeightTree::new(4).unwrap();
        assert!(matches!(tree.sample(2), Err(KiokuError::EmptyTree)));
    }

    #[test]
    fn test_padding_leaves_never_sampled() {
        // Capacity 5 pads to 8; leaves 5..8 keep weight zero.
        let mut tree = WeightTree::new(5).unwrap();
        for ix in 0..5 {
            tree.update(ix, 1.0).unwrap();
        }
        fastrand::seed(7);
        let ixs = tree.sample(10_000).unwrap();
        assert!(ixs.iter().all(|&ix| ix < 5));
    }

    #[test]
    fn test_sampling_frequencies_follow_weights() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let mut tree = WeightTree::new(4).unwrap();
        for (ix, w) in data.iter().enumerate() {
            tree.update(ix, *w).unwrap();
        }

        fastrand::seed(1);
        let n = 100_000;
        let ixs = tree.sample(n).unwrap();
        let total: f32 = data.iter().sum();
        for ix in 0..data.len() {
            let count = ixs.iter().filter(|&&e| e == ix).count() as f32;
            let expected = data[ix] / total * n as f32;
            // 5% relative tolerance
            assert!(
                (count - expected).abs() < 0.05 * n as f32,
                "leaf {}: {} vs {}",
                ix,
                count,
                expected
            );
        }
    }

    #[test]
    fn test_min_max_aggregates() {
        let mut tree = WeightTree::new(4).unwrap();
        tree.update(0, 2.0).unwrap();
        tree.update(1, 5.0).unwrap();
        tree.update(2, 1.0).unwrap();
        assert_eq!(tree.max_weight(), 5.0);
        assert_eq!(tree.min_weight(3), 1.0);
    }
}
