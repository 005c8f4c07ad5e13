//! Modulus partitioning of a step's key space
//!
//! Keys are assigned by `key mod modulus`. This balances only when keys are
//! roughly uniform; sparse or clustered ids skew partition sizes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A disjoint slice of a key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub modulus: u32,
    pub remainder: u32,
}

impl Partition {
    pub fn new(modulus: u32, remainder: u32) -> Self {
        Self { modulus, remainder }
    }

    /// Euclidean remainder, so negative keys still land in `[0, modulus)`
    pub fn contains(&self, key: i64) -> bool {
        let modulus = i64::from(self.modulus.max(1));
        key.rem_euclid(modulus) == i64::from(self.remainder)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remainder, self.modulus)
    }
}

/// Splits a key space into `n` labelled partitions `p0..p{n-1}`
#[derive(Debug, Clone, Copy)]
pub struct ModulusPartitioner {
    partitions: u32,
}

impl ModulusPartitioner {
    /// Zero falls back to the grid size passed to [`partition`](Self::partition)
    pub fn new(partitions: u32) -> Self {
        Self { partitions }
    }

    pub fn partition(&self, grid_size: u32) -> BTreeMap<String, Partition> {
        let n = if self.partitions > 0 {
            self.partitions
        } else {
            grid_size.max(1)
        };

        (0..n)
            .map(|i| (format!("p{}", i), Partition::new(n, i)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_labels_and_descriptors() {
        let parts = ModulusPartitioner::new(4).partition(0);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts["p0"], Partition::new(4, 0));
        assert_eq!(parts["p3"], Partition::new(4, 3));
    }

    #[test]
    fn test_grid_size_fallback() {
        assert_eq!(ModulusPartitioner::new(0).partition(3).len(), 3);
        assert_eq!(ModulusPartitioner::new(0).partition(0).len(), 1);
    }

    #[test]
    fn test_partitions_are_complete_and_disjoint() {
        for n in 1..=7 {
            let parts = ModulusPartitioner::new(n).partition(0);
            let mut seen = HashSet::new();
            for key in -50i64..500 {
                let owners: Vec<_> = parts.values().filter(|p| p.contains(key)).collect();
                assert_eq!(owners.len(), 1, "key {} in {} partitions (n={})", key, owners.len(), n);
                seen.insert(key);
            }
            assert_eq!(seen.len(), 550);
        }
    }
}
