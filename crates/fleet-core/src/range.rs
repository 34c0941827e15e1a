//! Inclusive numeric identifier ranges

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive range of identifier values, empty when `low > high`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRange {
    /// Lowest value in the range
    pub low: u32,
    /// Highest value in the range
    pub high: u32,
}

impl IdRange {
    /// Create an inclusive range
    pub const fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    /// Half-open `[low, end)` range; empty when `end <= low`
    pub fn half_open(low: u32, end: u32) -> Self {
        match end.checked_sub(1) {
            Some(high) if high >= low => Self { low, high },
            _ => Self::empty(),
        }
    }

    /// The canonical empty range
    pub const fn empty() -> Self {
        Self { low: 1, high: 0 }
    }

    /// Whether the range holds no values
    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    /// Whether `value` lies in the range
    pub fn contains(&self, value: u32) -> bool {
        !self.is_empty() && value >= self.low && value <= self.high
    }

    /// Number of values in the range
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            u64::from(self.high) - u64::from(self.low) + 1
        }
    }

    /// Whether two ranges share at least one value
    pub fn overlaps(&self, other: &IdRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.low <= other.high && other.low <= self.high
    }

    /// Ascending iterator over the values
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        let (low, high) = (self.low, self.high);
        let empty = self.is_empty();
        (low..=high).filter(move |_| !empty)
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("[]")
        } else {
            write!(f, "[{}, {}]", self.low, self.high)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_open_excludes_end() {
        let r = IdRange::half_open(100, 500);
        assert!(r.contains(100));
        assert!(r.contains(499));
        assert!(!r.contains(500));
        assert_eq!(r.len(), 400);
    }

    #[test]
    fn degenerate_ranges_are_empty() {
        assert!(IdRange::half_open(500, 500).is_empty());
        assert!(IdRange::half_open(0, 0).is_empty());
        assert_eq!(IdRange::empty().iter().count(), 0);
        assert!(!IdRange::empty().contains(0));
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = IdRange::new(10, 20);
        let b = IdRange::new(20, 30);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&IdRange::new(21, 30)));
    }
}
