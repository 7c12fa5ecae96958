//! Key-space coverage of one snapshot round
//!
//! Shard files written under one timestamp form a usable checkpoint when
//! their ranges, unioned, reach from key 0 to `u64::MAX` without a gap.
//! Overlaps are fine: a cluster resize between rounds can leave stale shard
//! files that no longer partition the space exactly.

use std::collections::BTreeMap;

use runtime_core::{Key, KeyRange};

/// Ranges of one snapshot round, keyed by lower bound
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeCoverage {
    ranges: BTreeMap<Key, Key>,
}

impl RangeCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file's range; for a repeated lower bound the larger upper
    /// bound is kept
    pub fn insert(&mut self, range: KeyRange) {
        let upper = self.ranges.entry(range.begin()).or_insert(range.end());
        *upper = (*upper).max(range.end());
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True when the ranges cover `[0, u64::MAX]` with no gap
    pub fn is_complete(&self) -> bool {
        covers_key_space(&self.ranges)
    }
}

impl FromIterator<KeyRange> for RangeCoverage {
    fn from_iter<I: IntoIterator<Item = KeyRange>>(iter: I) -> Self {
        let mut coverage = RangeCoverage::new();
        for range in iter {
            coverage.insert(range);
        }
        coverage
    }
}

/// Gap check over `lower -> upper` pairs sorted by lower bound
pub fn covers_key_space(ranges: &BTreeMap<Key, Key>) -> bool {
    let mut iter = ranges.iter();
    let Some((&first_lower, &first_upper)) = iter.next() else {
        return false;
    };
    if first_lower > 0 {
        return false;
    }

    let mut last_upper = first_upper;
    for (&lower, &upper) in iter {
        if lower > last_upper {
            return false;
        }
        last_upper = last_upper.max(upper);
    }
    last_upper == Key::MAX
}
