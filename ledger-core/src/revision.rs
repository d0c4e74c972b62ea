//! Dirty tracking and sequence numbers for persisted aggregates

use serde::{Deserialize, Serialize};

/// Persisted revision of a Position or Module
///
/// `sequence` is bumped lazily: only a snapshot of a modified aggregate
/// increments it, and only once per persisted mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Unix seconds of the last persisted mutation
    #[serde(default)]
    pub last_updated: i64,

    /// Monotonic mutation counter
    #[serde(default)]
    pub sequence: u64,

    #[serde(skip)]
    persisted: u64,

    #[serde(skip)]
    modified: bool,
}

impl Revision {
    /// Mark the state as loaded: current values are the persisted baseline
    pub(crate) fn loaded(mut self) -> Self {
        self.persisted = self.sequence;
        self.modified = false;
        self
    }

    pub(crate) fn touch(&mut self) {
        self.modified = true;
    }

    /// In-memory state differs from the persisted baseline
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Sequence the next persisted mutation will carry
    pub fn next_sequence(&self) -> u64 {
        self.persisted + 1
    }

    /// Stamp a pending mutation; returns whether anything was stamped
    pub(crate) fn stamp(&mut self, now: i64) -> bool {
        if !self.modified {
            return false;
        }
        self.sequence = self.next_sequence();
        self.persisted = self.sequence;
        self.last_updated = now;
        self.modified = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bump_per_snapshot() {
        let mut rev = Revision { sequence: 4, ..Default::default() }.loaded();
        assert!(!rev.is_modified());
        assert_eq!(rev.next_sequence(), 5);

        rev.touch();
        rev.touch();
        assert!(rev.stamp(100));
        assert_eq!(rev.sequence, 5);
        assert_eq!(rev.last_updated, 100);

        assert!(!rev.stamp(200));
        assert_eq!(rev.sequence, 5);
        assert_eq!(rev.last_updated, 100);
    }
}
