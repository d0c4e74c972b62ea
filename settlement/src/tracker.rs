//! Positions touched by one matching pass
//!
//! Positions live in an index-keyed arena so two of them can be borrowed
//! mutably at once (buyer and seller) without aliasing.

use crate::{Error, Result};
use ledger_core::{state, KvTransaction, Position};
use std::collections::HashMap;

/// Arena of positions keyed by user
#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: Vec<Position>,
    index: HashMap<String, usize>,
}

impl PositionTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a position, replacing any earlier one for the same user
    pub fn insert(&mut self, position: Position) -> usize {
        match self.index.get(&position.user_id) {
            Some(&idx) => {
                self.positions[idx] = position;
                idx
            }
            None => {
                let idx = self.positions.len();
                self.index.insert(position.user_id.clone(), idx);
                self.positions.push(position);
                idx
            }
        }
    }

    /// Load a user's position from the store unless already tracked
    pub fn load(&mut self, txn: &mut dyn KvTransaction, user_id: &str) -> Result<usize> {
        if let Some(&idx) = self.index.get(user_id) {
            return Ok(idx);
        }
        let position = state::load_position(txn, user_id)?;
        Ok(self.insert(position))
    }

    /// Persist every modified position
    pub fn save_all(&mut self, txn: &mut dyn KvTransaction) -> Result<usize> {
        let mut saved = 0;
        for position in &mut self.positions {
            if state::save_position(txn, position)? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Arena index of a user
    pub fn index_of(&self, user_id: &str) -> Result<usize> {
        self.index
            .get(user_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("position of {} is not tracked", user_id)))
    }

    /// Position of a user
    pub fn get(&self, user_id: &str) -> Option<&Position> {
        self.index.get(user_id).map(|&idx| &self.positions[idx])
    }

    /// Position at an arena index
    pub fn at(&self, idx: usize) -> Result<&Position> {
        self.positions
            .get(idx)
            .ok_or_else(|| Error::Internal(format!("no position at index {}", idx)))
    }

    /// Mutable position at an arena index
    pub fn at_mut(&mut self, idx: usize) -> Result<&mut Position> {
        self.positions
            .get_mut(idx)
            .ok_or_else(|| Error::Internal(format!("no position at index {}", idx)))
    }

    /// Two distinct positions, mutably
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Result<(&mut Position, &mut Position)> {
        if a == b {
            return Err(Error::InvalidInput(format!(
                "{} cannot trade with itself",
                self.at(a)?.user_id
            )));
        }
        if a.max(b) >= self.positions.len() {
            return Err(Error::Internal(format!("no position at index {}", a.max(b))));
        }
        if a < b {
            let (left, right) = self.positions.split_at_mut(b);
            Ok((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.positions.split_at_mut(a);
            Ok((&mut right[0], &mut left[b]))
        }
    }

    /// Tracked positions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter()
    }

    /// Number of tracked positions
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Nothing tracked
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Amount, AssetId, KvStore, MemoryStore};

    fn funded(user: &str, q: u64) -> Position {
        let mut position = Position::initial(user);
        position.add(&Amount::parse("USD", q).unwrap()).unwrap();
        position
    }

    #[test]
    fn test_pair_mut_either_order() {
        let mut tracker = PositionTracker::new();
        let a = tracker.insert(funded("alice", 10));
        let b = tracker.insert(funded("bob", 20));

        let (bob, alice) = tracker.pair_mut(b, a).unwrap();
        assert_eq!((bob.user_id.as_str(), alice.user_id.as_str()), ("bob", "alice"));
        bob.add(&Amount::parse("USD", 1).unwrap()).unwrap();

        let usd = AssetId::new("USD").unwrap();
        assert_eq!(tracker.get("bob").unwrap().available(&usd), 21);
        assert!(tracker.pair_mut(a, a).is_err());
        assert!(tracker.pair_mut(a, 7).is_err());
    }

    #[test]
    fn test_insert_replaces_same_user() {
        let mut tracker = PositionTracker::new();
        let first = tracker.insert(funded("alice", 10));
        let second = tracker.insert(funded("alice", 30));
        assert_eq!(first, second);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.index_of("carol").is_err());
    }

    #[test]
    fn test_load_and_save() {
        let store = MemoryStore::new();
        let mut txn = store.watch(&[]).unwrap();
        let mut tracker = PositionTracker::new();
        let idx = tracker.load(&mut *txn, "alice").unwrap();
        assert_eq!(tracker.load(&mut *txn, "alice").unwrap(), idx);
        assert_eq!(tracker.save_all(&mut *txn).unwrap(), 0);

        tracker.at_mut(idx).unwrap().add(&Amount::parse("USD", 5).unwrap()).unwrap();
        assert_eq!(tracker.save_all(&mut *txn).unwrap(), 1);
        txn.commit().unwrap();

        let mut txn = store.watch(&[]).unwrap();
        let mut reloaded = PositionTracker::new();
        let idx = reloaded.load(&mut *txn, "alice").unwrap();
        assert_eq!(reloaded.at(idx).unwrap().sequence(), 1);
    }
}
