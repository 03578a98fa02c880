//! Per-block state history
//! Keeps one state per block of the applied chain back to the last irreversible block
//! Use imbl collections in the state to keep snapshots cheap!

use std::collections::VecDeque;

use tracing::debug;

struct HistoryEntry<S> {
    index: u64,
    state: S,
}

/// State history - S is the state stored for each block
pub struct StateHistory<S> {
    /// History, one per block, ascending index
    history: VecDeque<HistoryEntry<S>>,

    /// Owner name for logging
    owner: String,
}

impl<S> StateHistory<S> {
    pub fn new(owner: &str) -> Self {
        Self {
            history: VecDeque::new(),
            owner: owner.to_string(),
        }
    }

    /// Get the current state (if any), direct ref
    pub fn current(&self) -> Option<&S> {
        self.history.back().map(|entry| &entry.state)
    }

    /// Index of the current state
    pub fn current_index(&self) -> Option<u64> {
        self.history.back().map(|entry| entry.index)
    }

    /// Drop every state after `index`, leaving it as the current one
    pub fn rollback_to(&mut self, index: u64) {
        while let Some(entry) = self.history.back() {
            if entry.index > index {
                debug!(
                    "{} rolling back state to {} removing block {}",
                    self.owner, index, entry.index
                );
                self.history.pop_back();
            } else {
                break;
            }
        }
    }

    /// Get the state for a given index (if any), direct ref
    pub fn get_by_index(&self, index: u64) -> Option<&S> {
        self.history.iter().rev().find(|entry| entry.index == index).map(|entry| &entry.state)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Commit the new state
    pub fn commit(&mut self, index: u64, state: S) {
        self.history.push_back(HistoryEntry { index, state });
    }

    /// Forget states below `index`; the state at `index` stays as the rollback floor
    pub fn prune_before(&mut self, index: u64) {
        while self.history.len() > 1 {
            match self.history.front() {
                Some(entry) if entry.index < index => {
                    self.history.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Replace everything with a single state
    pub fn reset(&mut self, index: u64, state: S) {
        self.history.clear();
        self.commit(index, state);
    }
}
