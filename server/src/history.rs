//! Bounded record of past player states, one per processed datagram
//!
//! Resend requests are answered from here. Once the window is full the oldest
//! id is evicted, and a request for it goes unanswered.

use std::collections::VecDeque;

use crate::game::Snapshot;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Sliding window of the most recent `(update_id, snapshot)` pairs.
///
/// Ids are recorded in increasing order, so the oldest entry sits at the front
/// and is the one evicted once the window is full.
#[derive(Debug)]
pub struct UpdateHistory {
    capacity: usize,
    entries: VecDeque<(u64, Snapshot)>,
}

impl UpdateHistory {
    /// Creates an empty window holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends the snapshot taken after processing `update_id`
    ///
    /// Ids must be recorded in increasing order. A full window drops its
    /// oldest entry first.
    pub fn record(&mut self, update_id: u64, snapshot: Snapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((update_id, snapshot));
    }

    /// The snapshot recorded under `update_id`, if it is still in the window
    ///
    /// Contiguous ids are found by offset from the oldest entry; gaps fall back
    /// to a linear scan.
    pub fn get(&self, update_id: u64) -> Option<&Snapshot> {
        let (oldest, _) = self.entries.front()?;
        let offset = update_id.checked_sub(*oldest)? as usize;
        match self.entries.get(offset) {
            Some((id, snapshot)) if *id == update_id => Some(snapshot),
            // Ids are not contiguous if a caller skipped one; fall back to a scan.
            _ => self
                .entries
                .iter()
                .find(|(id, _)| *id == update_id)
                .map(|(_, snapshot)| snapshot),
        }
    }

    /// Id of the newest entry
    pub fn latest(&self) -> Option<u64> {
        self.entries.back().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
