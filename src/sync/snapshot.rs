//! Timestamp-ordered authoritative samples for one remote ship.
//!
//! Bounded by count and by age. Age is measured against the newest retained
//! snapshot, which keeps pruning independent of the skew between local and
//! server clocks.

use smallvec::SmallVec;

use crate::fleet::constants::interpolation::{BUFFER_CAPACITY, MAX_SNAPSHOT_AGE_MS};
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Vec2,
    /// Units per second
    pub velocity: Vec2,
    /// Server time (ms)
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    entries: SmallVec<[Snapshot; 8]>,
    capacity: usize,
    max_age_ms: u64,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        Self {
            entries: SmallVec::new(),
            capacity: capacity.max(2),
            max_age_ms,
        }
    }

    /// Insert in timestamp order. A snapshot whose timestamp is already
    /// present is rejected. Returns whether it was kept.
    pub fn insert(&mut self, snapshot: Snapshot) -> bool {
        let idx = match self
            .entries
            .binary_search_by_key(&snapshot.timestamp, |s| s.timestamp)
        {
            Ok(_) => return false,
            Err(idx) => idx,
        };
        self.entries.insert(idx, snapshot);
        self.prune();
        self.entries
            .iter()
            .any(|s| s.timestamp == snapshot.timestamp)
    }

    /// Enforce the age and count bounds
    pub fn prune(&mut self) {
        let Some(newest) = self.entries.last().map(|s| s.timestamp) else {
            return;
        };
        let cutoff = newest.saturating_sub(self.max_age_ms);
        self.entries.retain(|s| s.timestamp >= cutoff);

        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }

    /// Adjacent pair with `a.timestamp <= render_time < b.timestamp`
    pub fn bracket(&self, render_time: u64) -> Option<(&Snapshot, &Snapshot)> {
        self.entries
            .windows(2)
            .find(|w| w[0].timestamp <= render_time && render_time < w[1].timestamp)
            .map(|w| (&w[0], &w[1]))
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.entries.first()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(BUFFER_CAPACITY, MAX_SNAPSHOT_AGE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(x: f64, timestamp: u64) -> Snapshot {
        Snapshot {
            position: Vec2::new(x, 0.0),
            velocity: Vec2::new(1.0, 0.0),
            timestamp,
        }
    }

    fn timestamps(buffer: &SnapshotBuffer) -> Vec<u64> {
        buffer.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn test_out_of_order_insert_keeps_order() {
        let mut buffer = SnapshotBuffer::default();
        buffer.insert(snap(0.0, 100));
        buffer.insert(snap(2.0, 300));
        buffer.insert(snap(1.0, 200));
        assert_eq!(timestamps(&buffer), vec![100, 200, 300]);
    }

    #[test]
    fn test_duplicate_timestamp_not_retained() {
        let mut buffer = SnapshotBuffer::default();
        assert!(buffer.insert(snap(0.0, 100)));
        assert!(!buffer.insert(snap(5.0, 100)));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.latest().unwrap().position.x, 0.0);
    }

    #[test]
    fn test_count_bound_drops_oldest() {
        let mut buffer = SnapshotBuffer::new(5, 10_000);
        for i in 0..8 {
            buffer.insert(snap(i as f64, i * 100));
        }
        assert_eq!(timestamps(&buffer), vec![300, 400, 500, 600, 700]);
    }

    #[test]
    fn test_age_bound_relative_to_newest() {
        let mut buffer = SnapshotBuffer::new(5, 2000);
        buffer.insert(snap(0.0, 0));
        buffer.insert(snap(1.0, 1500));
        buffer.insert(snap(2.0, 2500));
        assert_eq!(timestamps(&buffer), vec![1500, 2500]);
    }

    #[test]
    fn test_too_old_insert_is_rejected() {
        let mut buffer = SnapshotBuffer::new(5, 2000);
        buffer.insert(snap(1.0, 5000));
        assert!(!buffer.insert(snap(0.0, 1000)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_bracket() {
        let mut buffer = SnapshotBuffer::default();
        buffer.insert(snap(0.0, 100));
        buffer.insert(snap(1.0, 200));
        buffer.insert(snap(2.0, 300));

        let (a, b) = buffer.bracket(250).unwrap();
        assert_eq!((a.timestamp, b.timestamp), (200, 300));
        let (a, b) = buffer.bracket(100).unwrap();
        assert_eq!((a.timestamp, b.timestamp), (100, 200));
        assert!(buffer.bracket(300).is_none());
        assert!(buffer.bracket(50).is_none());
    }
}
