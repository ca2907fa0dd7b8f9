//! Debounced batching of delta entries.
//!
//! The first queued entry arms the window; the batch is flushed when the
//! window elapses or the size threshold is reached. Time is simulation time
//! passed in by the caller, so no timer task exists to cancel. A ship queued
//! twice within one window keeps only its newest entry.

use crate::fleet::constants::bandwidth::{BATCH_MAX_ENTRIES, BATCH_WINDOW_MS};
use crate::fleet::ship::ShipId;
use crate::net::protocol::{BatchUpdate, DeltaShip};

#[derive(Debug)]
pub struct UpdateBatcher {
    window_ms: u64,
    max_entries: usize,
    pending: Vec<DeltaShip>,
    armed_at: Option<u64>,
}

impl UpdateBatcher {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            window_ms,
            max_entries,
            pending: Vec::with_capacity(max_entries),
            armed_at: None,
        }
    }

    /// Queue entries; returns a batch if the size threshold forced a flush
    pub fn push(
        &mut self,
        entries: impl IntoIterator<Item = DeltaShip>,
        now_ms: u64,
    ) -> Option<BatchUpdate> {
        for entry in entries {
            match self.pending.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => self.pending.push(entry),
            }
            if self.armed_at.is_none() {
                self.armed_at = Some(now_ms);
            }
        }

        if self.pending.len() >= self.max_entries {
            return self.flush(now_ms);
        }
        None
    }

    /// Flush if the debounce window has elapsed
    pub fn poll(&mut self, now_ms: u64) -> Option<BatchUpdate> {
        match self.armed_at {
            Some(armed) if now_ms.saturating_sub(armed) >= self.window_ms => self.flush(now_ms),
            _ => None,
        }
    }

    /// Take everything queued and disarm
    pub fn flush(&mut self, now_ms: u64) -> Option<BatchUpdate> {
        self.armed_at = None;
        if self.pending.is_empty() {
            return None;
        }
        Some(BatchUpdate {
            updates: std::mem::take(&mut self.pending),
            timestamp: now_ms,
        })
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop queued entries for a removed ship
    pub fn discard_ship(&mut self, ship_id: ShipId) {
        self.pending.retain(|e| e.id != ship_id);
        if self.pending.is_empty() {
            self.armed_at = None;
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.armed_at = None;
    }
}

impl Default for UpdateBatcher {
    fn default() -> Self {
        Self::new(BATCH_WINDOW_MS, BATCH_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::ship::Ship;
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn entry(x: f64, t: u64) -> DeltaShip {
        DeltaShip::from_ship(&Ship::new(Uuid::new_v4(), Vec2::new(x, 0.0)), t)
    }

    #[test]
    fn test_window_flush() {
        let mut batcher = UpdateBatcher::new(50, 16);
        assert!(batcher.push([entry(1.0, 0)], 0).is_none());
        assert!(batcher.is_armed());
        assert!(batcher.push([entry(2.0, 20)], 20).is_none());

        assert!(batcher.poll(49).is_none());
        let batch = batcher.poll(50).unwrap();
        assert_eq!(batch.updates.len(), 2);
        assert_eq!(batch.timestamp, 50);
        assert!(!batcher.is_armed());
        assert!(batcher.poll(500).is_none());
    }

    #[test]
    fn test_size_threshold_forces_flush() {
        let mut batcher = UpdateBatcher::new(50, 3);
        assert!(batcher.push([entry(0.0, 0), entry(1.0, 0)], 0).is_none());
        let batch = batcher.push([entry(2.0, 5)], 5).unwrap();
        assert_eq!(batch.updates.len(), 3);
        assert!(batcher.is_empty());
        assert!(!batcher.is_armed());
    }

    #[test]
    fn test_same_ship_keeps_newest() {
        let mut batcher = UpdateBatcher::new(50, 16);
        let first = entry(1.0, 0);
        let mut second = first;
        second.p = Vec2::new(4.0, 0.0).into();
        second.t = 30;
        batcher.push([first], 0);
        batcher.push([second], 30);

        let batch = batcher.poll(60).unwrap();
        assert_eq!(batch.updates, vec![second]);
    }

    #[test]
    fn test_window_counts_from_first_entry() {
        let mut batcher = UpdateBatcher::new(50, 16);
        batcher.push([entry(0.0, 0)], 100);
        batcher.push([entry(1.0, 0)], 140);
        assert!(batcher.poll(150).is_some());
    }

    #[test]
    fn test_clear_disarms() {
        let mut batcher = UpdateBatcher::default();
        batcher.push([entry(0.0, 0)], 0);
        batcher.clear();
        assert!(!batcher.is_armed());
        assert!(batcher.poll(1000).is_none());
    }
}
