//! Outbound fleet state: full sync, thresholded deltas, or nothing.
//!
//! Each tick the optimizer plans what to send for the locally owned ships.
//! A full sync goes out whenever the interval since the last *successful* one
//! has elapsed. Otherwise a ship enters the delta only if it moved more than
//! the threshold since its last sent state, is high priority, or was never
//! sent. Plans are committed only after the send succeeds, so a failed send is
//! re-derived on the next tick.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::fleet::constants::bandwidth::{DELTA_POSITION_THRESHOLD, FULL_SYNC_INTERVAL_MS};
use crate::fleet::ship::{Ship, ShipId};
use crate::net::protocol::{DeltaShip, ShipFullSync, ShipState};
use crate::util::vec2::Vec2;

/// Statistics about one planning pass, for metrics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeltaStats {
    pub ships_included: usize,
    pub ships_skipped: usize,
    pub priority_included: usize,
    pub first_sends: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncPlan {
    Full(ShipFullSync),
    Delta(Vec<DeltaShip>),
    Nothing,
}

#[derive(Debug)]
pub struct BandwidthOptimizer {
    full_sync_interval_ms: u64,
    position_threshold_sq: f64,
    last_full_sync: Option<u64>,
    last_sent: FxHashMap<ShipId, Vec2>,
}

impl BandwidthOptimizer {
    pub fn new(full_sync_interval_ms: u64, position_threshold: f64) -> Self {
        let threshold = position_threshold.max(0.0);
        Self {
            full_sync_interval_ms,
            position_threshold_sq: threshold * threshold,
            last_full_sync: None,
            last_sent: FxHashMap::default(),
        }
    }

    pub fn full_sync_due(&self, now_ms: u64) -> bool {
        match self.last_full_sync {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.full_sync_interval_ms,
        }
    }

    /// Decide what to send this tick. Does not change any state.
    pub fn plan<'a>(
        &self,
        ships: impl IntoIterator<Item = &'a Ship>,
        priority: &FxHashSet<ShipId>,
        now_ms: u64,
        sequence: u64,
    ) -> (SyncPlan, DeltaStats) {
        let mut stats = DeltaStats::default();

        if self.full_sync_due(now_ms) {
            let ships: Vec<ShipState> = ships
                .into_iter()
                .map(|ship| ShipState::from_ship(ship, now_ms))
                .collect();
            if ships.is_empty() {
                return (SyncPlan::Nothing, stats);
            }
            stats.ships_included = ships.len();
            return (
                SyncPlan::Full(ShipFullSync {
                    ships,
                    sequence_number: sequence,
                }),
                stats,
            );
        }

        let mut entries = Vec::new();
        for ship in ships {
            let include = match self.last_sent.get(&ship.id) {
                None => {
                    stats.first_sends += 1;
                    true
                }
                Some(sent) if priority.contains(&ship.id) => {
                    if ship.position.distance_sq_to(*sent) <= self.position_threshold_sq {
                        stats.priority_included += 1;
                    }
                    true
                }
                Some(sent) => ship.position.distance_sq_to(*sent) > self.position_threshold_sq,
            };

            if include {
                entries.push(DeltaShip::from_ship(ship, now_ms));
            } else {
                stats.ships_skipped += 1;
            }
        }

        stats.ships_included = entries.len();
        if entries.is_empty() {
            (SyncPlan::Nothing, stats)
        } else {
            (SyncPlan::Delta(entries), stats)
        }
    }

    /// Record a successfully sent full sync
    pub fn commit_full_sync(&mut self, sync: &ShipFullSync, now_ms: u64) {
        self.last_full_sync = Some(now_ms);
        for state in &sync.ships {
            self.last_sent.insert(state.id, state.position);
        }
    }

    /// Record successfully sent delta entries
    pub fn commit_delta(&mut self, entries: &[DeltaShip]) {
        for entry in entries {
            self.last_sent.insert(entry.id, entry.position());
        }
    }

    /// Forget "last sent" records after a failed send
    pub fn invalidate(&mut self, ids: impl IntoIterator<Item = ShipId>) {
        for id in ids {
            self.last_sent.remove(&id);
        }
    }

    pub fn forget(&mut self, ship_id: ShipId) {
        self.last_sent.remove(&ship_id);
    }

    pub fn last_full_sync(&self) -> Option<u64> {
        self.last_full_sync
    }

    pub fn reset(&mut self) {
        self.last_full_sync = None;
        self.last_sent.clear();
    }
}

impl Default for BandwidthOptimizer {
    fn default() -> Self {
        Self::new(FULL_SYNC_INTERVAL_MS, DELTA_POSITION_THRESHOLD)
    }
}

// ============================================================================
// Tests
// ============================================================================
