//! Per-ship network bookkeeping.

use crate::fleet::command::ShipCommand;
use crate::fleet::ship::{Ownership, Ship, ShipId};
use crate::sync::snapshot::SnapshotBuffer;
use crate::util::vec2::Vec2;

/// Where a ship currently sits in its sync lifecycle.
///
/// Local ships cycle `Idle -> Predicting -> Reconciling -> Predicting`;
/// remote ships cycle `Buffering -> Interpolating <-> Extrapolating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Predicting,
    Reconciling,
    Buffering,
    Interpolating,
    Extrapolating,
}

/// A tracked ship plus everything the sync layer knows about it
#[derive(Debug, Clone)]
pub struct NetworkedShip {
    /// Live (rendered) ship state
    pub ship: Ship,
    pub ownership: Ownership,
    /// Timestamp of the most recent authoritative data; never decreases
    last_server_update: u64,
    /// Last authoritative position
    pub server_position: Vec2,
    /// Locally computed position (local ships)
    pub predicted_position: Vec2,
    /// Fraction between bracketing snapshots used for the last render (remote ships)
    pub interpolation_factor: f64,
    pub phase: SyncPhase,
    /// Highest input sequence an authoritative update has confirmed
    pub last_processed_sequence: u64,
    /// Authoritative samples (remote ships)
    pub snapshots: SnapshotBuffer,
}

impl NetworkedShip {
    /// Start tracking a ship. Registration counts as the first ground truth.
    pub fn new(ship: Ship, ownership: Ownership, now_ms: u64) -> Self {
        let position = ship.position;
        Self {
            ship,
            ownership,
            last_server_update: now_ms,
            server_position: position,
            predicted_position: position,
            interpolation_factor: 0.0,
            phase: match ownership {
                Ownership::Local => SyncPhase::Idle,
                Ownership::Remote => SyncPhase::Buffering,
            },
            last_processed_sequence: 0,
            snapshots: SnapshotBuffer::default(),
        }
    }

    pub fn id(&self) -> ShipId {
        self.ship.id
    }

    pub fn is_local(&self) -> bool {
        self.ownership == Ownership::Local
    }

    pub fn last_server_update(&self) -> u64 {
        self.last_server_update
    }

    /// Record authoritative data. Older timestamps do not move the mark back.
    pub fn record_server_state(&mut self, position: Vec2, timestamp: u64) {
        self.server_position = position;
        self.last_server_update = self.last_server_update.max(timestamp);
    }

    /// Apply a local command to the live ship and mirror any displacement
    /// onto the predicted position.
    pub fn apply_local(&mut self, command: &ShipCommand) {
        let moved = command.apply(&mut self.ship);
        self.predicted_position += moved;
    }

    /// Hard-set both live and predicted position
    pub fn snap_to(&mut self, position: Vec2) {
        self.ship.position = position;
        self.predicted_position = position;
    }

    /// Milliseconds since the last authoritative data
    pub fn staleness_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_server_update)
    }
}
