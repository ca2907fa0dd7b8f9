use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fleet::constants::prediction;
use crate::util::vec2::Vec2;

pub type ShipId = Uuid;

/// Ship status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShipStatus {
    #[default]
    Idle,
    Traveling,
    Docked,
}

impl ShipStatus {
    /// Single-byte code used by compact delta entries
    pub fn code(self) -> u8 {
        match self {
            ShipStatus::Idle => 0,
            ShipStatus::Traveling => 1,
            ShipStatus::Docked => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ShipStatus::Idle),
            1 => Some(ShipStatus::Traveling),
            2 => Some(ShipStatus::Docked),
            _ => None,
        }
    }
}

/// Goods carried by a ship. Only relayed, never interpreted by the sync layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cargo {
    pub commodity: String,
    pub quantity: u32,
}

/// Who is allowed to drive a ship's motion on this peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Controlled by this client: predicted and reconciled
    Local,
    /// Owned elsewhere: buffered and interpolated
    Remote,
}

/// A movable ship
#[derive(Debug, Clone, PartialEq)]
pub struct Ship {
    pub id: ShipId,
    pub position: Vec2,
    pub status: ShipStatus,
    pub destination: Option<Vec2>,
    /// Cruise speed in units per second
    pub speed: f64,
    pub cargo: Option<Cargo>,
}

impl Ship {
    pub fn new(id: ShipId, position: Vec2) -> Self {
        Self {
            id,
            position,
            status: ShipStatus::Idle,
            destination: None,
            speed: prediction::DEFAULT_SPEED,
            cargo: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_cargo(mut self, cargo: Cargo) -> Self {
        self.cargo = Some(cargo);
        self
    }

    /// True while the ship has somewhere to go
    pub fn is_moving(&self) -> bool {
        self.status == ShipStatus::Traveling && self.destination.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [ShipStatus::Idle, ShipStatus::Traveling, ShipStatus::Docked] {
            assert_eq!(ShipStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ShipStatus::from_code(7), None);
    }

    #[test]
    fn test_new_ship_is_idle() {
        let ship = Ship::new(Uuid::new_v4(), Vec2::new(1.0, 2.0));
        assert_eq!(ship.status, ShipStatus::Idle);
        assert!(ship.destination.is_none());
        assert!(!ship.is_moving());
    }

    #[test]
    fn test_traveling_without_destination_is_not_moving() {
        let mut ship = Ship::new(Uuid::new_v4(), Vec2::ZERO);
        ship.status = ShipStatus::Traveling;
        assert!(!ship.is_moving());
        ship.destination = Some(Vec2::new(5.0, 0.0));
        assert!(ship.is_moving());
    }
}
