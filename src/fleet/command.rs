//! Ship commands carried by player inputs.
//!
//! On the wire a command is split into an `action` name and a free-form
//! `data` object. Inside the crate it is a closed enum, and the split/join
//! happens only at the codec boundary.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::fleet::ship::{Ship, ShipStatus};
use crate::util::vec2::Vec2;

/// Wire name of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipAction {
    SetCourse,
    AdjustSpeed,
    Maneuver,
    Stop,
    Dock,
}

/// A local action against one ship
#[derive(Debug, Clone, PartialEq)]
pub enum ShipCommand {
    /// Head for `destination` at `speed` units/second
    SetCourse { destination: Vec2, speed: f64 },
    /// Change cruise speed without changing course
    AdjustSpeed { speed: f64 },
    /// Immediate positional nudge (harbour maneuvering)
    Maneuver { offset: Vec2 },
    /// Abandon the current journey
    Stop,
    /// Tie up at the current position
    Dock,
}

#[derive(Deserialize)]
struct CourseData {
    destination: Vec2,
    speed: f64,
}

#[derive(Deserialize)]
struct SpeedData {
    speed: f64,
}

#[derive(Deserialize)]
struct ManeuverData {
    offset: Vec2,
}

impl ShipCommand {
    pub fn action(&self) -> ShipAction {
        match self {
            ShipCommand::SetCourse { .. } => ShipAction::SetCourse,
            ShipCommand::AdjustSpeed { .. } => ShipAction::AdjustSpeed,
            ShipCommand::Maneuver { .. } => ShipAction::Maneuver,
            ShipCommand::Stop => ShipAction::Stop,
            ShipCommand::Dock => ShipAction::Dock,
        }
    }

    /// Payload object for the wire `data` field
    pub fn data(&self) -> Value {
        match self {
            ShipCommand::SetCourse { destination, speed } => {
                json!({ "destination": destination, "speed": speed })
            }
            ShipCommand::AdjustSpeed { speed } => json!({ "speed": speed }),
            ShipCommand::Maneuver { offset } => json!({ "offset": offset }),
            ShipCommand::Stop | ShipCommand::Dock => Value::Null,
        }
    }

    /// Rebuild a command from its wire parts
    pub fn from_parts(action: ShipAction, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match action {
            ShipAction::SetCourse => {
                let d: CourseData = serde_json::from_value(data)?;
                ShipCommand::SetCourse {
                    destination: d.destination,
                    speed: d.speed,
                }
            }
            ShipAction::AdjustSpeed => {
                let d: SpeedData = serde_json::from_value(data)?;
                ShipCommand::AdjustSpeed { speed: d.speed }
            }
            ShipAction::Maneuver => {
                let d: ManeuverData = serde_json::from_value(data)?;
                ShipCommand::Maneuver { offset: d.offset }
            }
            ShipAction::Stop => ShipCommand::Stop,
            ShipAction::Dock => ShipCommand::Dock,
        })
    }

    /// Apply the command's immediate effect to a ship.
    ///
    /// Returns the positional displacement it caused, so callers tracking a
    /// separate predicted position can mirror it.
    pub fn apply(&self, ship: &mut Ship) -> Vec2 {
        match *self {
            ShipCommand::SetCourse { destination, speed } => {
                ship.destination = Some(destination);
                ship.speed = speed.max(0.0);
                ship.status = ShipStatus::Traveling;
                Vec2::ZERO
            }
            ShipCommand::AdjustSpeed { speed } => {
                ship.speed = speed.max(0.0);
                Vec2::ZERO
            }
            ShipCommand::Maneuver { offset } => {
                ship.position += offset;
                offset
            }
            ShipCommand::Stop => {
                ship.destination = None;
                ship.status = ShipStatus::Idle;
                Vec2::ZERO
            }
            ShipCommand::Dock => {
                ship.destination = None;
                ship.status = ShipStatus::Docked;
                Vec2::ZERO
            }
        }
    }
}
