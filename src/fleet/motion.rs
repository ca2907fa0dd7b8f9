//! Journey motion driven by the simulation tick.
//!
//! Ships travel in a straight line toward their destination at cruise speed.
//! Arrival is detected on the tick that reaches the destination, never by a
//! wall-clock timer, so server simulation and client prediction agree on when
//! a journey completes.

use crate::fleet::ship::{Ship, ShipStatus};
use crate::util::vec2::Vec2;

/// Result of advancing a point along a journey
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub position: Vec2,
    pub velocity: Vec2,
    pub arrived: bool,
}

/// Velocity of a ship located at `from`
pub fn velocity_from(ship: &Ship, from: Vec2) -> Vec2 {
    match ship.destination {
        Some(dest) if ship.status == ShipStatus::Traveling => {
            (dest - from).normalize() * ship.speed
        }
        _ => Vec2::ZERO,
    }
}

/// Advance `from` along the ship's journey by `dt_secs`.
///
/// Does not mutate the ship; the predictor uses this to move its predicted
/// position independently of the rendered one.
pub fn step_from(ship: &Ship, from: Vec2, dt_secs: f64) -> Step {
    let Some(dest) = ship.destination.filter(|_| ship.status == ShipStatus::Traveling) else {
        return Step {
            position: from,
            velocity: Vec2::ZERO,
            arrived: false,
        };
    };

    let velocity = velocity_from(ship, from);
    let position = from.move_towards(dest, ship.speed * dt_secs.max(0.0));
    Step {
        position,
        velocity,
        arrived: position == dest,
    }
}

/// Advance a ship in place and complete its journey on arrival.
pub fn advance(ship: &mut Ship, dt_secs: f64) -> Step {
    let step = step_from(ship, ship.position, dt_secs);
    ship.position = step.position;
    if step.arrived {
        complete_journey(ship);
    }
    step
}

/// Mark a journey as finished: the ship docks at its destination.
pub fn complete_journey(ship: &mut Ship) {
    ship.destination = None;
    ship.status = ShipStatus::Docked;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::command::ShipCommand;
    use uuid::Uuid;

    fn traveling_ship(dest: Vec2, speed: f64) -> Ship {
        let mut ship = Ship::new(Uuid::new_v4(), Vec2::ZERO);
        ShipCommand::SetCourse {
            destination: dest,
            speed,
        }
        .apply(&mut ship);
        ship
    }

    #[test]
    fn test_idle_ship_does_not_move() {
        let ship = Ship::new(Uuid::new_v4(), Vec2::new(2.0, 2.0));
        let step = step_from(&ship, ship.position, 1.0);
        assert_eq!(step.position, Vec2::new(2.0, 2.0));
        assert_eq!(step.velocity, Vec2::ZERO);
        assert!(!step.arrived);
    }

    #[test]
    fn test_advance_moves_at_cruise_speed() {
        let mut ship = traveling_ship(Vec2::new(10.0, 0.0), 1.0);
        for _ in 0..30 {
            advance(&mut ship, 0.1);
        }
        assert!(ship.position.approx_eq(Vec2::new(3.0, 0.0), 1e-9));
        assert_eq!(ship.status, ShipStatus::Traveling);
    }

    #[test]
    fn test_arrival_docks_ship() {
        let mut ship = traveling_ship(Vec2::new(1.0, 0.0), 1.0);
        let step = advance(&mut ship, 2.0);
        assert!(step.arrived);
        assert_eq!(ship.position, Vec2::new(1.0, 0.0));
        assert_eq!(ship.status, ShipStatus::Docked);
        assert!(ship.destination.is_none());
    }

    #[test]
    fn test_velocity_points_at_destination() {
        let ship = traveling_ship(Vec2::new(0.0, 5.0), 2.0);
        let v = velocity_from(&ship, Vec2::ZERO);
        assert!(v.approx_eq(Vec2::new(0.0, 2.0), 1e-9));
    }
}
