//! High-priority selection for outbound state.
//!
//! A local ship is high priority while it is traveling or while any remote
//! ship is within the proximity radius. High-priority ships are included in
//! every delta regardless of how little they moved.

use rustc_hash::FxHashSet;

use crate::fleet::constants::bandwidth::PROXIMITY_RADIUS;
use crate::fleet::ship::{Ship, ShipId, ShipStatus};
use crate::util::vec2::Vec2;

#[derive(Debug, Clone)]
pub struct PriorityFilter {
    radius_sq: f64,
}

impl PriorityFilter {
    pub fn new(radius: f64) -> Self {
        let radius = radius.max(0.0);
        Self {
            radius_sq: radius * radius,
        }
    }

    /// Whether one local ship is high priority
    #[inline]
    pub fn is_priority(&self, ship: &Ship, remote_positions: &[Vec2]) -> bool {
        ship.status == ShipStatus::Traveling
            || remote_positions
                .iter()
                .any(|p| ship.position.distance_sq_to(*p) <= self.radius_sq)
    }

    /// Ids of the high-priority ships among `local`
    pub fn select<'a>(
        &self,
        local: impl IntoIterator<Item = &'a Ship>,
        remote_positions: &[Vec2],
    ) -> FxHashSet<ShipId> {
        local
            .into_iter()
            .filter(|ship| self.is_priority(ship, remote_positions))
            .map(|ship| ship.id)
            .collect()
    }
}

impl Default for PriorityFilter {
    fn default() -> Self {
        Self::new(PROXIMITY_RADIUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ship_at(x: f64, y: f64, status: ShipStatus) -> Ship {
        let mut ship = Ship::new(Uuid::new_v4(), Vec2::new(x, y));
        ship.status = status;
        ship
    }

    #[test]
    fn test_traveling_is_priority() {
        let filter = PriorityFilter::default();
        let ship = ship_at(0.0, 0.0, ShipStatus::Traveling);
        assert!(filter.is_priority(&ship, &[]));
    }

    #[test]
    fn test_proximity_to_remote_ship() {
        let filter = PriorityFilter::new(50.0);
        let near = ship_at(0.0, 0.0, ShipStatus::Docked);
        let far = ship_at(200.0, 0.0, ShipStatus::Idle);
        let remotes = [Vec2::new(30.0, 40.0)];

        assert!(filter.is_priority(&near, &remotes));
        assert!(!filter.is_priority(&far, &remotes));

        let set = filter.select([&near, &far], &remotes);
        assert!(set.contains(&near.id));
        assert!(!set.contains(&far.id));
    }
}
