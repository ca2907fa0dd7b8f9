//! Client-side prediction for locally owned ships.

use crate::fleet::constants::prediction::{CORRECTION_RATE, MAX_HORIZON_MS};
use crate::fleet::motion;
use crate::sync::state::{NetworkedShip, SyncPhase};

/// What one prediction step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionOutcome {
    /// Not a local traveling ship
    Skipped,
    /// Last authoritative data is too old; ship left where it is
    Suppressed,
    Advanced,
    /// Reached the destination this tick and docked
    Arrived,
}

#[derive(Debug, Clone)]
pub struct Predictor {
    horizon_ms: u64,
    correction_rate: f64,
}

impl Predictor {
    pub fn new(horizon_ms: u64, correction_rate: f64) -> Self {
        Self {
            horizon_ms,
            correction_rate: correction_rate.clamp(0.0, 1.0),
        }
    }

    /// Advance the predicted position by `dt_secs` and ease the live
    /// position toward it.
    pub fn predict(&self, state: &mut NetworkedShip, now_ms: u64, dt_secs: f64) -> PredictionOutcome {
        if !state.is_local() || !state.ship.is_moving() {
            return PredictionOutcome::Skipped;
        }
        if state.staleness_ms(now_ms) > self.horizon_ms {
            return PredictionOutcome::Suppressed;
        }

        let step = motion::step_from(&state.ship, state.predicted_position, dt_secs);
        state.predicted_position = step.position;

        if step.arrived {
            state.ship.position = step.position;
            motion::complete_journey(&mut state.ship);
            state.phase = SyncPhase::Idle;
            return PredictionOutcome::Arrived;
        }

        state.ship.position = state
            .ship
            .position
            .lerp(state.predicted_position, self.correction_rate);
        state.phase = SyncPhase::Predicting;
        PredictionOutcome::Advanced
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new(MAX_HORIZON_MS, CORRECTION_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::command::ShipCommand;
    use crate::fleet::ship::{Ownership, Ship, ShipStatus};
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn traveling(ownership: Ownership, dest: Vec2) -> NetworkedShip {
        let mut state = NetworkedShip::new(Ship::new(Uuid::new_v4(), Vec2::ZERO), ownership, 0);
        state.apply_local(&ShipCommand::SetCourse {
            destination: dest,
            speed: 1.0,
        });
        state
    }

    #[test]
    fn test_advances_predicted_and_eases_live() {
        let predictor = Predictor::default();
        let mut state = traveling(Ownership::Local, Vec2::new(10.0, 0.0));

        let outcome = predictor.predict(&mut state, 100, 0.1);
        assert_eq!(outcome, PredictionOutcome::Advanced);
        assert!(state.predicted_position.approx_eq(Vec2::new(0.1, 0.0), 1e-9));
        assert!(state.ship.position.approx_eq(Vec2::new(0.03, 0.0), 1e-9));
        assert_eq!(state.phase, SyncPhase::Predicting);
    }

    #[test]
    fn test_live_position_converges_on_predicted() {
        let predictor = Predictor::default();
        let mut state = traveling(Ownership::Local, Vec2::new(100.0, 0.0));
        for i in 0..10 {
            predictor.predict(&mut state, i * 33, 0.033);
        }
        let gap = state.ship.position.distance_to(state.predicted_position);
        // Steady-state lag of an exponential follower is bounded by one step / rate
        assert!(gap < 0.033 / 0.3 + 1e-9);
    }

    #[test]
    fn test_suppressed_past_horizon() {
        let predictor = Predictor::default();
        let mut state = traveling(Ownership::Local, Vec2::new(10.0, 0.0));
        assert_eq!(predictor.predict(&mut state, 501, 0.1), PredictionOutcome::Suppressed);
        assert_eq!(state.predicted_position, Vec2::ZERO);
        assert_eq!(state.ship.position, Vec2::ZERO);
    }

    #[test]
    fn test_remote_and_idle_ships_skipped() {
        let predictor = Predictor::default();
        let mut remote = traveling(Ownership::Remote, Vec2::new(10.0, 0.0));
        assert_eq!(predictor.predict(&mut remote, 10, 0.1), PredictionOutcome::Skipped);

        let mut idle = NetworkedShip::new(Ship::new(Uuid::new_v4(), Vec2::ZERO), Ownership::Local, 0);
        assert_eq!(predictor.predict(&mut idle, 10, 0.1), PredictionOutcome::Skipped);
    }

    #[test]
    fn test_arrival_completes_journey() {
        let predictor = Predictor::default();
        let mut state = traveling(Ownership::Local, Vec2::new(0.05, 0.0));
        assert_eq!(predictor.predict(&mut state, 10, 0.1), PredictionOutcome::Arrived);
        assert_eq!(state.ship.position, Vec2::new(0.05, 0.0));
        assert_eq!(state.ship.status, ShipStatus::Docked);
        assert!(state.ship.destination.is_none());
    }
}
