//! Server reconciliation with input replay.
//!
//! When an authoritative update for a local ship disagrees with the
//! prediction by more than the correction threshold, the ship is snapped to
//! ground truth and every still-unacknowledged input for it is re-applied in
//! its original sequence order.
//!
//! Updates that confirm no new input still carry ground truth. Once a ship
//! has no outstanding inputs (or the outstanding ones are old enough that the
//! server evidently never applied them) it is resynced to that state.

use tracing::{debug, warn};

use crate::fleet::constants::reconciliation::{INPUT_LOSS_TIMEOUT_MS, MIN_CORRECTION_DISTANCE};
use crate::fleet::ship::ShipStatus;
use crate::net::protocol::ShipPositionUpdate;
use crate::sync::input::InputSequencer;
use crate::sync::state::{NetworkedShip, SyncPhase};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Sequence at or below the last processed one: state recorded, no replay
    Stale,
    /// No new input confirmed, but the ship had drifted and was snapped back
    Resynced { error: f64 },
    /// Reconciliation disabled: state recorded and inputs acknowledged
    Recorded,
    /// Error within threshold
    WithinTolerance { error: f64 },
    /// Snapped to the authoritative position and replayed `replayed` inputs
    Corrected { error: f64, replayed: usize },
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    enabled: bool,
    threshold: f64,
    input_timeout_ms: u64,
}

impl Reconciler {
    pub fn new(enabled: bool, threshold: f64) -> Self {
        Self {
            enabled,
            threshold: threshold.max(0.0),
            input_timeout_ms: INPUT_LOSS_TIMEOUT_MS,
        }
    }

    /// Apply an authoritative update to a local ship
    pub fn reconcile(
        &self,
        state: &mut NetworkedShip,
        update: &ShipPositionUpdate,
        inputs: &mut InputSequencer,
    ) -> ReconcileOutcome {
        let previous_update = state.last_server_update();
        state.record_server_state(update.position, update.timestamp);

        if update.sequence_number <= state.last_processed_sequence {
            if !self.enabled || update.timestamp <= previous_update {
                return ReconcileOutcome::Stale;
            }
            return self.resync(state, update, inputs);
        }
        state.last_processed_sequence = update.sequence_number;
        inputs.acknowledge(update.sequence_number);

        if !self.enabled {
            return ReconcileOutcome::Recorded;
        }

        let error = state.predicted_position.distance_to(update.position);
        if error <= self.threshold {
            return ReconcileOutcome::WithinTolerance { error };
        }

        state.phase = SyncPhase::Reconciling;
        state.snap_to(update.position);

        let ship_id = state.id();
        let mut replayed = 0;
        for input in inputs.pending_for(ship_id) {
            state.apply_local(&input.command);
            replayed += 1;
        }

        debug!(
            "Reconciled ship {}: error {:.3}, replayed {} inputs after #{}",
            ship_id, error, replayed, update.sequence_number
        );
        state.phase = if state.ship.is_moving() {
            SyncPhase::Predicting
        } else {
            SyncPhase::Idle
        };
        ReconcileOutcome::Corrected { error, replayed }
    }

    /// Converge on state that confirms no new input. Never replays.
    fn resync(
        &self,
        state: &mut NetworkedShip,
        update: &ShipPositionUpdate,
        inputs: &mut InputSequencer,
    ) -> ReconcileOutcome {
        let ship_id = state.id();
        let expired = inputs.expire_unconfirmed(ship_id, update.timestamp, self.input_timeout_ms);
        if expired > 0 {
            warn!(
                "Ship {}: {} inputs unconfirmed after {}ms, treating as lost",
                ship_id, expired, self.input_timeout_ms
            );
        }
        if inputs.pending_for(ship_id).next().is_some() {
            return ReconcileOutcome::Stale;
        }

        let error = state.predicted_position.distance_to(update.position);
        if error <= self.threshold {
            return ReconcileOutcome::Stale;
        }

        state.snap_to(update.position);
        // A motionless authority means the course this ship follows was never applied
        if update.velocity.length_sq() == 0.0 && state.ship.is_moving() {
            state.ship.destination = None;
            state.ship.status = ShipStatus::Idle;
        }
        state.phase = if state.ship.is_moving() {
            SyncPhase::Predicting
        } else {
            SyncPhase::Idle
        };
        debug!("Resynced ship {}: drift {:.3}", ship_id, error);
        ReconcileOutcome::Resynced { error }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(true, MIN_CORRECTION_DISTANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::command::ShipCommand;
    use crate::fleet::ship::{Ownership, Ship};
    use crate::sync::prediction::Predictor;
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn local_ship() -> NetworkedShip {
        NetworkedShip::new(Ship::new(Uuid::new_v4(), Vec2::ZERO), Ownership::Local, 0)
    }

    fn update(state: &NetworkedShip, position: Vec2, timestamp: u64, sequence: u64) -> ShipPositionUpdate {
        ShipPositionUpdate {
            ship_id: state.id(),
            position,
            velocity: Vec2::ZERO,
            timestamp,
            sequence_number: sequence,
        }
    }

    fn submit(state: &mut NetworkedShip, inputs: &mut InputSequencer, command: ShipCommand, now: u64) {
        let input = inputs.submit(state.id(), command, now).unwrap();
        state.apply_local(&input.command);
    }

    #[test]
    fn test_correction_replays_later_inputs() {
        // Predicted x ~= 3 after 3s at 1/s; server says 2.5 as of input #1
        let reconciler = Reconciler::default();
        let predictor = Predictor::default();
        let mut inputs = InputSequencer::new(20, 256);
        let mut state = local_ship();

        submit(
            &mut state,
            &mut inputs,
            ShipCommand::SetCourse {
                destination: Vec2::new(10.0, 0.0),
                speed: 1.0,
            },
            0,
        );
        for tick in 1..=30u64 {
            // Keep authoritative data fresh so prediction is not suppressed
            state.record_server_state(state.server_position, tick * 100);
            predictor.predict(&mut state, tick * 100, 0.1);
        }
        assert!((state.predicted_position.x - 3.0).abs() < 1e-6);

        submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: Vec2::new(0.0, 1.0) }, 3000);

        let u = update(&state, Vec2::new(2.5, 0.0), 3000, 1);
        let outcome = reconciler.reconcile(&mut state, &u, &mut inputs);
        match outcome {
            ReconcileOutcome::Corrected { error, replayed } => {
                assert!(error > 0.25);
                assert_eq!(replayed, 1);
            }
            other => panic!("expected correction, got {:?}", other),
        }
        // Authoritative x plus the one replayed maneuver
        assert!(state.predicted_position.approx_eq(Vec2::new(2.5, 1.0), 1e-9));
        assert_eq!(state.ship.position, state.predicted_position);
        assert_eq!(inputs.pending_count(), 1);
        assert_eq!(state.phase, SyncPhase::Predicting);

        // Motion continues forward from the corrected point
        state.record_server_state(state.server_position, 3100);
        predictor.predict(&mut state, 3100, 0.1);
        assert!(state.predicted_position.x > 2.5);
    }

    #[test]
    fn test_replay_determinism() {
        // Correct-then-replay must equal applying the correction first and
        // then the same inputs in order
        let reconciler = Reconciler::default();
        let offsets = [
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, -2.0),
            Vec2::new(0.5, 0.5),
            Vec2::new(-3.0, 1.0),
        ];

        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        for (i, offset) in offsets.iter().enumerate() {
            submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: *offset }, i as u64 * 10);
        }

        let authoritative = Vec2::new(7.0, 7.0);
        let u = update(&state, authoritative, 100, 2);
        reconciler.reconcile(&mut state, &u, &mut inputs);

        let mut expected = Ship::new(state.id(), authoritative);
        for offset in &offsets[2..] {
            ShipCommand::Maneuver { offset: *offset }.apply(&mut expected);
        }
        assert!(state.ship.position.approx_eq(expected.position, 1e-12));
        assert!(state.predicted_position.approx_eq(expected.position, 1e-12));
    }

    #[test]
    fn test_small_error_ignored() {
        let reconciler = Reconciler::default();
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: Vec2::new(1.0, 0.0) }, 0);

        let u = update(&state, Vec2::new(1.1, 0.0), 50, 1);
        let outcome = reconciler.reconcile(&mut state, &u, &mut inputs);
        assert!(matches!(outcome, ReconcileOutcome::WithinTolerance { .. }));
        assert_eq!(state.ship.position, Vec2::new(1.0, 0.0));
        assert_eq!(inputs.pending_count(), 0);
    }

    #[test]
    fn test_stale_update_does_not_replay() {
        let reconciler = Reconciler::default();
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        for t in 0..3 {
            submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: Vec2::new(1.0, 0.0) }, t * 10);
        }
        let u = update(&state, Vec2::new(3.0, 0.0), 100, 3);
        reconciler.reconcile(&mut state, &u, &mut inputs);

        // Duplicate and older updates: position recorded, live state untouched
        let before = state.ship.position;
        let u = update(&state, Vec2::new(50.0, 0.0), 90, 2);
        let outcome = reconciler.reconcile(&mut state, &u, &mut inputs);
        assert_eq!(outcome, ReconcileOutcome::Stale);
        assert_eq!(state.ship.position, before);
        assert_eq!(state.server_position, Vec2::new(50.0, 0.0));
        assert_eq!(state.last_server_update(), 100);
    }

    #[test]
    fn test_disabled_only_records() {
        let reconciler = Reconciler::new(false, 0.25);
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: Vec2::new(1.0, 0.0) }, 0);

        let u = update(&state, Vec2::new(9.0, 0.0), 10, 1);
        let outcome = reconciler.reconcile(&mut state, &u, &mut inputs);
        assert_eq!(outcome, ReconcileOutcome::Recorded);
        assert_eq!(state.ship.position, Vec2::new(1.0, 0.0));
        assert_eq!(state.server_position, Vec2::new(9.0, 0.0));
        assert_eq!(inputs.pending_count(), 0);
    }

    fn update_with_velocity(
        state: &NetworkedShip,
        position: Vec2,
        velocity: Vec2,
        timestamp: u64,
        sequence: u64,
    ) -> ShipPositionUpdate {
        ShipPositionUpdate {
            velocity,
            ..update(state, position, timestamp, sequence)
        }
    }

    #[test]
    fn test_drift_after_ack_is_resynced() {
        let reconciler = Reconciler::default();
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: Vec2::new(1.0, 0.0) }, 0);
        let u = update(&state, Vec2::new(1.0, 0.0), 100, 1);
        reconciler.reconcile(&mut state, &u, &mut inputs);

        // Same sequence, newer server state, well away from the local ship
        let u = update_with_velocity(&state, Vec2::new(2.0, 0.0), Vec2::new(5.0, 0.0), 300, 1);
        let outcome = reconciler.reconcile(&mut state, &u, &mut inputs);
        assert!(matches!(outcome, ReconcileOutcome::Resynced { error } if (error - 1.0).abs() < 1e-9));
        assert_eq!(state.ship.position, Vec2::new(2.0, 0.0));
        assert_eq!(state.predicted_position, Vec2::new(2.0, 0.0));

        // Small drift is left to prediction
        state.apply_local(&ShipCommand::Maneuver { offset: Vec2::new(0.1, 0.0) });
        let u = update(&state, Vec2::new(2.0, 0.0), 400, 1);
        assert_eq!(reconciler.reconcile(&mut state, &u, &mut inputs), ReconcileOutcome::Stale);
        assert!(state.ship.position.approx_eq(Vec2::new(2.1, 0.0), 1e-9));
    }

    #[test]
    fn test_in_flight_input_blocks_resync() {
        let reconciler = Reconciler::default();
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        submit(&mut state, &mut inputs, ShipCommand::Maneuver { offset: Vec2::new(3.0, 0.0) }, 0);

        let u = update(&state, Vec2::ZERO, 200, 0);
        assert_eq!(reconciler.reconcile(&mut state, &u, &mut inputs), ReconcileOutcome::Stale);
        assert_eq!(state.ship.position, Vec2::new(3.0, 0.0));
        assert_eq!(inputs.pending_count(), 1);
    }

    #[test]
    fn test_lost_course_is_dropped_and_ship_halts() {
        let reconciler = Reconciler::default();
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        submit(
            &mut state,
            &mut inputs,
            ShipCommand::SetCourse {
                destination: Vec2::new(100.0, 0.0),
                speed: 5.0,
            },
            0,
        );
        // Prediction has carried the ship away from where the server holds it
        state.predicted_position = Vec2::new(6.0, 0.0);
        state.ship.position = Vec2::new(6.0, 0.0);

        let u = update(&state, Vec2::ZERO, 1_200, 0);
        let outcome = reconciler.reconcile(&mut state, &u, &mut inputs);
        assert!(matches!(outcome, ReconcileOutcome::Resynced { .. }));
        assert_eq!(inputs.pending_count(), 0);
        assert_eq!(state.ship.position, Vec2::ZERO);
        assert!(!state.ship.is_moving());
        assert_eq!(state.phase, SyncPhase::Idle);
    }

    #[test]
    fn test_disabled_never_resyncs() {
        let reconciler = Reconciler::new(false, 0.25);
        let mut inputs = InputSequencer::new(1000, 256);
        let mut state = local_ship();
        state.snap_to(Vec2::new(4.0, 0.0));
        let u = update(&state, Vec2::ZERO, 500, 0);
        assert_eq!(reconciler.reconcile(&mut state, &u, &mut inputs), ReconcileOutcome::Stale);
        assert_eq!(state.ship.position, Vec2::new(4.0, 0.0));
    }
}
