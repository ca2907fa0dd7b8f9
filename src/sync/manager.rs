//! Client-side sync manager - the single owner of all per-ship state
//!
//! Inbound server messages are forwarded by channel handlers into a bounded
//! inbox and only applied when the tick drains it, so nothing but the tick
//! mutates ship state. Each tick:
//!
//! 1. drains the inbox (reconciliation for local ships, snapshots for remote)
//! 2. checks probe timeout and sends a latency probe when due
//! 3. predicts local ships and renders remote ships
//! 4. plans and sends outbound state (full sync, delta, or batch)

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::fleet::command::ShipCommand;
use crate::fleet::constants::{bandwidth, interpolation, net, prediction, reconciliation};
use crate::fleet::ship::{Ownership, Ship, ShipId};
use crate::metrics::SyncMetrics;
use crate::net::batcher::UpdateBatcher;
use crate::net::channel::{ChannelManager, SubscriptionId};
use crate::net::delta::{BandwidthOptimizer, SyncPlan};
use crate::net::latency::LatencyEstimator;
use crate::net::priority::PriorityFilter;
use crate::net::protocol::{
    BatchUpdate, ClientMessage, DeltaKind, DeltaUpdate, PingProbe, PlayerInput, ServerMessage,
    ServerMessageKind, ShipPositionUpdate,
};
use crate::sync::input::InputSequencer;
use crate::sync::interpolation::{AdaptiveDelay, Interpolator, Sample};
use crate::sync::prediction::{PredictionOutcome, Predictor};
use crate::sync::rate_limit::RateLimitViolation;
use crate::sync::reconciliation::{ReconcileOutcome, Reconciler};
use crate::sync::snapshot::Snapshot;
use crate::sync::state::{NetworkedShip, SyncPhase};
use crate::util::clock::Clock;
use crate::util::vec2::Vec2;

/// API misuse reported by the manager
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Unknown ship {0}")]
    UnknownShip(ShipId),
    #[error("Ship {0} is not locally owned")]
    NotLocal(ShipId),
    #[error("Ship {0} is already registered")]
    AlreadyRegistered(ShipId),
    #[error(transparent)]
    RateLimited(#[from] RateLimitViolation),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A server message and the local time it arrived
#[derive(Debug, Clone)]
struct Inbound {
    message: ServerMessage,
    received_at: u64,
}

pub struct SyncManager {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    channel: Arc<ChannelManager>,
    metrics: Arc<SyncMetrics>,

    ships: FxHashMap<ShipId, NetworkedShip>,
    inputs: InputSequencer,
    latency: LatencyEstimator,
    predictor: Predictor,
    reconciler: Reconciler,
    interpolator: Interpolator,
    delay: AdaptiveDelay,
    priority: PriorityFilter,
    bandwidth: BandwidthOptimizer,
    batcher: UpdateBatcher,

    inbox_rx: Receiver<Inbound>,
    subscriptions: Vec<SubscriptionId>,
    last_tick_at: Option<u64>,
    tick_count: u64,
}

impl SyncManager {
    /// Build a manager and subscribe it to the channel's server messages
    pub fn new(
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        channel: Arc<ChannelManager>,
        metrics: Arc<SyncMetrics>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let (inbox_tx, inbox_rx) = bounded(net::INBOX_CAPACITY);
        let subscriptions = [
            ServerMessageKind::ShipPositionUpdate,
            ServerMessageKind::ShipPositionBatch,
            ServerMessageKind::PingResponse,
        ]
        .into_iter()
        .map(|kind| channel.subscribe(kind, forward_to_inbox(inbox_tx.clone(), clock.clone())))
        .collect();

        info!(
            "Sync manager ready: prediction={}, reconciliation={}, compression={}, delay={}ms",
            config.prediction_enabled,
            config.reconciliation_enabled,
            config.compression_enabled,
            config.interpolation_delay_ms
        );

        Ok(Self {
            inputs: InputSequencer::new(config.input_rate_limit, config.max_unacked_inputs),
            latency: LatencyEstimator::new(),
            predictor: Predictor::new(prediction::MAX_HORIZON_MS, prediction::CORRECTION_RATE),
            reconciler: Reconciler::new(
                config.reconciliation_enabled,
                reconciliation::MIN_CORRECTION_DISTANCE,
            ),
            interpolator: Interpolator::default(),
            delay: AdaptiveDelay::new(config.interpolation_delay_ms, interpolation::MAX_DELAY_MS),
            priority: PriorityFilter::default(),
            bandwidth: BandwidthOptimizer::new(
                config.full_sync_interval_ms,
                bandwidth::DELTA_POSITION_THRESHOLD,
            ),
            batcher: UpdateBatcher::default(),
            ships: FxHashMap::default(),
            inbox_rx,
            subscriptions,
            last_tick_at: None,
            tick_count: 0,
            config,
            clock,
            channel,
            metrics,
        })
    }

    // ========================================================================
    // Ship registry
    // ========================================================================

    pub fn register_ship(&mut self, ship: Ship, ownership: Ownership) -> Result<(), SyncError> {
        if self.ships.contains_key(&ship.id) {
            return Err(SyncError::AlreadyRegistered(ship.id));
        }
        let id = ship.id;
        let now = self.clock.now_ms();
        self.ships.insert(id, NetworkedShip::new(ship, ownership, now));
        debug!("Registered {:?} ship {}", ownership, id);
        self.refresh_ship_gauges();
        Ok(())
    }

    /// Stop tracking a ship and discard everything buffered for it
    pub fn remove_ship(&mut self, ship_id: ShipId) -> Option<NetworkedShip> {
        let removed = self.ships.remove(&ship_id)?;
        self.inputs.discard_ship(ship_id);
        self.bandwidth.forget(ship_id);
        self.batcher.discard_ship(ship_id);
        debug!("Removed ship {}", ship_id);
        self.refresh_ship_gauges();
        Some(removed)
    }

    pub fn ship(&self, ship_id: ShipId) -> Option<&NetworkedShip> {
        self.ships.get(&ship_id)
    }

    /// Position to draw for a ship this frame
    pub fn render_position(&self, ship_id: ShipId) -> Option<Vec2> {
        self.ships.get(&ship_id).map(|s| s.ship.position)
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Sequence, buffer, send and (when enabled) predict a local command.
    ///
    /// A failed send is logged and the input stays buffered; it is carried
    /// by replay once the server catches up.
    pub fn submit(&mut self, ship_id: ShipId, command: ShipCommand) -> Result<PlayerInput, SyncError> {
        match self.ships.get(&ship_id) {
            None => return Err(SyncError::UnknownShip(ship_id)),
            Some(state) if !state.is_local() => return Err(SyncError::NotLocal(ship_id)),
            Some(_) => {}
        }

        let now = self.clock.now_ms();
        let input = match self.inputs.submit(ship_id, command, now) {
            Ok(input) => input,
            Err(violation) => {
                SyncMetrics::incr(&self.metrics.inputs_rate_limited);
                debug!("Input for ship {} dropped: {}", ship_id, violation);
                return Err(violation.into());
            }
        };
        SyncMetrics::incr(&self.metrics.inputs_submitted);
        self.metrics
            .inputs_overflow_dropped
            .store(self.inputs.overflow_dropped(), Ordering::Relaxed);

        let message = ClientMessage::ShipInput(input.to_payload(self.config.compression_enabled));
        match self.channel.send(&message) {
            Ok(bytes) => {
                self.metrics
                    .bytes_sent
                    .fetch_add(bytes as u64, Ordering::Relaxed);
            }
            Err(e) => {
                SyncMetrics::incr(&self.metrics.input_send_failures);
                warn!("Failed to send input #{}: {} (kept for replay)", input.sequence, e);
            }
        }

        if self.config.prediction_enabled {
            if let Some(state) = self.ships.get_mut(&ship_id) {
                state.apply_local(&input.command);
                if state.ship.is_moving() {
                    state.phase = SyncPhase::Predicting;
                }
            }
        }

        Ok(input)
    }

    pub fn pending_inputs(&self) -> usize {
        self.inputs.pending_count()
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Apply one server message as if it arrived now
    pub fn handle_message(&mut self, message: ServerMessage) {
        let received_at = self.clock.now_ms();
        self.apply_inbound(Inbound {
            message,
            received_at,
        });
    }

    fn apply_inbound(&mut self, inbound: Inbound) {
        match inbound.message {
            ServerMessage::ShipPositionUpdate(update) => {
                self.apply_update(&update, inbound.received_at)
            }
            ServerMessage::ShipPositionBatch(updates) => {
                for update in &updates {
                    self.apply_update(update, inbound.received_at);
                }
            }
            ServerMessage::PingResponse(probe) => self.apply_ping_response(probe, inbound.received_at),
        }
    }

    fn apply_update(&mut self, update: &ShipPositionUpdate, received_at: u64) {
        let Some(state) = self.ships.get_mut(&update.ship_id) else {
            SyncMetrics::incr(&self.metrics.unknown_ship_updates);
            debug!("Dropping update for untracked ship {}", update.ship_id);
            return;
        };

        if !state.is_local() {
            state.record_server_state(update.position, update.timestamp);
            let retained = state.snapshots.insert(Snapshot {
                position: update.position,
                velocity: update.velocity,
                timestamp: update.timestamp,
            });
            if retained {
                SyncMetrics::incr(&self.metrics.snapshots_received);
                let transit = received_at.saturating_sub(update.timestamp) as f64;
                self.delay.observe_transit(transit);
            }
            return;
        }

        if !self.config.prediction_enabled {
            // Nothing predicted: follow the server
            state.record_server_state(update.position, update.timestamp);
            if update.sequence_number > state.last_processed_sequence {
                state.last_processed_sequence = update.sequence_number;
                self.inputs.acknowledge(update.sequence_number);
            }
            state.snap_to(update.position);
            return;
        }

        match self.reconciler.reconcile(state, update, &mut self.inputs) {
            ReconcileOutcome::Stale => SyncMetrics::incr(&self.metrics.stale_updates),
            ReconcileOutcome::Resynced { error } => self.metrics.record_correction(error, 0),
            ReconcileOutcome::Corrected { error, replayed } => {
                self.metrics.record_correction(error, replayed);
            }
            ReconcileOutcome::Recorded | ReconcileOutcome::WithinTolerance { .. } => {}
        }
    }

    fn apply_ping_response(&mut self, probe: PingProbe, received_at: u64) {
        if let Some(rtt) = self.latency.record_response(probe, received_at) {
            debug!("RTT sample {}ms (mean {:.1}ms)", rtt, self.latency.latency_ms());
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one fixed-rate step
    pub fn tick(&mut self) {
        let started = Instant::now();
        let now = self.clock.now_ms();
        let dt_ms = match self.last_tick_at {
            Some(last) => now.saturating_sub(last),
            None => self.config.tick_duration_ms(),
        };
        let dt = dt_ms as f64 / 1000.0;

        while let Ok(inbound) = self.inbox_rx.try_recv() {
            self.apply_inbound(inbound);
        }

        self.update_latency(now);
        self.step_ships(now, dt);

        if self.channel.is_connected() {
            self.sync_outbound(now);
        }
        if let Some(batch) = self.batcher.poll(now) {
            self.send_batch(batch);
        }

        self.last_tick_at = Some(now);
        self.tick_count += 1;
        self.refresh_gauges();
        self.metrics.record_tick_time(started.elapsed());
    }

    fn update_latency(&mut self, now: u64) {
        let was_degraded = self.latency.is_degraded();
        if self.latency.check_timeout(now) && !was_degraded {
            SyncMetrics::incr(&self.metrics.probe_timeouts);
            self.delay.observe_degraded();
        }

        if self.latency.probe_due(now) {
            let probe = self.latency.start_probe(now);
            if let Err(e) = self.channel.send(&ClientMessage::Ping(probe)) {
                debug!("Latency probe not sent: {}", e);
                SyncMetrics::incr(&self.metrics.probe_send_failures);
                let was_degraded = self.latency.is_degraded();
                self.latency.record_send_failure();
                if !was_degraded {
                    self.delay.observe_degraded();
                }
            }
        }
    }

    fn step_ships(&mut self, now: u64, dt: f64) {
        let render_time = self.render_time(now);

        for state in self.ships.values_mut() {
            if state.is_local() {
                if !self.config.prediction_enabled {
                    continue;
                }
                if self.predictor.predict(state, now, dt) == PredictionOutcome::Suppressed {
                    SyncMetrics::incr(&self.metrics.predictions_suppressed);
                }
                continue;
            }

            let sample = self
                .interpolator
                .sample(&state.snapshots, render_time, state.ship.position);
            match sample {
                Sample::Interpolated { position, t } => {
                    state.ship.position = position;
                    state.interpolation_factor = t;
                    state.phase = SyncPhase::Interpolating;
                }
                Sample::Extrapolated { position, frozen } => {
                    state.ship.position = position;
                    state.phase = SyncPhase::Extrapolating;
                    SyncMetrics::incr(&self.metrics.extrapolated_frames);
                    if frozen {
                        SyncMetrics::incr(&self.metrics.frozen_frames);
                    }
                }
                Sample::Held { position } => {
                    state.ship.position = position;
                    state.phase = SyncPhase::Buffering;
                }
                Sample::Blended { position } => {
                    state.ship.position = position;
                    state.phase = SyncPhase::Buffering;
                    SyncMetrics::incr(&self.metrics.fallback_blends);
                }
                Sample::Empty => {}
            }
        }
    }

    /// `now - clock_offset - adaptive_delay`, in server time
    pub fn render_time(&self, now: u64) -> u64 {
        let behind = self.latency.clock_offset_ms() + self.delay.delay_ms();
        now.saturating_sub(behind.round().max(0.0) as u64)
    }

    fn sync_outbound(&mut self, now: u64) {
        let local: Vec<&Ship> = self
            .ships
            .values()
            .filter(|s| s.is_local())
            .map(|s| &s.ship)
            .collect();
        let remote_positions: Vec<Vec2> = self
            .ships
            .values()
            .filter(|s| !s.is_local())
            .map(|s| s.ship.position)
            .collect();

        let priority = self.priority.select(local.iter().copied(), &remote_positions);
        let (plan, stats) = self.bandwidth.plan(
            local.iter().copied(),
            &priority,
            now,
            self.inputs.last_sequence(),
        );
        self.metrics.delta_entries_skipped.fetch_add(
            stats.ships_skipped as u64,
            Ordering::Relaxed,
        );

        match plan {
            SyncPlan::Nothing => {}
            SyncPlan::Full(sync) => {
                let message = ClientMessage::ShipFullSync(sync);
                match self.channel.send(&message) {
                    Ok(bytes) => {
                        if let ClientMessage::ShipFullSync(sync) = &message {
                            self.bandwidth.commit_full_sync(sync, now);
                        }
                        SyncMetrics::incr(&self.metrics.full_syncs_sent);
                        self.metrics
                            .bytes_sent
                            .fetch_add(bytes as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        SyncMetrics::incr(&self.metrics.sync_send_failures);
                        warn!("Full sync failed, retrying next tick: {}", e);
                    }
                }
            }
            SyncPlan::Delta(entries) if self.config.compression_enabled => {
                self.bandwidth.commit_delta(&entries);
                if let Some(batch) = self.batcher.push(entries, now) {
                    self.send_batch(batch);
                }
            }
            SyncPlan::Delta(entries) => {
                let ids: Vec<ShipId> = entries.iter().map(|e| e.id).collect();
                let count = entries.len() as u64;
                let message = ClientMessage::DeltaUpdate(DeltaUpdate {
                    kind: DeltaKind::Delta,
                    ships: entries,
                });
                match self.channel.send(&message) {
                    Ok(bytes) => {
                        if let ClientMessage::DeltaUpdate(delta) = &message {
                            self.bandwidth.commit_delta(&delta.ships);
                        }
                        SyncMetrics::incr(&self.metrics.deltas_sent);
                        self.metrics
                            .delta_entries_sent
                            .fetch_add(count, Ordering::Relaxed);
                        self.metrics
                            .bytes_sent
                            .fetch_add(bytes as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        SyncMetrics::incr(&self.metrics.sync_send_failures);
                        warn!("Delta update failed: {}", e);
                        self.bandwidth.invalidate(ids);
                    }
                }
            }
        }
    }

    fn send_batch(&mut self, batch: BatchUpdate) {
        let ids: Vec<ShipId> = batch.updates.iter().map(|e| e.id).collect();
        let count = ids.len() as u64;
        match self.channel.send(&ClientMessage::BatchUpdate(batch)) {
            Ok(bytes) => {
                SyncMetrics::incr(&self.metrics.batches_sent);
                self.metrics
                    .delta_entries_sent
                    .fetch_add(count, Ordering::Relaxed);
                self.metrics
                    .bytes_sent
                    .fetch_add(bytes as u64, Ordering::Relaxed);
            }
            Err(e) => {
                SyncMetrics::incr(&self.metrics.sync_send_failures);
                warn!("Batch update of {} ships failed: {}", count, e);
                self.bandwidth.invalidate(ids);
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn latency_ms(&self) -> f64 {
        self.latency.latency_ms()
    }

    pub fn is_degraded(&self) -> bool {
        self.latency.is_degraded()
    }

    pub fn interpolation_delay_ms(&self) -> f64 {
        self.delay.delay_ms()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn refresh_ship_gauges(&self) {
        let local = self.ships.values().filter(|s| s.is_local()).count() as u64;
        self.metrics.local_ships.store(local, Ordering::Relaxed);
        self.metrics
            .remote_ships
            .store(self.ships.len() as u64 - local, Ordering::Relaxed);
    }

    fn refresh_gauges(&self) {
        self.metrics
            .pending_inputs
            .store(self.inputs.pending_count() as u64, Ordering::Relaxed);
        self.metrics
            .interpolation_delay_ms
            .store(self.delay.delay_ms().round() as u64, Ordering::Relaxed);
        self.metrics
            .latency_ms
            .store(self.latency.latency_ms().round() as u64, Ordering::Relaxed);
        self.metrics
            .network_degraded
            .store(u64::from(self.latency.is_degraded()), Ordering::Relaxed);
    }

    /// Unsubscribe from the channel and drop all buffered state
    pub fn teardown(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.channel.unsubscribe(id);
        }
        while self.inbox_rx.try_recv().is_ok() {}
        self.ships.clear();
        self.inputs.clear();
        self.batcher.clear();
        self.bandwidth.reset();
        self.latency.reset();
        self.delay.reset();
        self.last_tick_at = None;
        self.refresh_ship_gauges();
        info!("Sync manager torn down after {} ticks", self.tick_count);
    }
}

/// Channel handler that copies messages into the tick owner's inbox
fn forward_to_inbox(
    inbox: Sender<Inbound>,
    clock: Arc<dyn Clock>,
) -> impl Fn(&ServerMessage) + Send + Sync + 'static {
    move |message| {
        let inbound = Inbound {
            message: message.clone(),
            received_at: clock.now_ms(),
        };
        match inbox.try_send(inbound) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Sync inbox full, dropping {:?}", message.kind()),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

// ============================================================================
// Async drivers
// ============================================================================

/// Feed transport payloads into the channel's dispatch table
pub fn spawn_channel_reader(
    channel: Arc<ChannelManager>,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = inbound.recv().await {
            // Decode errors are logged and counted by the channel
            let _ = channel.receive(&text);
        }
        debug!("Channel inbound stream closed");
    })
}

/// Start the fixed-rate client tick
pub fn start_client_loop(manager: Arc<Mutex<SyncManager>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick_ms = manager.lock().config.tick_duration_ms();
        let mut ticker = interval(Duration::from_millis(tick_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Client loop started at {}ms per tick", tick_ms);
        loop {
            ticker.tick().await;
            manager.lock().tick();
        }
    })
}
