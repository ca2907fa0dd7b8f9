//! Authority server - owns ground truth and broadcasts it to clients
//!
//! Client inputs are applied in sequence order per client, ship journeys are
//! advanced on a fixed tick, and every few ticks the state of every ship is
//! broadcast as one `ship_position_batch`. Each entry carries the last input
//! sequence the server applied for the ship's owner, which is what clients
//! reconcile against.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::fleet::constants::reconciliation::MIN_CORRECTION_DISTANCE;
use crate::fleet::constants::tick;
use crate::fleet::motion;
use crate::fleet::ship::{Ship, ShipId};
use crate::net::channel::Transport;
use crate::net::protocol::{
    decode, encode, ClientMessage, DecodeError, DeltaShip, PlayerInput, ServerMessage,
    ShipFullSync, ShipPositionUpdate,
};
use crate::util::clock::Clock;
use crate::util::vec2::Vec2;

pub type ClientId = u64;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Unknown client {0}")]
    UnknownClient(ClientId),
    #[error("Unknown ship {0}")]
    UnknownShip(ShipId),
    #[error("Client {client} does not own ship {ship}")]
    NotOwner { client: ClientId, ship: ShipId },
}

/// A connected client
struct ClientSlot {
    transport: Arc<dyn Transport>,
    /// Highest input sequence applied for this client
    last_sequence: u64,
}

struct OwnedShip {
    ship: Ship,
    owner: ClientId,
}

/// Counters for the server side
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub inputs_applied: u64,
    pub inputs_duplicate: u64,
    pub inputs_rejected: u64,
    pub pings_answered: u64,
    pub ships_registered: u64,
    pub divergent_reports: u64,
    pub broadcasts: u64,
    pub broadcast_failures: u64,
}

pub struct AuthorityServer {
    clock: Arc<dyn Clock>,
    clients: FxHashMap<ClientId, ClientSlot>,
    ships: FxHashMap<ShipId, OwnedShip>,
    next_client: ClientId,
    tick: u64,
    tick_duration_ms: u64,
    snapshot_every_ticks: u64,
    divergence_threshold: f64,
    stats: ServerStats,
}

impl AuthorityServer {
    pub fn new(clock: Arc<dyn Clock>, tick_rate: u32) -> Self {
        Self {
            clock,
            clients: FxHashMap::default(),
            ships: FxHashMap::default(),
            next_client: 1,
            tick: 0,
            tick_duration_ms: 1000 / u64::from(tick_rate.max(1)),
            snapshot_every_ticks: tick::SNAPSHOT_EVERY_TICKS,
            divergence_threshold: MIN_CORRECTION_DISTANCE,
            stats: ServerStats::default(),
        }
    }

    pub fn add_client(&mut self, transport: Arc<dyn Transport>) -> ClientId {
        let id = self.next_client;
        self.next_client += 1;
        self.clients.insert(
            id,
            ClientSlot {
                transport,
                last_sequence: 0,
            },
        );
        info!("Client {} connected", id);
        id
    }

    /// Drop a client and every ship it owned
    pub fn remove_client(&mut self, client: ClientId) {
        if self.clients.remove(&client).is_some() {
            self.ships.retain(|_, s| s.owner != client);
            info!("Client {} disconnected", client);
        }
    }

    /// Register a ship owned by `owner` directly on the server
    pub fn spawn_ship(&mut self, owner: ClientId, ship: Ship) -> Result<(), ServerError> {
        if !self.clients.contains_key(&owner) {
            return Err(ServerError::UnknownClient(owner));
        }
        debug!("Ship {} registered for client {}", ship.id, owner);
        self.ships.insert(ship.id, OwnedShip { ship, owner });
        self.stats.ships_registered += 1;
        Ok(())
    }

    pub fn ship(&self, id: ShipId) -> Option<&Ship> {
        self.ships.get(&id).map(|s| &s.ship)
    }

    pub fn last_sequence(&self, client: ClientId) -> Option<u64> {
        self.clients.get(&client).map(|c| c.last_sequence)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Decode and handle one message from a client
    pub fn handle_message(&mut self, client: ClientId, text: &str) -> Result<(), ServerError> {
        if !self.clients.contains_key(&client) {
            return Err(ServerError::UnknownClient(client));
        }
        let message: ClientMessage = decode(text)?;
        match message {
            ClientMessage::ShipInput(payload) => {
                let input = payload.into_input()?;
                self.apply_input(client, input)
            }
            ClientMessage::Ping(probe) => {
                self.stats.pings_answered += 1;
                self.send_to(client, &ServerMessage::PingResponse(probe));
                Ok(())
            }
            ClientMessage::ShipFullSync(sync) => {
                self.absorb_full_sync(client, sync);
                Ok(())
            }
            ClientMessage::DeltaUpdate(delta) => {
                self.check_reports(client, &delta.ships);
                Ok(())
            }
            ClientMessage::BatchUpdate(batch) => {
                self.check_reports(client, &batch.updates);
                Ok(())
            }
        }
    }

    /// Apply one input. Inputs at or below the client's last applied
    /// sequence are duplicates and ignored; gaps are accepted.
    pub fn apply_input(&mut self, client: ClientId, input: PlayerInput) -> Result<(), ServerError> {
        let slot = self
            .clients
            .get_mut(&client)
            .ok_or(ServerError::UnknownClient(client))?;
        if input.sequence <= slot.last_sequence {
            self.stats.inputs_duplicate += 1;
            return Ok(());
        }

        let Some(owned) = self.ships.get_mut(&input.ship_id) else {
            self.stats.inputs_rejected += 1;
            return Err(ServerError::UnknownShip(input.ship_id));
        };
        if owned.owner != client {
            self.stats.inputs_rejected += 1;
            warn!(
                "Client {} sent input for ship {} it does not own",
                client, input.ship_id
            );
            return Err(ServerError::NotOwner {
                client,
                ship: input.ship_id,
            });
        }

        input.command.apply(&mut owned.ship);
        slot.last_sequence = input.sequence;
        self.stats.inputs_applied += 1;
        Ok(())
    }

    /// Register ships the server has not seen; known ships stay authoritative
    fn absorb_full_sync(&mut self, client: ClientId, sync: ShipFullSync) {
        for state in sync.ships {
            match self.ships.get(&state.id) {
                None => {
                    let mut ship = Ship::new(state.id, state.position);
                    ship.status = state.status;
                    ship.destination = state.destination;
                    ship.cargo = state.cargo;
                    self.ships.insert(ship.id, OwnedShip { ship, owner: client });
                    self.stats.ships_registered += 1;
                    debug!("Ship {} registered from full sync of client {}", state.id, client);
                }
                Some(owned) if owned.owner != client => {
                    warn!("Client {} reported ship {} owned by {}", client, state.id, owned.owner);
                }
                Some(owned) => {
                    if owned.ship.position.distance_to(state.position) > self.divergence_threshold {
                        self.stats.divergent_reports += 1;
                    }
                }
            }
        }
    }

    fn check_reports(&mut self, client: ClientId, entries: &[DeltaShip]) {
        for entry in entries {
            if let Some(owned) = self.ships.get(&entry.id) {
                if owned.owner == client
                    && owned.ship.position.distance_to(entry.position()) > self.divergence_threshold
                {
                    self.stats.divergent_reports += 1;
                    debug!(
                        "Ship {} reported {:.2} units from authoritative state",
                        entry.id,
                        owned.ship.position.distance_to(entry.position())
                    );
                }
            }
        }
    }

    /// Advance the simulation one tick. Returns the batch broadcast this
    /// tick, if any.
    pub fn tick(&mut self) -> Option<Vec<ShipPositionUpdate>> {
        let dt = self.tick_duration_ms as f64 / 1000.0;
        for owned in self.ships.values_mut() {
            if !owned.ship.position.is_finite() {
                warn!("Fixed non-finite position for ship {}", owned.ship.id);
                owned.ship.position = Vec2::ZERO;
            }
            motion::advance(&mut owned.ship, dt);
        }
        self.tick += 1;

        if self.tick % self.snapshot_every_ticks != 0 {
            return None;
        }
        let batch = self.snapshot();
        if !batch.is_empty() {
            self.broadcast(&ServerMessage::ShipPositionBatch(batch.clone()));
        }
        Some(batch)
    }

    /// Authoritative state of every ship, stamped with server time
    pub fn snapshot(&self) -> Vec<ShipPositionUpdate> {
        let now = self.clock.now_ms();
        self.ships
            .values()
            .map(|owned| ShipPositionUpdate {
                ship_id: owned.ship.id,
                position: owned.ship.position,
                velocity: motion::velocity_from(&owned.ship, owned.ship.position),
                timestamp: now,
                sequence_number: self
                    .clients
                    .get(&owned.owner)
                    .map_or(0, |c| c.last_sequence),
            })
            .collect()
    }

    /// Send one message to every client
    pub fn broadcast(&mut self, message: &ServerMessage) {
        let encoded = match encode(message) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode message for broadcast: {}", e);
                return;
            }
        };
        self.stats.broadcasts += 1;
        for (client, slot) in &self.clients {
            if let Err(e) = slot.transport.send(encoded.clone()) {
                self.stats.broadcast_failures += 1;
                debug!("Broadcast to {}: {}", client, e);
            }
        }
    }

    fn send_to(&self, client: ClientId, message: &ServerMessage) {
        let Some(slot) = self.clients.get(&client) else {
            return;
        };
        match encode(message) {
            Ok(data) => {
                if let Err(e) = slot.transport.send(data) {
                    debug!("Send to {}: {}", client, e);
                }
            }
            Err(e) => warn!("Failed to encode message for {}: {}", client, e),
        }
    }
}

/// Feed one client's inbound messages into the server
pub fn spawn_client_reader(
    server: Arc<Mutex<AuthorityServer>>,
    client: ClientId,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = inbound.recv().await {
            if let Err(e) = server.lock().handle_message(client, &text) {
                debug!("Client {} message rejected: {}", client, e);
            }
        }
        debug!("Client {} inbound stream closed", client);
    })
}

/// Start the fixed-rate server loop
pub fn start_server_loop(server: Arc<Mutex<AuthorityServer>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick_ms = server.lock().tick_duration_ms;
        let mut ticker = interval(Duration::from_millis(tick_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Server loop started at {}ms per tick", tick_ms);
        loop {
            ticker.tick().await;
            let mut guard = server.lock();
            guard.tick();

            // Log stats periodically (every 30 seconds)
            if guard.tick % (30_000 / tick_ms.max(1)) == 0 {
                info!(
                    "Server: tick {}, {} clients, {} ships | inputs {} applied, {} rejected",
                    guard.tick,
                    guard.clients.len(),
                    guard.ships.len(),
                    guard.stats.inputs_applied,
                    guard.stats.inputs_rejected
                );
            }
        }
    })
}
