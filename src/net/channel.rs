//! Message channel between a client and the authority server.
//!
//! The channel is constructed explicitly and handed to whoever needs it.
//! Outbound messages are encoded and passed to a [`Transport`]; inbound text
//! is decoded and dispatched to the handlers subscribed for its kind.
//! Handlers run on the receive path and must not touch ship state directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::net::protocol::{
    decode, encode, ClientMessage, DecodeError, EncodeError, ServerMessage, ServerMessageKind,
};

/// Fire-and-forget text transport
pub trait Transport: Send + Sync {
    fn send(&self, payload: String) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Transport send failed: {0}")]
    SendFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel not connected")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connected,
}

/// Handle returned by [`ChannelManager::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Handler = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

#[derive(Default)]
struct DispatchTable {
    handlers: FxHashMap<ServerMessageKind, Vec<(SubscriptionId, Handler)>>,
}

/// Traffic counters for one channel
#[derive(Debug, Default)]
pub struct ChannelStats {
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub decode_failures: AtomicU64,
}

pub struct ChannelManager {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    table: RwLock<DispatchTable>,
    next_subscription: AtomicU64,
    stats: ChannelStats,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            transport: RwLock::new(None),
            table: RwLock::new(DispatchTable::default()),
            next_subscription: AtomicU64::new(1),
            stats: ChannelStats::default(),
        }
    }

    /// Attach a transport. Replaces any previous one.
    pub fn connect(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
        info!("Channel connected");
    }

    /// Detach the transport. Subscriptions are kept.
    pub fn disconnect(&self) {
        if self.transport.write().take().is_some() {
            info!("Channel disconnected");
        }
    }

    pub fn state(&self) -> ChannelState {
        match &*self.transport.read() {
            Some(t) if t.is_open() => ChannelState::Connected,
            _ => ChannelState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Encode and send. Returns the encoded size in bytes.
    pub fn send(&self, message: &ClientMessage) -> Result<usize, ChannelError> {
        let transport = self.transport.read().clone();
        let Some(transport) = transport.filter(|t| t.is_open()) else {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            return Err(ChannelError::NotConnected);
        };

        let encoded = encode(message)?;
        let len = encoded.len();
        if let Err(e) = transport.send(encoded) {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        debug!("Sent {} ({} bytes)", message.kind_name(), len);
        Ok(len)
    }

    pub fn subscribe<F>(&self, kind: ServerMessageKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.table
            .write()
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.write();
        let mut removed = false;
        for handlers in table.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(sid, _)| *sid != id);
            removed |= handlers.len() != before;
        }
        table.handlers.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.table.read().handlers.values().map(Vec::len).sum()
    }

    /// Run every handler registered for the message's kind. Returns how many ran.
    pub fn dispatch(&self, message: &ServerMessage) -> usize {
        // Snapshot the handler list so handlers may (un)subscribe
        let handlers: Vec<Handler> = match self.table.read().handlers.get(&message.kind()) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => Vec::new(),
        };
        if handlers.is_empty() {
            debug!("No handler for {:?}", message.kind());
        }
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Decode inbound text and dispatch it
    pub fn receive(&self, text: &str) -> Result<usize, DecodeError> {
        self.stats
            .bytes_received
            .fetch_add(text.len() as u64, Ordering::Relaxed);
        let message: ServerMessage = match decode(text) {
            Ok(m) => m,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping undecodable server message: {}", e);
                return Err(e);
            }
        };
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        Ok(self.dispatch(&message))
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
