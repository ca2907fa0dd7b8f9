//! Input sequencing and the unacknowledged input buffer.
//!
//! Accepted inputs get the next sequence number and stay buffered until an
//! authoritative update acknowledges a sequence number at or above theirs.
//! The buffer is capped; during a long disconnect the oldest inputs are
//! dropped first so memory stays bounded and the newest intent survives.

use std::collections::VecDeque;

use tracing::warn;

use crate::fleet::command::ShipCommand;
use crate::fleet::ship::ShipId;
use crate::net::protocol::PlayerInput;
use crate::sync::rate_limit::{InputRateLimiter, RateLimitViolation};

#[derive(Debug)]
pub struct InputSequencer {
    next_sequence: u64,
    limiter: InputRateLimiter,
    unacked: VecDeque<PlayerInput>,
    max_unacked: usize,
    overflow_dropped: u64,
}

impl InputSequencer {
    pub fn new(rate_limit: u32, max_unacked: usize) -> Self {
        Self {
            next_sequence: 1,
            limiter: InputRateLimiter::new(rate_limit),
            unacked: VecDeque::with_capacity(max_unacked.min(64)),
            max_unacked: max_unacked.max(1),
            overflow_dropped: 0,
        }
    }

    /// Rate-check, sequence and buffer an input.
    ///
    /// Returns the sequenced input; rejected inputs consume no sequence number.
    pub fn submit(
        &mut self,
        ship_id: ShipId,
        command: ShipCommand,
        now_ms: u64,
    ) -> Result<PlayerInput, RateLimitViolation> {
        self.limiter.check(now_ms)?;

        let input = PlayerInput {
            ship_id,
            command,
            timestamp: now_ms,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        if self.unacked.len() >= self.max_unacked {
            if let Some(dropped) = self.unacked.pop_front() {
                self.overflow_dropped += 1;
                warn!(
                    "Unacknowledged input buffer full ({}), dropping input #{}",
                    self.max_unacked, dropped.sequence
                );
            }
        }
        self.unacked.push_back(input.clone());

        Ok(input)
    }

    /// Discard every input with sequence <= `sequence`. Returns how many.
    pub fn acknowledge(&mut self, sequence: u64) -> usize {
        let before = self.unacked.len();
        // Sequences are pushed in increasing order
        while self
            .unacked
            .front()
            .is_some_and(|input| input.sequence <= sequence)
        {
            self.unacked.pop_front();
        }
        before - self.unacked.len()
    }

    /// Unacknowledged inputs in original application order
    pub fn pending(&self) -> impl Iterator<Item = &PlayerInput> {
        self.unacked.iter()
    }

    /// Unacknowledged inputs for one ship, in order
    pub fn pending_for(&self, ship_id: ShipId) -> impl Iterator<Item = &PlayerInput> {
        self.unacked.iter().filter(move |i| i.ship_id == ship_id)
    }

    /// Drop a ship's inputs captured more than `timeout_ms` before
    /// `server_time`. Returns how many were dropped.
    pub fn expire_unconfirmed(&mut self, ship_id: ShipId, server_time: u64, timeout_ms: u64) -> usize {
        let before = self.unacked.len();
        self.unacked.retain(|i| {
            i.ship_id != ship_id || i.timestamp.saturating_add(timeout_ms) >= server_time
        });
        before - self.unacked.len()
    }

    pub fn pending_count(&self) -> usize {
        self.unacked.len()
    }

    /// Highest sequence number handed out so far (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped
    }

    pub fn rate_limited(&self) -> u64 {
        self.limiter.dropped()
    }

    /// Forget inputs for a ship that is no longer tracked
    pub fn discard_ship(&mut self, ship_id: ShipId) {
        self.unacked.retain(|i| i.ship_id != ship_id);
    }

    /// Drop all buffered inputs. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.unacked.clear();
    }
}
