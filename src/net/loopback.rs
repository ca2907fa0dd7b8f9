//! In-process transport with simulated link conditions.
//!
//! Each direction is a tokio channel. Sends roll for loss, then deliver after
//! `latency ± jitter` on a spawned task, so messages can arrive out of order
//! the way they would over an unreliable datagram link.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::trace;

use crate::net::channel::{Transport, TransportError};

/// Simulated one-way link behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConditions {
    pub latency_ms: u64,
    pub jitter_ms: u64,
    /// Probability in [0, 1] that a message is silently dropped
    pub loss: f64,
}

impl LinkConditions {
    pub const PERFECT: Self = Self {
        latency_ms: 0,
        jitter_ms: 0,
        loss: 0.0,
    };

    pub fn new(latency_ms: u64, jitter_ms: u64, loss: f64) -> Self {
        Self {
            latency_ms,
            jitter_ms,
            loss: loss.clamp(0.0, 1.0),
        }
    }

    fn sample_delay(&self, rng: &mut impl Rng) -> u64 {
        if self.jitter_ms == 0 {
            return self.latency_ms;
        }
        let lo = self.latency_ms.saturating_sub(self.jitter_ms);
        let hi = self.latency_ms + self.jitter_ms;
        rng.gen_range(lo..=hi)
    }
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// Sending half of a loopback link
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    conditions: LinkConditions,
    open: Arc<AtomicBool>,
    dropped: AtomicU64,
}

/// Create a one-way link. The receiver yields delivered payloads.
pub fn link(conditions: LinkConditions) -> (LoopbackTransport, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx,
            conditions,
            open: Arc::new(AtomicBool::new(true)),
            dropped: AtomicU64::new(0),
        },
        rx,
    )
}

impl LoopbackTransport {
    /// Stop accepting sends; in-flight messages are still delivered
    pub fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    /// Resume after `close`
    pub fn reopen(&self) {
        self.open.store(true, Ordering::Relaxed);
    }

    /// Messages lost to simulated loss
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let (lost, delay_ms) = {
            let mut rng = rand::thread_rng();
            let lost = self.conditions.loss > 0.0 && rng.gen_bool(self.conditions.loss);
            (lost, self.conditions.sample_delay(&mut rng))
        };
        if lost {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Loopback dropped {} bytes", payload.len());
            return Ok(());
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if delay_ms > 0 => {
                let tx = self.tx.clone();
                handle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = tx.send(payload);
                });
                Ok(())
            }
            _ => self
                .tx
                .send(payload)
                .map_err(|_| TransportError::Closed),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_perfect_link_delivers_in_order() {
        let (transport, mut rx) = link(LinkConditions::PERFECT);
        assert_ok!(transport.send("a".into()));
        assert_ok!(transport.send("b".into()));
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_delivery() {
        let (transport, mut rx) = link(LinkConditions::new(100, 0, 0.0));
        transport.send("late".into()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rx.recv().await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_total_loss_drops_everything() {
        let (transport, mut rx) = link(LinkConditions::new(0, 0, 1.0));
        for _ in 0..10 {
            transport.send("x".into()).unwrap();
        }
        assert_eq!(transport.dropped(), 10);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_link_refuses_sends() {
        let (transport, _rx) = link(LinkConditions::PERFECT);
        transport.close();
        assert_eq!(transport.send("x".into()), Err(TransportError::Closed));
        transport.reopen();
        assert!(transport.send("x".into()).is_ok());
    }

    #[test]
    fn test_receiver_dropped_closes_link() {
        let (transport, rx) = link(LinkConditions::PERFECT);
        drop(rx);
        assert!(!transport.is_open());
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let conditions = LinkConditions::new(50, 20, 0.0);
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let d = conditions.sample_delay(&mut rng);
            assert!((30..=70).contains(&d));
        }
    }
}
