//! Round-trip latency estimation from ping probes.
//!
//! Keeps a rolling window of RTT samples. The mean is the reported latency and
//! half of it is the one-way clock offset used to place render time. A failed
//! or unanswered probe flips the estimator into a degraded state that reports
//! a sentinel value until the next response arrives.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::fleet::constants::latency::{
    PROBE_INTERVAL_MS, PROBE_TIMEOUT_MS, SAMPLE_WINDOW, SENTINEL_MS,
};
use crate::net::protocol::PingProbe;

#[derive(Debug)]
pub struct LatencyEstimator {
    samples: VecDeque<u64>,
    window: usize,
    average_ms: f64,
    /// Send time of the probe we are waiting on
    outstanding: Option<u64>,
    last_probe_at: Option<u64>,
    probe_interval_ms: u64,
    timeout_ms: u64,
    degraded: bool,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self::with_window(SAMPLE_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            average_ms: 0.0,
            outstanding: None,
            last_probe_at: None,
            probe_interval_ms: PROBE_INTERVAL_MS,
            timeout_ms: PROBE_TIMEOUT_MS,
            degraded: false,
        }
    }

    /// Whether the fixed probe cadence calls for a new ping
    pub fn probe_due(&self, now_ms: u64) -> bool {
        match self.last_probe_at {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.probe_interval_ms,
        }
    }

    /// Build the next probe and remember when it left.
    ///
    /// A still-outstanding older probe is superseded: responses echo their own
    /// send time, so a late answer to it still yields a valid sample.
    pub fn start_probe(&mut self, now_ms: u64) -> PingProbe {
        self.last_probe_at = Some(now_ms);
        if self.outstanding.is_none() {
            self.outstanding = Some(now_ms);
        }
        PingProbe {
            client_time: now_ms,
        }
    }

    /// Record a probe that could not be sent
    pub fn record_send_failure(&mut self) {
        if !self.degraded {
            warn!("Latency probe send failed, reporting degraded network");
        }
        self.degraded = true;
        self.outstanding = None;
    }

    /// Flag degradation if the oldest outstanding probe is overdue.
    ///
    /// Returns true when the estimator is (now) degraded.
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        if let Some(sent) = self.outstanding {
            if now_ms.saturating_sub(sent) > self.timeout_ms {
                if !self.degraded {
                    warn!(
                        "Latency probe unanswered for {}ms, reporting degraded network",
                        now_ms.saturating_sub(sent)
                    );
                }
                self.degraded = true;
                self.outstanding = None;
            }
        }
        self.degraded
    }

    /// Handle a `ping_response`. Returns the RTT sample in ms.
    pub fn record_response(&mut self, probe: PingProbe, now_ms: u64) -> Option<u64> {
        if probe.client_time > now_ms {
            debug!("Ignoring ping response from the future ({})", probe.client_time);
            return None;
        }
        let rtt = now_ms - probe.client_time;

        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);

        let sum: u64 = self.samples.iter().sum();
        self.average_ms = sum as f64 / self.samples.len() as f64;
        self.outstanding = None;
        self.degraded = false;

        Some(rtt)
    }

    /// Current latency (mean RTT), or the sentinel while degraded
    pub fn latency_ms(&self) -> f64 {
        if self.degraded {
            SENTINEL_MS
        } else {
            self.average_ms
        }
    }

    /// Estimated one-way offset to server time.
    ///
    /// Uses the last good mean even while degraded; the sentinel is a signal,
    /// not a measurement.
    pub fn clock_offset_ms(&self) -> f64 {
        self.average_ms / 2.0
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.average_ms = 0.0;
        self.outstanding = None;
        self.last_probe_at = None;
        self.degraded = false;
    }
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn respond(est: &mut LatencyEstimator, sent: u64, rtt: u64) {
        let probe = est.start_probe(sent);
        est.record_response(probe, sent + rtt);
    }

    #[test]
    fn test_average_and_offset() {
        let mut est = LatencyEstimator::new();
        respond(&mut est, 0, 40);
        respond(&mut est, 1000, 60);
        assert_eq!(est.latency_ms(), 50.0);
        assert_eq!(est.clock_offset_ms(), 25.0);
    }

    #[test]
    fn test_rolling_window_drops_oldest() {
        let mut est = LatencyEstimator::with_window(3);
        for (i, rtt) in [1000, 10, 20, 30].into_iter().enumerate() {
            respond(&mut est, i as u64 * 1000, rtt);
        }
        assert_eq!(est.sample_count(), 3);
        assert_eq!(est.latency_ms(), 20.0);
    }

    #[test]
    fn test_probe_cadence() {
        let mut est = LatencyEstimator::new();
        assert!(est.probe_due(0));
        est.start_probe(0);
        assert!(!est.probe_due(999));
        assert!(est.probe_due(1000));
    }

    #[test]
    fn test_send_failure_reports_sentinel() {
        let mut est = LatencyEstimator::new();
        respond(&mut est, 0, 30);
        est.record_send_failure();
        assert!(est.is_degraded());
        assert_eq!(est.latency_ms(), SENTINEL_MS);
        // Offset keeps the last good estimate
        assert_eq!(est.clock_offset_ms(), 15.0);
    }

    #[test]
    fn test_timeout_reports_sentinel_then_recovers() {
        let mut est = LatencyEstimator::new();
        est.start_probe(0);
        assert!(!est.check_timeout(PROBE_TIMEOUT_MS));
        assert!(est.check_timeout(PROBE_TIMEOUT_MS + 1));
        assert_eq!(est.latency_ms(), SENTINEL_MS);

        respond(&mut est, 5000, 20);
        assert!(!est.is_degraded());
        assert_eq!(est.latency_ms(), 20.0);
    }

    #[test]
    fn test_future_response_ignored() {
        let mut est = LatencyEstimator::new();
        assert!(est
            .record_response(PingProbe { client_time: 500 }, 100)
            .is_none());
        assert_eq!(est.sample_count(), 0);
    }
}
