//! Prometheus-compatible sync metrics
//!
//! Every degraded-path decision of the sync layer (dropped inputs, stale
//! updates, extrapolation, probe timeouts, failed sends) is counted here.
//! Default endpoint: http://localhost:9090/metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics_server")]
use std::sync::Arc;
#[cfg(feature = "metrics_server")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(feature = "metrics_server")]
use tokio::net::TcpListener;
#[cfg(feature = "metrics_server")]
use tracing::{debug, info};

/// Metrics registry for one sync participant
#[derive(Debug)]
pub struct SyncMetrics {
    // Tick
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    // Ships
    pub local_ships: AtomicU64,
    pub remote_ships: AtomicU64,
    pub unknown_ship_updates: AtomicU64,

    // Inputs
    pub inputs_submitted: AtomicU64,
    pub inputs_rate_limited: AtomicU64,
    pub inputs_overflow_dropped: AtomicU64,
    pub input_send_failures: AtomicU64,
    pub pending_inputs: AtomicU64,

    // Prediction / reconciliation
    pub predictions_suppressed: AtomicU64,
    pub reconciliations: AtomicU64,
    pub inputs_replayed: AtomicU64,
    pub stale_updates: AtomicU64,
    /// Last correction distance, stored x1000
    pub last_correction_milli: AtomicU64,

    // Interpolation
    pub snapshots_received: AtomicU64,
    pub extrapolated_frames: AtomicU64,
    pub frozen_frames: AtomicU64,
    pub fallback_blends: AtomicU64,
    pub interpolation_delay_ms: AtomicU64,

    // Latency
    pub latency_ms: AtomicU64,
    pub network_degraded: AtomicU64,
    pub probe_timeouts: AtomicU64,
    pub probe_send_failures: AtomicU64,

    // Bandwidth
    pub full_syncs_sent: AtomicU64,
    pub deltas_sent: AtomicU64,
    pub batches_sent: AtomicU64,
    pub delta_entries_sent: AtomicU64,
    pub delta_entries_skipped: AtomicU64,
    pub sync_send_failures: AtomicU64,
    pub bytes_sent: AtomicU64,

    start_time: Instant,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            local_ships: AtomicU64::new(0),
            remote_ships: AtomicU64::new(0),
            unknown_ship_updates: AtomicU64::new(0),
            inputs_submitted: AtomicU64::new(0),
            inputs_rate_limited: AtomicU64::new(0),
            inputs_overflow_dropped: AtomicU64::new(0),
            input_send_failures: AtomicU64::new(0),
            pending_inputs: AtomicU64::new(0),
            predictions_suppressed: AtomicU64::new(0),
            reconciliations: AtomicU64::new(0),
            inputs_replayed: AtomicU64::new(0),
            stale_updates: AtomicU64::new(0),
            last_correction_milli: AtomicU64::new(0),
            snapshots_received: AtomicU64::new(0),
            extrapolated_frames: AtomicU64::new(0),
            frozen_frames: AtomicU64::new(0),
            fallback_blends: AtomicU64::new(0),
            interpolation_delay_ms: AtomicU64::new(0),
            latency_ms: AtomicU64::new(0),
            network_degraded: AtomicU64::new(0),
            probe_timeouts: AtomicU64::new(0),
            probe_send_failures: AtomicU64::new(0),
            full_syncs_sent: AtomicU64::new(0),
            deltas_sent: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            delta_entries_sent: AtomicU64::new(0),
            delta_entries_skipped: AtomicU64::new(0),
            sync_send_failures: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter by one
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_time_max_us.fetch_max(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_correction(&self, error: f64, replayed: usize) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        self.inputs_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
        self.last_correction_milli
            .store((error * 1000.0).round() as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("fleet_sync_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("fleet_sync_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("fleet_sync_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));

        metric!("fleet_sync_ships_local", "Locally owned ships", "gauge",
            self.local_ships.load(Ordering::Relaxed));
        metric!("fleet_sync_ships_remote", "Remote ships being interpolated", "gauge",
            self.remote_ships.load(Ordering::Relaxed));
        metric!("fleet_sync_unknown_ship_updates_total", "Updates dropped for untracked ships", "counter",
            self.unknown_ship_updates.load(Ordering::Relaxed));

        metric!("fleet_sync_inputs_submitted_total", "Inputs accepted and sequenced", "counter",
            self.inputs_submitted.load(Ordering::Relaxed));
        metric!("fleet_sync_inputs_rate_limited_total", "Inputs dropped by the rate limit", "counter",
            self.inputs_rate_limited.load(Ordering::Relaxed));
        metric!("fleet_sync_inputs_overflow_dropped_total", "Unacknowledged inputs dropped at the cap", "counter",
            self.inputs_overflow_dropped.load(Ordering::Relaxed));
        metric!("fleet_sync_input_send_failures_total", "Inputs whose send failed", "counter",
            self.input_send_failures.load(Ordering::Relaxed));
        metric!("fleet_sync_inputs_pending", "Unacknowledged inputs", "gauge",
            self.pending_inputs.load(Ordering::Relaxed));

        metric!("fleet_sync_predictions_suppressed_total", "Prediction steps skipped past the horizon", "counter",
            self.predictions_suppressed.load(Ordering::Relaxed));
        metric!("fleet_sync_reconciliations_total", "Corrections applied", "counter",
            self.reconciliations.load(Ordering::Relaxed));
        metric!("fleet_sync_inputs_replayed_total", "Inputs replayed after corrections", "counter",
            self.inputs_replayed.load(Ordering::Relaxed));
        metric!("fleet_sync_stale_updates_total", "Updates at or below the last processed sequence", "counter",
            self.stale_updates.load(Ordering::Relaxed));
        metric!("fleet_sync_last_correction_millis", "Last correction distance (x1000)", "gauge",
            self.last_correction_milli.load(Ordering::Relaxed));

        metric!("fleet_sync_snapshots_received_total", "Snapshots buffered for remote ships", "counter",
            self.snapshots_received.load(Ordering::Relaxed));
        metric!("fleet_sync_extrapolated_frames_total", "Remote renders past the newest snapshot", "counter",
            self.extrapolated_frames.load(Ordering::Relaxed));
        metric!("fleet_sync_frozen_frames_total", "Remote renders frozen at the extrapolation cap", "counter",
            self.frozen_frames.load(Ordering::Relaxed));
        metric!("fleet_sync_fallback_blends_total", "Remote renders with fewer than two snapshots", "counter",
            self.fallback_blends.load(Ordering::Relaxed));
        metric!("fleet_sync_interpolation_delay_milliseconds", "Current adaptive interpolation delay", "gauge",
            self.interpolation_delay_ms.load(Ordering::Relaxed));

        metric!("fleet_sync_latency_milliseconds", "Mean round-trip latency", "gauge",
            self.latency_ms.load(Ordering::Relaxed));
        metric!("fleet_sync_network_degraded", "Network degraded (0/1)", "gauge",
            self.network_degraded.load(Ordering::Relaxed));
        metric!("fleet_sync_probe_timeouts_total", "Latency probes that timed out", "counter",
            self.probe_timeouts.load(Ordering::Relaxed));
        metric!("fleet_sync_probe_send_failures_total", "Latency probes that failed to send", "counter",
            self.probe_send_failures.load(Ordering::Relaxed));

        metric!("fleet_sync_full_syncs_sent_total", "Full state syncs sent", "counter",
            self.full_syncs_sent.load(Ordering::Relaxed));
        metric!("fleet_sync_deltas_sent_total", "Delta updates sent", "counter",
            self.deltas_sent.load(Ordering::Relaxed));
        metric!("fleet_sync_batches_sent_total", "Batched updates sent", "counter",
            self.batches_sent.load(Ordering::Relaxed));
        metric!("fleet_sync_delta_entries_sent_total", "Ship entries sent in deltas and batches", "counter",
            self.delta_entries_sent.load(Ordering::Relaxed));
        metric!("fleet_sync_delta_entries_skipped_total", "Ship entries below the delta threshold", "counter",
            self.delta_entries_skipped.load(Ordering::Relaxed));
        metric!("fleet_sync_sync_send_failures_total", "State sync sends that failed", "counter",
            self.sync_send_failures.load(Ordering::Relaxed));
        metric!("fleet_sync_bytes_sent_total", "Encoded bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));

        metric!("fleet_sync_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "tick": {
                "count": load(&self.tick_count),
                "timeUs": load(&self.tick_time_us),
                "maxUs": load(&self.tick_time_max_us),
            },
            "ships": {
                "local": load(&self.local_ships),
                "remote": load(&self.remote_ships),
                "unknownUpdates": load(&self.unknown_ship_updates),
            },
            "inputs": {
                "submitted": load(&self.inputs_submitted),
                "rateLimited": load(&self.inputs_rate_limited),
                "overflowDropped": load(&self.inputs_overflow_dropped),
                "sendFailures": load(&self.input_send_failures),
                "pending": load(&self.pending_inputs),
            },
            "reconciliation": {
                "corrections": load(&self.reconciliations),
                "replayed": load(&self.inputs_replayed),
                "stale": load(&self.stale_updates),
                "suppressedPredictions": load(&self.predictions_suppressed),
                "lastCorrection": load(&self.last_correction_milli) as f64 / 1000.0,
            },
            "interpolation": {
                "snapshots": load(&self.snapshots_received),
                "extrapolated": load(&self.extrapolated_frames),
                "frozen": load(&self.frozen_frames),
                "fallbackBlends": load(&self.fallback_blends),
                "delayMs": load(&self.interpolation_delay_ms),
            },
            "latency": {
                "ms": load(&self.latency_ms),
                "degraded": load(&self.network_degraded) == 1,
                "timeouts": load(&self.probe_timeouts),
                "sendFailures": load(&self.probe_send_failures),
            },
            "bandwidth": {
                "fullSyncs": load(&self.full_syncs_sent),
                "deltas": load(&self.deltas_sent),
                "batches": load(&self.batches_sent),
                "entriesSent": load(&self.delta_entries_sent),
                "entriesSkipped": load(&self.delta_entries_skipped),
                "sendFailures": load(&self.sync_send_failures),
                "bytesSent": load(&self.bytes_sent),
            },
            "uptimeSeconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
#[cfg(feature = "metrics_server")]
pub async fn start_metrics_server(metrics: Arc<SyncMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(feature = "metrics_server")]
fn route(metrics: &SyncMetrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string();
    };
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}
