//! Tuning constants for the synchronization layer.
//!
//! Times are milliseconds unless the name says otherwise; distances are world
//! units (degrees for map-backed fleets).

/// Fixed simulation tick
pub mod tick {
    /// Client/server tick rate in Hz
    pub const RATE: u32 = 30;
    /// Server broadcasts a position batch every N ticks (10 Hz)
    pub const SNAPSHOT_EVERY_TICKS: u64 = 3;
}

/// Latency estimation
pub mod latency {
    /// Cadence of ping probes
    pub const PROBE_INTERVAL_MS: u64 = 1000;
    /// A probe unanswered for this long marks the network degraded
    pub const PROBE_TIMEOUT_MS: u64 = 3000;
    /// Rolling window of RTT samples
    pub const SAMPLE_WINDOW: usize = 10;
    /// Reported when a probe fails or times out
    pub const SENTINEL_MS: f64 = 9999.0;
}

/// Input sequencing
pub mod input {
    /// Maximum accepted inputs per second
    pub const RATE_LIMIT: u32 = 20;
    /// Unacknowledged inputs kept for replay before the oldest is dropped
    pub const MAX_UNACKED: usize = 256;
}

/// Client-side prediction
pub mod prediction {
    /// Prediction stops once the last authoritative update is older than this
    pub const MAX_HORIZON_MS: u64 = 500;
    /// Fraction of the gap between live and predicted position closed per tick
    pub const CORRECTION_RATE: f64 = 0.3;
    /// Default cruise speed (units/second)
    pub const DEFAULT_SPEED: f64 = 1.0;
}

/// Server reconciliation
pub mod reconciliation {
    /// Errors at or below this distance are treated as noise
    pub const MIN_CORRECTION_DISTANCE: f64 = 0.25;
    /// Inputs still unconfirmed by server state this much newer are lost
    pub const INPUT_LOSS_TIMEOUT_MS: u64 = 1000;
}

/// Snapshot interpolation
pub mod interpolation {
    /// Snapshots retained per remote ship
    pub const BUFFER_CAPACITY: usize = 5;
    /// Snapshots older than this (relative to the newest) are discarded
    pub const MAX_SNAPSHOT_AGE_MS: u64 = 2000;
    /// Extrapolation never runs further than this much travel past the newest snapshot
    pub const EXTRAPOLATION_LIMIT_MS: u64 = 200;
    /// Blend rate used while fewer than two snapshots exist
    pub const FALLBACK_BLEND_RATE: f64 = 0.2;
    /// Default base interpolation delay
    pub const DEFAULT_DELAY_MS: u64 = 100;
    /// Hard cap of the configurable and adaptive delay
    pub const MAX_DELAY_MS: u64 = 500;
}

/// Adaptive interpolation delay
pub mod adaptive {
    /// Smoothing factor of the transit trend
    pub const TREND_ALPHA: f64 = 0.2;
    /// Trend above this raises the delay
    pub const HIGH_TRANSIT_MS: f64 = 150.0;
    /// Trend below this lowers the delay
    pub const LOW_TRANSIT_MS: f64 = 60.0;
    /// Increase per snapshot while the trend is high
    pub const STEP_UP_MS: f64 = 10.0;
    /// Decrease per snapshot while the trend is low
    pub const STEP_DOWN_MS: f64 = 5.0;
}

/// Bandwidth optimization
pub mod bandwidth {
    /// Full state resync cadence
    pub const FULL_SYNC_INTERVAL_MS: u64 = 5000;
    /// Positional change below this is not worth a delta
    pub const DELTA_POSITION_THRESHOLD: f64 = 0.5;
    /// Ships within this distance of a remote ship are high priority
    pub const PROXIMITY_RADIUS: f64 = 50.0;
    /// Debounce window for batched updates
    pub const BATCH_WINDOW_MS: u64 = 50;
    /// Entries that force an early batch flush
    pub const BATCH_MAX_ENTRIES: usize = 16;
}

/// Inbound message handling
pub mod net {
    /// Capacity of the inbox between the receive task and the tick
    pub const INBOX_CAPACITY: usize = 1024;
}
