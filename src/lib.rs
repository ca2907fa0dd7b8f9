//! Fleet Sync
//!
//! Client/server netcode for a fleet of ships: sequenced inputs with local
//! prediction, server reconciliation with input replay, buffered snapshot
//! interpolation for remote ships, and bandwidth-aware outbound state sync.
//!
//! # Features
//!
//! - `metrics_server` - Prometheus/JSON metrics over HTTP (enabled by default)

pub mod config;
pub mod fleet;
pub mod metrics;
pub mod net;
pub mod server;
pub mod sync;
pub mod util;
