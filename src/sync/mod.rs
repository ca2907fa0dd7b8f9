//! Client-side synchronization: inputs, prediction, reconciliation and
//! snapshot interpolation, driven by the `SyncManager` tick.

pub mod input;
pub mod interpolation;
pub mod manager;
pub mod prediction;
pub mod rate_limit;
pub mod reconciliation;
pub mod snapshot;
pub mod state;

pub use manager::{start_client_loop, spawn_channel_reader, SyncError, SyncManager};
pub use state::{NetworkedShip, SyncPhase};
