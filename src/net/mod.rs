pub mod batcher;
pub mod channel;
pub mod delta;
pub mod latency;
pub mod loopback;
pub mod priority;
pub mod protocol;
