//! Room membership, admission control, translation caching and the
//! fan-out engine that ties them to the provider chains.

pub mod cache;
pub mod engine;
pub mod events;
pub mod rate_limit;
pub mod rooms;

pub use engine::{AudioLimits, EventSink, RelayEngine, RelayServices};
