//! Scan engine - the tiered smart-scan controller and the result aggregator.

pub mod aggregator;
pub mod controller;
pub mod guess;
pub mod pool;

pub use aggregator::{Aggregator, AggregatorHandle, ScanReport};
pub use controller::{EngineConfig, ScanController};
pub use guess::guess_frame;
pub use pool::run_batch;
