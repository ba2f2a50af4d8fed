//! The fetch-aggregate-deliver pipeline.

pub mod aggregator;
pub mod orchestrator;

pub use aggregator::Aggregator;
pub use orchestrator::{Orchestrator, SyncSettings};
