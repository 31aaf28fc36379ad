//! ganglet-session: The per-cycle scheduling engine
//!
//! A session opens over a cluster snapshot and drives one scheduling cycle:
//! - Plugin registries for ordering, filtering, scoring and fairness hooks
//! - The fitting and scoring pipeline for nodes and GPU slices
//! - Fractional-GPU selection with whole-GPU indicator handling
//! - The transactional statement with exact rollback
//! - Actions: gang-atomic allocation and stale-gang eviction

pub mod actions;
pub mod events;
pub mod fitting;
pub mod gpu_sharing;
pub mod metrics;
pub mod plugins;
pub mod session;
pub mod statement;

#[cfg(test)]
pub(crate) mod test_support;

pub use events::{Event, EventHandler};
pub use fitting::AllocationMode;
pub use metrics::{Metrics, MetricsSnapshot};
pub use plugins::PluginRegistry;
pub use session::Session;
pub use statement::Statement;
