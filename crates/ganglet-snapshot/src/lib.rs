//! ganglet-snapshot: Cluster snapshot and node resource model
//!
//! This crate builds the immutable per-cycle cluster view the session
//! schedules against:
//! - Node scheduling state with whole-GPU and shared-GPU VRAM accounting,
//!   including the time-slicing correction
//! - The snapshot builder
//! - The cluster cache, bind/eviction outboxes and staleness tracking
//! - The orchestrator client seam

pub mod cache;
pub mod node;
pub mod orchestrator;
pub mod snapshot;

pub use cache::Cache;
pub use node::{GpuCandidate, NodeInfo, PipelineCharge};
pub use orchestrator::{BindRequest, EvictionRequest, LocalCluster, Orchestrator};
pub use snapshot::{Snapshot, TopologyInfo};
