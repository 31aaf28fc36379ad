//! ganglet-api: Read-only status surface over the last scheduling cycle

pub mod rest;

pub use rest::{create_router, ApiState, CycleReport, NodeReport, PodGroupReport};
