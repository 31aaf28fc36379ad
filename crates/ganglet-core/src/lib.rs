//! ganglet-core: Core types for the ganglet gang scheduler
//!
//! This crate provides the fundamental types used throughout the ganglet
//! system:
//! - Resource vectors and per-task requests
//! - Pod, pod-group (gang) and queue scheduling state
//! - Configuration types
//! - Error handling
//! - Node label and pod annotation keys

pub mod config;
pub mod error;
pub mod labels;
pub mod pod;
pub mod podgroup;
pub mod queue;
pub mod resources;

pub use config::*;
pub use error::*;
pub use pod::*;
pub use podgroup::*;
pub use queue::*;
pub use resources::*;
