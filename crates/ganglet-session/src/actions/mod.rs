//! Actions driving the scheduling session
//!
//! Each action walks the session's jobs and records its decisions through
//! statements. Actions run serially within a cycle.

pub mod allocate;
pub mod stale_gang;

pub use allocate::AllocateStats;
pub use stale_gang::StaleGangStats;
