//! In-process scheduling metrics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters and duration accumulators maintained across cycles
///
/// Export to a metrics backend is a collaborator concern; the daemon serves
/// the snapshot through the status API.
#[derive(Debug, Default)]
pub struct Metrics {
    pods_bound: AtomicU64,
    pods_pipelined: AtomicU64,
    pods_evicted: AtomicU64,
    gangs_admitted: AtomicU64,
    gangs_unschedulable: AtomicU64,
    stale_gangs_evicted: AtomicU64,
    schedule_duration_ms_sum: AtomicU64,
    schedule_duration_count: AtomicU64,
    last_cycle_ms: AtomicU64,
    cycles: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pods_bound(&self) {
        self.pods_bound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pods_pipelined(&self) {
        self.pods_pipelined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pods_evicted(&self) {
        self.pods_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gangs_admitted(&self) {
        self.gangs_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gangs_unschedulable(&self) {
        self.gangs_unschedulable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_gangs_evicted(&self) {
        self.stale_gangs_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a task waited from creation to bind
    pub fn observe_schedule_duration_ms(&self, millis: u64) {
        self.schedule_duration_ms_sum.fetch_add(millis, Ordering::Relaxed);
        self.schedule_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall-clock length of one cycle
    pub fn observe_cycle_ms(&self, millis: u64) {
        self.last_cycle_ms.store(millis, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pods_bound: self.pods_bound.load(Ordering::Relaxed),
            pods_pipelined: self.pods_pipelined.load(Ordering::Relaxed),
            pods_evicted: self.pods_evicted.load(Ordering::Relaxed),
            gangs_admitted: self.gangs_admitted.load(Ordering::Relaxed),
            gangs_unschedulable: self.gangs_unschedulable.load(Ordering::Relaxed),
            stale_gangs_evicted: self.stale_gangs_evicted.load(Ordering::Relaxed),
            schedule_duration_ms_sum: self.schedule_duration_ms_sum.load(Ordering::Relaxed),
            schedule_duration_count: self.schedule_duration_count.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the metrics, serialized by the status API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pods_bound: u64,
    pub pods_pipelined: u64,
    pub pods_evicted: u64,
    pub gangs_admitted: u64,
    pub gangs_unschedulable: u64,
    pub stale_gangs_evicted: u64,
    pub schedule_duration_ms_sum: u64,
    pub schedule_duration_count: u64,
    pub last_cycle_ms: u64,
    pub cycles: u64,
}
