//! Plugin capability registries
//!
//! Plugins are capability sets: each one registers zero or more functions
//! and the session runs capabilities, never plugin objects. There is no
//! plugin base type.

use std::cmp::Ordering;
use std::collections::HashMap;

use ganglet_core::{GangletResult, PodGroupInfo, PodInfo, QueueInfo, ResourceVector};
use ganglet_snapshot::{GpuCandidate, NodeInfo};

pub mod gpu_pack;
pub mod proportion;

/// Scores one GPU candidate for a task on a node
pub type GpuOrderFn =
    Box<dyn Fn(&PodInfo, &NodeInfo, &GpuCandidate) -> GangletResult<f64> + Send + Sync>;

/// Precomputes per-task state before node scoring starts
pub type NodePreOrderFn = Box<dyn Fn(&PodInfo, &[&NodeInfo]) + Send + Sync>;

/// Scores one node for a task; must be side-effect-free on snapshot state
pub type NodeOrderFn = Box<dyn Fn(&PodInfo, &NodeInfo) -> GangletResult<f64> + Send + Sync>;

/// Orders two jobs within a queue
pub type JobOrderFn = Box<dyn Fn(&PodGroupInfo, &PodGroupInfo) -> Ordering + Send + Sync>;

/// Orders two tasks within a job
pub type TaskOrderFn = Box<dyn Fn(&PodInfo, &PodInfo) -> Ordering + Send + Sync>;

/// Orders two queues for job admission
pub type QueueOrderFn = Box<dyn Fn(&QueueInfo, &QueueInfo) -> Ordering + Send + Sync>;

/// Accepts or rejects a node for a task; Err carries the rejection message
pub type PredicateFn =
    Box<dyn Fn(&PodInfo, &PodGroupInfo, &NodeInfo) -> Result<(), String> + Send + Sync>;

/// Accepts or rejects a task before any node is considered
pub type PrePredicateFn = Box<dyn Fn(&PodInfo, &PodGroupInfo) -> Result<(), String> + Send + Sync>;

/// Reads one of the fairness vectors of a queue
pub type QueueResourceFn = Box<dyn Fn(&QueueInfo) -> ResourceVector + Send + Sync>;

/// Checks a job against queue capacity; Some carries the rejection message
pub type IsJobOverCapacityFn =
    Box<dyn Fn(&PodGroupInfo, &QueueInfo) -> Option<String> + Send + Sync>;

/// Checks one task placement against queue capacity on a node
pub type IsTaskAllocationOverCapacityFn =
    Box<dyn Fn(&PodInfo, &QueueInfo, &NodeInfo) -> Option<String> + Send + Sync>;

/// Contributes annotations to the bind request of a pod
pub type BindRequestMutateFn =
    Box<dyn Fn(&PodInfo, &str) -> HashMap<String, String> + Send + Sync>;

/// All capabilities registered for one session
#[derive(Default)]
pub struct PluginRegistry {
    pub gpu_order_fns: Vec<GpuOrderFn>,
    pub node_pre_order_fns: Vec<NodePreOrderFn>,
    pub node_order_fns: Vec<NodeOrderFn>,
    pub job_order_fns: Vec<JobOrderFn>,
    pub task_order_fns: Vec<TaskOrderFn>,
    pub queue_order_fns: Vec<QueueOrderFn>,
    pub predicate_fns: Vec<PredicateFn>,
    pub pre_predicate_fns: Vec<PrePredicateFn>,
    pub queue_allocated_fns: Vec<QueueResourceFn>,
    pub queue_deserved_fns: Vec<QueueResourceFn>,
    pub queue_fair_share_fns: Vec<QueueResourceFn>,
    pub is_job_over_capacity_fns: Vec<IsJobOverCapacityFn>,
    pub is_non_preemptible_job_over_quota_fns: Vec<IsJobOverCapacityFn>,
    pub is_task_allocation_over_capacity_fns: Vec<IsTaskAllocationOverCapacityFn>,
    pub bind_request_mutate_fns: Vec<BindRequestMutateFn>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gpu_order_fn(&mut self, f: GpuOrderFn) {
        self.gpu_order_fns.push(f);
    }

    pub fn add_node_pre_order_fn(&mut self, f: NodePreOrderFn) {
        self.node_pre_order_fns.push(f);
    }

    pub fn add_node_order_fn(&mut self, f: NodeOrderFn) {
        self.node_order_fns.push(f);
    }

    pub fn add_job_order_fn(&mut self, f: JobOrderFn) {
        self.job_order_fns.push(f);
    }

    pub fn add_task_order_fn(&mut self, f: TaskOrderFn) {
        self.task_order_fns.push(f);
    }

    pub fn add_queue_order_fn(&mut self, f: QueueOrderFn) {
        self.queue_order_fns.push(f);
    }

    pub fn add_predicate_fn(&mut self, f: PredicateFn) {
        self.predicate_fns.push(f);
    }

    pub fn add_pre_predicate_fn(&mut self, f: PrePredicateFn) {
        self.pre_predicate_fns.push(f);
    }

    pub fn add_queue_allocated_fn(&mut self, f: QueueResourceFn) {
        self.queue_allocated_fns.push(f);
    }

    pub fn add_queue_deserved_fn(&mut self, f: QueueResourceFn) {
        self.queue_deserved_fns.push(f);
    }

    pub fn add_queue_fair_share_fn(&mut self, f: QueueResourceFn) {
        self.queue_fair_share_fns.push(f);
    }

    pub fn add_is_job_over_capacity_fn(&mut self, f: IsJobOverCapacityFn) {
        self.is_job_over_capacity_fns.push(f);
    }

    pub fn add_is_non_preemptible_job_over_quota_fn(&mut self, f: IsJobOverCapacityFn) {
        self.is_non_preemptible_job_over_quota_fns.push(f);
    }

    pub fn add_is_task_allocation_over_capacity_fn(&mut self, f: IsTaskAllocationOverCapacityFn) {
        self.is_task_allocation_over_capacity_fns.push(f);
    }

    pub fn add_bind_request_mutate_fn(&mut self, f: BindRequestMutateFn) {
        self.bind_request_mutate_fns.push(f);
    }
}

/// Register the built-in plugin set
pub fn register_defaults(registry: &mut PluginRegistry) {
    gpu_pack::register(registry);
    proportion::register(registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_collects_capabilities() {
        let mut registry = PluginRegistry::new();
        registry.add_node_order_fn(Box::new(|_, _| Ok(1.0)));
        registry.add_predicate_fn(Box::new(|_, _, _| Ok(())));
        assert_eq!(registry.node_order_fns.len(), 1);
        assert_eq!(registry.predicate_fns.len(), 1);
    }

    #[test]
    fn test_register_defaults() {
        let mut registry = PluginRegistry::new();
        register_defaults(&mut registry);
        assert!(!registry.gpu_order_fns.is_empty());
        assert!(!registry.queue_order_fns.is_empty());
    }
}
