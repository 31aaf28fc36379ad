//! Node-level fit checks and the GPU candidate filter

use ganglet_core::PodInfo;
use ganglet_snapshot::{GpuCandidate, NodeInfo};

/// How a fitting task can be placed on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    /// Bind immediately against idle resources
    Allocate,
    /// Reserve against releasing resources; materializes in a later cycle
    Pipeline,
}

/// Determine how the task fits on the node, if at all
///
/// Fitting against idle plus releasing but not idle alone downgrades the
/// allocation to a pipeline.
pub fn allocation_mode(node: &NodeInfo, pod: &PodInfo) -> Option<AllocationMode> {
    if node.is_task_allocatable(pod) {
        Some(AllocationMode::Allocate)
    } else if node.is_task_allocatable_on_releasing_or_idle(pod) {
        Some(AllocationMode::Pipeline)
    } else {
        None
    }
}

/// Collect the GPU candidates able to host a fractional request
///
/// Existing groups enter when the request fits once their releasers vacate;
/// one whole-GPU indicator enters per idle or releasing whole GPU. After the
/// time-slicing clamp the indicator count matches physical reality.
pub fn filter_gpus_by_enough_resources(node: &NodeInfo, pod: &PodInfo) -> Vec<GpuCandidate> {
    let mut filtered = Vec::new();
    if !node.gpu_eligible() || !pod.res_req.is_fractional() {
        return filtered;
    }

    for group in node.used_shared.keys() {
        if node.is_task_fit_on_gpu_group(&pod.res_req, group) {
            filtered.push(GpuCandidate::Group(group.clone()));
        }
    }

    let whole = node.idle.gpus + node.releasing.gpus;
    for _ in 0..whole {
        filtered.push(GpuCandidate::Whole);
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use ganglet_core::{labels, PodInfo, ResReq, ResourceVector};
    use std::collections::HashMap;

    fn gpu_node(advertised: u32, physical: u32, memory_mib: u64) -> NodeInfo {
        let mut node_labels = HashMap::new();
        node_labels.insert(labels::GPU_MEMORY_LABEL.to_string(), memory_mib.to_string());
        node_labels.insert(labels::GPU_COUNT_LABEL.to_string(), physical.to_string());
        NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, advertised),
            &node_labels,
        )
    }

    fn fractional_pod(memory_mib: u64) -> PodInfo {
        PodInfo::new(
            "default",
            "frac",
            "default/gang",
            ResReq::fractional(100, 256, memory_mib, 1),
        )
    }

    #[test]
    fn test_clamped_node_exposes_one_indicator() {
        let node = gpu_node(100, 1, 32600);
        let pod = fractional_pod(8000);

        let candidates = filter_gpus_by_enough_resources(&node, &pod);
        assert_eq!(candidates, vec![GpuCandidate::Whole]);
    }

    #[test]
    fn test_fitting_group_listed_before_saturation() {
        let mut node = gpu_node(2, 2, 32000);
        let mut tenant = fractional_pod(8000);
        tenant.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&tenant);

        let pod = fractional_pod(8000);
        let candidates = filter_gpus_by_enough_resources(&node, &pod);
        assert!(candidates.contains(&GpuCandidate::Group("group-1".to_string())));
        assert_eq!(
            candidates.iter().filter(|c| **c == GpuCandidate::Whole).count(),
            1
        );
    }

    #[test]
    fn test_saturated_group_excluded() {
        let mut node = gpu_node(1, 1, 32000);
        let mut tenant = fractional_pod(32000);
        tenant.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&tenant);

        let pod = fractional_pod(8000);
        assert!(filter_gpus_by_enough_resources(&node, &pod).is_empty());
    }

    #[test]
    fn test_whole_request_yields_no_candidates() {
        let node = gpu_node(2, 2, 32000);
        let pod = PodInfo::new("default", "whole", "default/gang", ResReq::whole(100, 256, 1));
        assert!(filter_gpus_by_enough_resources(&node, &pod).is_empty());
    }

    #[test]
    fn test_allocation_mode_downgrades_on_releasing() {
        let mut node = gpu_node(2, 2, 32000);
        let mut tenant = PodInfo::new(
            "default",
            "tenant",
            "default/gang",
            ResReq::whole(6000, 16384, 2),
        );
        tenant.status = ganglet_core::PodStatus::Running;
        node.add_allocated_task(&tenant);

        let pod = PodInfo::new("default", "next", "default/gang", ResReq::whole(4000, 8192, 1));
        assert_eq!(allocation_mode(&node, &pod), None);

        node.evict_task(&tenant);
        assert_eq!(allocation_mode(&node, &pod), Some(AllocationMode::Pipeline));
    }
}
