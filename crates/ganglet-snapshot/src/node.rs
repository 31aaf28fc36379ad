//! Node scheduling state with shared-GPU VRAM accounting

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use ganglet_core::labels;
use ganglet_core::{FitReason, GpuGroupId, PodInfo, ResReq, ResourceVector};

/// A candidate slot for a fractional GPU allocation
///
/// `Whole` is the whole-GPU indicator: an unallocated physical GPU slot that
/// can be claimed for sharing by minting a fresh group. The derived ordering
/// (indicators first, then group ids lexicographically) is the deterministic
/// tie-break within a score bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GpuCandidate {
    /// An unallocated whole GPU
    Whole,
    /// An existing shared-GPU tenancy
    Group(GpuGroupId),
}

impl std::fmt::Display for GpuCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuCandidate::Whole => write!(f, "<whole-gpu>"),
            GpuCandidate::Group(id) => write!(f, "{}", id),
        }
    }
}

/// Exact deltas charged by a pipeline operation, kept for rollback
///
/// Pipeline charges saturate against the releasing pools, so the inverse
/// cannot be recomputed from the request; the actual amounts are recorded.
#[derive(Debug, Clone, Default)]
pub struct PipelineCharge {
    /// Whole-dimension resources taken from the node's releasing pool
    pub whole: ResourceVector,
    /// Per-group VRAM taken from releasing credit, plus fresh-group markers
    pub groups: Vec<GroupCharge>,
}

/// One shared-GPU component of a pipeline charge
#[derive(Debug, Clone)]
pub struct GroupCharge {
    /// Group the pipelined task reserved
    pub group: GpuGroupId,
    /// VRAM actually subtracted from the group's releasing credit
    pub memory_mib: u64,
    /// Whether the group was freshly minted from a whole-GPU indicator
    pub fresh: bool,
    /// Whether a releasing whole GPU was consumed for a fresh group
    pub consumed_releasing_gpu: bool,
}

/// A node's scheduling state for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Total allocatable resources as advertised
    pub allocatable: ResourceVector,
    /// Unclaimed resources
    pub idle: ResourceVector,
    /// Resources claimed by materialized tasks
    pub used: ResourceVector,
    /// Resources scheduled to be freed by releasing tasks
    pub releasing: ResourceVector,
    /// Per-GPU VRAM capacity in MiB; None marks the node GPU-ineligible
    /// when GPUs are advertised
    pub gpu_memory_mib: Option<u64>,
    /// Physical GPU count behind the advertised devices
    pub physical_gpus: Option<u32>,
    /// MIG strategy label, informational
    pub mig_strategy: Option<String>,
    /// GPU product label, informational
    pub gpu_product: Option<String>,
    /// VRAM of materialized tenants per shared-GPU group
    pub used_shared: BTreeMap<GpuGroupId, u64>,
    /// VRAM committed per shared-GPU group, materialized plus same-cycle
    pub allocated_shared: BTreeMap<GpuGroupId, u64>,
    /// VRAM of releasing tenants per group, net of pipelined reservations
    pub releasing_shared: BTreeMap<GpuGroupId, u64>,
    /// Uids of pods resident on the node
    pub pod_uids: HashSet<String>,
}

impl NodeInfo {
    /// Build a node from its advertised allocatable resources and labels
    ///
    /// The time-slicing correction happens here, before any pod is replayed:
    /// a node advertising more GPU devices than it physically has gets its
    /// idle whole-GPU count clamped to the physical count. Every later
    /// mutation only subtracts from idle, so the clamp is applied exactly
    /// once.
    pub fn new(name: &str, allocatable: ResourceVector, node_labels: &HashMap<String, String>) -> Self {
        let gpu_memory_mib = node_labels
            .get(labels::GPU_MEMORY_LABEL)
            .and_then(|v| v.parse::<u64>().ok());
        let physical_gpus = node_labels
            .get(labels::GPU_COUNT_LABEL)
            .and_then(|v| v.parse::<u32>().ok());

        let mut idle = allocatable;
        if let Some(physical) = physical_gpus {
            if physical > 0 && allocatable.gpus > physical {
                debug!(
                    node = name,
                    advertised = allocatable.gpus,
                    physical = physical,
                    "Clamping idle GPUs to physical count"
                );
                idle.gpus = physical;
            }
        }

        Self {
            name: name.to_string(),
            allocatable,
            idle,
            used: ResourceVector::default(),
            releasing: ResourceVector::default(),
            gpu_memory_mib,
            physical_gpus,
            mig_strategy: node_labels.get(labels::MIG_STRATEGY_LABEL).cloned(),
            gpu_product: node_labels.get(labels::GPU_PRODUCT_LABEL).cloned(),
            used_shared: BTreeMap::new(),
            allocated_shared: BTreeMap::new(),
            releasing_shared: BTreeMap::new(),
            pod_uids: HashSet::new(),
        }
    }

    /// Whether the node can host GPU-requesting tasks
    ///
    /// Nodes advertising GPUs without a VRAM capacity label cannot be
    /// accounted and are excluded from GPU-requesting filters.
    pub fn gpu_eligible(&self) -> bool {
        self.allocatable.gpus == 0 || self.gpu_memory_mib.is_some()
    }

    /// Per-GPU VRAM capacity; zero when unlabeled
    pub fn gpu_memory_capacity(&self) -> u64 {
        self.gpu_memory_mib.unwrap_or(0)
    }

    /// Physical GPU count; falls back to the advertised count
    pub fn physical_gpu_count(&self) -> u32 {
        self.physical_gpus.unwrap_or(self.allocatable.gpus)
    }

    /// Whether every tenant of `group` is releasing
    pub fn all_released(&self, group: &str) -> bool {
        let used = self.used_shared.get(group).copied().unwrap_or(0);
        let releasing = self.releasing_shared.get(group).copied().unwrap_or(0);
        used != 0 && releasing >= used
    }

    /// Whether a fractional request fits on `group` once releasers vacate
    pub fn is_task_fit_on_gpu_group(&self, req: &ResReq, group: &str) -> bool {
        let total = self.gpu_memory_capacity();
        let used = self.used_shared.get(group).copied().unwrap_or(0);
        let allocated = self.allocated_shared.get(group).copied().unwrap_or(0);
        let releasing = self.releasing_shared.get(group).copied().unwrap_or(0);

        used != 0
            && total + releasing >= allocated + req.gpu_memory()
            && !self.all_released(group)
    }

    /// Whether `group` has enough idle (non-releasing) VRAM headroom
    pub fn enough_idle_resources_on_gpu(&self, req: &ResReq, group: &str) -> bool {
        let total = self.gpu_memory_capacity();
        let allocated = self.allocated_shared.get(group).copied().unwrap_or(0);
        total >= allocated + req.gpu_memory()
    }

    /// Number of shared devices a fractional request can claim right now
    ///
    /// All-released groups are not claimable until their tenants vacate;
    /// their backing GPU only counts toward the releasing capacity.
    fn idle_gpu_device_capacity(&self, req: &ResReq) -> u32 {
        let groups = self
            .allocated_shared
            .keys()
            .filter(|g| !self.all_released(g) && self.enough_idle_resources_on_gpu(req, g))
            .count() as u32;
        groups + self.idle.gpus
    }

    /// Number of shared devices a fractional request can claim once
    /// releasers vacate
    fn releasable_gpu_device_capacity(&self, req: &ResReq) -> u32 {
        let groups = self
            .used_shared
            .keys()
            .filter(|g| self.is_task_fit_on_gpu_group(req, g))
            .count() as u32;
        groups + self.idle.gpus + self.releasing.gpus
    }

    /// Whether the task fits against current idle resources
    pub fn is_task_allocatable(&self, pod: &PodInfo) -> bool {
        let req = &pod.res_req;
        if req.requests_gpus() && !self.gpu_eligible() {
            return false;
        }
        if !req.vector.fits_in(&self.idle) {
            return false;
        }
        if req.is_fractional() {
            return self.idle_gpu_device_capacity(req) >= req.gpu_device_count();
        }
        true
    }

    /// Whether the task fits once releasing resources vacate
    ///
    /// Fitting here but not against idle downgrades the allocation to a
    /// pipeline.
    pub fn is_task_allocatable_on_releasing_or_idle(&self, pod: &PodInfo) -> bool {
        let req = &pod.res_req;
        if req.requests_gpus() && !self.gpu_eligible() {
            return false;
        }
        if !req.vector.fits_in(&self.idle.plus(&self.releasing)) {
            return false;
        }
        if req.is_fractional() {
            return self.releasable_gpu_device_capacity(req) >= req.gpu_device_count();
        }
        true
    }

    /// Why the task does not fit on this node
    pub fn fitting_error(&self, pod: &PodInfo) -> FitReason {
        let req = &pod.res_req;
        if req.requests_gpus() && !self.gpu_eligible() {
            return FitReason::GpuIneligibleNode;
        }
        if req.is_fractional() && req.vector.fits_in(&self.idle.plus(&self.releasing)) {
            return FitReason::InsufficientGpuMemory;
        }
        FitReason::InsufficientResources
    }

    /// Charge an allocated task against the node
    ///
    /// The first tenant of a fresh shared group moves one whole GPU from
    /// idle to used; [`NodeInfo::remove_allocated_task`] reverses the move
    /// when the last tenant leaves.
    pub fn add_allocated_task(&mut self, pod: &PodInfo) {
        let footprint = pod.node_footprint();
        self.idle.sub(&footprint);
        self.used.add(&footprint);

        if pod.res_req.is_fractional() {
            let memory = pod.res_req.gpu_memory();
            for group in &pod.gpu_groups {
                let fresh = !self.allocated_shared.contains_key(group)
                    && !self.used_shared.contains_key(group);
                if fresh {
                    self.idle.gpus = self.idle.gpus.saturating_sub(1);
                    self.used.gpus += 1;
                }
                *self.allocated_shared.entry(group.clone()).or_insert(0) += memory;
                *self.used_shared.entry(group.clone()).or_insert(0) += memory;
            }
        }
        self.pod_uids.insert(pod.uid.clone());
    }

    /// Exact inverse of [`NodeInfo::add_allocated_task`]
    pub fn remove_allocated_task(&mut self, pod: &PodInfo) {
        let footprint = pod.node_footprint();
        self.idle.add(&footprint);
        self.used.sub(&footprint);

        if pod.res_req.is_fractional() {
            let memory = pod.res_req.gpu_memory();
            for group in &pod.gpu_groups {
                if let Some(allocated) = self.allocated_shared.get_mut(group) {
                    *allocated = allocated.saturating_sub(memory);
                }
                if let Some(used) = self.used_shared.get_mut(group) {
                    *used = used.saturating_sub(memory);
                }
                let empty = self.allocated_shared.get(group).copied().unwrap_or(0) == 0
                    && self.used_shared.get(group).copied().unwrap_or(0) == 0;
                if empty {
                    self.allocated_shared.remove(group);
                    self.used_shared.remove(group);
                    self.releasing_shared.remove(group);
                    self.used.gpus = self.used.gpus.saturating_sub(1);
                    self.idle.gpus += 1;
                }
            }
        }
        self.pod_uids.remove(&pod.uid);
    }

    /// Move a materialized task's resources into the releasing pool
    ///
    /// The task keeps occupying the node until it actually vacates; only the
    /// releasing accounting changes. A group whose tenants are now all
    /// releasing moves its backing whole GPU from used to releasing.
    pub fn evict_task(&mut self, pod: &PodInfo) {
        let footprint = pod.node_footprint();
        self.used.sub(&footprint);
        self.releasing.add(&footprint);

        if pod.res_req.is_fractional() {
            let memory = pod.res_req.gpu_memory();
            for group in &pod.gpu_groups {
                let was_all_released = self.all_released(group);
                *self.releasing_shared.entry(group.clone()).or_insert(0) += memory;
                if !was_all_released && self.all_released(group) {
                    self.used.gpus = self.used.gpus.saturating_sub(1);
                    self.releasing.gpus += 1;
                }
            }
        }
    }

    /// Exact inverse of [`NodeInfo::evict_task`]
    pub fn unevict_task(&mut self, pod: &PodInfo) {
        let footprint = pod.node_footprint();
        self.used.add(&footprint);
        self.releasing.sub(&footprint);

        if pod.res_req.is_fractional() {
            let memory = pod.res_req.gpu_memory();
            for group in &pod.gpu_groups {
                let was_all_released = self.all_released(group);
                if let Some(releasing) = self.releasing_shared.get_mut(group) {
                    *releasing = releasing.saturating_sub(memory);
                    if *releasing == 0 {
                        self.releasing_shared.remove(group);
                    }
                }
                if was_all_released && !self.all_released(group) {
                    self.releasing.gpus = self.releasing.gpus.saturating_sub(1);
                    self.used.gpus += 1;
                }
            }
        }
    }

    /// Reserve releasing resources for a pipelined task
    ///
    /// Charges saturate, so the actual deltas are returned for rollback.
    /// Reserving against releasing credit instead of inflating the allocated
    /// map keeps committed VRAM bounded by physical capacity and stops a
    /// second pipeliner from double-booking the same vacating memory.
    pub fn pipeline_task(&mut self, pod: &PodInfo) -> PipelineCharge {
        let footprint = pod.node_footprint();
        let whole = ResourceVector {
            cpu_millis: footprint.cpu_millis.min(self.releasing.cpu_millis),
            memory_mib: footprint.memory_mib.min(self.releasing.memory_mib),
            gpus: footprint.gpus.min(self.releasing.gpus),
        };
        self.releasing.sub(&whole);

        let mut groups = Vec::new();
        if pod.res_req.is_fractional() {
            let memory = pod.res_req.gpu_memory();
            for group in &pod.gpu_groups {
                let fresh = !self.allocated_shared.contains_key(group)
                    && !self.used_shared.contains_key(group);
                if fresh {
                    let consumed = self.releasing.gpus > 0;
                    if consumed {
                        self.releasing.gpus -= 1;
                    }
                    groups.push(GroupCharge {
                        group: group.clone(),
                        memory_mib: 0,
                        fresh: true,
                        consumed_releasing_gpu: consumed,
                    });
                } else {
                    let credit = self.releasing_shared.get(group).copied().unwrap_or(0);
                    let taken = memory.min(credit);
                    if taken > 0 {
                        let remaining = credit - taken;
                        if remaining == 0 {
                            self.releasing_shared.remove(group);
                        } else {
                            self.releasing_shared.insert(group.clone(), remaining);
                        }
                    }
                    groups.push(GroupCharge {
                        group: group.clone(),
                        memory_mib: taken,
                        fresh: false,
                        consumed_releasing_gpu: false,
                    });
                }
            }
        }

        PipelineCharge { whole, groups }
    }

    /// Exact inverse of [`NodeInfo::pipeline_task`], from the recorded charge
    pub fn unpipeline_task(&mut self, charge: &PipelineCharge) {
        self.releasing.add(&charge.whole);
        for group_charge in &charge.groups {
            if group_charge.fresh {
                if group_charge.consumed_releasing_gpu {
                    self.releasing.gpus += 1;
                }
            } else if group_charge.memory_mib > 0 {
                *self
                    .releasing_shared
                    .entry(group_charge.group.clone())
                    .or_insert(0) += group_charge.memory_mib;
            }
        }
    }

    /// Total VRAM committed across all shared groups
    pub fn total_allocated_shared(&self) -> u64 {
        self.allocated_shared.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ganglet_core::PodStatus;

    fn gpu_labels(memory_mib: u64, physical: u32) -> HashMap<String, String> {
        let mut node_labels = HashMap::new();
        node_labels.insert(labels::GPU_MEMORY_LABEL.to_string(), memory_mib.to_string());
        node_labels.insert(labels::GPU_COUNT_LABEL.to_string(), physical.to_string());
        node_labels
    }

    fn fractional_pod(name: &str, memory_mib: u64) -> PodInfo {
        let mut pod = PodInfo::new(
            "default",
            name,
            "default/gang",
            ResReq::fractional(100, 256, memory_mib, 1),
        );
        pod.status = PodStatus::Pending;
        pod
    }

    #[test]
    fn test_time_slicing_clamp() {
        let node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 100),
            &gpu_labels(32600, 1),
        );
        assert_eq!(node.idle.gpus, 1);
        assert_eq!(node.allocatable.gpus, 100);
    }

    #[test]
    fn test_clamp_not_applied_without_time_slicing() {
        let node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 4),
            &gpu_labels(40960, 4),
        );
        assert_eq!(node.idle.gpus, 4);
    }

    #[test]
    fn test_idle_never_exceeds_physical_after_clamp() {
        let node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 16),
            &gpu_labels(16384, 2),
        );
        assert!(node.idle.gpus <= node.physical_gpu_count());
    }

    #[test]
    fn test_missing_memory_label_marks_gpu_ineligible() {
        let node = NodeInfo::new("node-a", ResourceVector::new(8000, 32768, 4), &HashMap::new());
        assert!(!node.gpu_eligible());

        let pod = fractional_pod("frac", 1000);
        assert!(!node.is_task_allocatable(&pod));

        let cpu_node = NodeInfo::new("node-b", ResourceVector::new(8000, 32768, 0), &HashMap::new());
        assert!(cpu_node.gpu_eligible());
    }

    #[test]
    fn test_fresh_group_moves_whole_gpu() {
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 2),
            &gpu_labels(32600, 2),
        );
        let mut pod = fractional_pod("frac", 8000);
        pod.gpu_groups = vec!["group-1".to_string()];

        node.add_allocated_task(&pod);
        assert_eq!(node.idle.gpus, 1);
        assert_eq!(node.used.gpus, 1);
        assert_eq!(node.allocated_shared["group-1"], 8000);

        node.remove_allocated_task(&pod);
        assert_eq!(node.idle.gpus, 2);
        assert_eq!(node.used.gpus, 0);
        assert!(node.allocated_shared.is_empty());
    }

    #[test]
    fn test_second_tenant_does_not_move_gpu() {
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 2),
            &gpu_labels(32600, 2),
        );
        let mut first = fractional_pod("first", 8000);
        first.gpu_groups = vec!["group-1".to_string()];
        let mut second = fractional_pod("second", 8000);
        second.gpu_groups = vec!["group-1".to_string()];

        node.add_allocated_task(&first);
        node.add_allocated_task(&second);
        assert_eq!(node.idle.gpus, 1);
        assert_eq!(node.allocated_shared["group-1"], 16000);
    }

    #[test]
    fn test_group_fit_with_releasing_credit() {
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 1),
            &gpu_labels(32600, 1),
        );
        let mut tenant = fractional_pod("tenant", 32600);
        tenant.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&tenant);

        let req = ResReq::fractional(100, 256, 8000, 1);
        assert!(!node.is_task_fit_on_gpu_group(&req, "group-1"));

        // a partial eviction frees credit but turns nothing idle
        let mut leaver = fractional_pod("leaver", 8000);
        leaver.gpu_groups = vec!["group-1".to_string()];
        node.evict_task(&leaver);
        assert!(node.is_task_fit_on_gpu_group(&req, "group-1"));
        assert!(!node.enough_idle_resources_on_gpu(&req, "group-1"));
    }

    #[test]
    fn test_all_released_group_excluded_and_counted_as_releasing_gpu() {
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 1),
            &gpu_labels(32600, 1),
        );
        let mut tenant = fractional_pod("tenant", 8000);
        tenant.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&tenant);
        node.evict_task(&tenant);

        assert!(node.all_released("group-1"));
        assert_eq!(node.releasing.gpus, 1);
        // the backing GPU moved out of used; it must not be counted twice
        assert_eq!(node.used.gpus, 0);

        let req = ResReq::fractional(100, 256, 4000, 1);
        assert!(!node.is_task_fit_on_gpu_group(&req, "group-1"));

        node.unevict_task(&tenant);
        assert!(!node.all_released("group-1"));
        assert_eq!(node.releasing.gpus, 0);
        assert_eq!(node.used.gpus, 1);
    }

    #[test]
    fn test_evict_then_unevict_restores_node() {
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 2),
            &gpu_labels(32600, 2),
        );
        let mut pod = fractional_pod("tenant", 8000);
        pod.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&pod);

        let before = node.clone();
        node.evict_task(&pod);
        node.unevict_task(&pod);

        assert_eq!(node.idle, before.idle);
        assert_eq!(node.used, before.used);
        assert_eq!(node.releasing, before.releasing);
        assert_eq!(node.used_shared, before.used_shared);
        assert_eq!(node.allocated_shared, before.allocated_shared);
        assert_eq!(node.releasing_shared, before.releasing_shared);
    }

    #[test]
    fn test_pipeline_charge_rollback_is_exact() {
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 1),
            &gpu_labels(32600, 1),
        );
        let mut tenant = fractional_pod("tenant", 5000);
        tenant.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&tenant);
        node.evict_task(&tenant);

        // the pipeliner wants more than the available releasing credit
        let mut pipeliner = fractional_pod("pipeliner", 8000);
        pipeliner.gpu_groups = vec!["group-1".to_string()];

        let before = node.clone();
        let charge = node.pipeline_task(&pipeliner);
        assert_eq!(charge.groups[0].memory_mib, 5000);

        node.unpipeline_task(&charge);
        assert_eq!(node.releasing, before.releasing);
        assert_eq!(node.releasing_shared, before.releasing_shared);
    }

    #[test]
    fn test_committed_vram_bounded_by_physical_capacity() {
        // allocatable advertises 100 devices backed by a single physical GPU
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(64000, 262144, 100),
            &gpu_labels(32600, 1),
        );

        let mut tenant = fractional_pod("tenant", 32600);
        tenant.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&tenant);

        assert!(
            node.total_allocated_shared()
                <= node.physical_gpu_count() as u64 * node.gpu_memory_capacity()
        );
        assert_eq!(node.idle.gpus, 0);

        let next = fractional_pod("next", 1000);
        assert!(!node.is_task_allocatable(&next));
    }

    #[test]
    fn test_near_full_request_fits_once_per_gpu() {
        let total = 32600u64;
        let mut node = NodeInfo::new(
            "node-a",
            ResourceVector::new(8000, 32768, 1),
            &gpu_labels(total, 1),
        );
        let req = ResReq::fractional(100, 256, total - 1, 1);

        let mut pod = fractional_pod("big", total - 1);
        pod.res_req = req;
        assert!(node.is_task_allocatable(&pod));

        pod.gpu_groups = vec!["group-1".to_string()];
        node.add_allocated_task(&pod);

        let second = PodInfo::new(
            "default",
            "big-2",
            "default/gang",
            ResReq::fractional(100, 256, total - 1, 1),
        );
        assert!(!node.is_task_allocatable(&second));
        assert!(!node.is_task_fit_on_gpu_group(&second.res_req, "group-1"));
    }
}
