//! Cluster cache: observed state, snapshot production and commit outboxes

use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, warn};

use ganglet_core::labels;
use ganglet_core::{
    GangletError, GangletResult, GpuGroupId, PodGroupInfo, PodInfo, PodStatus, QueueInfo,
    ResourceVector,
};

use crate::node::NodeInfo;
use crate::orchestrator::{BindRequest, EvictionReason, EvictionRequest};
use crate::snapshot::{Snapshot, TopologyInfo};

/// A node as observed from the orchestrator
#[derive(Debug, Clone)]
pub struct ObservedNode {
    /// Node name
    pub name: String,
    /// Advertised allocatable resources
    pub allocatable: ResourceVector,
    /// Node labels
    pub labels: HashMap<String, String>,
}

/// The scheduler's view of the cluster between cycles
///
/// The orchestrator is authoritative; the cache only mirrors what watches
/// delivered, carries gang staleness markers across cycles, and buffers the
/// bind/eviction requests committed statements emit.
#[derive(Debug, Default)]
pub struct Cache {
    nodes: HashMap<String, ObservedNode>,
    pod_groups: HashMap<String, PodGroupInfo>,
    queues: HashMap<String, QueueInfo>,
    config_maps: HashMap<String, HashMap<String, String>>,
    topologies: Vec<TopologyInfo>,
    node_pool: String,
    bind_outbox: Vec<BindRequest>,
    eviction_outbox: Vec<EvictionRequest>,
}

impl Cache {
    /// Create an empty cache matching all node pools
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict snapshots to nodes of one pool; empty matches all nodes
    pub fn with_node_pool(mut self, node_pool: &str) -> Self {
        self.node_pool = node_pool.to_string();
        self
    }

    /// Record a node observation
    pub fn upsert_node(
        &mut self,
        name: &str,
        allocatable: ResourceVector,
        node_labels: HashMap<String, String>,
    ) {
        self.nodes.insert(
            name.to_string(),
            ObservedNode {
                name: name.to_string(),
                allocatable,
                labels: node_labels,
            },
        );
    }

    /// Drop a node observation
    pub fn remove_node(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    /// Record a pod-group observation, keeping the staleness marker it
    /// accumulated in earlier cycles
    pub fn upsert_pod_group(&mut self, mut group: PodGroupInfo) {
        if let Some(existing) = self.pod_groups.get(&group.id) {
            if group.below_min_since.is_none() {
                group.below_min_since = existing.below_min_since;
            }
        }
        self.pod_groups.insert(group.id.clone(), group);
    }

    /// Drop a pod-group observation
    pub fn remove_pod_group(&mut self, id: &str) {
        self.pod_groups.remove(id);
    }

    /// Record a queue observation
    pub fn upsert_queue(&mut self, queue: QueueInfo) {
        self.queues.insert(queue.id.clone(), queue);
    }

    /// Record a config map observation
    pub fn upsert_config_map(&mut self, name: &str, data: HashMap<String, String>) {
        self.config_maps.insert(name.to_string(), data);
    }

    /// Record a topology observation
    pub fn upsert_topology(&mut self, topology: TopologyInfo) {
        self.topologies.retain(|t| t.name != topology.name);
        self.topologies.push(topology);
    }

    /// Drop a single pod, e.g. after an external deletion
    pub fn remove_pod(&mut self, pod_uid: &str) {
        for group in self.pod_groups.values_mut() {
            group.pods.remove(pod_uid);
        }
    }

    /// Look up a pod across all pod-groups
    pub fn pod(&self, pod_uid: &str) -> Option<&PodInfo> {
        self.pod_groups.values().find_map(|g| g.pods.get(pod_uid))
    }

    fn pod_mut(&mut self, pod_uid: &str) -> Option<&mut PodInfo> {
        self.pod_groups
            .values_mut()
            .find_map(|g| g.pods.get_mut(pod_uid))
    }

    /// Pod-groups currently observed
    pub fn pod_groups(&self) -> &HashMap<String, PodGroupInfo> {
        &self.pod_groups
    }

    /// Produce the immutable cluster view for one scheduling cycle
    ///
    /// Applies the node construction rules: idle starts at allocatable, the
    /// time-slicing clamp lands in the node constructor, materialized pods
    /// are replayed onto their nodes, and shared-GPU tenancies are rebuilt
    /// from the pods' recorded groups. Gang staleness markers are refreshed
    /// as a side effect so they survive across cycles.
    pub fn snapshot(&mut self) -> GangletResult<Snapshot> {
        self.refresh_staleness_markers();

        let mut snapshot = Snapshot {
            queues: self.queues.clone(),
            config_maps: self.config_maps.clone(),
            topologies: self.topologies.clone(),
            ..Snapshot::default()
        };

        for observed in self.nodes.values() {
            if !self.node_pool.is_empty() {
                let pool = observed.labels.get(labels::NODE_POOL_LABEL);
                if pool.map(String::as_str) != Some(self.node_pool.as_str()) {
                    continue;
                }
            }
            let node = NodeInfo::new(&observed.name, observed.allocatable, &observed.labels);
            if !node.gpu_eligible() {
                warn!(
                    node = %observed.name,
                    "Node advertises GPUs without a gpu.memory label; marked GPU-ineligible"
                );
            }
            snapshot.nodes.insert(observed.name.clone(), node);
        }

        for group in self.pod_groups.values() {
            let mut group = group.clone();
            group.task_fit_errors.clear();
            group.refresh_phase();

            for pod in group.pods.values() {
                if !pod.status.is_materialized() {
                    continue;
                }
                let Some(node_name) = pod.node_name.as_deref() else {
                    return Err(GangletError::Snapshot(format!(
                        "materialized pod {} has no node assignment",
                        pod.uid
                    )));
                };
                let Some(node) = snapshot.nodes.get_mut(node_name) else {
                    debug!(pod = %pod.uid, node = node_name, "Pod on a node outside the snapshot");
                    continue;
                };
                node.add_allocated_task(pod);
                if pod.status == PodStatus::Releasing {
                    node.evict_task(pod);
                }
                snapshot
                    .queue_usage
                    .charge(&group.queue, &pod.node_footprint());
            }

            snapshot.pod_groups.insert(group.id.clone(), group);
        }

        for queue in snapshot.queues.values_mut() {
            queue.allocated = snapshot.queue_usage.allocated(&queue.id);
        }

        snapshot.reindex();
        Ok(snapshot)
    }

    fn refresh_staleness_markers(&mut self) {
        for group in self.pod_groups.values_mut() {
            let active = group.active_count();
            if group.has_materialized_pods() && active < group.min_member {
                if group.below_min_since.is_none() {
                    debug!(
                        pod_group = %group.id,
                        active = active,
                        min_member = group.min_member,
                        "Gang fell below min member"
                    );
                    group.below_min_since = Some(Utc::now());
                }
            } else {
                group.below_min_since = None;
            }
        }
    }

    /// Record a committed allocation: the pod turns Binding and a bind
    /// request enters the outbox
    ///
    /// Binding to a node the cache no longer observes is rejected; the
    /// session retries against a fresh snapshot next cycle.
    pub fn bind(
        &mut self,
        pod_uid: &str,
        node_name: &str,
        gpu_groups: Vec<GpuGroupId>,
        annotations: HashMap<String, String>,
    ) -> GangletResult<()> {
        if !self.nodes.contains_key(node_name) {
            return Err(GangletError::NodeNotFound(node_name.to_string()));
        }
        let pod = self
            .pod_mut(pod_uid)
            .ok_or_else(|| GangletError::PodNotFound(pod_uid.to_string()))?;
        pod.status = PodStatus::Binding;
        pod.node_name = Some(node_name.to_string());
        pod.gpu_groups = gpu_groups.clone();

        self.bind_outbox.push(BindRequest {
            pod_uid: pod_uid.to_string(),
            node_name: node_name.to_string(),
            gpu_groups,
            annotations,
        });
        Ok(())
    }

    /// Record a committed eviction: the pod turns Releasing and an eviction
    /// request enters the outbox
    pub fn evict(
        &mut self,
        pod_uid: &str,
        reason: EvictionReason,
        message: &str,
    ) -> GangletResult<()> {
        let pod = self
            .pod_mut(pod_uid)
            .ok_or_else(|| GangletError::PodNotFound(pod_uid.to_string()))?;
        pod.status = PodStatus::Releasing;

        self.eviction_outbox.push(EvictionRequest {
            pod_uid: pod_uid.to_string(),
            reason,
            message: message.to_string(),
        });
        Ok(())
    }

    /// Record a pod-group's derived phase for the status surface
    ///
    /// Fails when the gang was deleted externally since the snapshot was
    /// taken.
    pub fn record_pod_group_phase(
        &mut self,
        id: &str,
        phase: ganglet_core::PodGroupPhase,
        message: &str,
    ) -> GangletResult<()> {
        let group = self
            .pod_groups
            .get_mut(id)
            .ok_or_else(|| GangletError::PodGroupNotFound(id.to_string()))?;
        group.phase = phase;
        if !message.is_empty() {
            debug!(pod_group = id, phase = %phase, message = message, "Pod-group status");
        }
        Ok(())
    }

    /// Drain the buffered bind and eviction requests
    pub fn take_outbox(&mut self) -> (Vec<BindRequest>, Vec<EvictionRequest>) {
        (
            std::mem::take(&mut self.bind_outbox),
            std::mem::take(&mut self.eviction_outbox),
        )
    }

    /// Finalize a bind that the orchestrator accepted
    pub fn apply_bind(&mut self, request: &BindRequest, status: PodStatus) -> GangletResult<()> {
        let pod = self
            .pod_mut(&request.pod_uid)
            .ok_or_else(|| GangletError::PodNotFound(request.pod_uid.clone()))?;
        pod.status = status;
        pod.node_name = Some(request.node_name.clone());
        pod.gpu_groups = request.gpu_groups.clone();
        Ok(())
    }

    /// Finalize an eviction that the orchestrator accepted
    pub fn apply_eviction(&mut self, request: &EvictionRequest) -> GangletResult<()> {
        if self.pod(&request.pod_uid).is_none() {
            return Err(GangletError::PodNotFound(request.pod_uid.clone()));
        }
        self.remove_pod(&request.pod_uid);
        Ok(())
    }
}
