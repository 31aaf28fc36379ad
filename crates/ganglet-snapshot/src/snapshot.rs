//! The immutable per-cycle cluster view

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use ganglet_core::{ClusterUsage, PodGroupId, PodGroupInfo, QueueId, QueueInfo};

use crate::node::NodeInfo;

/// Topology hint advertised by the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyInfo {
    /// Topology name
    pub name: String,
    /// Label keys from the widest to the narrowest level
    pub levels: Vec<String>,
}

/// A consistent view of the cluster at a single logical instant
///
/// The session exclusively owns the snapshot for one cycle. Nothing outside
/// the session mutates it; the statement is the only mutation path.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Gangs keyed by pod-group id
    pub pod_groups: HashMap<PodGroupId, PodGroupInfo>,
    /// Nodes keyed by name, time-slicing clamp already applied
    pub nodes: HashMap<String, NodeInfo>,
    /// Queues keyed by id
    pub queues: HashMap<QueueId, QueueInfo>,
    /// Per-queue allocated resources
    pub queue_usage: ClusterUsage,
    /// Config maps observed for plugin consumption
    pub config_maps: HashMap<String, HashMap<String, String>>,
    /// Topology hints
    pub topologies: Vec<TopologyInfo>,
    /// Pod uid to owning pod-group id
    pub pod_index: HashMap<String, PodGroupId>,
}

impl Snapshot {
    /// Rebuild the pod uid index after pod-groups change
    pub fn reindex(&mut self) {
        self.pod_index.clear();
        for (group_id, group) in &self.pod_groups {
            for uid in group.pods.keys() {
                self.pod_index.insert(uid.clone(), group_id.clone());
            }
        }
    }

    /// Look up a pod by uid
    pub fn pod(&self, uid: &str) -> Option<&ganglet_core::PodInfo> {
        let group_id = self.pod_index.get(uid)?;
        self.pod_groups.get(group_id)?.pods.get(uid)
    }

    /// Look up a pod mutably by uid
    pub fn pod_mut(&mut self, uid: &str) -> Option<&mut ganglet_core::PodInfo> {
        let group_id = self.pod_index.get(uid)?.clone();
        self.pod_groups.get_mut(&group_id)?.pods.get_mut(uid)
    }

    /// Node names in lexicographic order
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }
}
