//! Hierarchical resource queues

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::resources::ResourceVector;

/// Queue identifier
pub type QueueId = String;

/// A node in the queue hierarchy
///
/// Deserved, fair-share and allocated vectors are computed by fairness
/// plugins each cycle; the queue only stores them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue id
    pub id: QueueId,
    /// Display name
    pub name: String,
    /// Parent queue; None for the root
    pub parent: Option<QueueId>,
    /// Whether jobs attach directly to this queue
    pub is_leaf: bool,
    /// Resources the queue deserves under the fairness policy
    pub deserved: ResourceVector,
    /// Fair share computed for the current cycle
    pub fair_share: ResourceVector,
    /// Resources currently allocated to the queue's jobs
    pub allocated: ResourceVector,
    /// Relative weight when dividing over-quota headroom
    pub over_quota_weight: u32,
}

impl QueueInfo {
    /// Create a leaf queue under `parent`
    pub fn new(id: &str, parent: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            parent: parent.map(|p| p.to_string()),
            is_leaf: true,
            deserved: ResourceVector::default(),
            fair_share: ResourceVector::default(),
            allocated: ResourceVector::default(),
            over_quota_weight: 1,
        }
    }

    /// Whether jobs attach directly to this queue
    pub fn is_leaf_queue(&self) -> bool {
        self.is_leaf
    }

    /// Ratio of allocated to deserved resources on the dominant dimension
    ///
    /// Queues with no deserved resources sort last.
    pub fn deserved_ratio(&self) -> f64 {
        let mut ratio: f64 = 0.0;
        if self.deserved.cpu_millis > 0 {
            ratio = ratio.max(self.allocated.cpu_millis as f64 / self.deserved.cpu_millis as f64);
        }
        if self.deserved.memory_mib > 0 {
            ratio = ratio.max(self.allocated.memory_mib as f64 / self.deserved.memory_mib as f64);
        }
        if self.deserved.gpus > 0 {
            ratio = ratio.max(self.allocated.gpus as f64 / self.deserved.gpus as f64);
        }
        if self.deserved.is_empty() {
            ratio = f64::MAX;
        }
        ratio
    }
}

/// Aggregated per-queue resource usage for one cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterUsage {
    /// Allocated resources keyed by queue id
    pub queues: HashMap<QueueId, ResourceVector>,
}

impl ClusterUsage {
    /// Charge `vector` against `queue`
    pub fn charge(&mut self, queue: &str, vector: &ResourceVector) {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .add(vector);
    }

    /// Allocated resources of `queue`
    pub fn allocated(&self, queue: &str) -> ResourceVector {
        self.queues.get(queue).copied().unwrap_or_default()
    }
}
