//! Pod scheduling state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::labels;
use crate::resources::{ResReq, ResourceVector};

/// Identifier of a pod-group (gang)
pub type PodGroupId = String;

/// Opaque identifier of a shared-GPU tenancy
///
/// All tasks co-tenanted on one physical GPU share a group id. Fresh ids are
/// minted as random uuids when a whole GPU is first claimed for sharing.
pub type GpuGroupId = String;

/// Lifecycle status of a pod as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    /// Awaiting placement
    Pending,
    /// Tentatively placed by an uncommitted statement
    Allocated,
    /// Tentatively placed onto resources that are still releasing
    Pipelined,
    /// Placement committed, bind request in flight
    Binding,
    /// Bound to a node
    Bound,
    /// Running on its node
    Running,
    /// Scheduled to vacate its node
    Releasing,
    /// Terminated successfully
    Succeeded,
    /// Terminated with an error
    Failed,
}

impl PodStatus {
    /// Whether the pod currently occupies node resources
    pub fn is_materialized(&self) -> bool {
        matches!(
            self,
            PodStatus::Binding | PodStatus::Bound | PodStatus::Running | PodStatus::Releasing
        )
    }

    /// Whether the pod counts toward its gang's active member count
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PodStatus::Allocated
                | PodStatus::Pipelined
                | PodStatus::Binding
                | PodStatus::Bound
                | PodStatus::Running
        )
    }

    /// Whether the pod reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodStatus::Succeeded | PodStatus::Failed)
    }
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodStatus::Pending => "Pending",
            PodStatus::Allocated => "Allocated",
            PodStatus::Pipelined => "Pipelined",
            PodStatus::Binding => "Binding",
            PodStatus::Bound => "Bound",
            PodStatus::Running => "Running",
            PodStatus::Releasing => "Releasing",
            PodStatus::Succeeded => "Succeeded",
            PodStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// A schedulable unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    /// Pod uid, unique across the cluster
    pub uid: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Owning pod-group
    pub pod_group: PodGroupId,
    /// Current status
    pub status: PodStatus,
    /// Node assignment, if any
    pub node_name: Option<String>,
    /// Resource request
    pub res_req: ResReq,
    /// Shared-GPU tenancies, set once a fractional allocation selects them
    pub gpu_groups: Vec<GpuGroupId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl PodInfo {
    /// Create a pending pod
    pub fn new(namespace: &str, name: &str, pod_group: &str, res_req: ResReq) -> Self {
        Self {
            uid: format!("{}/{}", namespace, name),
            namespace: namespace.to_string(),
            name: name.to_string(),
            pod_group: pod_group.to_string(),
            status: PodStatus::Pending,
            node_name: None,
            res_req,
            gpu_groups: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Qualified `namespace/name` of the pod
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Parse the resource request from pod resource fields and annotations
    ///
    /// `gpu-memory` turns the request fractional; `gpu-device-count` widens it
    /// across several shared devices. A well-formed pod never carries both a
    /// whole-GPU resource and a `gpu-memory` annotation (the admission webhook
    /// enforces the exclusion).
    pub fn parse_res_req(
        cpu_millis: u64,
        memory_mib: u64,
        whole_gpus: u32,
        annotations: &HashMap<String, String>,
    ) -> ResReq {
        let gpu_memory = annotations
            .get(labels::GPU_MEMORY_ANNOTATION)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if gpu_memory > 0 {
            let devices = annotations
                .get(labels::GPU_DEVICE_COUNT_ANNOTATION)
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1);
            ResReq::fractional(cpu_millis, memory_mib, gpu_memory, devices)
        } else {
            ResReq::whole(cpu_millis, memory_mib, whole_gpus)
        }
    }

    /// Whole-dimension resources this pod charges against a node
    pub fn node_footprint(&self) -> ResourceVector {
        self.res_req.vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fractional_request() {
        let mut annotations = HashMap::new();
        annotations.insert(labels::GPU_MEMORY_ANNOTATION.to_string(), "8000".to_string());
        annotations.insert(
            labels::GPU_DEVICE_COUNT_ANNOTATION.to_string(),
            "2".to_string(),
        );

        let req = PodInfo::parse_res_req(500, 1024, 0, &annotations);
        assert!(req.is_fractional());
        assert_eq!(req.gpu_memory(), 8000);
        assert_eq!(req.gpu_device_count(), 2);
    }

    #[test]
    fn test_parse_whole_request() {
        let req = PodInfo::parse_res_req(500, 1024, 2, &HashMap::new());
        assert!(!req.is_fractional());
        assert_eq!(req.vector.gpus, 2);
    }

    #[test]
    fn test_device_count_defaults_to_one() {
        let mut annotations = HashMap::new();
        annotations.insert(labels::GPU_MEMORY_ANNOTATION.to_string(), "4000".to_string());

        let req = PodInfo::parse_res_req(0, 0, 0, &annotations);
        assert_eq!(req.gpu_device_count(), 1);
    }

    #[test]
    fn test_status_classification() {
        assert!(PodStatus::Running.is_materialized());
        assert!(PodStatus::Releasing.is_materialized());
        assert!(!PodStatus::Releasing.is_active());
        assert!(PodStatus::Pipelined.is_active());
        assert!(!PodStatus::Pipelined.is_materialized());
        assert!(PodStatus::Failed.is_terminal());
    }
}
