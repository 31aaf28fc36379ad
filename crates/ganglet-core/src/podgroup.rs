//! Pod-group (gang) scheduling state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::pod::{PodGroupId, PodInfo, PodStatus};

/// Why a task could not be placed on a particular node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitReason {
    /// Whole-dimension resources did not fit
    InsufficientResources,
    /// No shared GPU group or idle whole GPU could satisfy the VRAM request
    InsufficientGpuMemory,
    /// The node advertises GPUs but carries no VRAM capacity label
    GpuIneligibleNode,
    /// A predicate plugin rejected the node
    PredicateFailed(String),
    /// A capacity plugin rejected the allocation for quota reasons
    OverCapacity(String),
}

impl std::fmt::Display for FitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitReason::InsufficientResources => write!(f, "insufficient resources"),
            FitReason::InsufficientGpuMemory => {
                write!(f, "insufficient GPU memory on all groups; no idle whole GPUs")
            }
            FitReason::GpuIneligibleNode => write!(f, "node is not eligible for GPU workloads"),
            FitReason::PredicateFailed(msg) => write!(f, "predicate failed: {}", msg),
            FitReason::OverCapacity(msg) => write!(f, "over capacity: {}", msg),
        }
    }
}

/// Structured per-node placement failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitError {
    /// Node that rejected the task
    pub node_name: String,
    /// Rejection reason
    pub reason: FitReason,
}

impl FitError {
    pub fn new(node_name: &str, reason: FitReason) -> Self {
        Self {
            node_name: node_name.to_string(),
            reason,
        }
    }
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}: {}", self.node_name, self.reason)
    }
}

/// Per-node fit errors collected for one task during a cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitErrors {
    /// Errors keyed by node name
    pub nodes: BTreeMap<String, FitError>,
}

impl FitErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fit error for a node
    pub fn set_node_error(&mut self, node_name: &str, error: FitError) {
        self.nodes.insert(node_name.to_string(), error);
    }

    /// Human-readable summary across all rejecting nodes
    pub fn message(&self) -> String {
        if self.nodes.is_empty() {
            return "no nodes available".to_string();
        }
        self.nodes
            .values()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Derived lifecycle phase of a pod-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodGroupPhase {
    /// Waiting for its first admission
    Pending,
    /// At least min_member tasks are active
    Running,
    /// The last cycle could not admit the gang
    Unschedulable,
    /// Active members fell below min_member past the grace period
    Stale,
}

impl std::fmt::Display for PodGroupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodGroupPhase::Pending => "Pending",
            PodGroupPhase::Running => "Running",
            PodGroupPhase::Unschedulable => "Unschedulable",
            PodGroupPhase::Stale => "Stale",
        };
        write!(f, "{}", s)
    }
}

/// The gang: a set of pods scheduled atomically
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodGroupInfo {
    /// Pod-group id
    pub id: PodGroupId,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Owning queue
    pub queue: String,
    /// Priority class value; higher schedules first
    pub priority: i32,
    /// Minimum number of simultaneously allocatable members for admission
    pub min_member: u32,
    /// Whether the gang's tasks may be preempted once running
    pub preemptible: bool,
    /// Member pods keyed by uid, iterated deterministically
    pub pods: BTreeMap<String, PodInfo>,
    /// Per-task fit errors from the current cycle, keyed by pod uid
    pub task_fit_errors: HashMap<String, FitErrors>,
    /// Per-gang staleness grace in seconds; None falls back to the session
    /// default
    pub staleness_grace_secs: Option<u64>,
    /// When the cache first observed the gang below min_member
    pub below_min_since: Option<DateTime<Utc>>,
    /// Derived lifecycle phase
    pub phase: PodGroupPhase,
}

impl PodGroupInfo {
    /// Create an empty gang
    pub fn new(namespace: &str, name: &str, queue: &str, min_member: u32) -> Self {
        Self {
            id: format!("{}/{}", namespace, name),
            namespace: namespace.to_string(),
            name: name.to_string(),
            queue: queue.to_string(),
            priority: 0,
            min_member,
            preemptible: true,
            pods: BTreeMap::new(),
            task_fit_errors: HashMap::new(),
            staleness_grace_secs: None,
            below_min_since: None,
            phase: PodGroupPhase::Pending,
        }
    }

    /// Add a member pod
    pub fn add_pod(&mut self, pod: PodInfo) {
        self.pods.insert(pod.uid.clone(), pod);
    }

    /// Number of members counting toward gang admission
    pub fn active_count(&self) -> u32 {
        self.pods.values().filter(|p| p.status.is_active()).count() as u32
    }

    /// Pods awaiting placement, in uid order
    pub fn pending_pods(&self) -> Vec<&PodInfo> {
        self.pods
            .values()
            .filter(|p| p.status == PodStatus::Pending)
            .collect()
    }

    /// Whether the gang ever reached admission
    pub fn has_materialized_pods(&self) -> bool {
        self.pods.values().any(|p| p.status.is_materialized())
    }

    /// Record why a task failed on the nodes tried this cycle
    pub fn set_task_fit_error(&mut self, pod_uid: &str, errors: FitErrors) {
        self.task_fit_errors.insert(pod_uid.to_string(), errors);
    }

    /// Human-readable explanation of why the gang is unschedulable
    pub fn unschedulable_message(&self) -> String {
        if self.task_fit_errors.is_empty() {
            return format!(
                "pod-group {} could not admit {} of {} members",
                self.id,
                self.min_member,
                self.pods.len()
            );
        }
        let mut parts: Vec<String> = self
            .task_fit_errors
            .iter()
            .map(|(uid, errs)| format!("{}: {}", uid, errs.message()))
            .collect();
        parts.sort();
        parts.join("; ")
    }

    /// Recompute the derived phase from member statuses
    pub fn refresh_phase(&mut self) {
        if self.phase == PodGroupPhase::Stale {
            return;
        }
        if self.active_count() >= self.min_member {
            self.phase = PodGroupPhase::Running;
        } else if !self.has_materialized_pods() && self.phase != PodGroupPhase::Unschedulable {
            self.phase = PodGroupPhase::Pending;
        }
    }
}
