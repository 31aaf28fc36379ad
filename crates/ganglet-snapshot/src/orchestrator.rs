//! Orchestrator client seam and the requests emitted at commit time

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use ganglet_core::{GangletResult, GpuGroupId, PodStatus};

use crate::cache::Cache;

/// Request to bind one pod to its selected node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    /// Pod uid
    pub pod_uid: String,
    /// Selected node
    pub node_name: String,
    /// Shared-GPU tenancies selected for the pod, empty for whole-GPU binds
    pub gpu_groups: Vec<GpuGroupId>,
    /// Annotations added by bind-request mutators
    pub annotations: HashMap<String, String>,
}

/// Reason code attached to an eviction request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionReason {
    /// The gang fell below min_member past its grace period
    StaleJob,
    /// A higher-priority job preempted the pod
    Preempted,
    /// A queue reclaimed over-quota resources
    Reclaimed,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvictionReason::StaleJob => "StaleJob",
            EvictionReason::Preempted => "Preempted",
            EvictionReason::Reclaimed => "Reclaimed",
        };
        write!(f, "{}", s)
    }
}

/// Request to evict one pod
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionRequest {
    /// Pod uid
    pub pod_uid: String,
    /// Reason code
    pub reason: EvictionReason,
    /// Human-readable message recorded on the pod event
    pub message: String,
}

/// Client seam toward the orchestration platform
///
/// Implementations realize bind and eviction requests against the external
/// API. Failures are surfaced for reconciliation; the scheduler never rolls
/// back a committed statement over them.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Realize a bind request
    async fn bind(&self, request: &BindRequest) -> GangletResult<()>;

    /// Realize an eviction request
    async fn evict(&self, request: &EvictionRequest) -> GangletResult<()>;

    /// Client name for logs
    fn name(&self) -> &'static str;
}

/// In-process orchestrator that applies requests straight back into the cache
///
/// Used by the daemon's file-backed mode and by tests; a real deployment
/// substitutes an API-backed client.
pub struct LocalCluster {
    cache: Arc<Mutex<Cache>>,
}

impl LocalCluster {
    pub fn new(cache: Arc<Mutex<Cache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Orchestrator for LocalCluster {
    async fn bind(&self, request: &BindRequest) -> GangletResult<()> {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.apply_bind(request, PodStatus::Bound)?;
        info!(
            pod = %request.pod_uid,
            node = %request.node_name,
            groups = ?request.gpu_groups,
            "Bound pod"
        );
        Ok(())
    }

    async fn evict(&self, request: &EvictionRequest) -> GangletResult<()> {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.apply_eviction(request)?;
        debug!(pod = %request.pod_uid, reason = %request.reason, "Evicted pod");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local-cluster"
    }
}
