//! REST handlers for the scheduler status API

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use ganglet_core::{PodGroupInfo, PodGroupPhase};
use ganglet_session::MetricsSnapshot;
use ganglet_snapshot::{NodeInfo, Snapshot};

/// Per-node summary published after a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub idle_gpus: u32,
    pub used_gpus: u32,
    pub releasing_gpus: u32,
    pub physical_gpus: u32,
    pub gpu_memory_mib: u64,
    /// Committed VRAM per shared group
    pub shared_groups: BTreeMap<String, u64>,
}

impl From<&NodeInfo> for NodeReport {
    fn from(node: &NodeInfo) -> Self {
        Self {
            name: node.name.clone(),
            idle_gpus: node.idle.gpus,
            used_gpus: node.used.gpus,
            releasing_gpus: node.releasing.gpus,
            physical_gpus: node.physical_gpu_count(),
            gpu_memory_mib: node.gpu_memory_capacity(),
            shared_groups: node.allocated_shared.clone(),
        }
    }
}

/// Per-gang summary published after a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodGroupReport {
    pub id: String,
    pub queue: String,
    pub phase: String,
    pub min_member: u32,
    pub active: u32,
    pub total: u32,
    /// Why the gang is unschedulable, when it is
    pub message: Option<String>,
}

impl From<&PodGroupInfo> for PodGroupReport {
    fn from(group: &PodGroupInfo) -> Self {
        let message = if group.phase == PodGroupPhase::Unschedulable {
            Some(group.unschedulable_message())
        } else {
            None
        };
        Self {
            id: group.id.clone(),
            queue: group.queue.clone(),
            phase: group.phase.to_string(),
            min_member: group.min_member,
            active: group.active_count(),
            total: group.pods.len() as u32,
            message,
        }
    }
}

/// Everything the daemon publishes after one scheduling cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub session_uid: String,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub nodes: Vec<NodeReport>,
    pub pod_groups: Vec<PodGroupReport>,
    pub metrics: MetricsSnapshot,
}

impl CycleReport {
    /// Summarize a closed session
    pub fn from_snapshot(
        cycle: u64,
        session_uid: &str,
        snapshot: &Snapshot,
        metrics: MetricsSnapshot,
        duration_ms: u64,
    ) -> Self {
        let mut nodes: Vec<NodeReport> = snapshot.nodes.values().map(NodeReport::from).collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut pod_groups: Vec<PodGroupReport> =
            snapshot.pod_groups.values().map(PodGroupReport::from).collect();
        pod_groups.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            cycle,
            session_uid: session_uid.to_string(),
            finished_at: Some(Utc::now()),
            duration_ms,
            nodes,
            pod_groups,
            metrics,
        }
    }
}

/// Shared state behind the API handlers
pub type ApiState = Arc<RwLock<CycleReport>>;

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/nodes", get(get_nodes))
        .route("/api/v1/podgroups", get(get_pod_groups))
        .with_state(state)
}

/// Status summary response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub cycle: u64,
    pub session_uid: String,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub nodes: usize,
    pub pod_groups: usize,
    pub metrics: MetricsSnapshot,
}

async fn get_status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, StatusCode> {
    let report = state.read().await;
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        cycle: report.cycle,
        session_uid: report.session_uid.clone(),
        finished_at: report.finished_at,
        duration_ms: report.duration_ms,
        nodes: report.nodes.len(),
        pod_groups: report.pod_groups.len(),
        metrics: report.metrics.clone(),
    }))
}

async fn get_nodes(State(state): State<ApiState>) -> Json<Vec<NodeReport>> {
    let report = state.read().await;
    Json(report.nodes.clone())
}

async fn get_pod_groups(State(state): State<ApiState>) -> Json<Vec<PodGroupReport>> {
    let report = state.read().await;
    Json(report.pod_groups.clone())
}
