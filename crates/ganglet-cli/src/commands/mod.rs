//! CLI commands implementation

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("daemon returned {}", response.status());
        }
        Ok(response.json().await?)
    }
}

/// Metrics block of the status response
#[derive(Debug, Deserialize)]
pub struct MetricsResponse {
    pub pods_bound: u64,
    pub pods_pipelined: u64,
    pub pods_evicted: u64,
    pub gangs_admitted: u64,
    pub gangs_unschedulable: u64,
    pub stale_gangs_evicted: u64,
    pub schedule_duration_ms_sum: u64,
    pub schedule_duration_count: u64,
    pub last_cycle_ms: u64,
    pub cycles: u64,
}

/// Status response from the daemon
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub cycle: u64,
    pub session_uid: String,
    pub duration_ms: u64,
    pub nodes: usize,
    pub pod_groups: usize,
    pub metrics: MetricsResponse,
}

/// Node response from the daemon
#[derive(Debug, Deserialize)]
pub struct NodeResponse {
    pub name: String,
    pub idle_gpus: u32,
    pub used_gpus: u32,
    pub releasing_gpus: u32,
    pub physical_gpus: u32,
    pub gpu_memory_mib: u64,
    pub shared_groups: BTreeMap<String, u64>,
}

/// Pod-group response from the daemon
#[derive(Debug, Deserialize)]
pub struct PodGroupResponse {
    pub id: String,
    pub queue: String,
    pub phase: String,
    pub min_member: u32,
    pub active: u32,
    pub total: u32,
    pub message: Option<String>,
}

/// Show scheduler status and cycle metrics
pub async fn status(client: &ApiClient) -> Result<()> {
    let status: StatusResponse = client.get("/api/v1/status").await?;

    println!("ganglet daemon v{}", status.version);
    println!("cycle:           {} ({} ms)", status.cycle, status.duration_ms);
    println!("session:         {}", status.session_uid);
    println!("nodes:           {}", status.nodes);
    println!("pod-groups:      {}", status.pod_groups);
    println!("gangs admitted:  {}", status.metrics.gangs_admitted);
    println!("unschedulable:   {}", status.metrics.gangs_unschedulable);
    println!("stale evictions: {}", status.metrics.stale_gangs_evicted);
    println!(
        "pods bound/pipelined/evicted: {}/{}/{}",
        status.metrics.pods_bound, status.metrics.pods_pipelined, status.metrics.pods_evicted
    );
    if status.metrics.schedule_duration_count > 0 {
        println!(
            "avg schedule latency: {} ms",
            status.metrics.schedule_duration_ms_sum / status.metrics.schedule_duration_count
        );
    }
    Ok(())
}

/// Show node GPU accounting
pub async fn nodes(client: &ApiClient) -> Result<()> {
    let nodes: Vec<NodeResponse> = client.get("/api/v1/nodes").await?;

    if nodes.is_empty() {
        println!("No nodes in the last snapshot");
        return Ok(());
    }

    println!(
        "{:<24} {:>8} {:>6} {:>6} {:>10} {:>12}",
        "NAME", "PHYSICAL", "IDLE", "USED", "RELEASING", "VRAM(MiB)"
    );
    for node in &nodes {
        println!(
            "{:<24} {:>8} {:>6} {:>6} {:>10} {:>12}",
            node.name,
            node.physical_gpus,
            node.idle_gpus,
            node.used_gpus,
            node.releasing_gpus,
            node.gpu_memory_mib
        );
        for (group, memory) in &node.shared_groups {
            println!("  group {} -> {} MiB", group, memory);
        }
    }
    Ok(())
}

/// Show pod-groups and their phases
pub async fn podgroups(client: &ApiClient) -> Result<()> {
    let groups: Vec<PodGroupResponse> = client.get("/api/v1/podgroups").await?;

    if groups.is_empty() {
        println!("No pod-groups in the last snapshot");
        return Ok(());
    }

    println!(
        "{:<32} {:<16} {:<14} {:>10} {:>8}",
        "ID", "QUEUE", "PHASE", "MIN/TOTAL", "ACTIVE"
    );
    for group in &groups {
        println!(
            "{:<32} {:<16} {:<14} {:>7}/{:<2} {:>8}",
            group.id,
            group.queue,
            group.phase,
            group.min_member,
            group.total,
            group.active
        );
        if let Some(message) = &group.message {
            println!("  {}", message);
        }
    }
    Ok(())
}
