//! Cluster state file loading for the file-backed mode
//!
//! A real deployment feeds the cache from orchestrator watches; the
//! file-backed mode seeds it from a TOML description instead, which keeps
//! the daemon runnable standalone.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use ganglet_core::{
    GangletError, GangletResult, PodGroupInfo, PodInfo, QueueInfo, ResourceVector,
};
use ganglet_snapshot::Cache;

#[derive(Debug, Deserialize)]
pub struct ClusterStateFile {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
    #[serde(default)]
    pub pod_groups: Vec<PodGroupSpec>,
}

#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub cpu_millis: u64,
    #[serde(default)]
    pub memory_mib: u64,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSpec {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub deserved: Option<ResourceVector>,
}

#[derive(Debug, Deserialize)]
pub struct PodGroupSpec {
    pub namespace: String,
    pub name: String,
    pub queue: String,
    pub min_member: u32,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub staleness_grace_secs: Option<u64>,
    #[serde(default)]
    pub pods: Vec<PodSpec>,
}

#[derive(Debug, Deserialize)]
pub struct PodSpec {
    pub name: String,
    #[serde(default)]
    pub cpu_millis: u64,
    #[serde(default)]
    pub memory_mib: u64,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub gpu_memory_mib: Option<u64>,
    #[serde(default)]
    pub gpu_devices: Option<u32>,
}

/// Parse a cluster state file and seed the cache from it
pub fn load_into_cache(path: &Path, cache: &mut Cache) -> GangletResult<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GangletError::Config(format!("Failed to read cluster state: {}", e)))?;
    let state: ClusterStateFile = toml::from_str(&content)
        .map_err(|e| GangletError::Config(format!("Failed to parse cluster state: {}", e)))?;

    for node in state.nodes {
        cache.upsert_node(
            &node.name,
            ResourceVector::new(node.cpu_millis, node.memory_mib, node.gpus),
            node.labels,
        );
    }

    for queue in state.queues {
        let mut info = QueueInfo::new(&queue.id, queue.parent.as_deref());
        if let Some(deserved) = queue.deserved {
            info.deserved = deserved;
        }
        cache.upsert_queue(info);
    }

    for group in state.pod_groups {
        let mut info = PodGroupInfo::new(&group.namespace, &group.name, &group.queue, group.min_member);
        info.priority = group.priority.unwrap_or(0);
        info.staleness_grace_secs = group.staleness_grace_secs;
        for pod in group.pods {
            let res_req = match pod.gpu_memory_mib {
                Some(memory) if memory > 0 => ganglet_core::ResReq::fractional(
                    pod.cpu_millis,
                    pod.memory_mib,
                    memory,
                    pod.gpu_devices.unwrap_or(1),
                ),
                _ => ganglet_core::ResReq::whole(pod.cpu_millis, pod.memory_mib, pod.gpus),
            };
            info.add_pod(PodInfo::new(&group.namespace, &pod.name, &info.id, res_req));
        }
        cache.upsert_pod_group(info);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_state() {
        let toml_str = r#"
[[nodes]]
name = "node-a"
cpu_millis = 16000
memory_mib = 65536
gpus = 100

[nodes.labels]
"nvidia.com/gpu.memory" = "32600"
"nvidia.com/gpu.count" = "1"

[[queues]]
id = "team-a"
parent = "root"
deserved = { cpu_millis = 8000, memory_mib = 32768, gpus = 1 }

[[pod_groups]]
namespace = "default"
name = "training"
queue = "team-a"
min_member = 2

[[pod_groups.pods]]
name = "worker-0"
cpu_millis = 500
memory_mib = 1024
gpu_memory_mib = 8000

[[pod_groups.pods]]
name = "worker-1"
cpu_millis = 500
memory_mib = 1024
gpu_memory_mib = 8000
"#;
        let state: ClusterStateFile = toml::from_str(toml_str).unwrap();
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.pod_groups[0].pods.len(), 2);

        let mut cache = Cache::new();
        let dir = std::env::temp_dir().join("ganglet-state-test.toml");
        std::fs::write(&dir, toml_str).unwrap();
        load_into_cache(&dir, &mut cache).unwrap();
        std::fs::remove_file(&dir).ok();

        assert!(cache.pod("default/worker-0").is_some());
        let snapshot = cache.snapshot().unwrap();
        assert_eq!(snapshot.nodes["node-a"].idle.gpus, 1);
    }
}
