//! Shared fixtures for session tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ganglet_core::{
    labels, PodGroupInfo, PodInfo, PodStatus, ResReq, ResourceVector, SchedulerParams,
};
use ganglet_snapshot::Cache;

use crate::metrics::Metrics;
use crate::session::Session;

pub fn gpu_labels(memory_mib: u64, physical: u32) -> HashMap<String, String> {
    let mut node_labels = HashMap::new();
    node_labels.insert(labels::GPU_MEMORY_LABEL.to_string(), memory_mib.to_string());
    node_labels.insert(labels::GPU_COUNT_LABEL.to_string(), physical.to_string());
    node_labels
}

/// One generously sized node with shared-GPU labels
pub fn cluster_with_shared_node(
    name: &str,
    memory_mib: u64,
    physical: u32,
    advertised: u32,
) -> Arc<Mutex<Cache>> {
    let mut cache = Cache::new();
    cache.upsert_node(
        name,
        ResourceVector::new(64000, 262144, advertised),
        gpu_labels(memory_mib, physical),
    );
    Arc::new(Mutex::new(cache))
}

/// Two identical CPU-only nodes
pub fn two_cpu_nodes(first: &str, second: &str) -> Arc<Mutex<Cache>> {
    let mut cache = Cache::new();
    cache.upsert_node(first, ResourceVector::new(8000, 32768, 0), HashMap::new());
    cache.upsert_node(second, ResourceVector::new(8000, 32768, 0), HashMap::new());
    Arc::new(Mutex::new(cache))
}

pub fn fractional_pod(name: &str, memory_mib: u64, devices: u32) -> PodInfo {
    PodInfo::new(
        "default",
        name,
        "default/gang",
        ResReq::fractional(100, 256, memory_mib, devices),
    )
}

pub fn whole_pod(name: &str, cpu_millis: u64, memory_mib: u64, gpus: u32) -> PodInfo {
    PodInfo::new(
        "default",
        name,
        "default/gang",
        ResReq::whole(cpu_millis, memory_mib, gpus),
    )
}

pub fn bound_pod(name: &str, node: &str) -> PodInfo {
    let mut pod = whole_pod(name, 100, 128, 0);
    pod.status = PodStatus::Bound;
    pod.node_name = Some(node.to_string());
    pod
}

/// Assemble a gang, rehoming every pod onto it
pub fn make_gang(
    namespace: &str,
    name: &str,
    queue: &str,
    min_member: u32,
    pods: Vec<PodInfo>,
) -> PodGroupInfo {
    let mut group = PodGroupInfo::new(namespace, name, queue, min_member);
    for mut pod in pods {
        pod.pod_group = group.id.clone();
        group.add_pod(pod);
    }
    group
}

/// Register a gang with both the live session and its backing cache
pub fn insert_gang(session: &mut Session, gang: PodGroupInfo) {
    if let Ok(mut cache) = session.cache_handle().lock() {
        cache.upsert_pod_group(gang.clone());
    }
    session.snapshot.pod_groups.insert(gang.id.clone(), gang);
    session.snapshot.reindex();
}

pub fn open_session(cache: Arc<Mutex<Cache>>) -> Session {
    open_session_with(cache, |_| {})
}

pub fn open_session_with(
    cache: Arc<Mutex<Cache>>,
    configure: impl FnOnce(&mut SchedulerParams),
) -> Session {
    let mut params = SchedulerParams::default();
    configure(&mut params);
    Session::open(cache, params, Arc::new(Metrics::new())).expect("session open failed")
}
