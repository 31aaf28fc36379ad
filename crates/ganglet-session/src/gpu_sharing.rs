//! Fractional GPU allocation onto shared-GPU groups

use tracing::debug;
use uuid::Uuid;

use ganglet_core::{GpuGroupId, PodInfo};
use ganglet_snapshot::{GpuCandidate, NodeInfo};

use crate::statement::Statement;

struct GpuSelection {
    groups: Vec<GpuGroupId>,
    releasing: bool,
}

/// Place a fractional GPU task onto a node through the statement
///
/// Walks the fitting candidates best-first, accumulating one group per
/// requested device. Any releasing component downgrades the whole placement
/// to a pipeline. Returns false when selection or recording fails; the
/// statement state is unchanged in that case.
pub fn allocate_fractional_task_to_node(
    stmt: &mut Statement<'_>,
    pod_uid: &str,
    node_name: &str,
    pipeline_only: bool,
) -> bool {
    let Some(pod) = stmt.session().snapshot.pod(pod_uid).cloned() else {
        return false;
    };
    let Some(node) = stmt.session().snapshot.nodes.get(node_name) else {
        return false;
    };
    debug!(
        pod = %pod.qualified_name(),
        node = node_name,
        gpu_memory = pod.res_req.gpu_memory(),
        pipeline_only = pipeline_only,
        "Selecting shared GPUs"
    );

    let fitting = stmt.session().fitting_gpus(node, &pod);
    let Some(selection) = preferable_gpus_for_sharing(&fitting, node, &pod, pipeline_only) else {
        debug!(
            pod = %pod.qualified_name(),
            node = node_name,
            "No preferable GPU found for sharing"
        );
        return false;
    };

    let pipeline_only = pipeline_only || selection.releasing;
    debug!(
        pod = %pod.qualified_name(),
        node = node_name,
        groups = ?selection.groups,
        pipeline_only = pipeline_only,
        "Selected GPU groups"
    );

    let recorded = if pipeline_only {
        stmt.pipeline_with_groups(pod_uid, node_name, Some(selection.groups))
    } else {
        stmt.allocate_with_groups(pod_uid, node_name, Some(selection.groups))
    };
    match recorded {
        Ok(()) => true,
        Err(e) => {
            debug!(
                pod = %pod.qualified_name(),
                node = node_name,
                error = %e,
                "Failed to record shared-GPU placement"
            );
            false
        }
    }
}

/// Accumulate groups along the fitting order until the device count is met
fn preferable_gpus_for_sharing(
    fitting: &[GpuCandidate],
    node: &NodeInfo,
    pod: &PodInfo,
    pipeline_only: bool,
) -> Option<GpuSelection> {
    let devices = pod.res_req.gpu_device_count().max(1) as usize;
    let mut selection = GpuSelection {
        groups: Vec::with_capacity(devices),
        releasing: false,
    };

    for candidate in fitting {
        match candidate {
            GpuCandidate::Whole => {
                let whole = whole_gpu_for_sharing(pod, node, pipeline_only);
                selection.releasing = selection.releasing || whole.releasing;
                selection.groups.extend(whole.groups);
            }
            GpuCandidate::Group(group) => {
                let enough_idle = node.enough_idle_resources_on_gpu(&pod.res_req, group);
                let allocatable = node.is_task_allocatable(pod);
                let group_releasing = !enough_idle || !allocatable;
                debug!(
                    pod = %pod.qualified_name(),
                    group = %group,
                    enough_idle = enough_idle,
                    allocatable = allocatable,
                    "Considering shared GPU group"
                );
                selection.releasing = selection.releasing || group_releasing;
                selection.groups.push(group.clone());
            }
        }
        if selection.groups.len() == devices {
            return Some(selection);
        }
    }
    None
}

/// Claim an unallocated whole GPU for sharing by minting a fresh group id
fn whole_gpu_for_sharing(pod: &PodInfo, node: &NodeInfo, pipeline_only: bool) -> GpuSelection {
    let mut releasing = true;
    if !pipeline_only && node.is_task_allocatable(pod) {
        releasing = false;
    }
    GpuSelection {
        groups: vec![Uuid::new_v4().to_string()],
        releasing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use ganglet_core::PodStatus;

    /// Time-sliced node advertising 100 devices over one physical GPU: four
    /// 8000 MiB pods share one group, the fifth finds nothing
    #[test]
    fn test_time_slicing_oversubscription_prevented() {
        let cache = test_support::cluster_with_shared_node("node-a", 32600, 1, 100);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let pods: Vec<_> = (0..5)
            .map(|i| test_support::fractional_pod(&format!("frac-{}", i), 8000, 1))
            .collect();
        let gang = test_support::make_gang("default", "gang", "team-a", 1, pods);
        test_support::insert_gang(&mut session, gang);

        let mut bound_groups = Vec::new();
        for i in 0..4 {
            let uid = format!("default/frac-{}", i);
            let mut stmt = session.statement();
            assert!(
                allocate_fractional_task_to_node(&mut stmt, &uid, "node-a", false),
                "pod {} should fit",
                i
            );
            stmt.commit().unwrap();
            let expected_used = 8000 * (i as u64 + 1);
            let node = &session.snapshot.nodes["node-a"];
            assert_eq!(node.total_allocated_shared(), expected_used);
            bound_groups.push(session.snapshot.pod(&uid).unwrap().gpu_groups.clone());
        }

        // all four tenants share the one group backed by the physical GPU
        assert!(bound_groups.iter().all(|g| *g == bound_groups[0]));

        let mut stmt = session.statement();
        assert!(!allocate_fractional_task_to_node(
            &mut stmt,
            "default/frac-4",
            "node-a",
            false
        ));
        stmt.discard();

        let node = &session.snapshot.nodes["node-a"];
        assert!(
            node.total_allocated_shared()
                <= node.physical_gpu_count() as u64 * node.gpu_memory_capacity()
        );
    }

    /// A group with releasing-only headroom pipelines instead of binding
    #[test]
    fn test_pipeline_on_releasing_group() {
        let cache = test_support::cluster_with_shared_node("node-a", 32600, 1, 100);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        // fill the group, then release 8000 MiB of it
        let tenants: Vec<_> = (0..4)
            .map(|i| test_support::fractional_pod(&format!("tenant-{}", i), 8000, 1))
            .collect();
        let gang = test_support::make_gang("default", "tenants", "team-a", 1, tenants);
        test_support::insert_gang(&mut session, gang);
        for i in 0..4 {
            let uid = format!("default/tenant-{}", i);
            let mut stmt = session.statement();
            assert!(allocate_fractional_task_to_node(&mut stmt, &uid, "node-a", false));
            stmt.commit().unwrap();
            session.snapshot.pod_mut(&uid).unwrap().status = PodStatus::Bound;
        }
        {
            let mut stmt = session.statement();
            stmt.evict(
                "default/tenant-3",
                ganglet_snapshot::orchestrator::EvictionReason::Preempted,
                "making room",
            )
            .unwrap();
            stmt.commit().unwrap();
        }

        let waiter = test_support::make_gang(
            "default",
            "waiter",
            "team-a",
            1,
            vec![test_support::fractional_pod("pipeliner", 8000, 1)],
        );
        test_support::insert_gang(&mut session, waiter);

        let mut stmt = session.statement();
        assert!(allocate_fractional_task_to_node(
            &mut stmt,
            "default/pipeliner",
            "node-a",
            false
        ));
        stmt.commit().unwrap();

        let pod = session.snapshot.pod("default/pipeliner").unwrap();
        assert_eq!(pod.status, PodStatus::Pipelined);

        // the vacating memory is spoken for; a second pipeliner finds nothing
        let second = test_support::make_gang(
            "default",
            "second",
            "team-a",
            1,
            vec![test_support::fractional_pod("late", 8000, 1)],
        );
        test_support::insert_gang(&mut session, second);
        let mut stmt = session.statement();
        assert!(!allocate_fractional_task_to_node(
            &mut stmt,
            "default/late",
            "node-a",
            false
        ));
        stmt.discard();

        // next cycle: the releaser vacated and the pipelined pod binds
        let cache = session.cache_handle();
        {
            let mut locked = cache.lock().unwrap();
            locked.remove_pod("default/tenant-3");
            locked.remove_pod_group("default/second");
        }
        drop(session);

        let mut next = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut next.registry);
        let stats = crate::actions::allocate::execute(&mut next);
        assert_eq!(stats.gangs_admitted, 1);
        assert_eq!(
            next.snapshot.pod("default/pipeliner").unwrap().status,
            PodStatus::Binding
        );
    }

    /// With one shared GPU lacking headroom and one idle whole GPU, the idle
    /// GPU wins and a fresh group is minted
    #[test]
    fn test_idle_whole_gpu_preferred_over_full_group() {
        let cache = test_support::cluster_with_shared_node("node-a", 32000, 2, 2);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let tenants = vec![
            test_support::fractional_pod("tenant-0", 8000, 1),
            test_support::fractional_pod("tenant-1", 8000, 1),
        ];
        let gang = test_support::make_gang("default", "tenants", "team-a", 1, tenants);
        test_support::insert_gang(&mut session, gang);
        for i in 0..2 {
            let uid = format!("default/tenant-{}", i);
            let mut stmt = session.statement();
            assert!(allocate_fractional_task_to_node(&mut stmt, &uid, "node-a", false));
            stmt.commit().unwrap();
            session.snapshot.pod_mut(&uid).unwrap().status = PodStatus::Bound;
        }
        let shared_group = session.snapshot.pod("default/tenant-0").unwrap().gpu_groups[0].clone();
        assert_eq!(
            session.snapshot.pod("default/tenant-1").unwrap().gpu_groups[0],
            shared_group
        );

        let big = test_support::make_gang(
            "default",
            "big",
            "team-a",
            1,
            vec![test_support::fractional_pod("wide", 20000, 1)],
        );
        test_support::insert_gang(&mut session, big);

        let mut stmt = session.statement();
        assert!(allocate_fractional_task_to_node(&mut stmt, "default/wide", "node-a", false));
        stmt.commit().unwrap();

        let pod = session.snapshot.pod("default/wide").unwrap();
        assert_eq!(pod.status, PodStatus::Binding);
        assert_ne!(pod.gpu_groups[0], shared_group);
    }

    /// A multi-device request collects one group per device or fails whole
    #[test]
    fn test_multi_device_selection() {
        let cache = test_support::cluster_with_shared_node("node-a", 32000, 2, 2);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let gang = test_support::make_gang(
            "default",
            "gang",
            "team-a",
            1,
            vec![test_support::fractional_pod("dual", 16000, 2)],
        );
        test_support::insert_gang(&mut session, gang);

        let mut stmt = session.statement();
        assert!(allocate_fractional_task_to_node(&mut stmt, "default/dual", "node-a", false));
        stmt.commit().unwrap();

        let pod = session.snapshot.pod("default/dual").unwrap();
        assert_eq!(pod.gpu_groups.len(), 2);
        assert_ne!(pod.gpu_groups[0], pod.gpu_groups[1]);
    }

    /// On a single-physical-GPU node a two-device request cannot be met
    #[test]
    fn test_multi_device_fails_on_single_physical_gpu() {
        let cache = test_support::cluster_with_shared_node("node-a", 32600, 1, 100);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let gang = test_support::make_gang(
            "default",
            "gang",
            "team-a",
            1,
            vec![test_support::fractional_pod("dual", 8000, 2)],
        );
        test_support::insert_gang(&mut session, gang);

        let mut stmt = session.statement();
        assert!(!allocate_fractional_task_to_node(&mut stmt, "default/dual", "node-a", false));
        stmt.discard();
    }
}
