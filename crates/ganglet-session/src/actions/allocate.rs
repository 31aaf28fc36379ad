//! Gang-atomic allocation action

use tracing::{debug, info};

use ganglet_core::PodGroupPhase;

use crate::fitting::{allocation_mode, AllocationMode};
use crate::gpu_sharing::allocate_fractional_task_to_node;
use crate::session::Session;
use crate::statement::Statement;

/// Action name used for the queue depth lookup
pub const ACTION_NAME: &str = "allocate";

/// Outcome of one allocation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocateStats {
    /// Gangs committed this pass
    pub gangs_admitted: u32,
    /// Gangs that failed to reach min_member
    pub gangs_unschedulable: u32,
    /// Tasks placed (allocated or pipelined) in committed statements
    pub tasks_placed: u32,
}

/// Walk jobs in fairness order and admit each gang atomically
///
/// One statement per job: all pending tasks are attempted, and the statement
/// commits only when at least min_member placements succeeded. Anything less
/// discards the statement, so a gang binds in full or not at all.
pub fn execute(session: &mut Session) -> AllocateStats {
    let mut stats = AllocateStats::default();

    let job_ids: Vec<String> = session
        .snapshot
        .pod_groups
        .values()
        .filter(|job| !job.pending_pods().is_empty())
        .map(|job| job.id.clone())
        .collect();
    let mut job_ids = session.order_jobs(job_ids);
    if let Some(depth) = session.jobs_depth(ACTION_NAME) {
        job_ids.truncate(depth);
    }

    for job_id in job_ids {
        if let Some(message) = job_over_capacity(session, &job_id) {
            debug!(job = %job_id, reason = %message, "Job over queue capacity");
            session.record_job_status(&job_id, PodGroupPhase::Unschedulable, &message);
            session.metrics().inc_gangs_unschedulable();
            stats.gangs_unschedulable += 1;
            continue;
        }

        match try_allocate_job(session, &job_id) {
            Some(placed) => {
                info!(job = %job_id, tasks = placed, "Gang admitted");
                session.record_job_status(&job_id, PodGroupPhase::Running, "");
                session.metrics().inc_gangs_admitted();
                stats.gangs_admitted += 1;
                stats.tasks_placed += placed;
            }
            None => {
                let message = session
                    .snapshot
                    .pod_groups
                    .get(&job_id)
                    .map(|job| job.unschedulable_message())
                    .unwrap_or_default();
                info!(job = %job_id, reason = %message, "Gang unschedulable");
                session.record_job_status(&job_id, PodGroupPhase::Unschedulable, &message);
                session.metrics().inc_gangs_unschedulable();
                stats.gangs_unschedulable += 1;
            }
        }
    }
    stats
}

fn job_over_capacity(session: &Session, job_id: &str) -> Option<String> {
    let job = session.snapshot.pod_groups.get(job_id)?;
    let queue = session.snapshot.queues.get(&job.queue)?;

    for check in &session.registry.is_job_over_capacity_fns {
        if let Some(message) = check(job, queue) {
            return Some(message);
        }
    }
    if !job.preemptible {
        for check in &session.registry.is_non_preemptible_job_over_quota_fns {
            if let Some(message) = check(job, queue) {
                return Some(message);
            }
        }
    }
    None
}

/// Attempt every pending task of the job inside one statement
///
/// Returns the placement count on commit, None when the statement was
/// discarded.
fn try_allocate_job(session: &mut Session, job_id: &str) -> Option<u32> {
    let Some(job) = session.snapshot.pod_groups.get(job_id) else {
        return None;
    };
    let min_member = job.min_member;
    let task_uids = session.order_pending_tasks(job_id);

    let mut stmt = session.statement();
    let mut placed = 0u32;
    for uid in &task_uids {
        if try_place_task(&mut stmt, uid) {
            placed += 1;
        }
    }

    if placed >= min_member {
        let _ = stmt.commit();
        Some(placed)
    } else {
        debug!(
            job = %job_id,
            placed = placed,
            min_member = min_member,
            "Discarding statement: gang below min member"
        );
        stmt.discard();
        None
    }
}

/// Find a node for one task and record the placement
fn try_place_task(stmt: &mut Statement<'_>, pod_uid: &str) -> bool {
    let Some(pod) = stmt.session().snapshot.pod(pod_uid).cloned() else {
        return false;
    };

    if let Some(job) = stmt.session().snapshot.pod_groups.get(&pod.pod_group) {
        for pre_predicate in &stmt.session().registry.pre_predicate_fns {
            if let Err(message) = pre_predicate(&pod, job) {
                debug!(pod = pod_uid, reason = %message, "Pre-predicate rejected task");
                return false;
            }
        }
    }

    let names = stmt.session().snapshot.node_names();
    let ordered = stmt.session().ordered_nodes_by_task(&names, &pod);

    for node_name in ordered {
        if !stmt.session_mut().fitting_node(pod_uid, &node_name, true) {
            continue;
        }
        let Some(node) = stmt.session().snapshot.nodes.get(&node_name) else {
            continue;
        };
        let Some(mode) = allocation_mode(node, &pod) else {
            continue;
        };

        let recorded = if pod.res_req.is_fractional() {
            if !stmt.session().params.gpu_sharing_enabled {
                continue;
            }
            allocate_fractional_task_to_node(
                stmt,
                pod_uid,
                &node_name,
                mode == AllocationMode::Pipeline,
            )
        } else {
            match mode {
                AllocationMode::Allocate => stmt.allocate(pod_uid, &node_name).is_ok(),
                AllocationMode::Pipeline => stmt.pipeline(pod_uid, &node_name).is_ok(),
            }
        };
        if recorded {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use ganglet_core::PodStatus;

    /// A three-member gang with enough free VRAM binds whole, to one node
    /// and one group
    #[test]
    fn test_gang_atomic_scheduling() {
        let cache = test_support::cluster_with_shared_node("node-a", 20000, 1, 1);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let gang = test_support::make_gang(
            "default",
            "gang",
            "team-a",
            3,
            vec![
                test_support::fractional_pod("a", 4000, 1),
                test_support::fractional_pod("b", 8000, 1),
                test_support::fractional_pod("c", 8000, 1),
            ],
        );
        test_support::insert_gang(&mut session, gang);

        let stats = execute(&mut session);
        assert_eq!(stats.gangs_admitted, 1);
        assert_eq!(stats.tasks_placed, 3);

        let groups: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                let pod = session.snapshot.pod(&format!("default/{}", name)).unwrap();
                assert_eq!(pod.status, PodStatus::Binding);
                assert_eq!(pod.node_name.as_deref(), Some("node-a"));
                pod.gpu_groups.clone()
            })
            .collect();
        assert_eq!(groups[0], groups[1]);
        assert_eq!(groups[1], groups[2]);

        assert_eq!(
            session.snapshot.pod_groups["default/gang"].phase,
            PodGroupPhase::Running
        );
    }

    /// The same gang with insufficient free VRAM binds nothing at all
    #[test]
    fn test_gang_insufficient_resources_binds_nothing() {
        let cache = test_support::cluster_with_shared_node("node-a", 15000, 1, 1);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let gang = test_support::make_gang(
            "default",
            "gang",
            "team-a",
            3,
            vec![
                test_support::fractional_pod("a", 4000, 1),
                test_support::fractional_pod("b", 8000, 1),
                test_support::fractional_pod("c", 8000, 1),
            ],
        );
        test_support::insert_gang(&mut session, gang);

        let node_before = session.snapshot.nodes["node-a"].clone();
        let stats = execute(&mut session);
        assert_eq!(stats.gangs_admitted, 0);
        assert_eq!(stats.gangs_unschedulable, 1);

        for name in ["a", "b", "c"] {
            let pod = session.snapshot.pod(&format!("default/{}", name)).unwrap();
            assert_eq!(pod.status, PodStatus::Pending);
            assert!(pod.gpu_groups.is_empty());
        }

        let node_after = &session.snapshot.nodes["node-a"];
        assert_eq!(node_after.allocated_shared, node_before.allocated_shared);
        assert_eq!(node_after.idle, node_before.idle);
        assert_eq!(
            session.snapshot.pod_groups["default/gang"].phase,
            PodGroupPhase::Unschedulable
        );
    }

    /// Whole-GPU gangs follow the same atomic admission
    #[test]
    fn test_whole_gpu_gang() {
        let cache = test_support::cluster_with_shared_node("node-a", 32000, 2, 2);
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let gang = test_support::make_gang(
            "default",
            "gang",
            "team-a",
            2,
            vec![
                test_support::whole_pod("a", 100, 128, 1),
                test_support::whole_pod("b", 100, 128, 1),
            ],
        );
        test_support::insert_gang(&mut session, gang);

        let stats = execute(&mut session);
        assert_eq!(stats.gangs_admitted, 1);
        assert_eq!(session.snapshot.nodes["node-a"].idle.gpus, 0);
    }

    /// A job pushing its queue over quota is rejected before any placement
    #[test]
    fn test_over_capacity_job_rejected() {
        let cache = test_support::two_cpu_nodes("node-a", "node-b");
        {
            let mut locked = cache.lock().unwrap();
            let mut queue = ganglet_core::QueueInfo::new("team-a", Some("root"));
            queue.deserved = ganglet_core::ResourceVector::new(100, 0, 0);
            locked.upsert_queue(queue);
        }
        let mut session = test_support::open_session(cache);
        crate::plugins::register_defaults(&mut session.registry);

        let gang = test_support::make_gang(
            "default",
            "gang",
            "team-a",
            1,
            vec![test_support::whole_pod("big", 4000, 128, 0)],
        );
        test_support::insert_gang(&mut session, gang);

        let stats = execute(&mut session);
        assert_eq!(stats.gangs_admitted, 0);
        assert_eq!(stats.gangs_unschedulable, 1);
        assert_eq!(
            session.snapshot.pod("default/big").unwrap().status,
            PodStatus::Pending
        );
    }

    /// The queue depth cap bounds how many jobs one pass examines
    #[test]
    fn test_queue_depth_cap() {
        let cache = test_support::two_cpu_nodes("node-a", "node-b");
        let mut session = test_support::open_session(cache);
        session
            .params
            .queue_depth_per_action
            .insert(ACTION_NAME.to_string(), 1);
        crate::plugins::register_defaults(&mut session.registry);

        for i in 0..3 {
            let gang = test_support::make_gang(
                "default",
                &format!("gang-{}", i),
                "team-a",
                1,
                vec![test_support::whole_pod(&format!("task-{}", i), 100, 128, 0)],
            );
            test_support::insert_gang(&mut session, gang);
        }

        let stats = execute(&mut session);
        assert_eq!(stats.gangs_admitted + stats.gangs_unschedulable, 1);
    }
}
