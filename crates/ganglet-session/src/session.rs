//! The per-cycle scheduling session

use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ganglet_core::{
    FitError, FitReason, GangletError, GangletResult, PodInfo, SchedulerParams,
};
use ganglet_snapshot::orchestrator::EvictionReason;
use ganglet_snapshot::{Cache, GpuCandidate, NodeInfo, Snapshot};

use crate::events::{Event, EventHandler};
use crate::fitting;
use crate::metrics::Metrics;
use crate::plugins::PluginRegistry;
use crate::statement::Statement;

/// Coordinator of one scheduling cycle
///
/// The session exclusively owns the snapshot; statements borrow the session
/// and are the only mutation path. Sessions are not thread-safe; actions run
/// them serially.
pub struct Session {
    /// Session id, unique per cycle
    pub uid: Uuid,
    /// The cluster view this cycle schedules against
    pub snapshot: Snapshot,
    /// Scheduler parameters for this cycle
    pub params: SchedulerParams,
    /// Registered plugin capabilities
    pub registry: PluginRegistry,
    cache: Arc<Mutex<Cache>>,
    event_handlers: Vec<EventHandler>,
    metrics: Arc<Metrics>,
}

impl Session {
    /// Open a session over a fresh snapshot of the cache
    pub fn open(
        cache: Arc<Mutex<Cache>>,
        params: SchedulerParams,
        metrics: Arc<Metrics>,
    ) -> GangletResult<Session> {
        let snapshot = cache
            .lock()
            .map_err(|_| GangletError::Snapshot("cache lock poisoned".to_string()))?
            .snapshot()?;

        let session = Session {
            uid: Uuid::new_v4(),
            snapshot,
            params,
            registry: PluginRegistry::new(),
            cache,
            event_handlers: Vec::new(),
            metrics,
        };
        info!(
            session = %session.uid,
            jobs = session.snapshot.pod_groups.len(),
            queues = session.snapshot.queues.len(),
            nodes = session.snapshot.nodes.len(),
            "Opened scheduling session"
        );
        Ok(session)
    }

    /// Open a statement for transactional mutations
    pub fn statement(&mut self) -> Statement<'_> {
        Statement::open(self)
    }

    /// Register an event handler
    pub fn add_event_handler(&mut self, handler: EventHandler) {
        self.event_handlers.push(handler);
    }

    /// Metrics shared with the daemon
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    #[cfg(test)]
    pub(crate) fn cache_handle(&self) -> Arc<Mutex<Cache>> {
        self.cache.clone()
    }

    /// GPU candidates able to host the pod, best first
    ///
    /// Candidates are the shared groups passing the VRAM filter plus one
    /// whole-GPU indicator per idle or releasing whole GPU, ordered by the
    /// registered GPU-order plugins. Ties break on the candidate itself
    /// (indicators first, then group ids), so the result is deterministic
    /// for identical snapshots and scores.
    pub fn fitting_gpus(&self, node: &NodeInfo, pod: &PodInfo) -> Vec<GpuCandidate> {
        let filtered = fitting::filter_gpus_by_enough_resources(node, pod);

        let mut scored: Vec<(f64, GpuCandidate)> = Vec::with_capacity(filtered.len());
        for candidate in filtered {
            let mut score = 0.0;
            let mut failed = false;
            for order in &self.registry.gpu_order_fns {
                match order(pod, node, &candidate) {
                    Ok(s) => score += s,
                    Err(e) => {
                        error!(
                            node = %node.name,
                            candidate = %candidate,
                            error = %e,
                            "GPU order plugin failed"
                        );
                        failed = true;
                        break;
                    }
                }
            }
            if !failed {
                scored.push((score, candidate));
            }
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Combined resource fit and predicate chain for one task on one node
    ///
    /// With `write_delta` set, failures are recorded as per-node fit errors
    /// on the owning job.
    pub fn fitting_node(&mut self, pod_uid: &str, node_name: &str, write_delta: bool) -> bool {
        let failure = self.check_node_fit(pod_uid, node_name);
        match failure {
            None => true,
            Some(reason) => {
                debug!(
                    pod = pod_uid,
                    node = node_name,
                    reason = %reason,
                    "Task does not fit on node"
                );
                if write_delta {
                    self.record_fit_error(pod_uid, node_name, reason);
                }
                false
            }
        }
    }

    fn check_node_fit(&self, pod_uid: &str, node_name: &str) -> Option<FitReason> {
        let Some(pod) = self.snapshot.pod(pod_uid) else {
            return Some(FitReason::InsufficientResources);
        };
        let Some(node) = self.snapshot.nodes.get(node_name) else {
            return Some(FitReason::InsufficientResources);
        };
        let Some(job) = self.snapshot.pod_groups.get(&pod.pod_group) else {
            return Some(FitReason::InsufficientResources);
        };

        if !node.is_task_allocatable_on_releasing_or_idle(pod) {
            return Some(node.fitting_error(pod));
        }

        if let Some(queue) = self.snapshot.queues.get(&job.queue) {
            for check in &self.registry.is_task_allocation_over_capacity_fns {
                if let Some(message) = check(pod, queue, node) {
                    return Some(FitReason::OverCapacity(message));
                }
            }
        }

        for predicate in &self.registry.predicate_fns {
            if let Err(message) = predicate(pod, job, node) {
                return Some(FitReason::PredicateFailed(message));
            }
        }
        None
    }

    fn record_fit_error(&mut self, pod_uid: &str, node_name: &str, reason: FitReason) {
        let Some(group_id) = self.snapshot.pod_index.get(pod_uid).cloned() else {
            return;
        };
        if let Some(job) = self.snapshot.pod_groups.get_mut(&group_id) {
            job.task_fit_errors
                .entry(pod_uid.to_string())
                .or_default()
                .set_node_error(node_name, FitError::new(node_name, reason));
        }
    }

    /// Nodes ordered best-first for a task
    ///
    /// Pre-order hooks run once, then every node is scored on its own thread
    /// and the results are gathered under a mutex. Scoring must be
    /// side-effect-free on snapshot state. The final order is score
    /// descending with a stable secondary sort by node name.
    pub fn ordered_nodes_by_task(&self, node_names: &[String], pod: &PodInfo) -> Vec<String> {
        let nodes: Vec<&NodeInfo> = node_names
            .iter()
            .filter_map(|name| self.snapshot.nodes.get(name))
            .collect();

        for pre_order in &self.registry.node_pre_order_fns {
            pre_order(pod, &nodes);
        }

        let scores = Mutex::new(Vec::with_capacity(nodes.len()));
        std::thread::scope(|scope| {
            for node in &nodes {
                let registry = &self.registry;
                let scores = &scores;
                scope.spawn(move || {
                    let mut total = 0.0;
                    for order in &registry.node_order_fns {
                        match order(pod, node) {
                            Ok(score) => total += score,
                            Err(e) => {
                                error!(node = %node.name, error = %e, "Node order plugin failed");
                                return;
                            }
                        }
                    }
                    debug!(node = %node.name, pod = %pod.uid, score = total, "Node scored");
                    scores
                        .lock()
                        .expect("score lock poisoned")
                        .push((node.name.clone(), total));
                });
            }
        });

        let mut scores = scores.into_inner().expect("score lock poisoned");
        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.into_iter().map(|(name, _)| name).collect()
    }

    /// Job ids ordered for admission: queue order first, then job order,
    /// then id for stability
    pub fn order_jobs(&self, mut job_ids: Vec<String>) -> Vec<String> {
        job_ids.sort_by(|a, b| {
            let (Some(job_a), Some(job_b)) =
                (self.snapshot.pod_groups.get(a), self.snapshot.pod_groups.get(b))
            else {
                return a.cmp(b);
            };

            let mut ordering = Ordering::Equal;
            if let (Some(queue_a), Some(queue_b)) = (
                self.snapshot.queues.get(&job_a.queue),
                self.snapshot.queues.get(&job_b.queue),
            ) {
                for order in &self.registry.queue_order_fns {
                    ordering = ordering.then(order(queue_a, queue_b));
                }
            }
            for order in &self.registry.job_order_fns {
                ordering = ordering.then(order(job_a, job_b));
            }
            ordering
                .then(job_b.priority.cmp(&job_a.priority))
                .then_with(|| a.cmp(b))
        });
        job_ids
    }

    /// Pending task uids of a job in scheduling order
    pub fn order_pending_tasks(&self, job_id: &str) -> Vec<String> {
        let Some(job) = self.snapshot.pod_groups.get(job_id) else {
            return Vec::new();
        };
        let mut pods = job.pending_pods();
        pods.sort_by(|a, b| {
            let mut ordering = Ordering::Equal;
            for order in &self.registry.task_order_fns {
                ordering = ordering.then(order(a, b));
            }
            ordering.then_with(|| a.uid.cmp(&b.uid))
        });
        pods.into_iter().map(|p| p.uid.clone()).collect()
    }

    /// Transition a pod to Binding and emit its bind request
    ///
    /// Runs the bind-request mutators and records the task schedule
    /// duration.
    pub fn bind_pod(&mut self, pod_uid: &str) -> GangletResult<()> {
        let pod = self
            .snapshot
            .pod(pod_uid)
            .cloned()
            .ok_or_else(|| GangletError::PodNotFound(pod_uid.to_string()))?;
        let node_name = pod.node_name.clone().ok_or_else(|| {
            GangletError::Internal(format!("pod {} has no node assignment to bind", pod_uid))
        })?;

        let mut annotations = HashMap::new();
        for mutate in &self.registry.bind_request_mutate_fns {
            annotations.extend(mutate(&pod, &node_name));
        }

        self.cache
            .lock()
            .map_err(|_| GangletError::Internal("cache lock poisoned".to_string()))?
            .bind(pod_uid, &node_name, pod.gpu_groups.clone(), annotations)?;

        if let Some(pod) = self.snapshot.pod_mut(pod_uid) {
            pod.status = ganglet_core::PodStatus::Binding;
        }

        let waited = Utc::now().signed_duration_since(pod.created_at);
        self.metrics
            .observe_schedule_duration_ms(waited.num_milliseconds().max(0) as u64);
        self.metrics.inc_pods_bound();
        Ok(())
    }

    /// Emit a committed eviction and fan out deallocate events
    ///
    /// The resource accounting for the eviction happens when the statement
    /// records it; this is the commit side, emitting the eviction request
    /// and notifying deallocate handlers.
    pub fn evict(
        &mut self,
        pod_uid: &str,
        reason: EvictionReason,
        message: &str,
    ) -> GangletResult<()> {
        let node_name = self.snapshot.pod(pod_uid).and_then(|p| p.node_name.clone());

        self.cache
            .lock()
            .map_err(|_| GangletError::Internal("cache lock poisoned".to_string()))?
            .evict(pod_uid, reason, message)?;
        self.metrics.inc_pods_evicted();

        let event = Event {
            pod_uid: pod_uid.to_string(),
            node_name,
        };
        for handler in &self.event_handlers {
            if let Some(deallocate) = &handler.deallocate {
                deallocate(&event);
            }
        }
        Ok(())
    }

    /// Record a job's derived phase on the session and the cache
    pub fn record_job_status(
        &mut self,
        job_id: &str,
        phase: ganglet_core::PodGroupPhase,
        message: &str,
    ) {
        if let Some(job) = self.snapshot.pod_groups.get_mut(job_id) {
            job.phase = phase;
        }
        if let Ok(mut cache) = self.cache.lock() {
            if let Err(e) = cache.record_pod_group_phase(job_id, phase, message) {
                warn!(job = job_id, error = %e, "Failed to record pod-group status");
            }
        }
    }

    /// Scheduler name matched against pod specs
    pub fn scheduler_name(&self) -> &str {
        &self.params.scheduler_name
    }

    /// Node pool this shard schedules for; empty matches all nodes
    pub fn node_pool_name(&self) -> &str {
        &self.params.node_pool
    }

    /// Job-iteration cap for an action; None when unbounded
    pub fn jobs_depth(&self, action: &str) -> Option<usize> {
        self.params.jobs_depth(action)
    }

    /// Session-wide fallback for gang staleness grace
    pub fn default_staleness_grace(&self) -> Duration {
        self.params.default_staleness_grace()
    }

    /// Cap on preemptees considered by consolidation moves
    pub fn max_consolidation_preemptees(&self) -> u32 {
        self.params.max_consolidation_preemptees
    }

    /// Whether CSI storage predicates participate in scheduling
    pub fn schedule_csi_storage(&self) -> bool {
        self.params.schedule_csi_storage
    }

    /// Number of leaf queues in the snapshot
    pub fn count_leaf_queues(&self) -> usize {
        self.snapshot
            .queues
            .values()
            .filter(|q| q.is_leaf_queue())
            .count()
    }
}
