//! Transactional statement over session state

use tracing::{debug, error, warn};

use ganglet_core::{GangletError, GangletResult, GpuGroupId, PodStatus};
use ganglet_snapshot::orchestrator::EvictionReason;
use ganglet_snapshot::PipelineCharge;

use crate::session::Session;

enum RecordedOp {
    Allocate {
        pod_uid: String,
        node_name: String,
        prev_status: PodStatus,
        prev_node: Option<String>,
        prev_groups: Vec<GpuGroupId>,
        readmission: bool,
    },
    Pipeline {
        pod_uid: String,
        node_name: String,
        prev_status: PodStatus,
        prev_node: Option<String>,
        prev_groups: Vec<GpuGroupId>,
        charge: PipelineCharge,
    },
    Evict {
        pod_uid: String,
        node_name: String,
        prev_status: PodStatus,
        reason: EvictionReason,
        message: String,
    },
}

/// A batch of tentative session mutations with exact rollback
///
/// Every operation mutates snapshot state in place and records the inverse
/// delta. Commit flushes allocations and evictions through the cache in the
/// recorded order; discard undoes everything in reverse order, restoring the
/// snapshot to its pre-open state. A statement dropped without closing
/// discards itself.
pub struct Statement<'a> {
    session: &'a mut Session,
    ops: Vec<RecordedOp>,
    closed: bool,
}

impl<'a> Statement<'a> {
    pub(crate) fn open(session: &'a mut Session) -> Self {
        Self {
            session,
            ops: Vec::new(),
            closed: false,
        }
    }

    /// Read access to the session under the statement
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Mutable access to the session under the statement
    ///
    /// Used for fit-error bookkeeping between operations; resource
    /// accounting must go through the statement ops.
    pub fn session_mut(&mut self) -> &mut Session {
        self.session
    }

    /// Number of allocations and pipelines recorded so far
    pub fn placements(&self) -> u32 {
        self.ops
            .iter()
            .filter(|op| matches!(op, RecordedOp::Allocate { .. } | RecordedOp::Pipeline { .. }))
            .count() as u32
    }

    /// Tentatively allocate a task onto a node
    pub fn allocate(&mut self, pod_uid: &str, node_name: &str) -> GangletResult<()> {
        self.allocate_with_groups(pod_uid, node_name, None)
    }

    /// Tentatively allocate a task onto shared-GPU groups of a node
    ///
    /// Allocating an already-assigned task is an error without accounting
    /// side effects. Allocating a task currently releasing on the same node
    /// cancels the release exactly.
    pub fn allocate_with_groups(
        &mut self,
        pod_uid: &str,
        node_name: &str,
        groups: Option<Vec<GpuGroupId>>,
    ) -> GangletResult<()> {
        let pod = self
            .session
            .snapshot
            .pod(pod_uid)
            .cloned()
            .ok_or_else(|| GangletError::Statement(format!("pod {} not in snapshot", pod_uid)))?;

        let readmission =
            pod.status == PodStatus::Releasing && pod.node_name.as_deref() == Some(node_name);
        if !readmission && pod.status != PodStatus::Pending {
            return Err(GangletError::Statement(format!(
                "pod {} is {} and cannot be allocated",
                pod_uid, pod.status
            )));
        }
        if !self.session.snapshot.nodes.contains_key(node_name) {
            return Err(GangletError::Statement(format!(
                "node {} not in snapshot",
                node_name
            )));
        }

        let prev_status = pod.status;
        let prev_node = pod.node_name.clone();
        let prev_groups = pod.gpu_groups.clone();

        {
            let pod = self.session.snapshot.pod_mut(pod_uid).expect("pod vanished");
            if let Some(groups) = &groups {
                pod.gpu_groups = groups.clone();
            }
            pod.node_name = Some(node_name.to_string());
            pod.status = if readmission {
                PodStatus::Bound
            } else {
                PodStatus::Allocated
            };
        }

        let pod_after = self
            .session
            .snapshot
            .pod(pod_uid)
            .cloned()
            .expect("pod vanished");
        let node = self
            .session
            .snapshot
            .nodes
            .get_mut(node_name)
            .expect("node vanished");
        if readmission {
            node.unevict_task(&pod_after);
        } else {
            node.add_allocated_task(&pod_after);
        }

        debug!(
            pod = pod_uid,
            node = node_name,
            groups = ?pod_after.gpu_groups,
            readmission = readmission,
            "Recorded allocation"
        );
        self.ops.push(RecordedOp::Allocate {
            pod_uid: pod_uid.to_string(),
            node_name: node_name.to_string(),
            prev_status,
            prev_node,
            prev_groups,
            readmission,
        });
        Ok(())
    }

    /// Tentatively pipeline a task onto resources still releasing
    pub fn pipeline(&mut self, pod_uid: &str, node_name: &str) -> GangletResult<()> {
        self.pipeline_with_groups(pod_uid, node_name, None)
    }

    /// Tentatively pipeline a task onto shared-GPU groups of a node
    pub fn pipeline_with_groups(
        &mut self,
        pod_uid: &str,
        node_name: &str,
        groups: Option<Vec<GpuGroupId>>,
    ) -> GangletResult<()> {
        let pod = self
            .session
            .snapshot
            .pod(pod_uid)
            .cloned()
            .ok_or_else(|| GangletError::Statement(format!("pod {} not in snapshot", pod_uid)))?;

        if pod.status != PodStatus::Pending {
            return Err(GangletError::Statement(format!(
                "pod {} is {} and cannot be pipelined",
                pod_uid, pod.status
            )));
        }
        if !self.session.snapshot.nodes.contains_key(node_name) {
            return Err(GangletError::Statement(format!(
                "node {} not in snapshot",
                node_name
            )));
        }

        let prev_status = pod.status;
        let prev_node = pod.node_name.clone();
        let prev_groups = pod.gpu_groups.clone();

        {
            let pod = self.session.snapshot.pod_mut(pod_uid).expect("pod vanished");
            if let Some(groups) = &groups {
                pod.gpu_groups = groups.clone();
            }
            pod.node_name = Some(node_name.to_string());
            pod.status = PodStatus::Pipelined;
        }

        let pod_after = self
            .session
            .snapshot
            .pod(pod_uid)
            .cloned()
            .expect("pod vanished");
        let node = self
            .session
            .snapshot
            .nodes
            .get_mut(node_name)
            .expect("node vanished");
        let charge = node.pipeline_task(&pod_after);

        debug!(
            pod = pod_uid,
            node = node_name,
            groups = ?pod_after.gpu_groups,
            "Recorded pipeline"
        );
        self.ops.push(RecordedOp::Pipeline {
            pod_uid: pod_uid.to_string(),
            node_name: node_name.to_string(),
            prev_status,
            prev_node,
            prev_groups,
            charge,
        });
        Ok(())
    }

    /// Tentatively evict a materialized task
    pub fn evict(
        &mut self,
        pod_uid: &str,
        reason: EvictionReason,
        message: &str,
    ) -> GangletResult<()> {
        let pod = self
            .session
            .snapshot
            .pod(pod_uid)
            .cloned()
            .ok_or_else(|| GangletError::Statement(format!("pod {} not in snapshot", pod_uid)))?;

        if !pod.status.is_materialized() || pod.status == PodStatus::Releasing {
            return Err(GangletError::Statement(format!(
                "pod {} is {} and cannot be evicted",
                pod_uid, pod.status
            )));
        }
        let node_name = pod.node_name.clone().ok_or_else(|| {
            GangletError::Statement(format!("pod {} has no node to evict from", pod_uid))
        })?;

        let prev_status = pod.status;
        let node = self
            .session
            .snapshot
            .nodes
            .get_mut(&node_name)
            .ok_or_else(|| {
                GangletError::Statement(format!("node {} not in snapshot", node_name))
            })?;
        node.evict_task(&pod);

        if let Some(pod) = self.session.snapshot.pod_mut(pod_uid) {
            pod.status = PodStatus::Releasing;
        }

        debug!(pod = pod_uid, node = %node_name, reason = %reason, "Recorded eviction");
        self.ops.push(RecordedOp::Evict {
            pod_uid: pod_uid.to_string(),
            node_name,
            prev_status,
            reason,
            message: message.to_string(),
        });
        Ok(())
    }

    /// Flush the recorded operations in order
    ///
    /// Allocations become bind requests, evictions become eviction requests,
    /// pipelined tasks stay reserved for a later cycle. Emission failures
    /// are logged and left to cache reconciliation; the statement stays
    /// committed.
    pub fn commit(mut self) -> GangletResult<()> {
        let ops = std::mem::take(&mut self.ops);
        self.closed = true;

        for op in &ops {
            match op {
                RecordedOp::Allocate { pod_uid, node_name, .. } => {
                    if let Err(e) = self.session.bind_pod(pod_uid) {
                        error!(
                            pod = %pod_uid,
                            node = %node_name,
                            error = %e,
                            "Failed to emit bind request"
                        );
                    }
                }
                RecordedOp::Pipeline { pod_uid, node_name, .. } => {
                    debug!(pod = %pod_uid, node = %node_name, "Committed pipeline reservation");
                    self.session.metrics().inc_pods_pipelined();
                }
                RecordedOp::Evict {
                    pod_uid,
                    reason,
                    message,
                    ..
                } => {
                    if let Err(e) = self.session.evict(pod_uid, *reason, message) {
                        error!(pod = %pod_uid, error = %e, "Failed to emit eviction request");
                    }
                }
            }
        }
        Ok(())
    }

    /// Undo every recorded operation in reverse order
    pub fn discard(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        self.closed = true;

        for op in ops.into_iter().rev() {
            match op {
                RecordedOp::Allocate {
                    pod_uid,
                    node_name,
                    prev_status,
                    prev_node,
                    prev_groups,
                    readmission,
                } => {
                    let Some(pod_after) = self.session.snapshot.pod(&pod_uid).cloned() else {
                        warn!(pod = %pod_uid, "Allocated pod vanished before rollback");
                        continue;
                    };
                    if let Some(node) = self.session.snapshot.nodes.get_mut(&node_name) {
                        if readmission {
                            node.evict_task(&pod_after);
                        } else {
                            node.remove_allocated_task(&pod_after);
                        }
                    }
                    if let Some(pod) = self.session.snapshot.pod_mut(&pod_uid) {
                        pod.status = prev_status;
                        pod.node_name = prev_node;
                        pod.gpu_groups = prev_groups;
                    }
                }
                RecordedOp::Pipeline {
                    pod_uid,
                    node_name,
                    prev_status,
                    prev_node,
                    prev_groups,
                    charge,
                } => {
                    if let Some(node) = self.session.snapshot.nodes.get_mut(&node_name) {
                        node.unpipeline_task(&charge);
                    }
                    if let Some(pod) = self.session.snapshot.pod_mut(&pod_uid) {
                        pod.status = prev_status;
                        pod.node_name = prev_node;
                        pod.gpu_groups = prev_groups;
                    }
                }
                RecordedOp::Evict {
                    pod_uid,
                    node_name,
                    prev_status,
                    ..
                } => {
                    let Some(pod_after) = self.session.snapshot.pod(&pod_uid).cloned() else {
                        warn!(pod = %pod_uid, "Evicted pod vanished before rollback");
                        continue;
                    };
                    if let Some(node) = self.session.snapshot.nodes.get_mut(&node_name) {
                        node.unevict_task(&pod_after);
                    }
                    if let Some(pod) = self.session.snapshot.pod_mut(&pod_uid) {
                        pod.status = prev_status;
                    }
                }
            }
        }
    }

}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if !self.closed {
            debug!(pending_ops = self.ops.len(), "Discarding unclosed statement");
            self.rollback();
        }
    }
}
