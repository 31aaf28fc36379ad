//! Stale-gang eviction action

use chrono::{Duration, Utc};
use tracing::{info, warn};

use ganglet_core::{PodGroupPhase, PodStatus};
use ganglet_snapshot::orchestrator::EvictionReason;

use crate::session::Session;

/// Outcome of one stale-gang pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleGangStats {
    /// Gangs declared stale this pass
    pub gangs_evicted: u32,
    /// Tasks evicted across all stale gangs
    pub tasks_evicted: u32,
}

const STALE_MESSAGE: &str = "pod-group is stale: active members stayed below minimum";

/// Evict every gang whose active members stayed below min_member past its
/// grace period
///
/// The grace period is the gang's own value when set, the session-wide
/// default otherwise. All active tasks of a stale gang are evicted with
/// reason StaleJob.
pub fn execute(session: &mut Session) -> StaleGangStats {
    let mut stats = StaleGangStats::default();
    let now = Utc::now();
    let default_grace = Duration::from_std(session.default_staleness_grace())
        .unwrap_or_else(|_| Duration::seconds(0));

    let stale_ids: Vec<String> = session
        .snapshot
        .pod_groups
        .values()
        .filter(|job| {
            if !job.has_materialized_pods() || job.active_count() >= job.min_member {
                return false;
            }
            let grace = job
                .staleness_grace_secs
                .map(|secs| Duration::seconds(secs as i64))
                .unwrap_or(default_grace);
            match job.below_min_since {
                Some(since) => now.signed_duration_since(since) >= grace,
                None => false,
            }
        })
        .map(|job| job.id.clone())
        .collect();

    for job_id in stale_ids {
        let victims: Vec<String> = session
            .snapshot
            .pod_groups
            .get(&job_id)
            .map(|job| {
                job.pods
                    .values()
                    .filter(|p| p.status.is_materialized() && p.status != PodStatus::Releasing)
                    .map(|p| p.uid.clone())
                    .collect()
            })
            .unwrap_or_default();

        info!(
            job = %job_id,
            victims = victims.len(),
            "Evicting stale gang"
        );

        let mut stmt = session.statement();
        let mut evicted = 0u32;
        let mut failed = false;
        for uid in &victims {
            match stmt.evict(uid, EvictionReason::StaleJob, STALE_MESSAGE) {
                Ok(()) => evicted += 1,
                Err(e) => {
                    warn!(pod = %uid, error = %e, "Failed to record stale eviction");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            stmt.discard();
            continue;
        }
        let _ = stmt.commit();

        session.record_job_status(&job_id, PodGroupPhase::Stale, STALE_MESSAGE);
        session.metrics().inc_stale_gangs_evicted();
        stats.gangs_evicted += 1;
        stats.tasks_evicted += evicted;
    }
    stats
}
