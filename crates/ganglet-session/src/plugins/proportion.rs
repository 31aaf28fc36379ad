//! Proportional queue fairness plugin
//!
//! Queues are served in ascending order of their allocated-to-deserved
//! ratio, so the most underserved queue admits first. Quota checks are
//! strict: a job whose admission would push its queue past the deserved
//! vector on any dimension is over capacity. Queues without a deserved
//! vector are unconstrained.

use std::cmp::Ordering;

use ganglet_core::{PodGroupInfo, QueueInfo, ResourceVector};

use crate::plugins::PluginRegistry;

/// Sum of the whole-dimension requests of the first min_member pending pods
fn gang_admission_request(job: &PodGroupInfo) -> ResourceVector {
    let mut request = ResourceVector::default();
    for pod in job.pending_pods().iter().take(job.min_member as usize) {
        request.add(&pod.node_footprint());
    }
    request
}

fn over_deserved(queue: &QueueInfo, request: &ResourceVector) -> Option<String> {
    if queue.deserved.is_empty() {
        return None;
    }
    let projected = queue.allocated.plus(request);
    if projected.fits_in(&queue.deserved) {
        None
    } else {
        Some(format!(
            "queue {} would exceed its deserved quota: {} > {}",
            queue.id, projected, queue.deserved
        ))
    }
}

/// Register queue ordering, fairness accessors and quota checks
pub fn register(registry: &mut PluginRegistry) {
    registry.add_queue_order_fn(Box::new(|a, b| {
        a.deserved_ratio()
            .partial_cmp(&b.deserved_ratio())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    }));

    registry.add_queue_allocated_fn(Box::new(|queue| queue.allocated));
    registry.add_queue_deserved_fn(Box::new(|queue| queue.deserved));
    registry.add_queue_fair_share_fn(Box::new(|queue| {
        if queue.fair_share.is_empty() {
            queue.deserved
        } else {
            queue.fair_share
        }
    }));

    registry.add_is_job_over_capacity_fn(Box::new(|job, queue| {
        over_deserved(queue, &gang_admission_request(job))
    }));

    registry.add_is_non_preemptible_job_over_quota_fn(Box::new(|job, queue| {
        over_deserved(queue, &gang_admission_request(job))
    }));

    registry.add_is_task_allocation_over_capacity_fn(Box::new(|pod, queue, _node| {
        over_deserved(queue, &pod.node_footprint())
    }));
}
