//! Bin-packing order plugin
//!
//! Prefers existing shared-GPU groups over minting fresh ones, and fuller
//! groups over emptier ones, so fragments concentrate on as few physical
//! GPUs as possible. Node ordering packs by dominant used fraction.

use ganglet_snapshot::GpuCandidate;

use crate::plugins::PluginRegistry;

/// Register GPU and node packing order functions
pub fn register(registry: &mut PluginRegistry) {
    registry.add_gpu_order_fn(Box::new(|_pod, node, candidate| {
        let score = match candidate {
            GpuCandidate::Whole => 0.0,
            GpuCandidate::Group(group) => {
                let total = node.gpu_memory_capacity().max(1) as f64;
                let allocated = node.allocated_shared.get(group).copied().unwrap_or(0) as f64;
                1.0 + allocated / total
            }
        };
        Ok(score)
    }));

    registry.add_node_order_fn(Box::new(|_pod, node| {
        let mut fraction: f64 = 0.0;
        if node.allocatable.cpu_millis > 0 {
            fraction = fraction.max(node.used.cpu_millis as f64 / node.allocatable.cpu_millis as f64);
        }
        if node.allocatable.memory_mib > 0 {
            fraction = fraction.max(node.used.memory_mib as f64 / node.allocatable.memory_mib as f64);
        }
        if node.allocatable.gpus > 0 {
            fraction = fraction.max(node.used.gpus as f64 / node.allocatable.gpus as f64);
        }
        Ok(fraction)
    }));
}
