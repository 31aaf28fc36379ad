//! Node label and pod annotation keys interpreted by the scheduler

/// Per-GPU VRAM capacity of a node, in MiB
pub const GPU_MEMORY_LABEL: &str = "nvidia.com/gpu.memory";

/// Physical GPU count of a node, used for time-slicing correction
pub const GPU_COUNT_LABEL: &str = "nvidia.com/gpu.count";

/// MIG strategy advertised by the node (none, single, mixed)
pub const MIG_STRATEGY_LABEL: &str = "nvidia.com/mig.strategy";

/// GPU product name, informational only
pub const GPU_PRODUCT_LABEL: &str = "nvidia.com/gpu.product";

/// Whole-GPU device resource key in pod requests
pub const WHOLE_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Pod annotation requesting a fractional GPU by VRAM, in MiB
pub const GPU_MEMORY_ANNOTATION: &str = "gpu-memory";

/// Pod annotation for the number of shared GPU devices requested
pub const GPU_DEVICE_COUNT_ANNOTATION: &str = "gpu-device-count";

/// Pod annotation binding a standalone pod to a manual pod-group
pub const POD_GROUP_NAME_ANNOTATION: &str = "pod-group-name";

/// Pod label linking a pod to its pod-group
pub const POD_GROUP_LABEL: &str = "ganglet/podgroup";

/// Node label selecting the node pool a scheduler shard is responsible for
pub const NODE_POOL_LABEL: &str = "ganglet/node-pool";
