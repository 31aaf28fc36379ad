//! Configuration types for ganglet

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Scheduler behavior parameters
    #[serde(default)]
    pub scheduler: SchedulerParams,
    /// API server configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GangletError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GangletError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::GangletError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Scheduler behavior parameters, settable from config file and CLI flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerParams {
    /// Scheduler name matched against pod specs
    pub scheduler_name: String,
    /// Node-pool label value this shard schedules for; empty matches all nodes
    pub node_pool: String,
    /// Whether fractional GPU sharing is enabled
    pub gpu_sharing_enabled: bool,
    /// Cap on preemptees considered by consolidation moves
    pub max_consolidation_preemptees: u32,
    /// Global default grace before a gang below min_member turns stale
    pub default_staleness_grace_secs: u64,
    /// Whether CSI storage predicates participate in scheduling
    pub schedule_csi_storage: bool,
    /// Per-action cap on jobs examined in one cycle; absent means unbounded
    pub queue_depth_per_action: HashMap<String, usize>,
    /// Wall-clock budget for one scheduling cycle
    pub cycle_budget_secs: u64,
    /// Interval between scheduling cycles
    pub cycle_interval_secs: u64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            scheduler_name: "ganglet".to_string(),
            node_pool: String::new(),
            gpu_sharing_enabled: true,
            max_consolidation_preemptees: 10,
            default_staleness_grace_secs: 60,
            schedule_csi_storage: false,
            queue_depth_per_action: HashMap::new(),
            cycle_budget_secs: 30,
            cycle_interval_secs: 5,
        }
    }
}

impl SchedulerParams {
    /// Global default staleness grace as a duration
    pub fn default_staleness_grace(&self) -> Duration {
        Duration::from_secs(self.default_staleness_grace_secs)
    }

    /// Job-iteration cap for `action`; None when unbounded
    pub fn jobs_depth(&self, action: &str) -> Option<usize> {
        self.queue_depth_per_action.get(action).copied()
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the status API server
    pub address: String,
    /// Port for the status API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9480,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path (if any)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
