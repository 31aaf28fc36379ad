//! ganglet daemon
//!
//! Runs the scheduling cycle loop: snapshot, session, actions, outbox
//! drain, status publication.

mod state;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ganglet_api::{create_router, ApiState, CycleReport};
use ganglet_core::{DaemonConfig, GangletResult, SchedulerParams};
use ganglet_session::{actions, plugins, Metrics, Session};
use ganglet_snapshot::{Cache, LocalCluster, Orchestrator};

/// gangletd - batch-aware gang scheduler for GPU clusters
#[derive(Parser, Debug)]
#[command(name = "gangletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster state file for the file-backed mode (TOML)
    #[arg(long)]
    cluster_state: Option<PathBuf>,

    /// Address to bind the status API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the status API server
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Scheduler name matched against pod specs
    #[arg(long)]
    scheduler_name: Option<String>,

    /// Node-pool label value to schedule for; empty matches all nodes
    #[arg(long)]
    node_pool: Option<String>,

    /// Disable fractional GPU sharing
    #[arg(long)]
    disable_gpu_sharing: bool,

    /// Cap on preemptees considered by consolidation moves
    #[arg(long)]
    max_consolidation_preemptees: Option<u32>,

    /// Global default grace in seconds before a gang turns stale
    #[arg(long)]
    staleness_grace_secs: Option<u64>,

    /// Let CSI storage predicates participate in scheduling
    #[arg(long)]
    schedule_csi_storage: bool,

    /// Interval between scheduling cycles in seconds
    #[arg(long)]
    cycle_interval_secs: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(address) = &self.address {
            config.api.address = address.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(name) = &self.scheduler_name {
            config.scheduler.scheduler_name = name.clone();
        }
        if let Some(pool) = &self.node_pool {
            config.scheduler.node_pool = pool.clone();
        }
        if self.disable_gpu_sharing {
            config.scheduler.gpu_sharing_enabled = false;
        }
        if let Some(cap) = self.max_consolidation_preemptees {
            config.scheduler.max_consolidation_preemptees = cap;
        }
        if let Some(grace) = self.staleness_grace_secs {
            config.scheduler.default_staleness_grace_secs = grace;
        }
        if self.schedule_csi_storage {
            config.scheduler.schedule_csi_storage = true;
        }
        if let Some(interval) = self.cycle_interval_secs {
            config.scheduler.cycle_interval_secs = interval;
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path).unwrap_or_else(|e| {
            error!(error = %e, "Failed to load config, using defaults");
            DaemonConfig::default()
        }),
        None => DaemonConfig::default(),
    };
    args.apply(&mut config);

    info!(
        scheduler = %config.scheduler.scheduler_name,
        node_pool = %config.scheduler.node_pool,
        gpu_sharing = config.scheduler.gpu_sharing_enabled,
        "Starting ganglet daemon v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut cache = Cache::new().with_node_pool(&config.scheduler.node_pool);
    if let Some(path) = &args.cluster_state {
        if let Err(e) = state::load_into_cache(path, &mut cache) {
            error!(error = %e, "Failed to load cluster state");
            std::process::exit(1);
        }
        info!(path = %path.display(), "Loaded cluster state");
    }
    let cache = Arc::new(Mutex::new(cache));
    let client = LocalCluster::new(cache.clone());
    let metrics = Arc::new(Metrics::new());

    let api_state: ApiState = Arc::new(tokio::sync::RwLock::new(CycleReport::default()));
    let router = create_router(api_state.clone());
    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .expect("Invalid API address");
    info!("Status API listening on {}", addr);
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind API address");
        axum::serve(listener, router).await.expect("API server error");
    });

    let interval = Duration::from_secs(config.scheduler.cycle_interval_secs.max(1));
    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        match run_cycle(cycle, &cache, &config.scheduler, &metrics) {
            Ok(report) => {
                drain_outbox(&cache, &client).await;
                *api_state.write().await = report;
            }
            Err(e) => {
                error!(cycle = cycle, error = %e, "Scheduling cycle aborted");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Run one scheduling cycle and summarize it
fn run_cycle(
    cycle: u64,
    cache: &Arc<Mutex<Cache>>,
    params: &SchedulerParams,
    metrics: &Arc<Metrics>,
) -> GangletResult<CycleReport> {
    let started = Instant::now();
    let budget = Duration::from_secs(params.cycle_budget_secs.max(1));

    let mut session = Session::open(cache.clone(), params.clone(), metrics.clone())?;
    plugins::register_defaults(&mut session.registry);

    let allocated = actions::allocate::execute(&mut session);
    let stale = if started.elapsed() < budget {
        actions::stale_gang::execute(&mut session)
    } else {
        warn!(cycle = cycle, "Cycle budget exhausted, skipping stale-gang pass");
        actions::StaleGangStats::default()
    };

    let elapsed = started.elapsed();
    if elapsed > budget {
        warn!(
            cycle = cycle,
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "Cycle exceeded its wall-clock budget"
        );
    }
    metrics.observe_cycle_ms(elapsed.as_millis() as u64);

    info!(
        cycle = cycle,
        gangs_admitted = allocated.gangs_admitted,
        gangs_unschedulable = allocated.gangs_unschedulable,
        stale_gangs = stale.gangs_evicted,
        elapsed_ms = elapsed.as_millis() as u64,
        "Cycle complete"
    );

    Ok(CycleReport::from_snapshot(
        cycle,
        &session.uid.to_string(),
        &session.snapshot,
        metrics.snapshot(),
        elapsed.as_millis() as u64,
    ))
}

/// Flush committed bind and eviction requests to the orchestrator
///
/// Failures are logged and left to the next snapshot; the loop never blocks
/// on retries.
async fn drain_outbox(cache: &Arc<Mutex<Cache>>, client: &LocalCluster) {
    let (binds, evictions) = {
        let mut cache = cache.lock().expect("cache lock poisoned");
        cache.take_outbox()
    };

    for request in binds {
        if let Err(e) = client.bind(&request).await {
            error!(pod = %request.pod_uid, error = %e, "Bind request failed");
        }
    }
    for request in evictions {
        if let Err(e) = client.evict(&request).await {
            error!(pod = %request.pod_uid, error = %e, "Eviction request failed");
        }
    }
}
