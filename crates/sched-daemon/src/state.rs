//! Shared runtime state for sched-daemon.
//!
//! All handlers receive `State<Arc<AppState>>`; this module owns nothing
//! async itself beyond the bus sender, which is cheaply `Clone`.

use std::time::Instant;

use sched_assign::AssignmentService;
use sched_config::SchedulerConfigHandle;
use sched_db::PgPool;
use sched_queue::QueueManager;
use sched_supervisor::BusMsg;
use tokio::sync::broadcast;

use crate::metrics::Metrics;

#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Shared across every Axum handler. `pool` is itself a cheap `Clone`
/// (an `Arc` under the hood), so only one copy of the `AppState` needs
/// to exist behind its own `Arc`.
pub struct AppState {
    pub pool: PgPool,
    pub config: SchedulerConfigHandle,
    pub bus: broadcast::Sender<BusMsg>,
    pub assignment: AssignmentService,
    pub queue: QueueManager,
    pub metrics: Metrics,
    pub build: BuildInfo,
    started_at: Instant,
}

impl AppState {
    pub fn new(pool: PgPool, config: sched_config::SchedulerConfig) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let assignment = AssignmentService::new(pool.clone());
        let queue = QueueManager::new(pool.clone());

        AppState {
            pool,
            config: SchedulerConfigHandle::new(config),
            bus,
            assignment,
            queue,
            metrics: Metrics::new(),
            build: BuildInfo {
                service: "sched-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
