use std::sync::Arc;

use tokio::sync::RwLock;

use crate::SchedulerConfig;

/// Holds the active config snapshot so it can be atomically swapped on
/// reload without blocking readers mid-read.
pub struct SchedulerConfigHandle {
    inner: RwLock<Arc<SchedulerConfig>>,
}

impl SchedulerConfigHandle {
    pub fn new(config: SchedulerConfig) -> Self {
        SchedulerConfigHandle {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    pub async fn current(&self) -> Arc<SchedulerConfig> {
        self.inner.read().await.clone()
    }

    pub async fn swap(&self, config: SchedulerConfig) {
        let mut guard = self.inner.write().await;
        *guard = Arc::new(config);
    }
}
