mod handle;
mod layered;
mod tunables;

pub use handle::SchedulerConfigHandle;
pub use layered::{load_layered_yaml, LoadedConfig};
pub use tunables::{PublishBonusTable, SchedulerConfig};
