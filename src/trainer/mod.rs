mod engine;
pub mod types;

pub use engine::{scalar_log_sink, Trainer};
pub use types::{BatchLoader, EpochSummary, LrScheduler, Optimizer, FULL_INSTANCES};
