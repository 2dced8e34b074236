mod distance;
mod simulator;
pub mod types;

pub use distance::distance_transform;
pub use simulator::{ClickDecision, ClickSimulator, DEFAULT_PRED_THRESH};
pub use types::{points_from_array, points_to_array, Click, PointSet, SENTINEL};
