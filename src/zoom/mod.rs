mod transform;
pub mod types;

pub use transform::ZoomIn;
pub use types::{ObjectRoi, ZoomConfig};
