//! Click-simulation training loop for interactive segmentation networks.
//!
//! Each batch runs a random number of simulated interaction rounds (predict,
//! compare against ground truth, synthesize the next click) before the pass
//! whose outputs are supervised. An optional intention network and zoom-in
//! crop let the segmentation network work on the region of interest.

pub mod checkpoint;
pub mod clicks;
pub mod config;
pub mod error;
pub mod interaction;
pub mod io;
pub mod loss;
pub mod metrics;
pub mod network;
pub mod telemetry;
pub mod trainer;
pub mod zoom;

pub use clicks::{Click, ClickSimulator, PointSet};
pub use config::{CheckpointInterval, TrainerConfig};
pub use error::{ClickLoopError, Result};
pub use interaction::{
    Batch, IntentionSegmentationStrategy, InteractionLoop, InteractionStrategy,
    SingleNetworkStrategy,
};
pub use loss::{ComposedLoss, Criterion, LossComposer, LossTable};
pub use network::{ForwardMode, InteractiveNetwork, NetOutputs, Trainable};
pub use trainer::Trainer;
pub use zoom::{ZoomConfig, ZoomIn};
