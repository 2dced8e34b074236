mod intention;
mod runner;
mod single;
mod strategy;
pub mod types;

pub use intention::IntentionSegmentationStrategy;
pub use runner::{InteractionLoop, SampleWeightFn};
pub use single::SingleNetworkStrategy;
pub use strategy::InteractionStrategy;
pub use types::{Batch, BatchForward, FinalPass, RoundSnapshot, RoundState, Simulation};
