use crate::interaction::Batch;
use crate::loss::ComposedLoss;
use anyhow::Result;

/// Applies one optimization step for a composed loss.
///
/// Backpropagation lives with the network implementation; the optimizer is
/// handed the network that ran the final pass and the loss it produced.
pub trait Optimizer<N: ?Sized> {
    fn step(&mut self, net: &mut N, loss: &ComposedLoss) -> Result<()>;

    fn learning_rate(&self) -> f64;
}

/// Per-epoch learning rate schedule
pub trait LrScheduler {
    fn step(&mut self);

    fn current_lr(&self) -> f64;
}

/// Source of batches, one pass per epoch
pub trait BatchLoader {
    /// Batches per epoch
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn epoch_batches(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// Ground-truth name resolving to the batch's full-frame mask, as opposed to
/// `instances` which resolves to the mask the loss was computed against.
pub const FULL_INSTANCES: &str = "full_instances";

/// Summary of one epoch pass
#[derive(Clone, Debug, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub batches: usize,
    pub mean_loss: f32,
}
