use super::types::{Batch, FinalPass, RoundState};
use crate::error::Result;
use crate::network::InteractiveNetwork;
use ndarray::Array4;
use rand::Rng;

/// How one batch's simulated session is driven.
///
/// The loop owns the round schedule; a strategy decides which networks run
/// in a round, how their inputs are framed and what the final pass is
/// supervised against.
pub trait InteractionStrategy {
    /// Network whose parameters are optimized and checkpointed
    type Net: InteractiveNetwork;

    /// Per-batch state, created by `begin_batch` and dropped at batch end
    type BatchState;

    fn begin_batch(&mut self, batch: &Batch, validation: bool) -> Self::BatchState;

    /// Run simulated round `click_round` (1-based) without gradients: predict,
    /// store the full-frame probabilities in `round.prev_output` and add the
    /// next click to `round.points`.
    fn simulate_round<R: Rng + ?Sized>(
        &mut self,
        state: &mut Self::BatchState,
        batch: &Batch,
        round: &mut RoundState,
        click_round: usize,
        rng: &mut R,
    ) -> Result<()>;

    /// Hook between the last simulated round and the final pass.
    fn before_final<R: Rng + ?Sized>(
        &mut self,
        _state: &mut Self::BatchState,
        _round: &mut RoundState,
        _num_iters: usize,
        _rng: &mut R,
    ) -> Result<()> {
        Ok(())
    }

    /// The pass whose outputs feed the loss.
    fn final_pass<R: Rng + ?Sized>(
        &mut self,
        state: &mut Self::BatchState,
        batch: &Batch,
        round: RoundState,
        validation: bool,
        rng: &mut R,
    ) -> Result<FinalPass>;

    /// Final-pass probabilities mapped to the batch's full frame.
    fn final_probs(&mut self, state: &mut Self::BatchState, final_pass: &FinalPass) -> Result<Array4<f32>>;

    /// Loss terms this strategy supervises, in composition order.
    fn supervised_terms(&self) -> &'static [&'static str];

    fn network(&self) -> &Self::Net;

    fn network_mut(&mut self) -> &mut Self::Net;
}
