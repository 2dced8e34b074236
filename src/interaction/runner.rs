use super::strategy::InteractionStrategy;
use super::types::{Batch, BatchForward, FinalPass, RoundSnapshot, RoundState, Simulation};
use crate::clicks::PointSet;
use crate::error::{ClickLoopError, Result};
use crate::loss::{term_inputs, ComposedLoss, LossComposer, INSTANCE_LOSS};
use ndarray::Array1;
use rand::Rng;

/// Per-sample weights for the instance term, computed from the final points.
pub type SampleWeightFn = fn(&[PointSet]) -> Array1<f32>;

/// Drives simulated click rounds and the supervised pass for each batch.
pub struct InteractionLoop<S> {
    strategy: S,
    max_num_next_clicks: usize,
    composer: LossComposer,
    instance_sample_weights: Option<SampleWeightFn>,
}

impl<S: InteractionStrategy> InteractionLoop<S> {
    pub fn new(strategy: S, max_num_next_clicks: usize, composer: LossComposer) -> Self {
        Self {
            strategy,
            max_num_next_clicks,
            composer,
            instance_sample_weights: None,
        }
    }

    /// Scale the instance loss per sample, e.g. with
    /// [`dynamic_loss_weight`](crate::loss::dynamic_loss_weight).
    pub fn with_instance_sample_weights(mut self, weights: SampleWeightFn) -> Self {
        self.instance_sample_weights = Some(weights);
        self
    }

    pub fn max_num_next_clicks(&self) -> usize {
        self.max_num_next_clicks
    }

    pub fn composer(&self) -> &LossComposer {
        &self.composer
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Rounds for the next batch, uniform over `0..=max_num_next_clicks`.
    pub fn sample_num_iters<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.random_range(0..=self.max_num_next_clicks)
    }

    pub fn batch_forward<R: Rng + ?Sized>(
        &mut self,
        batch: &Batch,
        validation: bool,
        rng: &mut R,
    ) -> Result<BatchForward> {
        let num_iters = self.sample_num_iters(rng);
        self.batch_forward_with(batch, validation, num_iters, rng)
    }

    /// Run exactly `num_iters` simulated rounds, then the supervised pass.
    pub fn batch_forward_with<R: Rng + ?Sized>(
        &mut self,
        batch: &Batch,
        validation: bool,
        num_iters: usize,
        rng: &mut R,
    ) -> Result<BatchForward> {
        if num_iters > self.max_num_next_clicks {
            return Err(ClickLoopError::InvalidArgument(format!(
                "{num_iters} rounds requested, at most {} allowed",
                self.max_num_next_clicks
            )));
        }
        tracing::debug!(num_iters, validation, "batch forward");

        let mut state = self.strategy.begin_batch(batch, validation);
        let mut round = RoundState::new(batch);
        for click_round in 1..=num_iters {
            let _span = tracing::debug_span!("click_round", round = click_round).entered();
            self.strategy
                .simulate_round(&mut state, batch, &mut round, click_round, rng)?;
        }
        self.strategy
            .before_final(&mut state, &mut round, num_iters, rng)?;

        let final_pass = self
            .strategy
            .final_pass(&mut state, batch, round, validation, rng)?;
        let loss = self.compose(&final_pass, validation)?;

        Ok(BatchForward {
            loss,
            outputs: final_pass.outputs,
            points: final_pass.points,
            loss_target: final_pass.loss_target,
            num_iters,
        })
    }

    /// Evaluation-mode session with a fixed number of rounds, recording each
    /// round's prediction. No loss is computed.
    pub fn simulate<R: Rng + ?Sized>(
        &mut self,
        batch: &Batch,
        num_rounds: usize,
        rng: &mut R,
    ) -> Result<Simulation> {
        let mut state = self.strategy.begin_batch(batch, true);
        let mut round = RoundState::new(batch);
        let mut rounds = Vec::with_capacity(num_rounds);
        for click_round in 1..=num_rounds {
            let _span = tracing::debug_span!("click_round", round = click_round).entered();
            self.strategy
                .simulate_round(&mut state, batch, &mut round, click_round, rng)?;
            rounds.push(RoundSnapshot {
                click_round,
                probs: round.prev_output.clone(),
                points: round.points.clone(),
            });
        }

        let final_pass = self.strategy.final_pass(&mut state, batch, round, true, rng)?;
        let final_probs = self.strategy.final_probs(&mut state, &final_pass)?;
        Ok(Simulation {
            rounds,
            final_probs,
            final_points: final_pass.points,
        })
    }

    fn compose(&self, final_pass: &FinalPass, validation: bool) -> Result<ComposedLoss> {
        let target = final_pass.loss_target.view().into_dyn();
        let sample_weights = self.instance_sample_weights.map(|f| f(&final_pass.points));

        let mut loss = ComposedLoss::default();
        for &name in self.strategy.supervised_terms() {
            let weights = match (&sample_weights, name == INSTANCE_LOSS) {
                (Some(w), true) => Some(w.view()),
                _ => None,
            };
            loss = self.composer.compose(
                name,
                loss,
                validation,
                || term_inputs(name, &final_pass.outputs, target.clone()),
                weights,
            )?;
        }
        Ok(loss)
    }
}
