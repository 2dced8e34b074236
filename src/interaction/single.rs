use super::strategy::InteractionStrategy;
use super::types::{Batch, FinalPass, RoundState};
use crate::clicks::{points_to_array, ClickSimulator};
use crate::error::Result;
use crate::loss::{INSTANCE_AUX_LOSS, INSTANCE_LOSS, POINT_LOSS, ZOOM_IN_LOSS};
use crate::network::{concat_channels, sigmoid, ForwardMode, InteractiveNetwork};
use ndarray::{s, Array4};
use rand::Rng;

const SUPERVISED_TERMS: &[&str] = &[INSTANCE_LOSS, INSTANCE_AUX_LOSS, ZOOM_IN_LOSS, POINT_LOSS];

/// One network predicts every round and is supervised on the full frame.
///
/// Rounds listed in `click_models` are predicted by those frozen networks
/// instead; later rounds fall back to the trained one.
pub struct SingleNetworkStrategy<N> {
    net: N,
    click_models: Vec<Box<dyn InteractiveNetwork>>,
    simulator: ClickSimulator,
    prev_mask_drop_prob: f64,
}

impl<N: InteractiveNetwork> SingleNetworkStrategy<N> {
    pub fn new(net: N, simulator: ClickSimulator) -> Self {
        Self {
            net,
            click_models: Vec::new(),
            simulator,
            prev_mask_drop_prob: 0.0,
        }
    }

    pub fn with_click_models(mut self, click_models: Vec<Box<dyn InteractiveNetwork>>) -> Self {
        self.click_models = click_models;
        self
    }

    pub fn with_prev_mask_drop_prob(mut self, prob: f64) -> Self {
        self.prev_mask_drop_prob = prob;
        self
    }

    fn net_input(&self, batch: &Batch, prev_output: &Array4<f32>) -> Result<Array4<f32>> {
        if self.net.with_prev_mask() {
            concat_channels(batch.image(), prev_output)
        } else {
            Ok(batch.image().clone())
        }
    }
}

impl<N: InteractiveNetwork> InteractionStrategy for SingleNetworkStrategy<N> {
    type Net = N;
    type BatchState = ();

    fn begin_batch(&mut self, _batch: &Batch, _validation: bool) -> Self::BatchState {}

    fn simulate_round<R: Rng + ?Sized>(
        &mut self,
        _state: &mut Self::BatchState,
        batch: &Batch,
        round: &mut RoundState,
        click_round: usize,
        rng: &mut R,
    ) -> Result<()> {
        let input = self.net_input(batch, &round.prev_output)?;
        let points = points_to_array(&round.points)?;

        let model: &mut dyn InteractiveNetwork = match click_round
            .checked_sub(1)
            .and_then(|i| self.click_models.get_mut(i))
        {
            Some(frozen) => {
                tracing::debug!(round = click_round, "using per-round click model");
                frozen.as_mut()
            }
            None => &mut self.net,
        };
        let outputs = model.forward(&input, &points, Some(batch.gt_mask()), ForwardMode::simulation())?;

        round.prev_output = sigmoid(&outputs.instances()?);
        round.points = self.simulator.next_points(
            &round.prev_output,
            batch.gt_mask(),
            &round.points,
            click_round,
            rng,
        )?;
        Ok(())
    }

    fn before_final<R: Rng + ?Sized>(
        &mut self,
        _state: &mut Self::BatchState,
        round: &mut RoundState,
        num_iters: usize,
        rng: &mut R,
    ) -> Result<()> {
        if !self.net.with_prev_mask() || self.prev_mask_drop_prob <= 0.0 || num_iters == 0 {
            return Ok(());
        }
        for b in 0..round.prev_output.dim().0 {
            if rng.random::<f64>() < self.prev_mask_drop_prob {
                round.prev_output.slice_mut(s![b, .., .., ..]).fill(0.0);
                tracing::debug!(sample = b, "dropped previous mask");
            }
        }
        Ok(())
    }

    fn final_pass<R: Rng + ?Sized>(
        &mut self,
        _state: &mut Self::BatchState,
        batch: &Batch,
        round: RoundState,
        validation: bool,
        _rng: &mut R,
    ) -> Result<FinalPass> {
        let input = self.net_input(batch, &round.prev_output)?;
        let points = points_to_array(&round.points)?;
        let outputs = self.net.forward(
            &input,
            &points,
            Some(batch.gt_mask()),
            ForwardMode::final_pass(validation),
        )?;
        Ok(FinalPass {
            outputs,
            points: round.points,
            loss_target: batch.gt_mask().clone(),
        })
    }

    fn final_probs(&mut self, _state: &mut Self::BatchState, final_pass: &FinalPass) -> Result<Array4<f32>> {
        Ok(sigmoid(&final_pass.outputs.instances()?))
    }

    fn supervised_terms(&self) -> &'static [&'static str] {
        SUPERVISED_TERMS
    }

    fn network(&self) -> &N {
        &self.net
    }

    fn network_mut(&mut self) -> &mut N {
        &mut self.net
    }
}
