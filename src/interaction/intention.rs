use super::strategy::InteractionStrategy;
use super::types::{Batch, FinalPass, RoundState};
use crate::clicks::{points_to_array, ClickSimulator, PointSet};
use crate::error::{ClickLoopError, Result};
use crate::loss::INSTANCE_LOSS;
use crate::network::{concat_channels, sigmoid, ForwardMode, InteractiveNetwork};
use crate::zoom::{ZoomConfig, ZoomIn};
use ndarray::{concatenate, s, Array4, Axis};
use rand::Rng;

const SUPERVISED_TERMS: &[&str] = &[INSTANCE_LOSS];

/// Crop-frame input for the segmentation network.
struct SegInput {
    input: Array4<f32>,
    points: Vec<PointSet>,
    gt_mask: Array4<f32>,
}

/// A frozen intention network guesses the object on the full frame, the
/// segmentation network refines it on a zoomed crop around that guess.
///
/// Clicks are synthesized on the full frame after the crop prediction is
/// pasted back; the segmentation network is supervised on the cropped mask.
pub struct IntentionSegmentationStrategy<N> {
    intention_net: Box<dyn InteractiveNetwork>,
    seg_net: N,
    simulator: ClickSimulator,
    zoom: ZoomConfig,
    seg_num_max_points: usize,
}

impl<N: InteractiveNetwork> IntentionSegmentationStrategy<N> {
    pub fn new(
        intention_net: Box<dyn InteractiveNetwork>,
        seg_net: N,
        simulator: ClickSimulator,
        zoom: ZoomConfig,
        seg_num_max_points: usize,
    ) -> Self {
        Self {
            intention_net,
            seg_net,
            simulator,
            zoom,
            seg_num_max_points,
        }
    }

    /// Infer intention on the full frame and crop every sample around it.
    fn prepare_seg_input<R: Rng + ?Sized>(
        &mut self,
        zooms: &mut [ZoomIn],
        batch: &Batch,
        round: &RoundState,
        rng: &mut R,
    ) -> Result<SegInput> {
        let _span = tracing::debug_span!("prepare_seg_input").entered();
        let int_input = concat_channels(batch.image(), &round.prev_output)?;
        let int_points = points_to_array(&round.points)?;
        let int_out = self.intention_net.forward(
            &int_input,
            &int_points,
            None,
            ForwardMode::simulation(),
        )?;
        let intention = sigmoid(&int_out.instances()?);
        let (batch_size, _, h, w) = batch.image().dim();
        if intention.dim() != (batch_size, 1, h, w) {
            return Err(ClickLoopError::shape(
                "intention output",
                &[batch_size, 1, h, w],
                intention.shape(),
            ));
        }

        let mut crops = Vec::with_capacity(zooms.len());
        let mut gt_crops = Vec::with_capacity(zooms.len());
        let mut points = Vec::with_capacity(zooms.len());
        for (b, zoom) in zooms.iter_mut().enumerate() {
            let probs = intention.slice(s![b, .., .., ..]);
            zoom.set_probs(probs.index_axis(Axis(0), 0));

            let channels = concatenate(
                Axis(0),
                &[batch.image().slice(s![b, .., .., ..]), probs],
            )
            .map_err(|_| ClickLoopError::shape("zoom input", batch.image().shape(), intention.shape()))?;
            let clicks = round.points[b].clicks();
            let (crop, crop_clicks) = zoom.transform(channels.view(), &clicks, rng)?;
            let gt_crop = zoom.transform_mask(batch.gt_mask().slice(s![b, 0, .., ..]))?;

            crops.push(crop.insert_axis(Axis(0)));
            gt_crops.push(gt_crop.insert_axis(Axis(0)).insert_axis(Axis(0)));
            points.push(PointSet::from_clicks(&crop_clicks, self.seg_num_max_points));
        }

        let crop_views: Vec<_> = crops.iter().map(|c| c.view()).collect();
        let input = concatenate(Axis(0), &crop_views)
            .map_err(|_| ClickLoopError::InvalidArgument("zoom crops differ in size".to_string()))?;
        let gt_views: Vec<_> = gt_crops.iter().map(|g| g.view()).collect();
        let gt_mask = concatenate(Axis(0), &gt_views)
            .map_err(|_| ClickLoopError::InvalidArgument("zoom crops differ in size".to_string()))?;

        Ok(SegInput {
            input,
            points,
            gt_mask,
        })
    }

    /// Paste crop-frame probabilities back into the full frame.
    fn restore_full_frame(
        zooms: &mut [ZoomIn],
        crop_probs: &Array4<f32>,
        full: (usize, usize),
    ) -> Result<Array4<f32>> {
        if crop_probs.dim().0 != zooms.len() {
            return Err(ClickLoopError::InvalidArgument(format!(
                "{} crop predictions for {} zoom states",
                crop_probs.dim().0,
                zooms.len()
            )));
        }
        let mut out = Array4::<f32>::zeros((zooms.len(), 1, full.0, full.1));
        for (b, zoom) in zooms.iter_mut().enumerate() {
            let restored = zoom.inv_transform(crop_probs.slice(s![b, 0, .., ..]))?;
            out.slice_mut(s![b, 0, .., ..]).assign(&restored);
        }
        Ok(out)
    }
}

impl<N: InteractiveNetwork> InteractionStrategy for IntentionSegmentationStrategy<N> {
    type Net = N;
    type BatchState = Vec<ZoomIn>;

    fn begin_batch(&mut self, batch: &Batch, validation: bool) -> Self::BatchState {
        (0..batch.batch_size())
            .map(|_| ZoomIn::new(self.zoom.clone(), !validation))
            .collect()
    }

    fn simulate_round<R: Rng + ?Sized>(
        &mut self,
        zooms: &mut Self::BatchState,
        batch: &Batch,
        round: &mut RoundState,
        click_round: usize,
        rng: &mut R,
    ) -> Result<()> {
        let seg = self.prepare_seg_input(zooms, batch, round, rng)?;
        let seg_points = points_to_array(&seg.points)?;
        let out = self
            .seg_net
            .forward(&seg.input, &seg_points, None, ForwardMode::simulation())?;

        let crop_probs = sigmoid(&out.instances()?);
        round.prev_output = Self::restore_full_frame(zooms, &crop_probs, batch.spatial_size())?;
        round.points = self.simulator.next_points(
            &round.prev_output,
            batch.gt_mask(),
            &round.points,
            click_round,
            rng,
        )?;
        Ok(())
    }

    fn final_pass<R: Rng + ?Sized>(
        &mut self,
        zooms: &mut Self::BatchState,
        batch: &Batch,
        round: RoundState,
        validation: bool,
        rng: &mut R,
    ) -> Result<FinalPass> {
        let seg = self.prepare_seg_input(zooms, batch, &round, rng)?;
        let seg_points = points_to_array(&seg.points)?;
        let outputs = self.seg_net.forward(
            &seg.input,
            &seg_points,
            None,
            ForwardMode::final_pass(validation),
        )?;
        Ok(FinalPass {
            outputs,
            points: seg.points,
            loss_target: seg.gt_mask,
        })
    }

    fn final_probs(&mut self, zooms: &mut Self::BatchState, final_pass: &FinalPass) -> Result<Array4<f32>> {
        let crop_probs = sigmoid(&final_pass.outputs.instances()?);
        let full = zooms
            .first()
            .and_then(ZoomIn::input_size)
            .ok_or_else(|| ClickLoopError::InvalidArgument("no zoom state for final pass".to_string()))?;
        Self::restore_full_frame(zooms, &crop_probs, full)
    }

    fn supervised_terms(&self) -> &'static [&'static str] {
        SUPERVISED_TERMS
    }

    fn network(&self) -> &N {
        &self.seg_net
    }

    fn network_mut(&mut self) -> &mut N {
        &mut self.seg_net
    }
}
