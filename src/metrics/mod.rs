//! Training metrics computed from network outputs.

use crate::error::{ClickLoopError, Result};
use crate::network::INSTANCES;
use crate::telemetry::ScalarSink;
use ndarray::{ArrayView2, ArrayViewD, Axis, Ix4};

/// A metric fed with named prediction and ground-truth tensors every step.
pub trait Metric {
    fn name(&self) -> &str;

    /// Output names whose tensors are passed as `preds`, in order.
    fn pred_outputs(&self) -> &[&'static str];

    /// Ground-truth names passed as `gts`, in order.
    fn gt_outputs(&self) -> &[&'static str];

    fn update(&mut self, preds: &[ArrayViewD<'_, f32>], gts: &[ArrayViewD<'_, f32>]) -> Result<()>;

    fn reset_epoch_stats(&mut self);

    fn get_epoch_value(&self) -> f32;

    fn log_states(&self, _sink: &mut dyn ScalarSink, _tag: &str, _step: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// IoU of `probs > thresh` against `gt > 0.5`, skipping `ignore_label` pixels.
///
/// An empty union counts as a perfect match.
pub fn mask_iou(
    probs: ArrayView2<'_, f32>,
    gt: ArrayView2<'_, f32>,
    thresh: f32,
    ignore_label: f32,
) -> f32 {
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (&p, &g) in probs.iter().zip(gt.iter()) {
        if g == ignore_label {
            continue;
        }
        let pred = p > thresh;
        let truth = g > 0.5;
        if pred && truth {
            intersection += 1;
        }
        if pred || truth {
            union += 1;
        }
    }
    if union == 0 {
        1.0
    } else {
        intersection as f32 / union as f32
    }
}

/// IoU with a binarization threshold that follows the best-scoring neighbour.
///
/// Each update scores the current threshold and one step either side, moves
/// the threshold towards the winner with an EMA and keeps an EMA of the
/// winning IoU.
#[derive(Clone, Debug)]
pub struct AdaptiveIoU {
    iou_thresh: f32,
    thresh_step: f32,
    thresh_beta: f32,
    iou_beta: f32,
    ignore_label: f32,
    from_logits: bool,
    ema_iou: f32,
    epoch_iou_sum: f32,
    epoch_batch_count: usize,
}

impl Default for AdaptiveIoU {
    fn default() -> Self {
        Self::new(0.4, 0.025, 0.99, 0.9, -1.0, true)
    }
}

impl AdaptiveIoU {
    pub fn new(
        init_thresh: f32,
        thresh_step: f32,
        thresh_beta: f32,
        iou_beta: f32,
        ignore_label: f32,
        from_logits: bool,
    ) -> Self {
        Self {
            iou_thresh: init_thresh,
            thresh_step,
            thresh_beta,
            iou_beta,
            ignore_label,
            from_logits,
            ema_iou: 0.0,
            epoch_iou_sum: 0.0,
            epoch_batch_count: 0,
        }
    }

    pub fn iou_thresh(&self) -> f32 {
        self.iou_thresh
    }

    pub fn ema_iou(&self) -> f32 {
        self.ema_iou
    }

    fn batch_iou(&self, probs: &ndarray::Array4<f32>, gt: &ndarray::Array4<f32>, thresh: f32) -> f32 {
        let batch = probs.len_of(Axis(0));
        if batch == 0 {
            return 0.0;
        }
        let total: f32 = probs
            .axis_iter(Axis(0))
            .zip(gt.axis_iter(Axis(0)))
            .map(|(p, g)| {
                mask_iou(
                    p.index_axis(Axis(0), 0),
                    g.index_axis(Axis(0), 0),
                    thresh,
                    self.ignore_label,
                )
            })
            .sum();
        total / batch as f32
    }
}

impl Metric for AdaptiveIoU {
    fn name(&self) -> &str {
        "adaptive_iou"
    }

    fn pred_outputs(&self) -> &[&'static str] {
        &[INSTANCES]
    }

    fn gt_outputs(&self) -> &[&'static str] {
        &[INSTANCES]
    }

    fn update(&mut self, preds: &[ArrayViewD<'_, f32>], gts: &[ArrayViewD<'_, f32>]) -> Result<()> {
        let (Some(pred), Some(gt)) = (preds.first(), gts.first()) else {
            return Err(ClickLoopError::InvalidArgument(
                "adaptive IoU needs one prediction and one ground truth".to_string(),
            ));
        };
        if pred.shape() != gt.shape() || pred.ndim() != 4 {
            return Err(ClickLoopError::shape("adaptive IoU input", gt.shape(), pred.shape()));
        }
        let probs = pred
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|_| ClickLoopError::shape("adaptive IoU prediction", &[0, 1, 0, 0], pred.shape()))?;
        let probs = if self.from_logits {
            probs.mapv(|x| 1.0 / (1.0 + (-x).exp()))
        } else {
            probs
        };
        let gt = gt
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|_| ClickLoopError::shape("adaptive IoU target", &[0, 1, 0, 0], gt.shape()))?;

        let mut best_thresh = self.iou_thresh;
        let mut max_iou = self.batch_iou(&probs, &gt, best_thresh);
        for t in [best_thresh - self.thresh_step, best_thresh + self.thresh_step] {
            let iou = self.batch_iou(&probs, &gt, t);
            if iou > max_iou {
                max_iou = iou;
                best_thresh = t;
            }
        }

        self.iou_thresh = self.thresh_beta * self.iou_thresh + (1.0 - self.thresh_beta) * best_thresh;
        self.ema_iou = self.iou_beta * self.ema_iou + (1.0 - self.iou_beta) * max_iou;
        self.epoch_iou_sum += max_iou;
        self.epoch_batch_count += 1;
        Ok(())
    }

    fn reset_epoch_stats(&mut self) {
        self.epoch_iou_sum = 0.0;
        self.epoch_batch_count = 0;
    }

    fn get_epoch_value(&self) -> f32 {
        if self.epoch_batch_count == 0 {
            0.0
        } else {
            self.epoch_iou_sum / self.epoch_batch_count as f32
        }
    }

    fn log_states(&self, sink: &mut dyn ScalarSink, tag: &str, step: u64) -> anyhow::Result<()> {
        sink.add_scalar(&format!("{tag}_ema_iou"), self.ema_iou as f64, step, false)?;
        sink.add_scalar(&format!("{tag}_iou_thresh"), self.iou_thresh as f64, step, false)?;
        Ok(())
    }
}
