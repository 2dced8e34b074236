use super::distance::distance_transform;
use super::types::{Click, PointSet};
use crate::error::{ClickLoopError, Result};
use ndarray::{s, Array2, Array4, ArrayView2};
use rand::Rng;

/// Default probability threshold separating predicted foreground from background.
pub const DEFAULT_PRED_THRESH: f32 = 0.49;

/// Outcome of synthesizing one click for one sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClickDecision {
    pub fn_max_dist: f32,
    pub fp_max_dist: f32,
    /// `None` when prediction and ground truth already agree.
    pub click: Option<Click>,
}

/// Synthesizes the next click from the error regions between a prediction
/// and the ground truth.
#[derive(Clone, Copy, Debug)]
pub struct ClickSimulator {
    pred_thresh: f32,
}

impl Default for ClickSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_PRED_THRESH)
    }
}

impl ClickSimulator {
    pub fn new(pred_thresh: f32) -> Self {
        Self { pred_thresh }
    }

    pub fn pred_thresh(&self) -> f32 {
        self.pred_thresh
    }

    /// Add one click per sample for round `click_round` (1-based).
    ///
    /// `pred` holds probabilities `[B, 1, H, W]`, `gt` the label mask of the
    /// same shape (`-1` ignored). Samples without any error region keep their
    /// point slots untouched.
    pub fn next_points<R: Rng + ?Sized>(
        &self,
        pred: &Array4<f32>,
        gt: &Array4<f32>,
        points: &[PointSet],
        click_round: usize,
        rng: &mut R,
    ) -> Result<Vec<PointSet>> {
        if click_round == 0 {
            return Err(ClickLoopError::InvalidArgument(
                "click round is 1-based".to_string(),
            ));
        }
        if pred.shape() != gt.shape() {
            return Err(ClickLoopError::shape("prediction", gt.shape(), pred.shape()));
        }
        if pred.shape()[0] != points.len() {
            return Err(ClickLoopError::InvalidArgument(format!(
                "{} point sets for a batch of {}",
                points.len(),
                pred.shape()[0]
            )));
        }

        let mut next = points.to_vec();
        for (b, set) in next.iter_mut().enumerate() {
            if click_round == 1 && !gt.slice(s![b, 0, .., ..]).iter().any(|&v| v > 0.5) {
                tracing::warn!(sample = b, "ground truth has no foreground pixels");
            }
            let decision = self.sample_click(
                pred.slice(s![b, 0, .., ..]),
                gt.slice(s![b, 0, .., ..]),
                click_round,
                rng,
            );
            if let Some(click) = decision.click {
                let coords = (click.coords.0 as usize, click.coords.1 as usize);
                let slot = set.set_round_click(click_round, coords, click.is_positive);
                tracing::debug!(
                    sample = b,
                    round = click_round,
                    positive = click.is_positive,
                    row = coords.0,
                    col = coords.1,
                    ?slot,
                    "synthesized click"
                );
            } else {
                tracing::debug!(sample = b, round = click_round, "no error region, click skipped");
            }
        }
        Ok(next)
    }

    /// Decide the click for a single `[H, W]` sample.
    pub fn sample_click<R: Rng + ?Sized>(
        &self,
        pred: ArrayView2<'_, f32>,
        gt: ArrayView2<'_, f32>,
        click_round: usize,
        rng: &mut R,
    ) -> ClickDecision {
        let (h, w) = pred.dim();
        let mut fn_mask = Array2::<u8>::zeros((h + 2, w + 2));
        let mut fp_mask = Array2::<u8>::zeros((h + 2, w + 2));
        for ((r, c), &p) in pred.indexed_iter() {
            let label = gt[[r, c]];
            if label > 0.5 && p < self.pred_thresh {
                fn_mask[[r + 1, c + 1]] = 1;
            } else if label <= 0.5 && p > self.pred_thresh {
                fp_mask[[r + 1, c + 1]] = 1;
            }
        }

        let fn_dt = distance_transform(fn_mask.view());
        let fp_dt = distance_transform(fp_mask.view());
        let fn_dt = fn_dt.slice(s![1..h + 1, 1..w + 1]);
        let fp_dt = fp_dt.slice(s![1..h + 1, 1..w + 1]);

        let fn_max_dist = fn_dt.iter().cloned().fold(0.0f32, f32::max);
        let fp_max_dist = fp_dt.iter().cloned().fold(0.0f32, f32::max);

        let is_positive = fn_max_dist > fp_max_dist;
        let dt = if is_positive { fn_dt } else { fp_dt };
        let inner_thresh = fn_max_dist.max(fp_max_dist) / 2.0;

        let inner: Vec<(usize, usize)> = dt
            .indexed_iter()
            .filter(|(_, &d)| d > inner_thresh)
            .map(|(idx, _)| idx)
            .collect();

        let click = if inner.is_empty() {
            None
        } else {
            let (r, c) = inner[rng.random_range(0..inner.len())];
            Some(Click::new(
                (r as f32, c as f32),
                is_positive,
                click_round as i32,
            ))
        };

        ClickDecision {
            fn_max_dist,
            fp_max_dist,
            click,
        }
    }
}
