use crate::clicks::PointSet;
use crate::error::{ClickLoopError, Result};
use crate::loss::ComposedLoss;
use crate::network::NetOutputs;
use ndarray::Array4;

/// One training batch: NCHW image, `[B, 1, H, W]` label mask with values in
/// `{-1, 0, 1}` and the clicks each sample starts with.
#[derive(Clone, Debug)]
pub struct Batch {
    image: Array4<f32>,
    gt_mask: Array4<f32>,
    points: Vec<PointSet>,
}

impl Batch {
    pub fn new(image: Array4<f32>, gt_mask: Array4<f32>, points: Vec<PointSet>) -> Result<Self> {
        let (b, _, h, w) = image.dim();
        if gt_mask.dim() != (b, 1, h, w) {
            return Err(ClickLoopError::shape("ground truth mask", &[b, 1, h, w], gt_mask.shape()));
        }
        if points.len() != b {
            return Err(ClickLoopError::InvalidArgument(format!(
                "{} point sets for a batch of {b}",
                points.len()
            )));
        }
        if let Some(first) = points.first() {
            if let Some(bad) = points.iter().find(|p| p.len() != first.len()) {
                return Err(ClickLoopError::shape("point set", &[first.len(), 3], &[bad.len(), 3]));
            }
        }
        Ok(Self {
            image,
            gt_mask,
            points,
        })
    }

    /// Batch whose samples start without clicks.
    pub fn without_clicks(image: Array4<f32>, gt_mask: Array4<f32>, num_max_points: usize) -> Result<Self> {
        let points = vec![PointSet::new(num_max_points); image.dim().0];
        Self::new(image, gt_mask, points)
    }

    pub fn image(&self) -> &Array4<f32> {
        &self.image
    }

    pub fn gt_mask(&self) -> &Array4<f32> {
        &self.gt_mask
    }

    pub fn points(&self) -> &[PointSet] {
        &self.points
    }

    pub fn batch_size(&self) -> usize {
        self.image.dim().0
    }

    pub fn spatial_size(&self) -> (usize, usize) {
        let (_, _, h, w) = self.image.dim();
        (h, w)
    }
}

/// What carries over between simulated rounds.
#[derive(Clone, Debug)]
pub struct RoundState {
    /// Full-frame probabilities from the previous round, `[B, 1, H, W]`
    pub prev_output: Array4<f32>,
    pub points: Vec<PointSet>,
}

impl RoundState {
    /// Zero previous mask and the batch's own clicks.
    pub fn new(batch: &Batch) -> Self {
        let (h, w) = batch.spatial_size();
        Self {
            prev_output: Array4::zeros((batch.batch_size(), 1, h, w)),
            points: batch.points().to_vec(),
        }
    }
}

/// Result of the supervised pass.
#[derive(Clone, Debug)]
pub struct FinalPass {
    pub outputs: NetOutputs,
    /// Points the supervised network was given
    pub points: Vec<PointSet>,
    /// Mask the loss is computed against, in the frame of `outputs`
    pub loss_target: Array4<f32>,
}

#[derive(Clone, Debug)]
pub struct BatchForward {
    pub loss: ComposedLoss,
    pub outputs: NetOutputs,
    pub points: Vec<PointSet>,
    pub loss_target: Array4<f32>,
    pub num_iters: usize,
}

/// State after one simulated round: the prediction the round made and the
/// points once its click was added.
#[derive(Clone, Debug)]
pub struct RoundSnapshot {
    pub click_round: usize,
    pub probs: Array4<f32>,
    pub points: Vec<PointSet>,
}

#[derive(Clone, Debug)]
pub struct Simulation {
    pub rounds: Vec<RoundSnapshot>,
    /// Full-frame probabilities of the final pass
    pub final_probs: Array4<f32>,
    pub final_points: Vec<PointSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_rejects_mismatched_parts() {
        let image = Array4::<f32>::zeros((2, 3, 8, 8));
        let gt = Array4::<f32>::zeros((2, 1, 8, 8));
        assert!(Batch::new(image.clone(), Array4::zeros((2, 1, 8, 7)), vec![PointSet::new(2); 2]).is_err());
        assert!(Batch::new(image.clone(), gt.clone(), vec![PointSet::new(2)]).is_err());
        assert!(Batch::new(
            image.clone(),
            gt.clone(),
            vec![PointSet::new(2), PointSet::new(3)]
        )
        .is_err());
        let batch = Batch::without_clicks(image, gt, 4).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.points()[1].len(), 8);
    }

    #[test]
    fn round_state_starts_from_zero_mask() {
        let batch = Batch::without_clicks(
            Array4::ones((1, 3, 5, 6)),
            Array4::zeros((1, 1, 5, 6)),
            2,
        )
        .unwrap();
        let state = RoundState::new(&batch);
        assert_eq!(state.prev_output.dim(), (1, 1, 5, 6));
        assert!(state.prev_output.iter().all(|&v| v == 0.0));
        assert_eq!(state.points, batch.points());
    }
}
