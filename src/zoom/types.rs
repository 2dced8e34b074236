use serde::{Deserialize, Serialize};

/// Crop geometry parameters for the zoom-in transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    /// Crop output size `(height, width)`; `None` keeps the input size.
    pub target_size: Option<(usize, usize)>,
    pub expansion_ratio: f32,
    pub min_crop_size: usize,
    /// Probability above which a pixel counts as object.
    pub prob_thresh: f32,
    /// Below this IoU with the previous box the crop is recomputed.
    pub recompute_thresh_iou: f32,
    /// Extra expansion factor range sampled per crop while training.
    pub training_jitter: (f32, f32),
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            target_size: None,
            expansion_ratio: 1.4,
            min_crop_size: 200,
            prob_thresh: 0.5,
            recompute_thresh_iou: 0.5,
            training_jitter: (1.0, 1.4),
        }
    }
}

/// Inclusive pixel bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectRoi {
    pub rmin: usize,
    pub rmax: usize,
    pub cmin: usize,
    pub cmax: usize,
}

impl ObjectRoi {
    pub fn full(height: usize, width: usize) -> Self {
        Self {
            rmin: 0,
            rmax: height.saturating_sub(1),
            cmin: 0,
            cmax: width.saturating_sub(1),
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.rmax - self.rmin + 1
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.cmax - self.cmin + 1
    }

    #[inline]
    pub fn contains(&self, row: f32, col: f32) -> bool {
        row >= self.rmin as f32
            && row < (self.rmax + 1) as f32
            && col >= self.cmin as f32
            && col < (self.cmax + 1) as f32
    }

    pub fn iou(&self, other: &ObjectRoi) -> f32 {
        let r0 = self.rmin.max(other.rmin);
        let r1 = self.rmax.min(other.rmax);
        let c0 = self.cmin.max(other.cmin);
        let c1 = self.cmax.min(other.cmax);
        if r0 > r1 || c0 > c1 {
            return 0.0;
        }
        let inter = ((r1 - r0 + 1) * (c1 - c0 + 1)) as f32;
        let area_a = (self.height() * self.width()) as f32;
        let area_b = (other.height() * other.width()) as f32;
        inter / (area_a + area_b - inter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_iou() {
        let a = ObjectRoi { rmin: 0, rmax: 9, cmin: 0, cmax: 9 };
        let b = ObjectRoi { rmin: 5, rmax: 14, cmin: 0, cmax: 9 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        let far = ObjectRoi { rmin: 20, rmax: 25, cmin: 20, cmax: 25 };
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn contains_is_half_open_on_the_far_edge() {
        let roi = ObjectRoi { rmin: 2, rmax: 4, cmin: 2, cmax: 4 };
        assert!(roi.contains(2.0, 4.9));
        assert!(!roi.contains(5.0, 3.0));
        assert!(!roi.contains(1.9, 3.0));
    }
}
