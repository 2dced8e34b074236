use super::types::{ObjectRoi, ZoomConfig};
use crate::clicks::Click;
use crate::error::{ClickLoopError, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;

/// Per-sample zoom-in state, kept across the rounds of one batch.
///
/// `set_probs` feeds the latest probability map, `transform` crops around the
/// object it implies and `inv_transform` pastes a crop-frame prediction back
/// into the full frame.
#[derive(Clone, Debug)]
pub struct ZoomIn {
    config: ZoomConfig,
    training: bool,
    prev_probs: Option<Array2<f32>>,
    roi: Option<ObjectRoi>,
    input_shape: Option<(usize, usize)>,
    crop_shape: Option<(usize, usize)>,
}

impl ZoomIn {
    pub fn new(config: ZoomConfig, training: bool) -> Self {
        Self {
            config,
            training,
            prev_probs: None,
            roi: None,
            input_shape: None,
            crop_shape: None,
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn roi(&self) -> Option<ObjectRoi> {
        self.roi
    }

    /// Full-frame size seen by the last `transform`.
    pub fn input_size(&self) -> Option<(usize, usize)> {
        self.input_shape
    }

    pub fn set_probs(&mut self, probs: ArrayView2<'_, f32>) {
        self.prev_probs = Some(probs.to_owned());
    }

    /// Crop `[C, H, W]` channels around the current object and remap clicks
    /// into the crop frame. Clicks outside the crop are dropped.
    pub fn transform<R: Rng + ?Sized>(
        &mut self,
        channels: ArrayView3<'_, f32>,
        clicks: &[Click],
        rng: &mut R,
    ) -> Result<(Array3<f32>, Vec<Click>)> {
        let _span = tracing::debug_span!("zoom_transform").entered();
        let (num_channels, h, w) = channels.dim();
        if h == 0 || w == 0 {
            return Err(ClickLoopError::InvalidArgument(
                "cannot zoom into an empty image".to_string(),
            ));
        }
        let target = self.config.target_size.unwrap_or((h, w));

        let candidate = self.compute_roi(h, w, target, clicks, rng);
        let roi = match self.roi {
            Some(prev)
                if self.input_shape == Some((h, w))
                    && positive_clicks_inside(&prev, clicks)
                    && prev.iou(&candidate) >= self.config.recompute_thresh_iou =>
            {
                prev
            }
            _ => candidate,
        };
        if self.roi != Some(roi) {
            tracing::debug!(?roi, "zoom crop updated");
        }
        self.roi = Some(roi);
        self.input_shape = Some((h, w));
        self.crop_shape = Some(target);

        let mut cropped = Array3::<f32>::zeros((num_channels, target.0, target.1));
        let window = channels.slice(s![.., roi.rmin..=roi.rmax, roi.cmin..=roi.cmax]);
        for (mut out, src) in cropped
            .axis_iter_mut(Axis(0))
            .zip(window.axis_iter(Axis(0)))
        {
            out.assign(&resample(src, target, FilterType::Triangle)?);
        }

        let mapped = clicks
            .iter()
            .filter(|click| roi.contains(click.coords.0, click.coords.1))
            .map(|click| click.with_coords(to_crop_frame(&roi, target, click.coords)))
            .collect();

        Ok((cropped, mapped))
    }

    /// Crop a label mask with the geometry chosen by the last `transform`.
    pub fn transform_mask(&self, mask: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let (roi, input, crop) = self.geometry()?;
        if mask.dim() != input {
            return Err(ClickLoopError::shape(
                "zoom mask",
                &[input.0, input.1],
                mask.shape(),
            ));
        }
        let window = mask.slice(s![roi.rmin..=roi.rmax, roi.cmin..=roi.cmax]);
        resample_labels(window, crop)
    }

    /// Map a crop-frame probability map back to the full frame, zero outside
    /// the crop. The result also becomes the probability signal for the next
    /// crop.
    pub fn inv_transform(&mut self, probs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let (roi, input, crop) = self.geometry()?;
        if probs.dim() != crop {
            return Err(ClickLoopError::shape(
                "zoomed probabilities",
                &[crop.0, crop.1],
                probs.shape(),
            ));
        }
        let mut full = Array2::<f32>::zeros(input);
        full.slice_mut(s![roi.rmin..=roi.rmax, roi.cmin..=roi.cmax])
            .assign(&resample(probs, (roi.height(), roi.width()), FilterType::Triangle)?);
        self.prev_probs = Some(full.clone());
        Ok(full)
    }

    fn geometry(&self) -> Result<(ObjectRoi, (usize, usize), (usize, usize))> {
        match (self.roi, self.input_shape, self.crop_shape) {
            (Some(roi), Some(input), Some(crop)) => Ok((roi, input, crop)),
            _ => Err(ClickLoopError::InvalidArgument(
                "zoom geometry requested before transform".to_string(),
            )),
        }
    }

    fn compute_roi<R: Rng + ?Sized>(
        &self,
        h: usize,
        w: usize,
        target: (usize, usize),
        clicks: &[Click],
        rng: &mut R,
    ) -> ObjectRoi {
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        let mut include = |r: usize, c: usize| {
            bounds = Some(match bounds {
                None => (r, r, c, c),
                Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            });
        };

        if let Some(probs) = self.prev_probs.as_ref().filter(|p| p.dim() == (h, w)) {
            for ((r, c), &p) in probs.indexed_iter() {
                if p > self.config.prob_thresh {
                    include(r, c);
                }
            }
        }
        for click in clicks.iter().filter(|c| c.is_positive) {
            let (r, c) = click.coords;
            if r >= 0.0 && c >= 0.0 && (r as usize) < h && (c as usize) < w {
                include(r as usize, c as usize);
            }
        }

        let Some((rmin, rmax, cmin, cmax)) = bounds else {
            return ObjectRoi::full(h, w);
        };

        let jitter = if self.training {
            let (lo, hi) = self.config.training_jitter;
            if hi > lo {
                rng.random_range(lo..=hi)
            } else {
                lo
            }
        } else {
            1.0
        };
        let ratio = self.config.expansion_ratio * jitter;
        let min_crop = self.config.min_crop_size as f32;

        let mut box_h = (ratio * (rmax - rmin + 1) as f32).max(min_crop);
        let mut box_w = (ratio * (cmax - cmin + 1) as f32).max(min_crop);
        let aspect = target.0 as f32 / target.1 as f32;
        if box_h / box_w < aspect {
            box_h = box_w * aspect;
        } else {
            box_w = box_h / aspect;
        }

        let crop_h = (box_h.ceil() as usize).clamp(1, h);
        let crop_w = (box_w.ceil() as usize).clamp(1, w);
        let row0 = place(0.5 * (rmin + rmax) as f32, crop_h, h);
        let col0 = place(0.5 * (cmin + cmax) as f32, crop_w, w);

        ObjectRoi {
            rmin: row0,
            rmax: row0 + crop_h - 1,
            cmin: col0,
            cmax: col0 + crop_w - 1,
        }
    }
}

/// Start offset of a window of `size` centred on `center`, shifted inside `[0, limit)`.
fn place(center: f32, size: usize, limit: usize) -> usize {
    let start = (center - 0.5 * (size as f32 - 1.0)).round();
    let max_start = (limit - size) as f32;
    start.clamp(0.0, max_start) as usize
}

/// Full-frame `(row, col)` to crop-frame coordinates for a crop of `crop` pixels.
fn to_crop_frame(roi: &ObjectRoi, crop: (usize, usize), coords: (f32, f32)) -> (f32, f32) {
    (
        (coords.0 - roi.rmin as f32) * crop.0 as f32 / roi.height() as f32,
        (coords.1 - roi.cmin as f32) * crop.1 as f32 / roi.width() as f32,
    )
}

/// Resize one `[H, W]` plane with `image`'s resampler.
///
/// Values are clamped to `[0, 1]`, the range of an `f32` luma sample.
fn resample(src: ArrayView2<'_, f32>, size: (usize, usize), filter: FilterType) -> Result<Array2<f32>> {
    if src.dim() == size {
        return Ok(src.to_owned());
    }
    let (h, w) = src.dim();
    let plane: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(w as u32, h as u32, src.iter().copied().collect())
            .ok_or_else(|| ClickLoopError::shape("resample input", &[h, w], src.shape()))?;
    let resized = imageops::resize(&plane, size.1 as u32, size.0 as u32, filter);
    Array2::from_shape_vec(size, resized.into_raw())
        .map_err(|_| ClickLoopError::shape("resampled plane", &[size.0, size.1], &[]))
}

/// Nearest-neighbour resize of a `{-1, 0, 1}` label mask.
///
/// Labels are shifted into `[0, 1]` for the resampler and snapped back.
fn resample_labels(mask: ArrayView2<'_, f32>, size: (usize, usize)) -> Result<Array2<f32>> {
    let shifted = mask.mapv(|v| (v.clamp(-1.0, 1.0) + 1.0) * 0.5);
    let resized = resample(shifted.view(), size, FilterType::Nearest)?;
    Ok(resized.mapv(|v| (v * 2.0 - 1.0).round()))
}

fn positive_clicks_inside(roi: &ObjectRoi, clicks: &[Click]) -> bool {
    clicks
        .iter()
        .filter(|c| c.is_positive)
        .all(|c| roi.contains(c.coords.0, c.coords.1))
}
