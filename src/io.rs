use anyhow::{Context, Result};
use image::{imageops, GrayImage, RgbImage};
use ndarray::{Array4, ArrayView2};
use std::path::Path;

/// Converts images and masks on disk into NCHW tensors and back
pub struct Preprocessor {
    target_size: Option<(u32, u32)>,
}

impl Preprocessor {
    /// `target_size` is `(width, height)`; `None` keeps the file's size
    pub fn new(target_size: Option<(u32, u32)>) -> Self {
        Self { target_size }
    }

    pub fn load_image<P: AsRef<Path>>(&self, path: P) -> Result<Array4<f32>> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?
            .to_rgb8();
        Ok(self.image_to_tensor(&image))
    }

    pub fn load_mask<P: AsRef<Path>>(&self, path: P) -> Result<Array4<f32>> {
        let path = path.as_ref();
        let mask = image::open(path)
            .with_context(|| format!("Failed to open mask {}", path.display()))?
            .to_luma8();
        Ok(self.mask_to_tensor(&mask))
    }

    /// RGB image as a `[1, 3, H, W]` tensor normalized to [0, 1]
    pub fn image_to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("image_to_tensor").entered();

        let resized = match self.target_size {
            Some((w, h)) if image.dimensions() != (w, h) => {
                imageops::resize(image, w, h, imageops::FilterType::Lanczos3)
            }
            _ => image.clone(),
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        tensor
    }

    /// Grayscale mask as a `[1, 1, H, W]` label tensor, foreground where the
    /// pixel is at least 128
    ///
    /// Nearest-neighbour resizing keeps labels binary.
    pub fn mask_to_tensor(&self, mask: &GrayImage) -> Array4<f32> {
        let resized = match self.target_size {
            Some((w, h)) if mask.dimensions() != (w, h) => {
                imageops::resize(mask, w, h, imageops::FilterType::Nearest)
            }
            _ => mask.clone(),
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 1, height as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            if pixel[0] >= 128 {
                tensor[[0, 0, y as usize, x as usize]] = 1.0;
            }
        }
        tensor
    }

    /// Probability map as an 8-bit grayscale image
    pub fn probs_to_gray(probs: ArrayView2<'_, f32>) -> GrayImage {
        let (height, width) = probs.dim();
        GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = (probs[[y as usize, x as usize]] * 255.0).clamp(0.0, 255.0) as u8;
            image::Luma([value])
        })
    }

    pub fn save_probability_map<P: AsRef<Path>>(path: P, probs: ArrayView2<'_, f32>) -> Result<()> {
        let path = path.as_ref();
        Self::probs_to_gray(probs)
            .save(path)
            .with_context(|| format!("Failed to write probability map to {}", path.display()))?;
        tracing::info!("Saved probability map to {}", path.display());
        Ok(())
    }
}
