use clickloop::interaction::Batch;
use ndarray::{s, Array4};
use std::ops::Range;

/// `size x size` RGB batch whose mask is ones on `square` (rows and cols).
pub fn square_batch(batch_size: usize, size: usize, square: Range<usize>, num_max_points: usize) -> Batch {
    let image = Array4::from_elem((batch_size, 3, size, size), 0.5f32);
    let mut gt = Array4::<f32>::zeros((batch_size, 1, size, size));
    gt.slice_mut(s![.., .., square.clone(), square]).fill(1.0);
    Batch::without_clicks(image, gt, num_max_points).unwrap()
}

/// The centered 10x10 object on a 64x64 frame.
pub fn centered_square() -> Range<usize> {
    27..37
}
