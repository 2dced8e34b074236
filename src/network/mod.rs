mod onnx;
pub mod types;

pub use onnx::OnnxNetwork;
pub use types::{
    ForwardMode, InteractiveNetwork, NetOutputs, ParamMap, ParamTensor, Trainable, INSTANCES,
    INSTANCES_AUX, POINT_PRED, POINT_TARGET, ZOOM_IN,
};

use anyhow::Result;
use ndarray::{concatenate, Array4, Axis};

/// Load a frozen ONNX network
pub fn create_onnx_network(model_path: &str, with_prev_mask: bool) -> Result<Box<dyn InteractiveNetwork>> {
    let network = OnnxNetwork::new(model_path, with_prev_mask)?;
    Ok(Box::new(network))
}

/// Logistic squash of logits into probabilities
pub fn sigmoid(logits: &Array4<f32>) -> Array4<f32> {
    logits.mapv(|x| 1.0 / (1.0 + (-x).exp()))
}

/// Concatenate two NCHW tensors along the channel axis
pub fn concat_channels(a: &Array4<f32>, b: &Array4<f32>) -> crate::Result<Array4<f32>> {
    concatenate(Axis(1), &[a.view(), b.view()]).map_err(|_| {
        crate::ClickLoopError::shape("channel concatenation", a.shape(), b.shape())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_maps_logits_into_unit_interval() {
        let logits = Array4::from_shape_vec((1, 1, 1, 3), vec![-20.0, 0.0, 20.0]).unwrap();
        let probs = sigmoid(&logits);
        assert!(probs[[0, 0, 0, 0]] < 1e-6);
        assert_eq!(probs[[0, 0, 0, 1]], 0.5);
        assert!(probs[[0, 0, 0, 2]] > 1.0 - 1e-6);
    }

    #[test]
    fn concat_stacks_channels() {
        let a = Array4::<f32>::zeros((2, 3, 4, 4));
        let b = Array4::<f32>::ones((2, 1, 4, 4));
        let c = concat_channels(&a, &b).unwrap();
        assert_eq!(c.dim(), (2, 4, 4, 4));
        assert_eq!(c[[1, 3, 2, 2]], 1.0);
        assert!(concat_channels(&a, &Array4::<f32>::zeros((1, 1, 4, 4))).is_err());
    }

    #[test]
    fn final_pass_mode_follows_split() {
        assert_eq!(
            ForwardMode::final_pass(false),
            ForwardMode {
                training: true,
                track_gradients: true
            }
        );
        assert_eq!(ForwardMode::final_pass(true), ForwardMode::simulation());
    }
}
