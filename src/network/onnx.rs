use super::types::{
    ForwardMode, InteractiveNetwork, NetOutputs, INSTANCES, INSTANCES_AUX, POINT_PRED,
    POINT_TARGET, ZOOM_IN,
};
use anyhow::{Context, Result};
use ndarray::{Array3, Array4, ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

const OUTPUT_NAMES: [&str; 5] = [INSTANCES, INSTANCES_AUX, ZOOM_IN, POINT_PRED, POINT_TARGET];

/// Frozen interactive segmentation network exported to ONNX
///
/// The graph takes two inputs, the NCHW image (plus previous mask channel when
/// `with_prev_mask` is set) and the `[B, 2N, 3]` click tensor, and returns
/// `instances` logits plus any of the auxiliary heads.
/// Weights never change, so it serves as intention network, per-round click
/// model or inference network.
pub struct OnnxNetwork {
    session: Session,
    with_prev_mask: bool,
}

impl OnnxNetwork {
    /// Load a network from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `with_prev_mask` - Whether the graph expects the previous mask channel
    pub fn new<P: AsRef<Path>>(model_path: P, with_prev_mask: bool) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading ONNX network from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            "ONNX network loaded (with_prev_mask={})",
            with_prev_mask
        );

        Ok(Self {
            session,
            with_prev_mask,
        })
    }
}

impl InteractiveNetwork for OnnxNetwork {
    fn forward(
        &mut self,
        input: &Array4<f32>,
        points: &Array3<f32>,
        _gt_mask: Option<&Array4<f32>>,
        mode: ForwardMode,
    ) -> Result<NetOutputs> {
        let _span = tracing::debug_span!("onnx_forward").entered();

        if mode.track_gradients {
            tracing::debug!("ONNX network is frozen; gradient tracking request ignored");
        }

        let (b, c, h, w) = input.dim();
        let image = Tensor::from_array(([b, c, h, w], input.iter().copied().collect::<Vec<f32>>()))
            .context("Failed to build image tensor")?;
        let (pb, pn, pk) = points.dim();
        let clicks = Tensor::from_array(([pb, pn, pk], points.iter().copied().collect::<Vec<f32>>()))
            .context("Failed to build points tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![image, clicks])
            .context("Failed to run inference")?;

        let mut result = NetOutputs::new();
        for name in OUTPUT_NAMES {
            let Some(value) = outputs.get(name) else {
                continue;
            };
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .with_context(|| format!("Output '{name}' is not an f32 tensor"))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            let tensor = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
                .with_context(|| format!("Output '{name}' has inconsistent shape {dims:?}"))?;
            result.insert(name, tensor);
        }

        if result.get(INSTANCES).is_none() {
            anyhow::bail!("ONNX graph did not produce an '{INSTANCES}' output");
        }
        Ok(result)
    }

    fn with_prev_mask(&self) -> bool {
        self.with_prev_mask
    }
}
