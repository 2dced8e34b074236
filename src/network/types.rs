use crate::error::{ClickLoopError, Result};
use anyhow::Result as AnyResult;
use ndarray::{Array3, Array4, ArrayD, ArrayViewD, Ix4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const INSTANCES: &str = "instances";
pub const INSTANCES_AUX: &str = "instances_aux";
pub const ZOOM_IN: &str = "zoom_in";
pub const POINT_PRED: &str = "point_pred";
pub const POINT_TARGET: &str = "point_target";

/// How a network call should behave.
///
/// Passed with every call instead of toggling shared train/eval state on the
/// network object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForwardMode {
    /// Training behaviour for mode-dependent layers (normalization, dropout)
    pub training: bool,
    /// Whether the call must record what backpropagation needs
    pub track_gradients: bool,
}

impl ForwardMode {
    /// Simulated interaction rounds: eval behaviour, no gradients.
    pub fn simulation() -> Self {
        Self {
            training: false,
            track_gradients: false,
        }
    }

    /// The supervised pass at the end of a batch.
    pub fn final_pass(validation: bool) -> Self {
        Self {
            training: !validation,
            track_gradients: !validation,
        }
    }
}

/// Named network outputs (`instances` logits plus optional auxiliary heads).
#[derive(Clone, Debug, Default)]
pub struct NetOutputs {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl NetOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs holding only the main `instances` logits.
    pub fn from_instances(instances: Array4<f32>) -> Self {
        let mut out = Self::new();
        out.insert(INSTANCES, instances.into_dyn());
        out
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn require(&self, name: &str) -> Result<ArrayViewD<'_, f32>> {
        self.tensors
            .get(name)
            .map(|t| t.view())
            .ok_or_else(|| ClickLoopError::MissingOutput {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// `instances` logits as `[B, 1, H, W]`.
    pub fn instances(&self) -> Result<Array4<f32>> {
        let view = self.require(INSTANCES)?;
        let shape = view.shape().to_vec();
        view.to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|_| ClickLoopError::shape(INSTANCES, &[0, 1, 0, 0], &shape))
    }
}

/// Trait for interactive segmentation networks
/// Allows swapping between backends (ONNX Runtime, in-process models, test doubles)
pub trait InteractiveNetwork {
    /// Run the network on an NCHW input and the batched `[B, 2N, 3]` click tensor
    ///
    /// # Arguments
    /// * `input` - Image channels, optionally followed by the previous mask channel
    /// * `points` - Click slots per sample, `(-1, -1, -1)` when unused
    /// * `gt_mask` - Ground truth, for networks with training-time heads that need it
    /// * `mode` - Train/eval behaviour and gradient tracking for this call
    fn forward(
        &mut self,
        input: &Array4<f32>,
        points: &Array3<f32>,
        gt_mask: Option<&Array4<f32>>,
        mode: ForwardMode,
    ) -> AnyResult<NetOutputs>;

    /// Whether the network expects the previous probability map concatenated
    /// to the image as an extra channel
    fn with_prev_mask(&self) -> bool;
}

impl<N: InteractiveNetwork + ?Sized> InteractiveNetwork for Box<N> {
    fn forward(
        &mut self,
        input: &Array4<f32>,
        points: &Array3<f32>,
        gt_mask: Option<&Array4<f32>>,
        mode: ForwardMode,
    ) -> AnyResult<NetOutputs> {
        (**self).forward(input, points, gt_mask, mode)
    }

    fn with_prev_mask(&self) -> bool {
        (**self).with_prev_mask()
    }
}

/// One named parameter tensor, row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.values.len()
    }
}

pub type ParamMap = BTreeMap<String, ParamTensor>;

/// Networks whose parameters can be checkpointed and restored
pub trait Trainable: InteractiveNetwork {
    fn state_dict(&self) -> ParamMap;

    fn load_state_dict(&mut self, params: ParamMap) -> AnyResult<()>;
}
