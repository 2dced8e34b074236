use clickloop::interaction::Batch;
use clickloop::loss::{ComposedLoss, Criterion};
use clickloop::network::{
    ForwardMode, InteractiveNetwork, NetOutputs, ParamMap, ParamTensor, Trainable,
};
use clickloop::telemetry::{ScalarRecord, ScalarSink};
use clickloop::trainer::{BatchLoader, LrScheduler, Optimizer};
use ndarray::{s, Array3, Array4, ArrayD, ArrayViewD};
use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;

/// What a fake network saw on one call.
#[derive(Clone, Debug)]
pub struct Call {
    pub mode: ForwardMode,
    pub input_dim: (usize, usize, usize, usize),
    pub set_points: Vec<usize>,
    pub had_gt: bool,
    /// Sum of the last input channel (the previous mask when one is fed)
    pub last_channel_sum: f32,
}

pub type CallLog = Rc<RefCell<Vec<Call>>>;

/// Network returning constant logits, or `bias` on a fixed box and `-bias`
/// elsewhere. `bias` is its single trainable parameter.
pub struct ScriptedNet {
    bias: f32,
    region: Option<(Range<usize>, Range<usize>)>,
    with_prev_mask: bool,
    log: CallLog,
}

impl ScriptedNet {
    pub fn constant(bias: f32) -> Self {
        Self {
            bias,
            region: None,
            with_prev_mask: false,
            log: CallLog::default(),
        }
    }

    /// Logits `bias` inside the box and `-bias` outside
    pub fn region(bias: f32, rows: Range<usize>, cols: Range<usize>) -> Self {
        Self {
            region: Some((rows, cols)),
            ..Self::constant(bias)
        }
    }

    pub fn with_prev_mask(mut self) -> Self {
        self.with_prev_mask = true;
        self
    }

    pub fn log(&self) -> CallLog {
        Rc::clone(&self.log)
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias;
    }
}

impl InteractiveNetwork for ScriptedNet {
    fn forward(
        &mut self,
        input: &Array4<f32>,
        points: &Array3<f32>,
        gt_mask: Option<&Array4<f32>>,
        mode: ForwardMode,
    ) -> anyhow::Result<NetOutputs> {
        let (b, c, h, w) = input.dim();
        let set_points = (0..b)
            .map(|i| {
                (0..points.dim().1)
                    .filter(|&k| points[[i, k, 0]] >= 0.0 && points[[i, k, 1]] >= 0.0)
                    .count()
            })
            .collect();
        self.log.borrow_mut().push(Call {
            mode,
            input_dim: (b, c, h, w),
            set_points,
            had_gt: gt_mask.is_some(),
            last_channel_sum: input.slice(s![.., c - 1, .., ..]).sum(),
        });

        let logits = match &self.region {
            None => Array4::from_elem((b, 1, h, w), self.bias),
            Some((rows, cols)) => {
                let mut out = Array4::from_elem((b, 1, h, w), -self.bias);
                out.slice_mut(s![.., .., rows.clone(), cols.clone()])
                    .fill(self.bias);
                out
            }
        };
        Ok(NetOutputs::from_instances(logits))
    }

    fn with_prev_mask(&self) -> bool {
        self.with_prev_mask
    }
}

impl Trainable for ScriptedNet {
    fn state_dict(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("bias".into(), ParamTensor::new(vec![1], vec![self.bias]));
        params
    }

    fn load_state_dict(&mut self, params: ParamMap) -> anyhow::Result<()> {
        let bias = params
            .get("bias")
            .and_then(|t| t.values.first().copied())
            .ok_or_else(|| anyhow::anyhow!("missing bias"))?;
        self.bias = bias;
        Ok(())
    }
}

/// Elementwise absolute difference.
pub struct AbsDiff;

impl Criterion for AbsDiff {
    fn evaluate(
        &self,
        pred: ArrayViewD<'_, f32>,
        target: ArrayViewD<'_, f32>,
    ) -> anyhow::Result<ArrayD<f32>> {
        Ok((&pred - &target).mapv(f32::abs))
    }
}

/// Shifts the bias by a fixed amount per step.
pub struct BiasStep {
    pub delta: f32,
    pub lr: f64,
    pub steps: Rc<Cell<usize>>,
}

impl Optimizer<ScriptedNet> for BiasStep {
    fn step(&mut self, net: &mut ScriptedNet, loss: &ComposedLoss) -> anyhow::Result<()> {
        anyhow::ensure!(loss.total.is_finite(), "non-finite loss");
        net.set_bias(net.bias() + self.delta);
        self.steps.set(self.steps.get() + 1);
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }
}

pub struct CountingScheduler {
    pub steps: Rc<Cell<usize>>,
}

impl LrScheduler for CountingScheduler {
    fn step(&mut self) {
        self.steps.set(self.steps.get() + 1);
    }

    fn current_lr(&self) -> f64 {
        0.1 / (1 + self.steps.get()) as f64
    }
}

/// Keeps every scalar it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub records: Rc<RefCell<Vec<ScalarRecord>>>,
}

impl RecordingSink {
    pub fn tags(&self) -> Vec<String> {
        self.records.borrow().iter().map(|r| r.tag.clone()).collect()
    }

    pub fn with_tag(&self, tag: &str) -> Vec<ScalarRecord> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.tag == tag)
            .cloned()
            .collect()
    }
}

impl ScalarSink for RecordingSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64, _disable_avg: bool) -> anyhow::Result<()> {
        self.records.borrow_mut().push(ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }
}

/// Replays the same batches every epoch.
pub struct VecLoader {
    pub batches: Vec<Batch>,
}

impl BatchLoader for VecLoader {
    fn len(&self) -> usize {
        self.batches.len()
    }

    fn epoch_batches(&mut self, _epoch: usize) -> Box<dyn Iterator<Item = anyhow::Result<Batch>> + '_> {
        Box::new(self.batches.iter().cloned().map(Ok::<Batch, anyhow::Error>))
    }
}
