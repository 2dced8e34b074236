use crate::clicks::DEFAULT_PRED_THRESH;
use crate::error::{ClickLoopError, Result};
use crate::loss::{LossComposer, LossTable};
use crate::zoom::ZoomConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How often numbered checkpoints are written.
///
/// In TOML either `checkpoint_interval = 10` or a schedule of
/// `[start_epoch, interval]` pairs such as `[[0, 50], [200, 10]]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckpointInterval {
    Every(usize),
    Schedule(Vec<(usize, usize)>),
}

impl Default for CheckpointInterval {
    fn default() -> Self {
        Self::Every(10)
    }
}

impl CheckpointInterval {
    /// Interval in force at `epoch`: the last schedule entry starting at or
    /// before it. `None` when the schedule has not started yet.
    pub fn at_epoch(&self, epoch: usize) -> Option<usize> {
        match self {
            Self::Every(n) => Some(*n),
            Self::Schedule(entries) => entries
                .iter()
                .filter(|(start, _)| *start <= epoch)
                .last()
                .map(|(_, n)| *n),
        }
    }

    pub fn is_checkpoint_epoch(&self, epoch: usize) -> bool {
        matches!(self.at_epoch(epoch), Some(n) if n > 0 && epoch % n == 0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub num_epochs: usize,
    pub start_epoch: usize,
    /// Upper bound (inclusive) on simulated rounds per batch
    pub max_num_next_clicks: usize,
    pub prev_mask_drop_prob: f64,
    pub pred_thresh: f32,
    /// Point capacity per polarity of the segmentation network
    pub seg_num_max_points: usize,
    pub checkpoint_interval: CheckpointInterval,
    /// Run validation every this many epochs; `None` disables it
    pub val_interval: Option<usize>,
    pub tb_dump_period: usize,
    pub log_every: usize,
    pub task_prefix: String,
    pub checkpoints_path: PathBuf,
    pub logs_path: PathBuf,
    pub weights: Option<PathBuf>,
    pub resume_prefix: Option<String>,
    pub seed: Option<u64>,
    pub loss_weights: BTreeMap<String, f32>,
    /// Overrides on top of `loss_weights` for validation
    pub val_loss_weights: BTreeMap<String, f32>,
    pub zoom: ZoomConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_epochs: 1,
            start_epoch: 0,
            max_num_next_clicks: 0,
            prev_mask_drop_prob: 0.0,
            pred_thresh: DEFAULT_PRED_THRESH,
            seg_num_max_points: 24,
            checkpoint_interval: CheckpointInterval::default(),
            val_interval: Some(1),
            tb_dump_period: 25,
            log_every: 30,
            task_prefix: String::new(),
            checkpoints_path: PathBuf::from("checkpoints"),
            logs_path: PathBuf::from("logs"),
            weights: None,
            resume_prefix: None,
            seed: None,
            loss_weights: BTreeMap::new(),
            val_loss_weights: BTreeMap::new(),
            zoom: ZoomConfig::default(),
        }
    }
}

impl TrainerConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ClickLoopError::io(path, e))?;
        let config: Self = toml::from_str(&text).map_err(|source| ClickLoopError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prev_mask_drop_prob) {
            return Err(ClickLoopError::InvalidConfig(format!(
                "prev_mask_drop_prob must lie in [0, 1], got {}",
                self.prev_mask_drop_prob
            )));
        }
        if !(0.0..=1.0).contains(&self.pred_thresh) {
            return Err(ClickLoopError::InvalidConfig(format!(
                "pred_thresh must lie in [0, 1], got {}",
                self.pred_thresh
            )));
        }
        match &self.checkpoint_interval {
            CheckpointInterval::Every(0) => {
                return Err(ClickLoopError::InvalidConfig(
                    "checkpoint_interval must be positive".to_string(),
                ))
            }
            CheckpointInterval::Schedule(entries) if entries.iter().any(|(_, n)| *n == 0) => {
                return Err(ClickLoopError::InvalidConfig(
                    "checkpoint_interval schedule entries must be positive".to_string(),
                ))
            }
            _ => {}
        }
        if self.val_interval == Some(0) {
            return Err(ClickLoopError::InvalidConfig(
                "val_interval must be positive, leave it unset to skip validation".to_string(),
            ));
        }
        if self.seg_num_max_points == 0 {
            return Err(ClickLoopError::InvalidConfig(
                "seg_num_max_points must be positive".to_string(),
            ));
        }
        if let Some((h, w)) = self.zoom.target_size {
            if h == 0 || w == 0 {
                return Err(ClickLoopError::InvalidConfig(format!(
                    "zoom.target_size must be non-zero, got ({h}, {w})"
                )));
            }
        }
        let (lo, hi) = self.zoom.training_jitter;
        if lo <= 0.0 || lo > hi {
            return Err(ClickLoopError::InvalidConfig(format!(
                "zoom.training_jitter must be an increasing positive range, got ({lo}, {hi})"
            )));
        }
        Ok(())
    }

    /// Apply the configured weights to the registered criteria.
    pub fn loss_composer(&self, criteria: LossTable) -> LossComposer {
        let train = criteria.with_weights(&self.loss_weights);
        let val = train.clone().with_weights(&self.val_loss_weights);
        LossComposer::with_validation(train, val)
    }
}
