//! Weighted composition of named loss terms.
//!
//! Criteria are supplied by the caller; this module only decides which terms
//! run, reduces them and sums them with their configured weights.

use crate::clicks::PointSet;
use crate::error::{ClickLoopError, Result};
use crate::network::{NetOutputs, INSTANCES, INSTANCES_AUX, POINT_PRED, POINT_TARGET, ZOOM_IN};
use crate::telemetry::ScalarSink;
use ndarray::{Array1, ArrayD, ArrayView1, ArrayViewD, Axis};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const INSTANCE_LOSS: &str = "instance_loss";
pub const INSTANCE_AUX_LOSS: &str = "instance_aux_loss";
pub const ZOOM_IN_LOSS: &str = "zoom_in_loss";
pub const POINT_LOSS: &str = "point_loss";

/// A loss function; returns unreduced values (per sample or per element).
pub trait Criterion: Send + Sync {
    fn evaluate(
        &self,
        pred: ArrayViewD<'_, f32>,
        target: ArrayViewD<'_, f32>,
    ) -> anyhow::Result<ArrayD<f32>>;

    /// Criteria with internal statistics publish them here.
    fn log_states(&self, _sink: &mut dyn ScalarSink, _tag: &str, _step: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct LossSpec {
    pub weight: f32,
    pub criterion: Option<Arc<dyn Criterion>>,
}

impl fmt::Debug for LossSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LossSpec")
            .field("weight", &self.weight)
            .field("criterion", &self.criterion.is_some())
            .finish()
    }
}

/// Loss name -> weight and criterion.
#[derive(Clone, Debug, Default)]
pub struct LossTable {
    terms: BTreeMap<String, LossSpec>,
}

impl LossTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(
        mut self,
        name: impl Into<String>,
        weight: f32,
        criterion: Arc<dyn Criterion>,
    ) -> Self {
        self.terms.insert(
            name.into(),
            LossSpec {
                weight,
                criterion: Some(criterion),
            },
        );
        self
    }

    /// Set a weight, keeping any registered criterion.
    pub fn set_weight(&mut self, name: &str, weight: f32) {
        self.terms
            .entry(name.to_string())
            .and_modify(|spec| spec.weight = weight)
            .or_insert(LossSpec {
                weight,
                criterion: None,
            });
    }

    pub fn with_weights(mut self, weights: &BTreeMap<String, f32>) -> Self {
        for (name, weight) in weights {
            self.set_weight(name, *weight);
        }
        self
    }

    /// Weight of a term; unknown terms weigh 0.
    pub fn weight(&self, name: &str) -> f32 {
        self.terms.get(name).map(|s| s.weight).unwrap_or(0.0)
    }

    pub fn criterion(&self, name: &str) -> Option<&Arc<dyn Criterion>> {
        self.terms.get(name).and_then(|s| s.criterion.as_ref())
    }

    /// Terms that currently contribute (weight > 0).
    pub fn active(&self) -> impl Iterator<Item = (&str, &LossSpec)> {
        self.terms
            .iter()
            .filter(|(_, spec)| spec.weight > 0.0)
            .map(|(name, spec)| (name.as_str(), spec))
    }
}

/// Running scalar loss plus the unweighted mean of every term that ran.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComposedLoss {
    pub total: f32,
    pub terms: BTreeMap<String, f32>,
}

/// Training and validation weight tables.
#[derive(Clone, Debug, Default)]
pub struct LossComposer {
    train: LossTable,
    val: LossTable,
}

impl LossComposer {
    /// Validation starts as a copy of the training table.
    pub fn new(train: LossTable) -> Self {
        Self {
            val: train.clone(),
            train,
        }
    }

    pub fn with_validation(train: LossTable, val: LossTable) -> Self {
        Self { train, val }
    }

    pub fn table(&self, validation: bool) -> &LossTable {
        if validation {
            &self.val
        } else {
            &self.train
        }
    }

    /// Add one weighted term to `running`.
    ///
    /// Terms with weight <= 0 are skipped without touching `inputs`. When
    /// `sample_weights` is given, the unreduced loss is scaled per sample along
    /// its leading axis before the mean.
    pub fn compose<'a, F>(
        &self,
        name: &str,
        mut running: ComposedLoss,
        validation: bool,
        inputs: F,
        sample_weights: Option<ArrayView1<'_, f32>>,
    ) -> Result<ComposedLoss>
    where
        F: FnOnce() -> Result<(ArrayViewD<'a, f32>, ArrayViewD<'a, f32>)>,
    {
        let table = self.table(validation);
        let weight = table.weight(name);
        if weight <= 0.0 {
            return Ok(running);
        }
        let criterion = table
            .criterion(name)
            .ok_or_else(|| ClickLoopError::MissingCriterion {
                name: name.to_string(),
            })?;

        let (pred, target) = inputs()?;
        let mut values = criterion.evaluate(pred, target)?;
        if let Some(w) = sample_weights {
            apply_sample_weights(&mut values, w)?;
        }
        let mean = values.mean().ok_or_else(|| {
            ClickLoopError::InvalidArgument(format!("criterion '{name}' returned no values"))
        })?;

        running.terms.insert(name.to_string(), mean);
        running.total += weight * mean;
        Ok(running)
    }
}

fn apply_sample_weights(values: &mut ArrayD<f32>, weights: ArrayView1<'_, f32>) -> Result<()> {
    if values.ndim() == 0 || values.shape()[0] != weights.len() {
        return Err(ClickLoopError::shape(
            "per-sample loss weights",
            &[weights.len()],
            values.shape(),
        ));
    }
    for (mut sample, w) in values.axis_iter_mut(Axis(0)).zip(weights.iter()) {
        sample.mapv_inplace(|v| v * w);
    }
    Ok(())
}

/// Per-sample weight decreasing with the number of clicks a sample has.
///
/// Not applied unless the interaction loop is configured with it.
pub fn dynamic_loss_weight(points: &[PointSet]) -> Array1<f32> {
    points
        .iter()
        .map(|set| -(0.05 * set.count_set() as f32 + 1.0).log10() + 1.1)
        .collect()
}

/// Prediction/target pair a named term is computed from.
pub fn term_inputs<'a>(
    name: &str,
    outputs: &'a NetOutputs,
    target: ArrayViewD<'a, f32>,
) -> Result<(ArrayViewD<'a, f32>, ArrayViewD<'a, f32>)> {
    match name {
        INSTANCE_LOSS => Ok((outputs.require(INSTANCES)?, target)),
        INSTANCE_AUX_LOSS => Ok((outputs.require(INSTANCES_AUX)?, target)),
        ZOOM_IN_LOSS => Ok((outputs.require(ZOOM_IN)?, target)),
        POINT_LOSS => Ok((outputs.require(POINT_PRED)?, outputs.require(POINT_TARGET)?)),
        other => Err(ClickLoopError::InvalidArgument(format!(
            "no inputs defined for loss '{other}'"
        ))),
    }
}
