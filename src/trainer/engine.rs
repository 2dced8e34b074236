use super::types::{BatchLoader, EpochSummary, LrScheduler, Optimizer, FULL_INSTANCES};
use crate::checkpoint::{load_weights, resolve_initial_weights, save_checkpoint};
use crate::config::TrainerConfig;
use crate::error::{ClickLoopError, Result};
use crate::interaction::{Batch, BatchForward, InteractionLoop, InteractionStrategy};
use crate::loss::LossTable;
use crate::metrics::Metric;
use crate::network::{Trainable, INSTANCES};
use crate::telemetry::{
    learning_rate_tag, losses_tag, metrics_tag, split_prefix, AveragingWriter, JsonlScalarWriter,
    ScalarSink,
};
use ndarray::ArrayViewD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

const OVERALL: &str = "overall";

/// JSON-lines scalar log at `logs_path/scalars.jsonl`, appended to across runs.
///
/// Records are written as given; `Trainer` wraps the sink in an
/// [`AveragingWriter`] over `tb_dump_period` steps.
pub fn scalar_log_sink(config: &TrainerConfig) -> Result<Box<dyn ScalarSink>> {
    let path = config.logs_path.join("scalars.jsonl");
    let writer = JsonlScalarWriter::create(&path)?;
    Ok(Box::new(writer))
}

/// Epoch driver: simulated-click batches, optimizer steps, logging,
/// validation and checkpoints.
pub struct Trainer<S: InteractionStrategy> {
    config: TrainerConfig,
    interaction: InteractionLoop<S>,
    train_metrics: Vec<Box<dyn Metric>>,
    val_metrics: Vec<Box<dyn Metric>>,
    optimizer: Box<dyn Optimizer<S::Net>>,
    scheduler: Option<Box<dyn LrScheduler>>,
    sink: AveragingWriter<Box<dyn ScalarSink>>,
    rng: StdRng,
}

impl<S> Trainer<S>
where
    S: InteractionStrategy,
    S::Net: Trainable,
{
    /// Build the trainer and load the configured starting weights.
    ///
    /// `criteria` registers the loss functions; their weights come from the
    /// config's `loss_weights` / `val_loss_weights`.
    pub fn new(
        config: TrainerConfig,
        mut strategy: S,
        criteria: LossTable,
        optimizer: Box<dyn Optimizer<S::Net>>,
        sink: Box<dyn ScalarSink>,
    ) -> Result<Self> {
        config.validate()?;

        if let Some(path) = resolve_initial_weights(
            config.weights.as_deref(),
            config.resume_prefix.as_deref(),
            &config.checkpoints_path,
        )? {
            load_weights(strategy.network_mut(), &path)?;
        }

        let composer = config.loss_composer(criteria);
        let interaction = InteractionLoop::new(strategy, config.max_num_next_clicks, composer);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let sink = AveragingWriter::new(sink, config.tb_dump_period);

        Ok(Self {
            config,
            interaction,
            train_metrics: Vec::new(),
            val_metrics: Vec::new(),
            optimizer,
            scheduler: None,
            sink,
            rng,
        })
    }

    pub fn with_metrics(mut self, train: Vec<Box<dyn Metric>>, val: Vec<Box<dyn Metric>>) -> Self {
        self.train_metrics = train;
        self.val_metrics = val;
        self
    }

    /// Attach a scheduler, advanced once per epoch already completed.
    pub fn with_scheduler(mut self, mut scheduler: Box<dyn LrScheduler>) -> Self {
        for _ in 0..self.config.start_epoch {
            scheduler.step();
        }
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn interaction(&self) -> &InteractionLoop<S> {
        &self.interaction
    }

    pub fn interaction_mut(&mut self) -> &mut InteractionLoop<S> {
        &mut self.interaction
    }

    pub fn run(
        &mut self,
        train: &mut dyn BatchLoader,
        mut val: Option<&mut dyn BatchLoader>,
    ) -> Result<()> {
        tracing::info!("Starting Epoch: {}", self.config.start_epoch);
        tracing::info!("Total Epochs: {}", self.config.num_epochs);
        for epoch in self.config.start_epoch..self.config.num_epochs {
            self.training(epoch, train)?;
            let due = self
                .config
                .val_interval
                .is_some_and(|every| every > 0 && epoch % every == 0);
            if let (true, Some(loader)) = (due, val.as_deref_mut()) {
                self.validation(epoch, loader)?;
            }
        }
        self.sink.flush()?;
        Ok(())
    }

    pub fn training(&mut self, epoch: usize, loader: &mut dyn BatchLoader) -> Result<EpochSummary> {
        let _span = tracing::info_span!("train_epoch", epoch).entered();
        let prefix = split_prefix("Train", &self.config.task_prefix);
        let steps_per_epoch = loader.len();
        let log_every = self.config.log_every.max(1);

        for metric in &mut self.train_metrics {
            metric.reset_epoch_stats();
        }

        let mut train_loss = 0.0f32;
        let mut batches = 0usize;
        for (i, batch) in loader.epoch_batches(epoch).enumerate() {
            let batch = batch.map_err(ClickLoopError::from)?;
            let global_step = (epoch * steps_per_epoch + i) as u64;

            let forward = self.interaction.batch_forward(&batch, false, &mut self.rng)?;
            self.optimizer
                .step(self.interaction.strategy_mut().network_mut(), &forward.loss)?;

            train_loss += forward.loss.total;
            batches += 1;

            for (name, value) in &forward.loss.terms {
                self.sink
                    .add_scalar(&losses_tag(&prefix, name), *value as f64, global_step, false)?;
            }
            self.sink.add_scalar(
                &losses_tag(&prefix, OVERALL),
                forward.loss.total as f64,
                global_step,
                false,
            )?;

            for (name, spec) in self.interaction.composer().table(false).active() {
                if let Some(criterion) = &spec.criterion {
                    criterion.log_states(&mut self.sink, &losses_tag(&prefix, name), global_step)?;
                }
            }

            let lr = match &self.scheduler {
                Some(scheduler) => scheduler.current_lr(),
                None => self.optimizer.learning_rate(),
            };
            self.sink
                .add_scalar(&learning_rate_tag(&prefix), lr, global_step, false)?;

            update_metrics(&mut self.train_metrics, &forward, &batch)?;
            for metric in &self.train_metrics {
                metric.log_states(
                    &mut self.sink,
                    &metrics_tag(&prefix, metric.name()),
                    global_step,
                )?;
            }

            if (i + 1) % log_every == 0 {
                tracing::info!(
                    "Epoch {}, training loss {:.4} ({} rounds in last batch)",
                    epoch,
                    train_loss / batches as f32,
                    forward.num_iters
                );
            }
        }

        for metric in &self.train_metrics {
            self.sink.add_scalar(
                &metrics_tag(&prefix, metric.name()),
                metric.get_epoch_value() as f64,
                epoch as u64,
                true,
            )?;
        }

        let net = self.interaction.strategy().network();
        save_checkpoint(net, &self.config.checkpoints_path, &self.config.task_prefix, None)?;
        if self.config.checkpoint_interval.is_checkpoint_epoch(epoch) {
            save_checkpoint(
                net,
                &self.config.checkpoints_path,
                &self.config.task_prefix,
                Some(epoch),
            )?;
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.step();
        }
        self.sink.flush()?;

        let summary = EpochSummary {
            epoch,
            batches,
            mean_loss: mean(train_loss, batches),
        };
        tracing::info!(
            "Epoch {} finished: {} batches, mean training loss {:.4}",
            epoch,
            summary.batches,
            summary.mean_loss
        );
        Ok(summary)
    }

    pub fn validation(&mut self, epoch: usize, loader: &mut dyn BatchLoader) -> Result<EpochSummary> {
        let _span = tracing::info_span!("val_epoch", epoch).entered();
        let prefix = split_prefix("Val", &self.config.task_prefix);
        let steps_per_epoch = loader.len();

        for metric in &mut self.val_metrics {
            metric.reset_epoch_stats();
        }

        let mut losses: BTreeMap<String, Vec<f32>> = BTreeMap::new();
        let mut val_loss = 0.0f32;
        let mut batches = 0usize;
        for (i, batch) in loader.epoch_batches(epoch).enumerate() {
            let batch = batch.map_err(ClickLoopError::from)?;
            let global_step = (epoch * steps_per_epoch + i) as u64;

            let forward = self.interaction.batch_forward(&batch, true, &mut self.rng)?;
            for (name, value) in &forward.loss.terms {
                losses.entry(name.clone()).or_default().push(*value);
            }
            losses
                .entry(OVERALL.to_string())
                .or_default()
                .push(forward.loss.total);
            val_loss += forward.loss.total;
            batches += 1;

            update_metrics(&mut self.val_metrics, &forward, &batch)?;
            for metric in &self.val_metrics {
                metric.log_states(
                    &mut self.sink,
                    &metrics_tag(&prefix, metric.name()),
                    global_step,
                )?;
            }
        }

        for (name, values) in &losses {
            let value = mean(values.iter().sum(), values.len());
            self.sink
                .add_scalar(&losses_tag(&prefix, name), value as f64, epoch as u64, true)?;
        }
        for metric in &self.val_metrics {
            self.sink.add_scalar(
                &metrics_tag(&prefix, metric.name()),
                metric.get_epoch_value() as f64,
                epoch as u64,
                true,
            )?;
        }
        self.sink.flush()?;

        let summary = EpochSummary {
            epoch,
            batches,
            mean_loss: mean(val_loss, batches),
        };
        tracing::info!(
            "Epoch {}, validation loss: {:.4}",
            epoch,
            summary.mean_loss
        );
        Ok(summary)
    }
}

fn mean(sum: f32, count: usize) -> f32 {
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

fn gt_tensor<'a>(name: &str, forward: &'a BatchForward, batch: &'a Batch) -> Result<ArrayViewD<'a, f32>> {
    match name {
        INSTANCES => Ok(forward.loss_target.view().into_dyn()),
        FULL_INSTANCES => Ok(batch.gt_mask().view().into_dyn()),
        other => Err(ClickLoopError::MissingOutput {
            name: other.to_string(),
        }),
    }
}

fn update_metrics(metrics: &mut [Box<dyn Metric>], forward: &BatchForward, batch: &Batch) -> Result<()> {
    for metric in metrics.iter_mut() {
        let preds = metric
            .pred_outputs()
            .iter()
            .map(|name| forward.outputs.require(name))
            .collect::<Result<Vec<_>>>()?;
        let gts = metric
            .gt_outputs()
            .iter()
            .map(|name| gt_tensor(name, forward, batch))
            .collect::<Result<Vec<_>>>()?;
        metric.update(&preds, &gts)?;
    }
    Ok(())
}
