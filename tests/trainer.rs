mod common;

use clickloop::checkpoint::read_checkpoint;
use clickloop::loss::{LossTable, INSTANCE_LOSS};
use clickloop::metrics::{AdaptiveIoU, Metric};
use clickloop::trainer::{BatchLoader, Trainer};
use clickloop::{
    ClickLoopError, ClickSimulator, InteractionStrategy, SingleNetworkStrategy, TrainerConfig,
};
use common::fakes::{AbsDiff, BiasStep, CountingScheduler, RecordingSink, ScriptedNet, VecLoader};
use common::fixtures::square_batch;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use tempfile::TempDir;

fn demo_config(root: &Path) -> TrainerConfig {
    let mut config = TrainerConfig {
        num_epochs: 2,
        max_num_next_clicks: 1,
        seed: Some(7),
        task_prefix: "demo".to_string(),
        checkpoints_path: root.join("checkpoints"),
        logs_path: root.join("logs"),
        checkpoint_interval: clickloop::CheckpointInterval::Every(1),
        val_interval: Some(1),
        tb_dump_period: 1,
        ..TrainerConfig::default()
    };
    config.loss_weights.insert(INSTANCE_LOSS.to_string(), 1.0);
    config
}

fn criteria() -> LossTable {
    LossTable::new().with_term(INSTANCE_LOSS, 0.0, Arc::new(AbsDiff))
}

fn loader() -> VecLoader {
    VecLoader {
        batches: vec![square_batch(2, 32, 10..20, 4), square_batch(2, 32, 8..24, 4)],
    }
}

fn metrics() -> Vec<Box<dyn Metric>> {
    vec![Box::new(AdaptiveIoU::default())]
}

fn trainer(
    config: TrainerConfig,
    sink: &RecordingSink,
    steps: &Rc<Cell<usize>>,
) -> clickloop::Result<Trainer<SingleNetworkStrategy<ScriptedNet>>> {
    let strategy = SingleNetworkStrategy::new(ScriptedNet::constant(0.0), ClickSimulator::default());
    let optimizer = BiasStep {
        delta: -0.1,
        lr: 0.01,
        steps: Rc::clone(steps),
    };
    Ok(
        Trainer::new(config, strategy, criteria(), Box::new(optimizer), Box::new(sink.clone()))?
            .with_metrics(metrics(), metrics()),
    )
}

#[test]
fn two_epochs_log_checkpoint_and_validate() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let steps = Rc::new(Cell::new(0));
    let mut trainer = trainer(demo_config(dir.path()), &sink, &steps).unwrap();

    let mut train = loader();
    let mut val = loader();
    trainer
        .run(&mut train, Some(&mut val as &mut dyn BatchLoader))
        .unwrap();

    assert_eq!(steps.get(), 4);
    let tags = sink.tags();
    for expected in [
        "TrainDemoLosses/instance_loss",
        "TrainDemoLosses/overall",
        "TrainDemoStates/learning_rate",
        "TrainDemoMetrics/adaptive_iou",
        "ValDemoLosses/instance_loss",
        "ValDemoLosses/overall",
        "ValDemoMetrics/adaptive_iou",
    ] {
        assert!(tags.iter().any(|t| t == expected), "missing {expected}");
    }

    // one averaged value per training batch
    let overall = sink.with_tag("TrainDemoLosses/overall");
    assert_eq!(overall.len(), 4);
    assert_eq!(
        overall.iter().map(|r| r.step).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    // validation reports once per epoch, at the epoch index
    let val_overall = sink.with_tag("ValDemoLosses/overall");
    assert_eq!(val_overall.iter().map(|r| r.step).collect::<Vec<_>>(), vec![0, 1]);
    assert!(sink
        .with_tag("TrainDemoStates/learning_rate")
        .iter()
        .all(|r| (r.value - 0.01).abs() < 1e-12));

    let checkpoints = dir.path().join("checkpoints");
    for name in ["demo_last_checkpoint.json", "demo_000.json", "demo_001.json"] {
        assert!(checkpoints.join(name).is_file(), "missing {name}");
    }
    let last = read_checkpoint(&checkpoints.join("demo_last_checkpoint.json")).unwrap();
    assert_eq!(last.epoch, None);
    let first = read_checkpoint(&checkpoints.join("demo_000.json")).unwrap();
    assert_eq!(first.epoch, Some(0));
    assert!((first.state_dict["bias"].values[0] + 0.2).abs() < 1e-5);
}

#[test]
fn resume_prefix_loads_the_matching_checkpoint() {
    let dir = TempDir::new().unwrap();
    let steps = Rc::new(Cell::new(0));
    let mut first = trainer(demo_config(dir.path()), &RecordingSink::default(), &steps).unwrap();
    first.run(&mut loader(), None).unwrap();
    assert!((first.interaction().strategy().network().bias() + 0.4).abs() < 1e-5);

    let config = TrainerConfig {
        resume_prefix: Some("demo_001".to_string()),
        start_epoch: 2,
        num_epochs: 2,
        ..demo_config(dir.path())
    };
    let resumed = trainer(config, &RecordingSink::default(), &Rc::new(Cell::new(0))).unwrap();
    let bias = resumed.interaction().strategy().network().bias();
    assert!((bias + 0.4).abs() < 1e-5, "bias {bias}");
}

#[test]
fn ambiguous_resume_prefix_is_rejected() {
    let dir = TempDir::new().unwrap();
    let steps = Rc::new(Cell::new(0));
    let mut first = trainer(demo_config(dir.path()), &RecordingSink::default(), &steps).unwrap();
    first.run(&mut loader(), None).unwrap();

    let config = TrainerConfig {
        resume_prefix: Some("demo_00".to_string()),
        ..demo_config(dir.path())
    };
    let err = trainer(config, &RecordingSink::default(), &steps).err().unwrap();
    assert!(matches!(err, ClickLoopError::AmbiguousCheckpoint { found: 2, .. }));
}

#[test]
fn missing_weights_file_fails_before_training() {
    let dir = TempDir::new().unwrap();
    let config = TrainerConfig {
        weights: Some(dir.path().join("nope.json")),
        ..demo_config(dir.path())
    };
    let err = trainer(config, &RecordingSink::default(), &Rc::new(Cell::new(0)))
        .err()
        .unwrap();
    assert!(matches!(err, ClickLoopError::MissingCheckpoint { .. }));
}

#[test]
fn scheduler_is_fast_forwarded_to_start_epoch() {
    let dir = TempDir::new().unwrap();
    let config = TrainerConfig {
        start_epoch: 3,
        num_epochs: 4,
        ..demo_config(dir.path())
    };
    let sink = RecordingSink::default();
    let scheduler_steps = Rc::new(Cell::new(0));
    let mut trainer = trainer(config, &sink, &Rc::new(Cell::new(0)))
        .unwrap()
        .with_scheduler(Box::new(CountingScheduler {
            steps: Rc::clone(&scheduler_steps),
        }));
    assert_eq!(scheduler_steps.get(), 3);

    trainer.run(&mut loader(), None).unwrap();
    assert_eq!(scheduler_steps.get(), 4);

    // learning rate comes from the scheduler, stepped three times
    let lrs = sink.with_tag("TrainDemoStates/learning_rate");
    assert_eq!(lrs.len(), 2);
    assert!(lrs.iter().all(|r| (r.value - 0.025).abs() < 1e-12));
    assert_eq!(lrs[0].step, 6);
}

#[test]
fn validation_is_skipped_off_interval() {
    let dir = TempDir::new().unwrap();
    let config = TrainerConfig {
        num_epochs: 3,
        val_interval: Some(2),
        ..demo_config(dir.path())
    };
    let sink = RecordingSink::default();
    let mut trainer = trainer(config, &sink, &Rc::new(Cell::new(0))).unwrap();
    let mut val = loader();
    trainer
        .run(&mut loader(), Some(&mut val as &mut dyn BatchLoader))
        .unwrap();

    let steps: Vec<u64> = sink
        .with_tag("ValDemoLosses/overall")
        .iter()
        .map(|r| r.step)
        .collect();
    assert_eq!(steps, vec![0, 2]);
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = TrainerConfig {
        prev_mask_drop_prob: 1.5,
        ..demo_config(dir.path())
    };
    assert!(trainer(config, &RecordingSink::default(), &Rc::new(Cell::new(0))).is_err());
}
