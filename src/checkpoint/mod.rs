//! Checkpoint files: JSON snapshots of a network's named parameters.

use crate::error::{ClickLoopError, Result};
use crate::network::{ParamMap, Trainable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_EXTENSION: &str = "json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `None` for the rolling "last" checkpoint
    pub epoch: Option<usize>,
    pub state_dict: ParamMap,
}

/// `last_checkpoint.json` or `{epoch:03}.json`, prefixed with `{prefix}_`
/// when a task prefix is set.
pub fn checkpoint_file_name(prefix: &str, epoch: Option<usize>) -> String {
    let stem = match epoch {
        Some(epoch) => format!("{epoch:03}"),
        None => "last_checkpoint".to_string(),
    };
    if prefix.is_empty() {
        format!("{stem}.{CHECKPOINT_EXTENSION}")
    } else {
        format!("{prefix}_{stem}.{CHECKPOINT_EXTENSION}")
    }
}

pub fn save_checkpoint<N: Trainable + ?Sized>(
    net: &N,
    dir: &Path,
    prefix: &str,
    epoch: Option<usize>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| ClickLoopError::io(dir, e))?;
    let path = dir.join(checkpoint_file_name(prefix, epoch));
    let checkpoint = Checkpoint {
        epoch,
        state_dict: net.state_dict(),
    };
    let file = fs::File::create(&path).map_err(|e| ClickLoopError::io(&path, e))?;
    serde_json::to_writer(BufWriter::new(file), &checkpoint).map_err(|source| {
        ClickLoopError::Json {
            path: path.clone(),
            source,
        }
    })?;
    tracing::info!("Saved checkpoint to {}", path.display());
    Ok(path)
}

pub fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    if !path.is_file() {
        return Err(ClickLoopError::MissingCheckpoint {
            path: path.to_path_buf(),
        });
    }
    let file = fs::File::open(path).map_err(|e| ClickLoopError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ClickLoopError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge the checkpoint's parameters over the network's current ones.
///
/// Parameters missing from the file keep their live values. Unknown names,
/// shape changes and malformed tensors are rejected before anything is loaded.
pub fn load_weights<N: Trainable + ?Sized>(net: &mut N, path: &Path) -> Result<()> {
    let checkpoint = read_checkpoint(path)?;
    let mut current = net.state_dict();
    for (name, tensor) in checkpoint.state_dict {
        let Some(live) = current.get_mut(&name) else {
            return Err(ClickLoopError::UnexpectedParameter { name });
        };
        if !tensor.is_consistent() || tensor.shape != live.shape {
            return Err(ClickLoopError::ParameterShape {
                name,
                expected: live.shape.clone(),
                actual: tensor.shape,
            });
        }
        *live = tensor;
    }
    net.load_state_dict(current)?;
    tracing::info!("Loaded weights from {}", path.display());
    Ok(())
}

/// The single checkpoint in `dir` whose file name starts with `prefix`.
pub fn find_resume_checkpoint(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).map_err(|e| ClickLoopError::io(dir, e))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ClickLoopError::io(dir, e))?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix))
            && path.extension().and_then(|e| e.to_str()) == Some(CHECKPOINT_EXTENSION);
        if matches && path.is_file() {
            found.push(path);
        }
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        n => Err(ClickLoopError::AmbiguousCheckpoint {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            found: n,
        }),
    }
}

/// Pick the checkpoint to start from: an explicit `weights` file wins over
/// `resume_prefix`; neither means training from the network's own init.
pub fn resolve_initial_weights(
    weights: Option<&Path>,
    resume_prefix: Option<&str>,
    checkpoints_dir: &Path,
) -> Result<Option<PathBuf>> {
    if let Some(path) = weights {
        if !path.is_file() {
            return Err(ClickLoopError::MissingCheckpoint {
                path: path.to_path_buf(),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }
    match resume_prefix {
        Some(prefix) => {
            let path = find_resume_checkpoint(checkpoints_dir, prefix)?;
            tracing::info!("Load checkpoint from path: {}", path.display());
            Ok(Some(path))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ForwardMode, InteractiveNetwork, NetOutputs, ParamTensor};
    use ndarray::{Array3, Array4};

    struct Params(ParamMap);

    impl InteractiveNetwork for Params {
        fn forward(
            &mut self,
            input: &Array4<f32>,
            _points: &Array3<f32>,
            _gt_mask: Option<&Array4<f32>>,
            _mode: ForwardMode,
        ) -> anyhow::Result<NetOutputs> {
            let (b, _, h, w) = input.dim();
            Ok(NetOutputs::from_instances(Array4::zeros((b, 1, h, w))))
        }

        fn with_prev_mask(&self) -> bool {
            false
        }
    }

    impl Trainable for Params {
        fn state_dict(&self) -> ParamMap {
            self.0.clone()
        }

        fn load_state_dict(&mut self, params: ParamMap) -> anyhow::Result<()> {
            self.0 = params;
            Ok(())
        }
    }

    fn net(bias: f32) -> Params {
        let mut map = ParamMap::new();
        map.insert("w".into(), ParamTensor::new(vec![2], vec![1.0, 2.0]));
        map.insert("b".into(), ParamTensor::new(vec![1], vec![bias]));
        Params(map)
    }

    #[test]
    fn file_names_follow_prefix_and_epoch() {
        assert_eq!(checkpoint_file_name("", None), "last_checkpoint.json");
        assert_eq!(checkpoint_file_name("seg", Some(7)), "seg_007.json");
        assert_eq!(checkpoint_file_name("seg", Some(120)), "seg_120.json");
    }

    #[test]
    fn partial_checkpoint_keeps_missing_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = net(5.0);
        source.0.remove("w");
        let path = save_checkpoint(&source, dir.path(), "", Some(3)).unwrap();

        let mut target = net(0.0);
        load_weights(&mut target, &path).unwrap();
        assert_eq!(target.0["b"].values, vec![5.0]);
        assert_eq!(target.0["w"].values, vec![1.0, 2.0]);
        assert_eq!(read_checkpoint(&path).unwrap().epoch, Some(3));
    }

    #[test]
    fn unknown_or_reshaped_parameters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut extra = net(1.0);
        extra.0.insert("ghost".into(), ParamTensor::new(vec![1], vec![0.0]));
        let path = save_checkpoint(&extra, dir.path(), "extra", None).unwrap();
        let err = load_weights(&mut net(0.0), &path).unwrap_err();
        assert!(matches!(err, ClickLoopError::UnexpectedParameter { .. }));

        let mut reshaped = net(1.0);
        reshaped.0.insert("w".into(), ParamTensor::new(vec![3], vec![0.0; 3]));
        let path = save_checkpoint(&reshaped, dir.path(), "reshaped", None).unwrap();
        let mut target = net(0.0);
        let err = load_weights(&mut target, &path).unwrap_err();
        assert!(matches!(err, ClickLoopError::ParameterShape { .. }));
        assert_eq!(target.0["b"].values, vec![0.0]);
    }

    #[test]
    fn resume_needs_exactly_one_match() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_initial_weights(None, Some("run"), dir.path()),
            Err(ClickLoopError::AmbiguousCheckpoint { found: 0, .. })
        ));

        save_checkpoint(&net(1.0), dir.path(), "run", Some(1)).unwrap();
        let found = resolve_initial_weights(None, Some("run"), dir.path())
            .unwrap()
            .unwrap();
        assert!(found.ends_with("run_001.json"));

        save_checkpoint(&net(1.0), dir.path(), "run", None).unwrap();
        assert!(matches!(
            resolve_initial_weights(None, Some("run"), dir.path()),
            Err(ClickLoopError::AmbiguousCheckpoint { found: 2, .. })
        ));
    }

    #[test]
    fn explicit_weights_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            resolve_initial_weights(Some(missing.as_path()), Some("run"), dir.path()),
            Err(ClickLoopError::MissingCheckpoint { .. })
        ));
        assert_eq!(resolve_initial_weights(None, None, dir.path()).unwrap(), None);
    }
}
