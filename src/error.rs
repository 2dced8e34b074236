use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClickLoopError>;

#[derive(Debug, Error)]
pub enum ClickLoopError {
    #[error("no checkpoint found at '{path}'")]
    MissingCheckpoint { path: PathBuf },
    #[error("expected exactly one checkpoint matching '{prefix}*' in {dir}, found {found}")]
    AmbiguousCheckpoint {
        dir: PathBuf,
        prefix: String,
        found: usize,
    },
    #[error("loss '{name}' has a positive weight but no registered criterion")]
    MissingCriterion { name: String },
    #[error("network output '{name}' is required but was not produced")]
    MissingOutput { name: String },
    #[error("{what}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("parameter '{name}' has shape {actual:?} in checkpoint, model expects {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("checkpoint contains unknown parameter '{name}'")]
    UnexpectedParameter { name: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("toml parse error at {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("network call failed: {0}")]
    Network(String),
}

impl ClickLoopError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn shape(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

impl From<anyhow::Error> for ClickLoopError {
    fn from(err: anyhow::Error) -> Self {
        Self::Network(format!("{err:#}"))
    }
}
