mod writer;

pub use writer::{AveragingWriter, JsonlScalarWriter, ScalarRecord};

use anyhow::Result;

/// Destination for logged scalars
pub trait ScalarSink {
    /// Record `value` under `tag` at `step`
    ///
    /// `disable_avg` asks averaging sinks to pass the value through unchanged
    /// (epoch aggregates).
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64, disable_avg: bool) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: ScalarSink + ?Sized> ScalarSink for Box<S> {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64, disable_avg: bool) -> Result<()> {
        (**self).add_scalar(tag, value, step, disable_avg)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// `Train`/`Val` followed by the task prefix with its first letter upper-cased
/// and the rest lower-cased.
pub fn split_prefix(split: &str, task_prefix: &str) -> String {
    let mut chars = task_prefix.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    format!("{split}{capitalized}")
}

pub fn losses_tag(prefix: &str, name: &str) -> String {
    format!("{prefix}Losses/{name}")
}

pub fn metrics_tag(prefix: &str, name: &str) -> String {
    format!("{prefix}Metrics/{name}")
}

pub fn learning_rate_tag(prefix: &str) -> String {
    format!("{prefix}States/learning_rate")
}
