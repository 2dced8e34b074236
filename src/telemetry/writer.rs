use super::ScalarSink;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// One logged scalar, as written by [`JsonlScalarWriter`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub value: f64,
    pub step: u64,
}

/// Appends one JSON object per scalar to a file
pub struct JsonlScalarWriter {
    out: BufWriter<File>,
}

impl JsonlScalarWriter {
    /// Open `path` for appending, so a resumed run keeps the earlier records.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open scalar log at {}", path.display()))?;
        tracing::info!("Writing scalars to {}", path.display());
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl ScalarSink for JsonlScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64, _disable_avg: bool) -> Result<()> {
        let record = ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: usize,
}

/// Averages each tag over `dump_period` values before forwarding
///
/// Values logged with `disable_avg` bypass the window.
pub struct AveragingWriter<W> {
    inner: W,
    dump_period: usize,
    windows: HashMap<String, Accumulator>,
}

impl<W: ScalarSink> AveragingWriter<W> {
    pub fn new(inner: W, dump_period: usize) -> Self {
        Self {
            inner,
            dump_period: dump_period.max(1),
            windows: HashMap::new(),
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: ScalarSink> ScalarSink for AveragingWriter<W> {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64, disable_avg: bool) -> Result<()> {
        if disable_avg {
            return self.inner.add_scalar(tag, value, step, true);
        }
        let window = self.windows.entry(tag.to_string()).or_default();
        window.sum += value;
        window.count += 1;
        if window.count >= self.dump_period {
            let mean = window.sum / window.count as f64;
            *window = Accumulator::default();
            self.inner.add_scalar(tag, mean, step, false)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Vec<(String, f64, u64)>);

    impl ScalarSink for Collect {
        fn add_scalar(&mut self, tag: &str, value: f64, step: u64, _: bool) -> Result<()> {
            self.0.push((tag.to_string(), value, step));
            Ok(())
        }
    }

    #[test]
    fn averages_over_the_dump_period() {
        let mut writer = AveragingWriter::new(Collect::default(), 3);
        for (step, v) in [1.0, 2.0, 3.0, 10.0].into_iter().enumerate() {
            writer.add_scalar("loss", v, step as u64, false).unwrap();
        }
        assert_eq!(writer.inner().0, vec![("loss".to_string(), 2.0, 2)]);
    }

    #[test]
    fn disabled_averaging_passes_through() {
        let mut writer = AveragingWriter::new(Collect::default(), 10);
        writer.add_scalar("epoch_iou", 0.7, 4, true).unwrap();
        assert_eq!(writer.into_inner().0, vec![("epoch_iou".to_string(), 0.7, 4)]);
    }

    #[test]
    fn jsonl_writer_emits_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/scalars.jsonl");
        let mut writer = JsonlScalarWriter::create(&path).unwrap();
        writer.add_scalar("a", 1.5, 1, false).unwrap();
        writer.add_scalar("b", -2.0, 2, true).unwrap();
        writer.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<ScalarRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tag, "b");
        assert_eq!(records[1].value, -2.0);
    }

    #[test]
    fn reopening_keeps_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalars.jsonl");
        let mut first = JsonlScalarWriter::create(&path).unwrap();
        first.add_scalar("loss", 1.0, 0, false).unwrap();
        first.flush().unwrap();
        drop(first);

        let mut resumed = JsonlScalarWriter::create(&path).unwrap();
        resumed.add_scalar("loss", 0.5, 1, false).unwrap();
        resumed.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let steps: Vec<u64> = text
            .lines()
            .map(|l| serde_json::from_str::<ScalarRecord>(l).unwrap().step)
            .collect();
        assert_eq!(steps, vec![0, 1]);
    }
}
