//! Persistent telemetry sinks.
//!
//! A sink stores append-only series: one per (device, channel) plus the
//! shared tick-time series. Series are created on first append.
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::SinkError;

/// Series name used for tick times.
pub const TIME_DEVICE: &str = "sampler";
pub const TIME_CHANNEL: &str = "time";

pub trait TelemetrySink: Send {
    /// Append `(timestamp, value)` samples to one channel series.
    fn append(&mut self, device: &str, channel: &str, samples: &[(f64, f64)]) -> Result<(), SinkError>;
    /// Append tick timestamps.
    fn append_times(&mut self, times: &[f64]) -> Result<(), SinkError>;
}

/// One CSV file per series: `<root>/<device>/<channel>.csv`, header
/// `timestamp,value`; tick times go to `<root>/sampler/time.csv` with header
/// `timestamp`.
#[derive(Debug, Clone)]
pub struct CsvSink {
    root: PathBuf,
}

impl CsvSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn series_path(&self, device: &str, channel: &str) -> PathBuf {
        self.root
            .join(sanitize(device))
            .join(format!("{}.csv", sanitize(channel)))
    }

    fn append_rows<I, R>(&self, path: &Path, header: &[&str], rows: I) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator,
        R::Item: AsRef<[u8]>,
    {
        let io = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io)?;
        let fresh = file.metadata().map_err(io)?.len() == 0;
        let mut w = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            w.write_record(header)?;
        }
        for row in rows {
            w.write_record(row)?;
        }
        w.flush().map_err(io)?;
        Ok(())
    }
}

/// One path component: separators and whitespace become `_`, `..` is not allowed.
fn sanitize(name: &str) -> String {
    if name == ".." || name == "." {
        return "_".repeat(name.len());
    }
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c })
        .collect()
}

impl TelemetrySink for CsvSink {
    fn append(&mut self, device: &str, channel: &str, samples: &[(f64, f64)]) -> Result<(), SinkError> {
        let path = self.series_path(device, channel);
        self.append_rows(
            &path,
            &["timestamp", "value"],
            samples.iter().map(|(t, v)| [t.to_string(), v.to_string()]),
        )
    }

    fn append_times(&mut self, times: &[f64]) -> Result<(), SinkError> {
        let path = self.series_path(TIME_DEVICE, TIME_CHANNEL);
        self.append_rows(&path, &["timestamp"], times.iter().map(|t| [t.to_string()]))
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    series: BTreeMap<(String, String), Vec<(f64, f64)>>,
    times: Vec<f64>,
    appends: usize,
    fail_next: usize,
}

/// In-memory sink. Clones share storage, so a test can keep one clone while
/// the sampler owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn series(&self, device: &str, channel: &str) -> Vec<(f64, f64)> {
        self.lock()
            .series
            .get(&(device.to_string(), channel.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn times(&self) -> Vec<f64> {
        self.lock().times.clone()
    }

    /// Number of successful append calls of either kind.
    pub fn appends(&self) -> usize {
        self.lock().appends
    }

    /// Make the next `n` append calls fail.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    fn check_failure(inner: &mut MemoryInner) -> Result<(), SinkError> {
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(SinkError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl TelemetrySink for MemorySink {
    fn append(&mut self, device: &str, channel: &str, samples: &[(f64, f64)]) -> Result<(), SinkError> {
        let mut inner = self.lock();
        Self::check_failure(&mut inner)?;
        inner
            .series
            .entry((device.to_string(), channel.to_string()))
            .or_default()
            .extend_from_slice(samples);
        inner.appends += 1;
        Ok(())
    }

    fn append_times(&mut self, times: &[f64]) -> Result<(), SinkError> {
        let mut inner = self.lock();
        Self::check_failure(&mut inner)?;
        inner.times.extend_from_slice(times);
        inner.appends += 1;
        Ok(())
    }
}
