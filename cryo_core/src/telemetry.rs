//! Chunked in-memory telemetry buffers.
//!
//! Each (device, channel) gets a [`ReadingBuffer`]; tick times get their own.
//! A buffer that grows past the chunk size is appended to the sink and
//! cleared. If the sink refuses, the samples stay and the flush is retried
//! on the next tick.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::agent::Reading;
use crate::sink::TelemetrySink;
use crate::util::series_key;

/// Ordered `(timestamp, value)` samples of one series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingBuffer {
    samples: Vec<(f64, f64)>,
}

impl ReadingBuffer {
    pub fn push(&mut self, t: f64, v: f64) {
        self.samples.push((t, v));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[(f64, f64)] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Latest values of one tick, keyed `"<device>::<channel>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSnapshot {
    pub tick: u64,
    pub timestamp: f64,
    pub values: BTreeMap<String, Option<f64>>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub recorded: usize,
    pub dropped: usize,
    pub flushed_series: usize,
    pub failed_flushes: usize,
}

#[derive(Debug)]
pub struct TelemetryCollector {
    chunk: usize,
    ticks: u64,
    times: Vec<f64>,
    series: BTreeMap<(String, String), ReadingBuffer>,
}

impl TelemetryCollector {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
            ticks: 0,
            times: Vec::new(),
            series: BTreeMap::new(),
        }
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    pub fn buffer(&self, device: &str, channel: &str) -> Option<&ReadingBuffer> {
        self.series.get(&(device.to_string(), channel.to_string()))
    }

    pub fn pending_times(&self) -> usize {
        self.times.len()
    }

    /// Longest buffered series, tick times included.
    pub fn max_pending(&self) -> usize {
        self.series
            .values()
            .map(ReadingBuffer::len)
            .chain(std::iter::once(self.times.len()))
            .max()
            .unwrap_or(0)
    }

    /// Buffer one tick's readings and flush whatever crossed the chunk size.
    pub fn record_tick(
        &mut self,
        t: f64,
        readings: &[Reading],
        sink: &mut dyn TelemetrySink,
    ) -> (TickSummary, TickSnapshot) {
        let mut summary = TickSummary::default();
        let mut snapshot = TickSnapshot {
            tick: self.ticks,
            timestamp: t,
            values: BTreeMap::new(),
        };
        self.ticks += 1;
        self.times.push(t);
        for r in readings {
            let key = series_key(&r.device, &r.channel);
            match r.value {
                Some(v) if v.is_finite() => {
                    self.series
                        .entry((r.device.clone(), r.channel.clone()))
                        .or_default()
                        .push(t, v);
                    snapshot.values.insert(key, Some(v));
                    summary.recorded += 1;
                }
                Some(v) => {
                    tracing::warn!(device = %r.device, channel = %r.channel, value = v, "dropping non-finite reading");
                    snapshot.values.insert(key, None);
                    summary.dropped += 1;
                }
                None => {
                    snapshot.values.insert(key, None);
                    summary.dropped += 1;
                }
            }
        }
        self.flush_over(self.chunk, sink, &mut summary);
        (summary, snapshot)
    }

    /// Flush every non-empty buffer regardless of size.
    pub fn flush_all(&mut self, sink: &mut dyn TelemetrySink) -> TickSummary {
        let mut summary = TickSummary::default();
        self.flush_over(0, sink, &mut summary);
        summary
    }

    fn flush_over(&mut self, limit: usize, sink: &mut dyn TelemetrySink, summary: &mut TickSummary) {
        for ((device, channel), buf) in &mut self.series {
            if buf.len() <= limit || buf.is_empty() {
                continue;
            }
            match sink.append(device, channel, buf.samples()) {
                Ok(()) => {
                    tracing::debug!(%device, %channel, samples = buf.len(), "flushed series");
                    buf.clear();
                    summary.flushed_series += 1;
                }
                Err(e) => {
                    tracing::warn!(%device, %channel, pending = buf.len(), error = %e, "flush failed; keeping samples");
                    summary.failed_flushes += 1;
                }
            }
        }
        if self.times.len() > limit && !self.times.is_empty() {
            match sink.append_times(&self.times) {
                Ok(()) => {
                    self.times.clear();
                    summary.flushed_series += 1;
                }
                Err(e) => {
                    tracing::warn!(pending = self.times.len(), error = %e, "time flush failed; keeping samples");
                    summary.failed_flushes += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn reading(ch: &str, v: Option<f64>) -> Reading {
        Reading {
            device: "CTC100A".into(),
            channel: ch.into(),
            value: v,
        }
    }

    #[test]
    fn flushes_when_chunk_exceeded() {
        let mut sink = MemorySink::new();
        let mut col = TelemetryCollector::new(3);
        for i in 0..4 {
            col.record_tick(f64::from(i), &[reading("4pump", Some(40.0))], &mut sink);
        }
        assert_eq!(sink.series("CTC100A", "4pump").len(), 4);
        assert_eq!(sink.times(), [0.0, 1.0, 2.0, 3.0]);
        assert!(col.buffer("CTC100A", "4pump").unwrap().is_empty());
    }

    #[test]
    fn non_finite_and_missing_readings_are_dropped() {
        let mut sink = MemorySink::new();
        let mut col = TelemetryCollector::new(10);
        let (summary, snap) = col.record_tick(
            0.0,
            &[
                reading("4pump", Some(f64::NAN)),
                reading("3pump", None),
                reading("4switch", Some(4.2)),
            ],
            &mut sink,
        );
        assert_eq!(summary.recorded, 1);
        assert_eq!(summary.dropped, 2);
        assert_eq!(snap.values["CTC100A::4switch"], Some(4.2));
        assert_eq!(snap.values["CTC100A::4pump"], None);
        assert!(col.buffer("CTC100A", "4pump").is_none());
    }

    #[test]
    fn failed_flush_keeps_samples_for_next_tick() {
        let mut sink = MemorySink::new();
        let mut col = TelemetryCollector::new(1);
        sink.fail_next(2);
        col.record_tick(0.0, &[reading("A", Some(1.0))], &mut sink);
        col.record_tick(1.0, &[reading("A", Some(2.0))], &mut sink);
        assert_eq!(col.buffer("CTC100A", "A").unwrap().len(), 2);
        col.record_tick(2.0, &[reading("A", Some(3.0))], &mut sink);
        assert_eq!(sink.series("CTC100A", "A"), [(0.0, 1.0), (1.0, 2.0), (2.0, 3.0)]);
    }
}
