//! Sampler thread lifecycle: ticks, latest snapshot, flush on drop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cryo_core::agent::Reading;
use cryo_core::config::{SamplerSettings, SwitchPolicy};
use cryo_core::mocks::StaticSource;
use cryo_core::sink::{CsvSink, MemorySink};
use cryo_core::{HardwareAgent, Sampler};
use cryo_hardware::simulated_rig;
use cryo_traits::MonotonicClock;

fn settings(interval_ms: u64, chunk: usize) -> SamplerSettings {
    SamplerSettings {
        interval: Duration::from_millis(interval_ms),
        chunk,
        output_dir: "unused".into(),
    }
}

fn wait_ticks(sampler: &Sampler, n: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while sampler.ticks() < n {
        assert!(Instant::now() < deadline, "sampler stalled at {} ticks", sampler.ticks());
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn pump_reading(v: Option<f64>) -> Reading {
    Reading {
        device: "CTC100A".into(),
        channel: "4pump".into(),
        value: v,
    }
}

#[test]
fn sampler_thread_exits_on_drop() {
    let source = Arc::new(StaticSource::default());
    let sampler = Sampler::spawn(
        source,
        Box::new(MemorySink::new()),
        &settings(100, 10),
        MonotonicClock::new(),
    );
    std::thread::sleep(Duration::from_millis(20));
    let t0 = Instant::now();
    drop(sampler);
    assert!(t0.elapsed() < Duration::from_millis(500));
}

#[test]
fn partial_buffers_are_flushed_on_stop() {
    let sink = MemorySink::new();
    let source = Arc::new(StaticSource::new(vec![pump_reading(Some(40.0))]));
    let sampler = Sampler::spawn(
        source,
        Box::new(sink.clone()),
        &settings(5, 1000),
        MonotonicClock::new(),
    );
    wait_ticks(&sampler, 3);
    assert!(sink.series("CTC100A", "4pump").is_empty());
    sampler.stop();

    let series = sink.series("CTC100A", "4pump");
    assert!(series.len() >= 3);
    assert!(series.iter().all(|&(_, v)| v == 40.0));
    assert!(series.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(sink.times().len(), series.len());
}

#[test]
fn latest_snapshot_reflects_newest_tick() {
    let source = Arc::new(StaticSource::new(vec![pump_reading(Some(40.0))]));
    let sampler = Sampler::spawn(
        source.clone(),
        Box::new(MemorySink::new()),
        &settings(5, 10),
        MonotonicClock::new(),
    );
    wait_ticks(&sampler, 1);
    source.set(vec![pump_reading(None)]);
    let seen = sampler.ticks();
    wait_ticks(&sampler, seen + 3);

    let snap = sampler.latest().unwrap();
    assert!(snap.tick > seen);
    assert_eq!(snap.values["CTC100A::4pump"], None);
}

#[test]
fn no_buffer_exceeds_chunk_while_running() {
    let sink = MemorySink::new();
    let source = Arc::new(StaticSource::new(vec![pump_reading(Some(1.0))]));
    let sampler = Sampler::spawn(
        source,
        Box::new(sink.clone()),
        &settings(1, 4),
        MonotonicClock::new(),
    );
    wait_ticks(&sampler, 12);
    let flushed = sink.series("CTC100A", "4pump").len();
    assert!(flushed >= 5, "only {flushed} samples flushed");
    assert_eq!(flushed % 5, 0);
    sampler.stop();
}

#[test]
fn csv_output_from_simulated_rig() {
    let dir = tempfile::tempdir().unwrap();
    let rig = simulated_rig(None);
    let agent = Arc::new(HardwareAgent::new(rig.instruments, SwitchPolicy::default()));
    let sampler = Sampler::spawn(
        agent,
        Box::new(CsvSink::new(dir.path())),
        &settings(5, 2),
        MonotonicClock::new(),
    );
    wait_ticks(&sampler, 4);
    sampler.stop();

    let pump = std::fs::read_to_string(dir.path().join("CTC100A").join("4pump.csv")).unwrap();
    let mut lines = pump.lines();
    assert_eq!(lines.next(), Some("timestamp,value"));
    let rows: Vec<_> = lines.collect();
    assert!(rows.len() >= 4);
    assert!(rows.iter().all(|r| r.ends_with(",40")));

    let times = std::fs::read_to_string(dir.path().join("sampler").join("time.csv")).unwrap();
    assert_eq!(times.lines().count(), rows.len() + 1);
    assert!(dir.path().join("Lakeshore372").join("still.csv").exists());
}
