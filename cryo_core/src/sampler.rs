//! Background telemetry sampling.
//!
//! Spawns a thread that reads every channel through a [`TelemetrySource`] at
//! a fixed interval, buffers the values in a [`TelemetryCollector`] and hands
//! full chunks to the sink. The latest tick is published over a bounded
//! channel where newer snapshots replace unread ones.
//!
//! Each `Sampler` owns exactly one thread, stopped and joined on drop; the
//! thread flushes its partial buffers before it exits.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel as xch;
use cryo_traits::Clock;

use crate::agent::TelemetrySource;
use crate::cancel::{CancelToken, sleep_interruptible};
use crate::config::SamplerSettings;
use crate::sink::TelemetrySink;
use crate::telemetry::{TelemetryCollector, TickSnapshot};

pub struct Sampler {
    rx: xch::Receiver<TickSnapshot>,
    ticks: Arc<AtomicU64>,
    /// Independent of any cycle stop signal.
    shutdown: CancelToken,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<C: Clock + Send + Sync + 'static>(
        source: Arc<dyn TelemetrySource>,
        mut sink: Box<dyn TelemetrySink>,
        settings: &SamplerSettings,
        clock: C,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let evict = rx.clone();
        let shutdown = CancelToken::new();
        let shutdown_thread = shutdown.clone();
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_thread = ticks.clone();
        let interval = settings.interval;
        let poll = interval.min(std::time::Duration::from_millis(50));
        let mut collector = TelemetryCollector::new(settings.chunk);

        let join_handle = std::thread::spawn(move || {
            let epoch = clock.now();
            loop {
                if shutdown_thread.is_cancelled() {
                    tracing::debug!("Sampler thread received shutdown signal");
                    break;
                }

                let t = clock.secs_since(epoch);
                let readings = source.read_all();
                let (summary, snapshot) = collector.record_tick(t, &readings, sink.as_mut());
                ticks_thread.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(tick = snapshot.tick, recorded = summary.recorded, dropped = summary.dropped, "sampler tick");

                // Latest wins: evict an unread snapshot before publishing.
                if let Err(xch::TrySendError::Full(snapshot)) = tx.try_send(snapshot) {
                    let _ = evict.try_recv();
                    let _ = tx.try_send(snapshot);
                }

                sleep_interruptible(&clock, interval, poll, &shutdown_thread);
            }
            let summary = collector.flush_all(sink.as_mut());
            tracing::debug!(flushed = summary.flushed_series, failed = summary.failed_flushes, "Sampler final flush");
            tracing::trace!("Sampler thread exiting cleanly");
        });

        Self {
            rx,
            ticks,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Most recent unread tick, if any.
    pub fn latest(&self) -> Option<TickSnapshot> {
        self.rx.try_iter().last()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop, flush and join.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("Sampler thread joined successfully");
                }
                Err(e) => {
                    // Thread panicked; log but don't propagate (we're in Drop)
                    tracing::warn!(?e, "Sampler thread panicked during shutdown");
                }
            }
        }
    }
}
