//! Test and helper mocks for cryo_core

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cryo_traits::{ChannelKind, Clock};

use crate::agent::{Reading, TelemetrySource};
use crate::error::CommandError;
use crate::protocol::{ChannelCommand, DeviceCatalog, HardwareCommands};

/// Longest real time a blocked `ManualClock::sleep` waits before returning
/// so callers can re-check their stop flags.
const MANUAL_WAKE: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    /// Threads currently blocked in `sleep`.
    sleepers: usize,
}

#[derive(Debug)]
struct ManualInner {
    base: Instant,
    state: Mutex<ManualState>,
    changed: Condvar,
    auto: bool,
}

/// Virtual time for deterministic dwell tests.
///
/// `ManualClock::new()` only moves when `advance` is called; a sleeper
/// blocks until time reaches its target (waking briefly every few
/// milliseconds). `ManualClock::auto_advance()` jumps forward by the full
/// amount on every `sleep`.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

impl ManualClock {
    fn with_mode(auto: bool) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                base: Instant::now(),
                state: Mutex::new(ManualState::default()),
                changed: Condvar::new(),
                auto,
            }),
        }
    }

    pub fn new() -> Self {
        Self::with_mode(false)
    }

    pub fn auto_advance() -> Self {
        Self::with_mode(true)
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, d: Duration) {
        self.state().offset += d;
        self.inner.changed.notify_all();
    }

    /// Virtual time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.state().offset
    }

    /// Block until some thread sleeps on this clock, or `timeout` passes.
    /// A sleeper has already fixed its wake-up target, so an `advance`
    /// made afterwards counts toward it.
    pub fn wait_for_sleeper(&self, timeout: Duration) -> bool {
        let guard = self.state();
        let (guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout, |st| st.sleepers == 0)
            .unwrap_or_else(|e| e.into_inner());
        guard.sleepers > 0
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.base + self.state().offset
    }

    fn sleep(&self, d: Duration) {
        if self.inner.auto {
            self.state().offset += d;
            std::thread::yield_now();
            return;
        }
        let mut guard = self.state();
        guard.sleepers += 1;
        self.inner.changed.notify_all();
        let target = guard.offset + d;
        let (mut guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, MANUAL_WAKE, |st| st.offset < target)
            .unwrap_or_else(|e| e.into_inner());
        guard.sleepers -= 1;
    }
}

/// The channel catalog of the standard four-instrument rig.
pub fn rig_catalog() -> DeviceCatalog {
    let mut cat = DeviceCatalog::new();
    for dev in ["CTC100A", "CTC100B"] {
        let chans = cat.entry(dev.to_string()).or_default();
        for t in ["4switch", "3switch", "4pump", "3pump"] {
            chans.insert(t.to_string(), ChannelKind::Thermometer);
        }
        for h in ["4puheat", "3puheat"] {
            chans.insert(h.to_string(), ChannelKind::Heater);
        }
        for s in ["4swheat", "3swheat", "AIO3", "AIO4"] {
            chans.insert(s.to_string(), ChannelKind::Switch);
        }
    }
    let ls224 = cat.entry("Lakeshore224".to_string()).or_default();
    for t in ["A", "B", "C1", "C2", "C3", "C4", "C5", "D1", "D2", "D3", "D4", "D5"] {
        ls224.insert(t.to_string(), ChannelKind::Thermometer);
    }
    let ls372 = cat.entry("Lakeshore372".to_string()).or_default();
    for i in 1..=16 {
        ls372.insert(i.to_string(), ChannelKind::Thermometer);
    }
    ls372.insert("A".to_string(), ChannelKind::Thermometer);
    ls372.insert("still".to_string(), ChannelKind::StillHeater);
    cat
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<ChannelCommand>,
    failures: VecDeque<CommandError>,
    fail_always: Option<CommandError>,
    catalog: DeviceCatalog,
}

/// Records every command attempt and fails on demand.
#[derive(Debug, Default)]
pub struct ScriptedCommands {
    script: Mutex<Script>,
}

impl ScriptedCommands {
    /// Succeeds on everything; catalog is the standard rig.
    pub fn new() -> Self {
        Self::with_catalog(rig_catalog())
    }

    pub fn with_catalog(catalog: DeviceCatalog) -> Self {
        Self {
            script: Mutex::new(Script {
                catalog,
                ..Script::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` state-changing attempts fail with `err`.
    pub fn fail_next(&self, n: usize, err: CommandError) {
        let mut s = self.script();
        s.failures.extend(std::iter::repeat_n(err, n));
    }

    /// Every attempt fails with `err` until cleared with `None`.
    pub fn fail_always(&self, err: Option<CommandError>) {
        self.script().fail_always = err;
    }

    /// Every attempted state-changing command, successful or not.
    pub fn calls(&self) -> Vec<ChannelCommand> {
        self.script().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    fn attempt(&self, cmd: ChannelCommand) -> Result<(), CommandError> {
        let mut s = self.script();
        s.calls.push(cmd);
        if let Some(err) = s.failures.pop_front() {
            return Err(err);
        }
        match &s.fail_always {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl HardwareCommands for ScriptedCommands {
    fn set_switch_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::set_switch_voltage(device, channel, volts))
    }

    fn turn_off_switch(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::turn_off_switch(device, channel))
    }

    fn set_heater_temperature(&self, device: &str, channel: &str, kelvin: f64) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::set_heater_temperature(device, channel, kelvin))
    }

    fn turn_off_heater(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::turn_off_heater(device, channel))
    }

    fn toggle_heater(&self, device: &str, channel: &str, on: bool) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::toggle_heater(device, channel, on))
    }

    fn set_still_percentage(&self, device: &str, channel: &str, percent: f64) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::set_still_percentage(device, channel, percent))
    }

    fn turn_off_still(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.attempt(ChannelCommand::turn_off_still(device, channel))
    }

    fn get_devices(&self) -> Result<DeviceCatalog, CommandError> {
        Ok(self.script().catalog.clone())
    }
}

/// A telemetry source returning the same readings on every tick.
#[derive(Debug, Default)]
pub struct StaticSource {
    readings: Mutex<Vec<Reading>>,
}

impl StaticSource {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self {
            readings: Mutex::new(readings),
        }
    }

    pub fn set(&self, readings: Vec<Reading>) {
        *self.readings.lock().unwrap_or_else(|e| e.into_inner()) = readings;
    }
}

impl TelemetrySource for StaticSource {
    fn read_all(&self) -> Vec<Reading> {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_after_sleeper_registers_wakes_it() {
        let clock = ManualClock::new();
        let sleeper = {
            let clock = clock.clone();
            std::thread::spawn(move || {
                let deadline = clock.now() + Duration::from_secs(600);
                while clock.remaining(deadline) > Duration::ZERO {
                    clock.sleep(clock.remaining(deadline));
                }
            })
        };
        assert!(clock.wait_for_sleeper(Duration::from_secs(5)));
        clock.advance(Duration::from_secs(601));
        sleeper.join().unwrap();
        assert_eq!(clock.elapsed(), Duration::from_secs(601));
    }

    #[test]
    fn no_sleeper_times_out() {
        let clock = ManualClock::new();
        assert!(!clock.wait_for_sleeper(Duration::from_millis(20)));
    }
}
