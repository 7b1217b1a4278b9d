//! Simulated instruments for the dilution-refrigerator rig.
//!
//! Each simulated instrument keeps its state behind an `Arc<Mutex<_>>` so a
//! test can hold a [`SimHandle`] and inspect what the agent wrote, inject
//! transient faults, or change readings while the instrument itself is owned
//! by the hardware agent. There is no thermal model: a thermometer reads a
//! fixed value unless the heater linked to it is under closed-loop control,
//! in which case it reads the setpoint.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cryo_traits::{
    Channel, ChannelKind, HeaterControl, HwResult, Instrument, IoType, StillControl,
    SwitchControl, Thermometry,
};

use crate::error::HwError;

/// Counts concurrent instrument transactions across every instrument that
/// shares it. The agent's lock should keep `max_seen()` at 1.
#[derive(Debug, Clone, Default)]
pub struct TransactionGauge {
    in_flight: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl TransactionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_seen(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AioState {
    pub iotype: IoType,
    pub volts: f64,
}

impl Default for AioState {
    fn default() -> Self {
        Self {
            iotype: IoType::Input,
            volts: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeaterState {
    pub setpoint: Option<f64>,
    pub control_enabled: bool,
    pub output: f64,
}

#[derive(Debug, Default)]
struct SimState {
    temperatures: HashMap<String, f64>,
    unavailable: Vec<String>,
    heaters: HashMap<String, HeaterState>,
    /// heater channel -> thermometer channel it regulates
    links: HashMap<String, String>,
    aio: HashMap<String, AioState>,
    still_percent: f64,
    pending_faults: u32,
    journal: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    Ctc100,
    Lakeshore224,
    Lakeshore372,
}

/// Test-side view onto a simulated instrument's state.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_temperature(&self, channel: &str, kelvin: f64) {
        self.lock().temperatures.insert(channel.to_string(), kelvin);
    }

    /// Make a thermometer time out on every read until cleared.
    pub fn set_unavailable(&self, channel: &str, unavailable: bool) {
        let mut st = self.lock();
        st.unavailable.retain(|c| c != channel);
        if unavailable {
            st.unavailable.push(channel.to_string());
        }
    }

    /// The next `n` transactions fail with a response timeout.
    pub fn inject_faults(&self, n: u32) {
        self.lock().pending_faults = n;
    }

    pub fn heater(&self, channel: &str) -> HeaterState {
        self.lock().heaters.get(channel).copied().unwrap_or_default()
    }

    pub fn aio(&self, channel: &str) -> AioState {
        self.lock().aio.get(channel).copied().unwrap_or_default()
    }

    pub fn set_aio(&self, channel: &str, aio: AioState) {
        self.lock().aio.insert(channel.to_string(), aio);
    }

    pub fn still_percent(&self) -> f64 {
        self.lock().still_percent
    }

    /// Every write transaction applied so far, as `"<channel>.<field> = <value>"`.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }
}

/// A simulated CTC100, Lakeshore 224 or Lakeshore 372.
pub struct SimulatedInstrument {
    name: String,
    model: Model,
    channels: Vec<Channel>,
    state: Arc<Mutex<SimState>>,
    latency: Duration,
    gauge: Option<TransactionGauge>,
}

const CTC100_THERMOMETERS: [&str; 4] = ["4switch", "3switch", "4pump", "3pump"];
const CTC100_HEATERS: [(&str, &str); 2] = [("4puheat", "4pump"), ("3puheat", "3pump")];
const CTC100_AIO: [&str; 4] = ["4swheat", "3swheat", "AIO3", "AIO4"];

impl SimulatedInstrument {
    fn with_channels(name: &str, model: Model, channels: Vec<Channel>, state: SimState) -> Self {
        Self {
            name: name.to_string(),
            model,
            channels,
            state: Arc::new(Mutex::new(state)),
            latency: Duration::ZERO,
            gauge: None,
        }
    }

    /// CTC100 controller driving one He-7 side: four thermometers, two pump
    /// heaters and four auxiliary analog channels.
    pub fn ctc100(name: &str) -> Self {
        let mut channels = Vec::new();
        let mut state = SimState::default();
        for t in CTC100_THERMOMETERS {
            channels.push(Channel::new(t, ChannelKind::Thermometer));
            let base = if t.ends_with("pump") { 40.0 } else { 4.0 };
            state.temperatures.insert(t.to_string(), base);
        }
        for (heater, linked) in CTC100_HEATERS {
            channels.push(Channel::new(heater, ChannelKind::Heater));
            state.heaters.insert(heater.to_string(), HeaterState::default());
            state.links.insert(heater.to_string(), linked.to_string());
        }
        for aio in CTC100_AIO {
            channels.push(Channel::new(aio, ChannelKind::Switch));
            state.aio.insert(aio.to_string(), AioState::default());
        }
        Self::with_channels(name, Model::Ctc100, channels, state)
    }

    /// Lakeshore 224 monitor: inputs A, B, C1-C5, D1-D5.
    pub fn lakeshore224(name: &str) -> Self {
        let names = ["A", "B"]
            .into_iter()
            .map(str::to_string)
            .chain((1..=5).map(|i| format!("C{i}")))
            .chain((1..=5).map(|i| format!("D{i}")));
        let mut channels = Vec::new();
        let mut state = SimState::default();
        for n in names {
            let base = if n == "D2" { 40.0 } else { 4.0 };
            state.temperatures.insert(n.clone(), base);
            channels.push(Channel::new(n, ChannelKind::Thermometer));
        }
        Self::with_channels(name, Model::Lakeshore224, channels, state)
    }

    /// Lakeshore 372 controller: inputs 1-16 and A, plus the still heater.
    pub fn lakeshore372(name: &str) -> Self {
        let mut channels = Vec::new();
        let mut state = SimState::default();
        for n in (1..=16).map(|i| i.to_string()).chain(["A".to_string()]) {
            state.temperatures.insert(n.clone(), 0.8);
            channels.push(Channel::new(n, ChannelKind::Thermometer));
        }
        channels.push(Channel::new("still", ChannelKind::StillHeater));
        Self::with_channels(name, Model::Lakeshore372, channels, state)
    }

    /// Emulate a serial round trip of `latency` per transaction.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_gauge(mut self, gauge: TransactionGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }

    /// Run one instrument transaction. Fault injection and latency wrap the
    /// body, and the gauge counts it.
    fn transact<T>(
        &self,
        body: impl FnOnce(&mut SimState) -> Result<T, HwError>,
    ) -> HwResult<T> {
        if let Some(p) = &self.gauge {
            p.enter();
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let result = {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if st.pending_faults > 0 {
                st.pending_faults -= 1;
                Err(HwError::Timeout)
            } else {
                body(&mut st)
            }
        };
        if let Some(p) = &self.gauge {
            p.exit();
        }
        result.map_err(|e| {
            tracing::trace!(device = %self.name, error = %e, "simulated transaction failed");
            Box::new(e) as Box<dyn std::error::Error + Send + Sync>
        })
    }

    fn unknown(&self, channel: &str) -> HwError {
        HwError::UnknownChannel {
            device: self.name.clone(),
            channel: channel.to_string(),
        }
    }
}

impl Thermometry for SimulatedInstrument {
    fn get_temperature(&mut self, channel: &str) -> HwResult<f64> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            if st.unavailable.iter().any(|c| c == channel) {
                return Err(HwError::Timeout);
            }
            let base = *st.temperatures.get(channel).ok_or(unknown)?;
            let regulated = st
                .links
                .iter()
                .find(|(_, linked)| linked.as_str() == channel)
                .and_then(|(heater, _)| st.heaters.get(heater))
                .filter(|h| h.control_enabled)
                .and_then(|h| h.setpoint);
            Ok(regulated.unwrap_or(base))
        })
    }
}

impl HeaterControl for SimulatedInstrument {
    fn write_setpoint(&mut self, channel: &str, kelvin: f64) -> HwResult<()> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            let h = st.heaters.get_mut(channel).ok_or(unknown)?;
            h.setpoint = Some(kelvin);
            st.journal.push(format!("{channel}.PID.Setpoint = {kelvin}"));
            Ok(())
        })
    }

    fn enable_control(&mut self, channel: &str) -> HwResult<()> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            st.heaters.get_mut(channel).ok_or(unknown)?.control_enabled = true;
            st.journal.push(format!("{channel}.PID.Mode = On"));
            Ok(())
        })
    }

    fn disable_control(&mut self, channel: &str) -> HwResult<()> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            st.heaters.get_mut(channel).ok_or(unknown)?.control_enabled = false;
            st.journal.push(format!("{channel}.PID.Mode = Off"));
            Ok(())
        })
    }

    fn set_output(&mut self, channel: &str, value: f64) -> HwResult<()> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            st.heaters.get_mut(channel).ok_or(unknown)?.output = value;
            st.journal.push(format!("{channel}.Value = {value}"));
            Ok(())
        })
    }
}

impl SwitchControl for SimulatedInstrument {
    fn get_aio_iotype(&mut self, channel: &str) -> HwResult<IoType> {
        let unknown = self.unknown(channel);
        self.transact(|st| Ok(st.aio.get(channel).ok_or(unknown)?.iotype))
    }

    fn set_aio_iotype(&mut self, channel: &str, iotype: IoType) -> HwResult<()> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            st.aio.get_mut(channel).ok_or(unknown)?.iotype = iotype;
            st.journal.push(format!("{channel}.IOType = {iotype}"));
            Ok(())
        })
    }

    fn get_aio_voltage(&mut self, channel: &str) -> HwResult<f64> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            let aio = st.aio.get(channel).ok_or(unknown)?;
            if aio.iotype != IoType::SetOut {
                return Err(HwError::NotSetOut {
                    channel: channel.to_string(),
                    iotype: aio.iotype.to_string(),
                });
            }
            Ok(aio.volts)
        })
    }

    fn set_aio_voltage(&mut self, channel: &str, volts: f64) -> HwResult<()> {
        let unknown = self.unknown(channel);
        self.transact(|st| {
            if !(-10.0..=10.0).contains(&volts) {
                return Err(HwError::VoltageOutOfRange(volts));
            }
            let aio = st.aio.get_mut(channel).ok_or(unknown)?;
            if aio.iotype != IoType::SetOut {
                return Err(HwError::NotSetOut {
                    channel: channel.to_string(),
                    iotype: aio.iotype.to_string(),
                });
            }
            aio.volts = volts;
            st.journal.push(format!("{channel}.Value = {volts}"));
            Ok(())
        })
    }
}

impl StillControl for SimulatedInstrument {
    fn get_still_output(&mut self) -> HwResult<f64> {
        self.transact(|st| Ok(st.still_percent))
    }

    fn set_still_output(&mut self, percent: f64) -> HwResult<()> {
        self.transact(|st| {
            if !(0.0..=100.0).contains(&percent) {
                return Err(HwError::PercentOutOfRange(percent));
            }
            st.still_percent = percent;
            st.journal.push(format!("still = {percent}"));
            Ok(())
        })
    }
}

impl Instrument for SimulatedInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn as_thermometry(&mut self) -> Option<&mut dyn Thermometry> {
        Some(self)
    }

    fn as_heater_control(&mut self) -> Option<&mut dyn HeaterControl> {
        match self.model {
            Model::Ctc100 => Some(self),
            _ => None,
        }
    }

    fn as_switch_control(&mut self) -> Option<&mut dyn SwitchControl> {
        match self.model {
            Model::Ctc100 => Some(self),
            _ => None,
        }
    }

    fn as_still_control(&mut self) -> Option<&mut dyn StillControl> {
        match self.model {
            Model::Lakeshore372 => Some(self),
            _ => None,
        }
    }
}
