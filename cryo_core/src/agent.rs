//! The hardware agent: sole owner of every connected instrument.
//!
//! All instruments live behind one mutex. Each logical operation holds it for
//! its whole multi-write sequence, so at most one hardware transaction is in
//! flight system-wide no matter how many callers share the agent.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cryo_traits::{ChannelKind, Instrument, IoType};

use crate::config::SwitchPolicy;
use crate::error::CommandError;
use crate::hw_error::boxed;
use crate::protocol::{DeviceCatalog, HardwareCommands};

type Instruments = BTreeMap<String, Box<dyn Instrument>>;

/// One channel value read during a sampler tick; `None` when unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device: String,
    pub channel: String,
    pub value: Option<f64>,
}

/// Something the sampler can read every channel from in one go.
pub trait TelemetrySource: Send + Sync {
    fn read_all(&self) -> Vec<Reading>;
}

#[derive(Clone)]
pub struct HardwareAgent {
    instruments: Arc<Mutex<Instruments>>,
    switch: SwitchPolicy,
}

impl HardwareAgent {
    /// Take ownership of the connected instruments. Later duplicates of a
    /// device name replace earlier ones.
    pub fn new(instruments: Vec<Box<dyn Instrument>>, switch: SwitchPolicy) -> Self {
        let map: Instruments = instruments
            .into_iter()
            .map(|dev| (dev.name().to_string(), dev))
            .collect();
        tracing::info!(devices = map.len(), "hardware agent ready");
        Self {
            instruments: Arc::new(Mutex::new(map)),
            switch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Instruments> {
        // A panic mid-transaction leaves the instrument in whatever state the
        // last write produced; later operations are still meaningful.
        self.instruments.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on `device` with the hardware lock held, after checking that
    /// `channel` exists with one of `kinds`.
    fn with_channel<T>(
        &self,
        device: &str,
        channel: &str,
        kinds: &[ChannelKind],
        f: impl FnOnce(&mut dyn Instrument) -> Result<T, CommandError>,
    ) -> Result<T, CommandError> {
        let mut guard = self.lock();
        let dev = guard
            .get_mut(device)
            .ok_or_else(|| CommandError::config(format!("unknown device '{device}'")))?;
        match dev.channel(channel).map(|c| c.kind) {
            None => {
                return Err(CommandError::config(format!(
                    "{device}: unknown channel '{channel}'"
                )));
            }
            Some(kind) if !kinds.contains(&kind) => {
                return Err(CommandError::config(format!(
                    "{device}::{channel} is a {kind}, not a {}",
                    kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(" or ")
                )));
            }
            Some(_) => {}
        }
        f(dev.as_mut())
    }

    pub fn device_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

fn missing(device: &str, capability: &str) -> CommandError {
    CommandError::config(format!("{device} has no {capability} capability"))
}

fn heater_off(dev: &mut dyn Instrument, device: &str, channel: &str) -> Result<(), CommandError> {
    let hc = dev
        .as_heater_control()
        .ok_or_else(|| missing(device, "heater control"))?;
    hc.disable_control(channel).map_err(boxed)?;
    hc.set_output(channel, 0.0).map_err(boxed)
}

impl HardwareCommands for HardwareAgent {
    fn set_switch_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), CommandError> {
        if !(-10.0..=10.0).contains(&volts) {
            return Err(CommandError::config(format!(
                "switch voltage {volts} V outside [-10, 10] V"
            )));
        }
        self.with_channel(device, channel, &[ChannelKind::Switch], |dev| {
            let sw = dev
                .as_switch_control()
                .ok_or_else(|| missing(device, "switch"))?;
            let mode = sw.get_aio_iotype(channel).map_err(boxed)?;
            if mode != IoType::SetOut {
                tracing::debug!(device, channel, from = %mode, "reconfiguring switch to Set out");
                sw.set_aio_iotype(channel, IoType::SetOut).map_err(boxed)?;
            }
            sw.set_aio_voltage(channel, volts).map_err(boxed)?;
            tracing::info!(device, channel, volts, "switch on");
            Ok(())
        })
    }

    fn turn_off_switch(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        let threshold = self.switch.off_threshold_v;
        self.with_channel(device, channel, &[ChannelKind::Switch], |dev| {
            let sw = dev
                .as_switch_control()
                .ok_or_else(|| missing(device, "switch"))?;
            let mode = sw.get_aio_iotype(channel).map_err(boxed)?;
            if mode != IoType::SetOut {
                tracing::debug!(device, channel, mode = %mode, "switch not driven; nothing to turn off");
                return Ok(());
            }
            let volts = sw.get_aio_voltage(channel).map_err(boxed)?;
            if volts.abs() <= threshold {
                tracing::debug!(device, channel, volts, threshold, "switch already off");
                return Ok(());
            }
            sw.set_aio_voltage(channel, 0.0).map_err(boxed)?;
            tracing::info!(device, channel, from_volts = volts, "switch off");
            Ok(())
        })
    }

    fn set_heater_temperature(&self, device: &str, channel: &str, kelvin: f64) -> Result<(), CommandError> {
        if !(kelvin.is_finite() && kelvin >= 0.0) {
            return Err(CommandError::config(format!("setpoint {kelvin} K is not a temperature")));
        }
        self.with_channel(device, channel, &[ChannelKind::Heater], |dev| {
            let hc = dev
                .as_heater_control()
                .ok_or_else(|| missing(device, "heater control"))?;
            hc.write_setpoint(channel, kelvin).map_err(boxed)?;
            hc.enable_control(channel).map_err(boxed)?;
            tracing::info!(device, channel, kelvin, "heater on");
            Ok(())
        })
    }

    fn turn_off_heater(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.with_channel(device, channel, &[ChannelKind::Heater], |dev| {
            heater_off(dev, device, channel)?;
            tracing::info!(device, channel, "heater off");
            Ok(())
        })
    }

    fn toggle_heater(&self, device: &str, channel: &str, on: bool) -> Result<(), CommandError> {
        self.with_channel(device, channel, &[ChannelKind::Heater], |dev| {
            if on {
                dev.as_heater_control()
                    .ok_or_else(|| missing(device, "heater control"))?
                    .enable_control(channel)
                    .map_err(boxed)?;
            } else {
                heater_off(dev, device, channel)?;
            }
            tracing::info!(device, channel, on, "heater toggled");
            Ok(())
        })
    }

    fn set_still_percentage(&self, device: &str, channel: &str, percent: f64) -> Result<(), CommandError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(CommandError::config(format!(
                "still output {percent} % outside [0, 100] %"
            )));
        }
        self.with_channel(device, channel, &[ChannelKind::StillHeater], |dev| {
            dev.as_still_control()
                .ok_or_else(|| missing(device, "still"))?
                .set_still_output(percent)
                .map_err(boxed)?;
            tracing::info!(device, channel, percent, "still output set");
            Ok(())
        })
    }

    fn turn_off_still(&self, device: &str, channel: &str) -> Result<(), CommandError> {
        self.with_channel(device, channel, &[ChannelKind::StillHeater], |dev| {
            dev.as_still_control()
                .ok_or_else(|| missing(device, "still"))?
                .set_still_output(0.0)
                .map_err(boxed)?;
            tracing::info!(device, channel, "still off");
            Ok(())
        })
    }

    fn get_devices(&self) -> Result<DeviceCatalog, CommandError> {
        let guard = self.lock();
        Ok(guard
            .iter()
            .map(|(name, dev)| {
                let chans = dev
                    .channels()
                    .iter()
                    .map(|c| (c.name.clone(), c.kind))
                    .collect();
                (name.clone(), chans)
            })
            .collect())
    }
}

impl TelemetrySource for HardwareAgent {
    /// Every thermometer of every device plus each still output, under one
    /// lock acquisition. A failed channel reads as unavailable.
    fn read_all(&self) -> Vec<Reading> {
        let mut guard = self.lock();
        let mut out = Vec::new();
        for (name, dev) in guard.iter_mut() {
            let channels: Vec<_> = dev.channels().to_vec();
            for ch in channels {
                let value = match ch.kind {
                    ChannelKind::Thermometer => dev
                        .as_thermometry()
                        .map(|t| t.get_temperature(&ch.name)),
                    ChannelKind::StillHeater => {
                        dev.as_still_control().map(|s| s.get_still_output())
                    }
                    ChannelKind::Heater | ChannelKind::Switch => continue,
                };
                let value = match value {
                    Some(Ok(v)) => Some(v),
                    Some(Err(e)) => {
                        tracing::debug!(device = %name, channel = %ch.name, error = %e, "channel unavailable");
                        None
                    }
                    None => None,
                };
                out.push(Reading {
                    device: name.clone(),
                    channel: ch.name,
                    value,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_hardware::{SimulatedInstrument, simulated_rig};

    fn agent() -> (HardwareAgent, cryo_hardware::SimulatedRig) {
        let mut rig = simulated_rig(None);
        let instruments = std::mem::take(&mut rig.instruments);
        (HardwareAgent::new(instruments, SwitchPolicy::default()), rig)
    }

    #[test]
    fn set_switch_voltage_reconfigures_once() {
        let (agent, rig) = agent();
        let h = rig.handle("CTC100A").unwrap();
        agent.set_switch_voltage("CTC100A", "4swheat", 7.0).unwrap();
        agent.set_switch_voltage("CTC100A", "4swheat", 6.0).unwrap();
        assert_eq!(
            h.journal(),
            [
                "4swheat.IOType = Set out",
                "4swheat.Value = 7",
                "4swheat.Value = 6"
            ]
        );
    }

    #[test]
    fn turn_off_switch_skips_write_below_threshold() {
        let (agent, rig) = agent();
        let h = rig.handle("CTC100B").unwrap();
        h.set_aio("3swheat", cryo_hardware::AioState { iotype: IoType::SetOut, volts: 0.8 });
        agent.turn_off_switch("CTC100B", "3swheat").unwrap();
        assert!(h.journal().is_empty());

        h.set_aio("3swheat", cryo_hardware::AioState { iotype: IoType::SetOut, volts: 7.0 });
        agent.turn_off_switch("CTC100B", "3swheat").unwrap();
        assert_eq!(h.journal(), ["3swheat.Value = 0"]);
    }

    #[test]
    fn turn_off_switch_zeroes_negative_drive() {
        let (agent, rig) = agent();
        let h = rig.handle("CTC100A").unwrap();
        agent.set_switch_voltage("CTC100A", "4swheat", -7.0).unwrap();
        agent.turn_off_switch("CTC100A", "4swheat").unwrap();
        assert_eq!(h.aio("4swheat").volts, 0.0);
        assert_eq!(h.journal().last().map(String::as_str), Some("4swheat.Value = 0"));

        h.set_aio("3swheat", cryo_hardware::AioState { iotype: IoType::SetOut, volts: -0.5 });
        agent.turn_off_switch("CTC100A", "3swheat").unwrap();
        assert_eq!(h.aio("3swheat").volts, -0.5);
    }

    #[test]
    fn turn_off_switch_ignores_input_mode() {
        let (agent, rig) = agent();
        agent.turn_off_switch("CTC100A", "AIO3").unwrap();
        assert!(rig.handle("CTC100A").unwrap().journal().is_empty());
    }

    #[test]
    fn heater_on_writes_setpoint_before_enable() {
        let (agent, rig) = agent();
        let h = rig.handle("CTC100A").unwrap();
        agent.set_heater_temperature("CTC100A", "4puheat", 45.0).unwrap();
        agent.turn_off_heater("CTC100A", "4puheat").unwrap();
        assert_eq!(
            h.journal(),
            [
                "4puheat.PID.Setpoint = 45",
                "4puheat.PID.Mode = On",
                "4puheat.PID.Mode = Off",
                "4puheat.Value = 0"
            ]
        );
    }

    #[test]
    fn unknown_targets_are_configuration_errors() {
        let (agent, _rig) = agent();
        let err = agent.turn_off_heater("CTC100C", "4puheat").unwrap_err();
        assert!(matches!(err, CommandError::Configuration(_)));
        let err = agent.turn_off_heater("CTC100A", "4swheat").unwrap_err();
        assert!(matches!(err, CommandError::Configuration(_)));
        let err = agent.set_still_percentage("Lakeshore372", "still", 140.0).unwrap_err();
        assert!(matches!(err, CommandError::Configuration(_)));
    }

    #[test]
    fn instrument_timeouts_are_transient() {
        let (agent, rig) = agent();
        rig.handle("CTC100A").unwrap().inject_faults(1);
        let err = agent.turn_off_switch("CTC100A", "4swheat").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn read_all_marks_failed_channels_unavailable() {
        let dev = SimulatedInstrument::lakeshore372("LS");
        let h = dev.handle();
        h.set_unavailable("5", true);
        let agent = HardwareAgent::new(vec![Box::new(dev)], SwitchPolicy::default());
        let readings = agent.read_all();
        assert_eq!(readings.len(), 18);
        let five = readings.iter().find(|r| r.channel == "5").unwrap();
        assert_eq!(five.value, None);
        let still = readings.iter().find(|r| r.channel == "still").unwrap();
        assert_eq!(still.value, Some(0.0));
    }
}
