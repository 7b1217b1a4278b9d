pub mod error;
pub mod sim;

pub use sim::{AioState, HeaterState, SimHandle, SimulatedInstrument, TransactionGauge};

use cryo_traits::Instrument;

/// Device names of the standard four-instrument rig.
pub const CTC100A: &str = "CTC100A";
pub const CTC100B: &str = "CTC100B";
pub const LAKESHORE224: &str = "Lakeshore224";
pub const LAKESHORE372: &str = "Lakeshore372";

/// The simulated rig plus a handle per instrument, in connect order.
pub struct SimulatedRig {
    pub instruments: Vec<Box<dyn Instrument>>,
    pub handles: Vec<(String, SimHandle)>,
}

impl SimulatedRig {
    pub fn handle(&self, device: &str) -> Option<&SimHandle> {
        self.handles
            .iter()
            .find(|(name, _)| name == device)
            .map(|(_, h)| h)
    }
}

/// Connect the simulated rig. All instruments share `gauge` when given.
pub fn simulated_rig(gauge: Option<TransactionGauge>) -> SimulatedRig {
    let devices = [
        SimulatedInstrument::ctc100(CTC100A),
        SimulatedInstrument::ctc100(CTC100B),
        SimulatedInstrument::lakeshore224(LAKESHORE224),
        SimulatedInstrument::lakeshore372(LAKESHORE372),
    ];
    let mut instruments: Vec<Box<dyn Instrument>> = Vec::with_capacity(devices.len());
    let mut handles = Vec::with_capacity(devices.len());
    for dev in devices {
        let dev = match &gauge {
            Some(p) => dev.with_gauge(p.clone()),
            None => dev,
        };
        handles.push((dev.name().to_string(), dev.handle()));
        tracing::debug!(device = dev.name(), channels = dev.channels().len(), "connected");
        instruments.push(Box::new(dev));
    }
    SimulatedRig {
        instruments,
        handles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_traits::{ChannelKind, IoType};

    #[test]
    fn rig_has_four_named_devices() {
        let rig = simulated_rig(None);
        let names: Vec<_> = rig.instruments.iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, [CTC100A, CTC100B, LAKESHORE224, LAKESHORE372]);
        assert!(rig.handle(CTC100B).is_some());
        assert!(rig.handle("nope").is_none());
    }

    #[test]
    fn ctc100_exposes_heater_and_switch_capabilities() {
        let mut dev = SimulatedInstrument::ctc100("X");
        assert!(dev.as_heater_control().is_some());
        assert!(dev.as_switch_control().is_some());
        assert!(dev.as_still_control().is_none());
        assert_eq!(dev.channel("4swheat").map(|c| c.kind), Some(ChannelKind::Switch));
    }

    #[test]
    fn aio_voltage_requires_set_out() {
        let mut dev = SimulatedInstrument::ctc100("X");
        let sw = dev.as_switch_control().unwrap();
        let err = sw.get_aio_voltage("4swheat").unwrap_err();
        assert!(err.to_string().contains("Set out"), "{err}");
        sw.set_aio_iotype("4swheat", IoType::SetOut).unwrap();
        sw.set_aio_voltage("4swheat", 7.0).unwrap();
        assert_eq!(sw.get_aio_voltage("4swheat").unwrap(), 7.0);
        assert!(sw.set_aio_voltage("4swheat", 10.5).is_err());
    }

    #[test]
    fn pump_reads_setpoint_while_regulated() {
        let mut dev = SimulatedInstrument::ctc100("X");
        let handle = dev.handle();
        handle.set_temperature("4pump", 12.0);
        {
            let h = dev.as_heater_control().unwrap();
            h.write_setpoint("4puheat", 50.0).unwrap();
            h.enable_control("4puheat").unwrap();
        }
        let t = dev.as_thermometry().unwrap().get_temperature("4pump").unwrap();
        assert_eq!(t, 50.0);
        dev.as_heater_control().unwrap().disable_control("4puheat").unwrap();
        let t = dev.as_thermometry().unwrap().get_temperature("4pump").unwrap();
        assert_eq!(t, 12.0);
    }

    #[test]
    fn injected_faults_are_transient_and_consumed() {
        let mut dev = SimulatedInstrument::lakeshore372("LS");
        dev.handle().inject_faults(1);
        let err = dev.as_thermometry().unwrap().get_temperature("1").unwrap_err();
        let hw = err.downcast_ref::<error::HwError>().unwrap();
        assert!(hw.is_transient());
        assert!(dev.as_thermometry().unwrap().get_temperature("1").is_ok());
    }
}
