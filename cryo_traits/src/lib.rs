//! Instrument capability interfaces.
//!
//! Drivers implement `Instrument` plus whichever capabilities the hardware
//! supports. The hardware agent only ever talks to instruments through
//! these traits, never through a concrete driver type.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::fmt;
use std::str::FromStr;

/// Error type crossing the driver boundary.
pub type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// What a channel physically is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    Thermometer,
    Heater,
    Switch,
    StillHeater,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Thermometer => "thermometer",
            ChannelKind::Heater => "heater",
            ChannelKind::Switch => "switch",
            ChannelKind::StillHeater => "still_heater",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thermometer" => Ok(ChannelKind::Thermometer),
            "heater" => Ok(ChannelKind::Heater),
            "switch" => Ok(ChannelKind::Switch),
            "still_heater" => Ok(ChannelKind::StillHeater),
            other => Err(format!("unknown channel kind '{other}'")),
        }
    }
}

/// A named channel on an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub kind: ChannelKind,
}

impl Channel {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// I/O mode of an auxiliary analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Input,
    SetOut,
    MeasOut,
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoType::Input => "Input",
            IoType::SetOut => "Set out",
            IoType::MeasOut => "Meas out",
        })
    }
}

pub trait Thermometry {
    /// Temperature in kelvin.
    fn get_temperature(&mut self, channel: &str) -> HwResult<f64>;
}

pub trait HeaterControl {
    fn write_setpoint(&mut self, channel: &str, kelvin: f64) -> HwResult<()>;
    fn enable_control(&mut self, channel: &str) -> HwResult<()>;
    fn disable_control(&mut self, channel: &str) -> HwResult<()>;
    /// Manual output level; only meaningful with closed-loop control disabled.
    fn set_output(&mut self, channel: &str, value: f64) -> HwResult<()>;
}

pub trait SwitchControl {
    fn get_aio_iotype(&mut self, channel: &str) -> HwResult<IoType>;
    fn set_aio_iotype(&mut self, channel: &str, iotype: IoType) -> HwResult<()>;
    /// Only valid while the channel is in `IoType::SetOut`.
    fn get_aio_voltage(&mut self, channel: &str) -> HwResult<f64>;
    /// Only valid while the channel is in `IoType::SetOut`; volts in [-10, 10].
    fn set_aio_voltage(&mut self, channel: &str, volts: f64) -> HwResult<()>;
}

pub trait StillControl {
    fn get_still_output(&mut self) -> HwResult<f64>;
    fn set_still_output(&mut self, percent: f64) -> HwResult<()>;
}

/// A connected instrument. The channel list is fixed at connect time.
pub trait Instrument: Send {
    fn name(&self) -> &str;
    fn channels(&self) -> &[Channel];

    fn as_thermometry(&mut self) -> Option<&mut dyn Thermometry> {
        None
    }
    fn as_heater_control(&mut self) -> Option<&mut dyn HeaterControl> {
        None
    }
    fn as_switch_control(&mut self) -> Option<&mut dyn SwitchControl> {
        None
    }
    fn as_still_control(&mut self) -> Option<&mut dyn StillControl> {
        None
    }

    fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels().iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_round_trips_through_str() {
        for kind in [
            ChannelKind::Thermometer,
            ChannelKind::Heater,
            ChannelKind::Switch,
            ChannelKind::StillHeater,
        ] {
            assert_eq!(kind.as_str().parse::<ChannelKind>(), Ok(kind));
        }
        assert!("pump".parse::<ChannelKind>().is_err());
    }
}
