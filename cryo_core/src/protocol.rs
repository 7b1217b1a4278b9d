//! Line protocol between cycle drivers and the hardware agent.
//!
//! A request is one ASCII line, `"<opcode> <device> <channel> <value>"`,
//! where `<value>` is a number, a toggle word, or the placeholder `_`. The
//! agent answers with `0` (success) or `1` (failure), except for
//! `get_devices`, which answers with a JSON device catalog.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cryo_traits::ChannelKind;
use thiserror::Error;

use crate::error::CommandError;

pub const PLACEHOLDER: &str = "_";
pub const OK_TOKEN: &str = "0";
pub const FAIL_TOKEN: &str = "1";
/// Longest request line the agent accepts, excluding the newline.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// device -> channel -> kind
pub type DeviceCatalog = BTreeMap<String, BTreeMap<String, ChannelKind>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    SetSwitchVoltage,
    TurnOffSwitch,
    SetHeaterTemperature,
    TurnOffHeater,
    ToggleHeater,
    SetStillPercentage,
    TurnOffStill,
    GetDevices,
}

impl Opcode {
    pub const ALL: [Opcode; 8] = [
        Opcode::SetSwitchVoltage,
        Opcode::TurnOffSwitch,
        Opcode::SetHeaterTemperature,
        Opcode::TurnOffHeater,
        Opcode::ToggleHeater,
        Opcode::SetStillPercentage,
        Opcode::TurnOffStill,
        Opcode::GetDevices,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::SetSwitchVoltage => "set_switch_voltage",
            Opcode::TurnOffSwitch => "turn_off_switch",
            Opcode::SetHeaterTemperature => "set_heater_temperature",
            Opcode::TurnOffHeater => "turn_off_heater",
            Opcode::ToggleHeater => "toggle_heater",
            Opcode::SetStillPercentage => "set_still_percentage",
            Opcode::TurnOffStill => "turn_off_still",
            Opcode::GetDevices => "get_devices",
        }
    }

    /// Whether the fourth token carries a value rather than the placeholder.
    pub fn takes_value(self) -> bool {
        matches!(
            self,
            Opcode::SetSwitchVoltage
                | Opcode::SetHeaterTemperature
                | Opcode::ToggleHeater
                | Opcode::SetStillPercentage
        )
    }

    /// Whether a successful run leaves the addressed channel on.
    pub fn turns_on(self) -> bool {
        self.takes_value() && self != Opcode::ToggleHeater
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opcode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownOpcode(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("request longer than {MAX_REQUEST_BYTES} bytes")]
    TooLong,
    #[error("request is not ASCII")]
    NotAscii,
    #[error("expected 4 tokens, got {0}")]
    WrongArity(usize),
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("invalid value '{value}' for {opcode}")]
    BadValue { opcode: Opcode, value: String },
}

/// One logical hardware operation addressed to a (device, channel).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCommand {
    pub opcode: Opcode,
    pub device: String,
    pub channel: String,
    /// Numeric argument; toggles carry 1.0 (on) or 0.0 (off).
    pub value: Option<f64>,
}

impl ChannelCommand {
    fn new(opcode: Opcode, device: &str, channel: &str, value: Option<f64>) -> Self {
        Self {
            opcode,
            device: device.to_string(),
            channel: channel.to_string(),
            value,
        }
    }

    pub fn set_switch_voltage(device: &str, channel: &str, volts: f64) -> Self {
        Self::new(Opcode::SetSwitchVoltage, device, channel, Some(volts))
    }

    pub fn turn_off_switch(device: &str, channel: &str) -> Self {
        Self::new(Opcode::TurnOffSwitch, device, channel, None)
    }

    pub fn set_heater_temperature(device: &str, channel: &str, kelvin: f64) -> Self {
        Self::new(Opcode::SetHeaterTemperature, device, channel, Some(kelvin))
    }

    pub fn turn_off_heater(device: &str, channel: &str) -> Self {
        Self::new(Opcode::TurnOffHeater, device, channel, None)
    }

    pub fn toggle_heater(device: &str, channel: &str, on: bool) -> Self {
        let v = if on { 1.0 } else { 0.0 };
        Self::new(Opcode::ToggleHeater, device, channel, Some(v))
    }

    pub fn set_still_percentage(device: &str, channel: &str, percent: f64) -> Self {
        Self::new(Opcode::SetStillPercentage, device, channel, Some(percent))
    }

    pub fn turn_off_still(device: &str, channel: &str) -> Self {
        Self::new(Opcode::TurnOffStill, device, channel, None)
    }

    pub fn get_devices() -> Self {
        Self::new(Opcode::GetDevices, PLACEHOLDER, PLACEHOLDER, None)
    }

    /// Parse one request line (trailing newline and surrounding whitespace
    /// are ignored).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if line.len() > MAX_REQUEST_BYTES + 2 {
            return Err(ProtocolError::TooLong);
        }
        if !line.is_ascii() {
            return Err(ProtocolError::NotAscii);
        }
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        let &[op, device, channel, raw] = tokens.as_slice() else {
            return Err(ProtocolError::WrongArity(tokens.len()));
        };
        let opcode: Opcode = op.parse()?;
        let bad = || ProtocolError::BadValue {
            opcode,
            value: raw.to_string(),
        };
        let value = match opcode {
            Opcode::ToggleHeater => Some(if parse_toggle(raw).ok_or_else(bad)? {
                1.0
            } else {
                0.0
            }),
            o if o.takes_value() => {
                let v: f64 = raw.parse().map_err(|_| bad())?;
                if !v.is_finite() {
                    return Err(bad());
                }
                Some(v)
            }
            _ => None,
        };
        Ok(Self::new(opcode, device, channel, value))
    }

    /// Encode as a request line without the trailing newline.
    pub fn to_line(&self) -> String {
        let value = match (self.opcode, self.value) {
            (Opcode::ToggleHeater, Some(v)) => (if v != 0.0 { "true" } else { "false" }).to_string(),
            (_, Some(v)) => v.to_string(),
            (_, None) => PLACEHOLDER.to_string(),
        };
        format!("{} {} {} {}", self.opcode, self.device, self.channel, value)
    }

    /// Run this command against `hw`. State-changing commands yield `None`;
    /// `get_devices` yields the catalog.
    pub fn apply(&self, hw: &dyn HardwareCommands) -> Result<Option<DeviceCatalog>, CommandError> {
        let (dev, ch) = (self.device.as_str(), self.channel.as_str());
        let value = || {
            self.value
                .ok_or_else(|| CommandError::config(format!("{} requires a value", self.opcode)))
        };
        match self.opcode {
            Opcode::SetSwitchVoltage => hw.set_switch_voltage(dev, ch, value()?),
            Opcode::TurnOffSwitch => hw.turn_off_switch(dev, ch),
            Opcode::SetHeaterTemperature => hw.set_heater_temperature(dev, ch, value()?),
            Opcode::TurnOffHeater => hw.turn_off_heater(dev, ch),
            Opcode::ToggleHeater => hw.toggle_heater(dev, ch, value()? != 0.0),
            Opcode::SetStillPercentage => hw.set_still_percentage(dev, ch, value()?),
            Opcode::TurnOffStill => hw.turn_off_still(dev, ch),
            Opcode::GetDevices => return hw.get_devices().map(Some),
        }
        .map(|()| None)
    }
}

impl fmt::Display for ChannelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn parse_toggle(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// The eight hardware operations, implemented in-process by the agent and
/// remotely by the agent client.
pub trait HardwareCommands: Send + Sync {
    fn set_switch_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), CommandError>;
    fn turn_off_switch(&self, device: &str, channel: &str) -> Result<(), CommandError>;
    fn set_heater_temperature(&self, device: &str, channel: &str, kelvin: f64) -> Result<(), CommandError>;
    fn turn_off_heater(&self, device: &str, channel: &str) -> Result<(), CommandError>;
    fn toggle_heater(&self, device: &str, channel: &str, on: bool) -> Result<(), CommandError>;
    fn set_still_percentage(&self, device: &str, channel: &str, percent: f64) -> Result<(), CommandError>;
    fn turn_off_still(&self, device: &str, channel: &str) -> Result<(), CommandError>;
    fn get_devices(&self) -> Result<DeviceCatalog, CommandError>;
}

/// Render a catalog as the JSON object sent for `get_devices`.
pub fn catalog_to_json(catalog: &DeviceCatalog) -> String {
    let plain: BTreeMap<&str, BTreeMap<&str, &str>> = catalog
        .iter()
        .map(|(dev, chans)| {
            let chans = chans
                .iter()
                .map(|(ch, kind)| (ch.as_str(), kind.as_str()))
                .collect();
            (dev.as_str(), chans)
        })
        .collect();
    // A map of strings always serializes.
    serde_json::to_string(&plain).unwrap_or_else(|_| "{}".to_string())
}

pub fn catalog_from_json(s: &str) -> Result<DeviceCatalog, String> {
    let plain: BTreeMap<String, BTreeMap<String, String>> =
        serde_json::from_str(s).map_err(|e| e.to_string())?;
    plain
        .into_iter()
        .map(|(dev, chans)| -> Result<_, String> {
            let chans = chans
                .into_iter()
                .map(|(ch, kind)| kind.parse::<ChannelKind>().map(|k| (ch, k)))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok((dev, chans))
        })
        .collect()
}
