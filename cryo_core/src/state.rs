//! Last commanded value and on/off flag per (device, channel).
//!
//! Observational only: updated after a command succeeds, last write wins,
//! never consulted when deciding what to send to hardware.
use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::protocol::{ChannelCommand, Opcode};
use crate::util::series_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LastEntry {
    pub value: Option<f64>,
    pub state: SwitchState,
}

/// Snapshot keyed by `"<device>::<channel>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControllerState {
    pub values: BTreeMap<String, Option<f64>>,
    pub states: BTreeMap<String, SwitchState>,
}

#[derive(Debug, Default)]
pub struct LastKnown {
    inner: Mutex<BTreeMap<(String, String), LastEntry>>,
}

impl LastKnown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, device: &str, channel: &str, entry: LastEntry) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((device.to_string(), channel.to_string()), entry);
    }

    /// Record the effect of a command that just succeeded.
    pub fn record(&self, cmd: &ChannelCommand) {
        let entry = match cmd.opcode {
            Opcode::GetDevices => return,
            Opcode::ToggleHeater => LastEntry {
                value: None,
                state: if cmd.value.unwrap_or(0.0) != 0.0 {
                    SwitchState::On
                } else {
                    SwitchState::Off
                },
            },
            op if op.turns_on() => LastEntry {
                value: cmd.value,
                state: SwitchState::On,
            },
            _ => LastEntry {
                value: None,
                state: SwitchState::Off,
            },
        };
        self.set(&cmd.device, &cmd.channel, entry);
    }

    pub fn get(&self, device: &str, channel: &str) -> Option<LastEntry> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(device.to_string(), channel.to_string()))
            .copied()
    }

    pub fn snapshot(&self) -> ControllerState {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = ControllerState::default();
        for ((dev, ch), entry) in guard.iter() {
            let key = series_key(dev, ch);
            out.values.insert(key.clone(), entry.value);
            out.states.insert(key, entry.state);
        }
        out
    }
}
