//! Runtime configuration types.
//!
//! These are the structs the agent, cycle driver and sampler run on. They are
//! separate from the TOML-deserialized config in `cryo_config`; see
//! `conversions` for the mapping.
use std::path::PathBuf;
use std::time::Duration;

/// One of the two physically symmetric He-7 sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Constants for one side's run. Snapshotted when the side starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SideConfig {
    /// Controller driving this side, e.g. "CTC100A".
    pub device: String,
    pub t_switches_off: Duration,
    pub t_heaters_on: Duration,
    pub t_switch_on: Duration,
    pub t_between_sides: Duration,
    pub he4_pump_setpoint_k: f64,
    pub he3_pump_setpoint_k: f64,
    pub he4_switch_volts: f64,
    pub he3_switch_volts: f64,
    pub he4_pump_heater: String,
    pub he3_pump_heater: String,
    pub he4_switch: String,
    pub he3_switch: String,
}

impl SideConfig {
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            t_switches_off: Duration::from_secs(600),
            t_heaters_on: Duration::from_secs(1200),
            t_switch_on: Duration::from_secs(900),
            t_between_sides: Duration::from_secs(2700),
            he4_pump_setpoint_k: 50.0,
            he3_pump_setpoint_k: 50.0,
            he4_switch_volts: 7.0,
            he3_switch_volts: 7.0,
            he4_pump_heater: "4puheat".into(),
            he3_pump_heater: "3puheat".into(),
            he4_switch: "4swheat".into(),
            he3_switch: "3swheat".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub a: SideConfig,
    pub b: SideConfig,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            a: SideConfig::for_device(cryo_config::DEFAULT_DEVICE_A),
            b: SideConfig::for_device(cryo_config::DEFAULT_DEVICE_B),
        }
    }
}

impl CycleConfig {
    pub fn side(&self, side: Side) -> &SideConfig {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideConfig {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }
}

/// Fixed-delay retry: `attempts` tries in total, `delay` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Command delivery inside the cycle driver.
    pub const CYCLE: Self = Self {
        attempts: 3,
        delay: Duration::from_millis(200),
    };
    /// Protocol-level resend in the agent client.
    pub const PROTOCOL: Self = Self {
        attempts: 3,
        delay: Duration::from_millis(100),
    };
}

/// Cycle driver knobs besides the per-side constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    pub retry: RetryPolicy,
    /// Cancellation poll of dwell waits.
    pub poll: Duration,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::CYCLE,
            poll: crate::cancel::DEFAULT_POLL,
        }
    }
}

/// Where the agent listens and how clients reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub host: String,
    pub port: u16,
    /// Connect and response timeout per attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub accept_poll: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8084,
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::PROTOCOL,
            accept_poll: Duration::from_millis(100),
        }
    }
}

impl AgentSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Switch handling inside the agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchPolicy {
    /// A switch reading within this many volts of zero is already off.
    pub off_threshold_v: f64,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            off_threshold_v: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSettings {
    pub interval: Duration,
    /// Samples a series may hold before it is flushed.
    pub chunk: usize,
    pub output_dir: PathBuf,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            chunk: 60,
            output_dir: PathBuf::from("DATA"),
        }
    }
}
