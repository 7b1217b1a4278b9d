#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the cryostat cooldown workspace.
//!
//! - Every section is optional and falls back to the rig defaults.
//! - `Config::validate` rejects values the agent or cycle driver cannot honor.
use std::path::Path;

use eyre::WrapErr;
use serde::Deserialize;

/// Hardware agent and command protocol settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentCfg {
    pub host: String,
    pub port: u16,
    /// Connect and response timeout per protocol attempt (ms)
    pub response_timeout_ms: u64,
    /// Total protocol attempts per command, including the first
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// How often the accept loop checks its stop flag (ms)
    pub accept_poll_ms: u64,
}

impl Default for AgentCfg {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8084,
            response_timeout_ms: 2000,
            retries: 3,
            retry_delay_ms: 100,
            accept_poll_ms: 100,
        }
    }
}

/// Timing and wiring for one He-7 side.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SideCfg {
    /// Controller device; when absent side A uses "CTC100A" and side B "CTC100B"
    pub device: Option<String>,
    pub t_switches_off_s: u64,
    pub t_heaters_on_s: u64,
    pub t_switch_on_s: u64,
    pub t_between_sides_s: u64,
    pub he4_pump_setpoint_k: f64,
    pub he3_pump_setpoint_k: f64,
    pub he4_switch_volts: f64,
    pub he3_switch_volts: f64,
    pub he4_pump_heater: String,
    pub he3_pump_heater: String,
    pub he4_switch: String,
    pub he3_switch: String,
}

impl Default for SideCfg {
    fn default() -> Self {
        Self {
            device: None,
            t_switches_off_s: 600,
            t_heaters_on_s: 1200,
            t_switch_on_s: 900,
            t_between_sides_s: 2700,
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

pub const DEFAULT_DEVICE_A: &str = "CTC100A";
pub const DEFAULT_DEVICE_B: &str = "CTC100B";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CycleCfg {
    /// Attempts per command delivery inside the cycle driver
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Cancellation poll granularity of dwell waits (ms)
    pub poll_ms: u64,
    pub a: SideCfg,
    pub b: SideCfg,
}

impl Default for CycleCfg {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 200,
            poll_ms: 500,
            a: SideCfg::default(),
            b: SideCfg::default(),
        }
    }
}

impl CycleCfg {
    pub fn device_a(&self) -> &str {
        self.a.device.as_deref().unwrap_or(DEFAULT_DEVICE_A)
    }

    pub fn device_b(&self) -> &str {
        self.b.device.as_deref().unwrap_or(DEFAULT_DEVICE_B)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplerCfg {
    pub interval_ms: u64,
    /// Samples held per series before a flush
    pub chunk: usize,
    pub output_dir: String,
}

impl Default for SamplerCfg {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            chunk: 60,
            output_dir: "DATA".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SwitchCfg {
    /// A switch reading within this many volts of zero counts as already off
    pub off_threshold_v: f64,
}

impl Default for SwitchCfg {
    fn default() -> Self {
        Self {
            off_threshold_v: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub agent: AgentCfg,
    pub cycle: CycleCfg,
    pub sampler: SamplerCfg,
    pub switch: SwitchCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = load_toml(&text).wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

const MAX_DWELL_S: u64 = 24 * 60 * 60;

fn validate_side(label: &str, side: &SideCfg) -> eyre::Result<()> {
    if let Some(dev) = &side.device
        && dev.trim().is_empty()
    {
        eyre::bail!("cycle.{label}.device must not be empty");
    }
    for (field, secs) in [
        ("t_switches_off_s", side.t_switches_off_s),
        ("t_heaters_on_s", side.t_heaters_on_s),
        ("t_switch_on_s", side.t_switch_on_s),
        ("t_between_sides_s", side.t_between_sides_s),
    ] {
        if secs > MAX_DWELL_S {
            eyre::bail!("cycle.{label}.{field} is unreasonably large (>24h)");
        }
    }
    for (field, k) in [
        ("he4_pump_setpoint_k", side.he4_pump_setpoint_k),
        ("he3_pump_setpoint_k", side.he3_pump_setpoint_k),
    ] {
        if !(k.is_finite() && k > 0.0) {
            eyre::bail!("cycle.{label}.{field} must be > 0");
        }
    }
    for (field, v) in [
        ("he4_switch_volts", side.he4_switch_volts),
        ("he3_switch_volts", side.he3_switch_volts),
    ] {
        if !(-10.0..=10.0).contains(&v) {
            eyre::bail!("cycle.{label}.{field} must be in [-10.0, 10.0]");
        }
    }
    for (field, name) in [
        ("he4_pump_heater", &side.he4_pump_heater),
        ("he3_pump_heater", &side.he3_pump_heater),
        ("he4_switch", &side.he4_switch),
        ("he3_switch", &side.he3_switch),
    ] {
        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            eyre::bail!("cycle.{label}.{field} must be a non-empty name without spaces");
        }
    }
    if side.he4_pump_heater == side.he3_pump_heater {
        eyre::bail!("cycle.{label} pump heaters must be distinct channels");
    }
    if side.he4_switch == side.he3_switch {
        eyre::bail!("cycle.{label} switches must be distinct channels");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Agent
        if self.agent.host.trim().is_empty() {
            eyre::bail!("agent.host must not be empty");
        }
        if self.agent.response_timeout_ms == 0 {
            eyre::bail!("agent.response_timeout_ms must be >= 1");
        }
        if self.agent.retries == 0 {
            eyre::bail!("agent.retries must be >= 1");
        }
        if self.agent.accept_poll_ms == 0 {
            eyre::bail!("agent.accept_poll_ms must be >= 1");
        }

        // Cycle
        if self.cycle.retries == 0 {
            eyre::bail!("cycle.retries must be >= 1");
        }
        if self.cycle.poll_ms == 0 || self.cycle.poll_ms > 500 {
            eyre::bail!("cycle.poll_ms must be in [1, 500]");
        }
        validate_side("a", &self.cycle.a)?;
        validate_side("b", &self.cycle.b)?;
        if self.cycle.device_a() == self.cycle.device_b() {
            eyre::bail!("cycle.a.device and cycle.b.device must differ");
        }

        // Sampler
        if self.sampler.interval_ms == 0 {
            eyre::bail!("sampler.interval_ms must be >= 1");
        }
        if self.sampler.chunk == 0 {
            eyre::bail!("sampler.chunk must be >= 1");
        }
        if self.sampler.output_dir.trim().is_empty() {
            eyre::bail!("sampler.output_dir must not be empty");
        }

        // Switch
        if !(0.0..=10.0).contains(&self.switch.off_threshold_v) {
            eyre::bail!("switch.off_threshold_v must be in [0.0, 10.0]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
