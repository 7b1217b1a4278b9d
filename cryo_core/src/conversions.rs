//! `From` implementations bridging `cryo_config` types to `cryo_core` types.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    AgentSettings, CycleConfig, CycleSettings, RetryPolicy, SamplerSettings, SideConfig,
    SwitchPolicy,
};

// ── SideConfig ───────────────────────────────────────────────────────────────

fn side_from(device: &str, c: &cryo_config::SideCfg) -> SideConfig {
    SideConfig {
        device: device.to_string(),
        t_switches_off: Duration::from_secs(c.t_switches_off_s),
        t_heaters_on: Duration::from_secs(c.t_heaters_on_s),
        t_switch_on: Duration::from_secs(c.t_switch_on_s),
        t_between_sides: Duration::from_secs(c.t_between_sides_s),
        he4_pump_setpoint_k: c.he4_pump_setpoint_k,
        he3_pump_setpoint_k: c.he3_pump_setpoint_k,
        he4_switch_volts: c.he4_switch_volts,
        he3_switch_volts: c.he3_switch_volts,
        he4_pump_heater: c.he4_pump_heater.clone(),
        he3_pump_heater: c.he3_pump_heater.clone(),
        he4_switch: c.he4_switch.clone(),
        he3_switch: c.he3_switch.clone(),
    }
}

// ── CycleConfig ──────────────────────────────────────────────────────────────

impl From<&cryo_config::CycleCfg> for CycleConfig {
    fn from(c: &cryo_config::CycleCfg) -> Self {
        Self {
            a: side_from(c.device_a(), &c.a),
            b: side_from(c.device_b(), &c.b),
        }
    }
}

// ── CycleSettings ────────────────────────────────────────────────────────────

impl From<&cryo_config::CycleCfg> for CycleSettings {
    fn from(c: &cryo_config::CycleCfg) -> Self {
        Self {
            retry: RetryPolicy {
                attempts: c.retries,
                delay: Duration::from_millis(c.retry_delay_ms),
            },
            poll: Duration::from_millis(c.poll_ms),
        }
    }
}

// ── AgentSettings ────────────────────────────────────────────────────────────

impl From<&cryo_config::AgentCfg> for AgentSettings {
    fn from(c: &cryo_config::AgentCfg) -> Self {
        Self {
            host: c.host.clone(),
            port: c.port,
            timeout: Duration::from_millis(c.response_timeout_ms),
            retry: RetryPolicy {
                attempts: c.retries,
                delay: Duration::from_millis(c.retry_delay_ms),
            },
            accept_poll: Duration::from_millis(c.accept_poll_ms),
        }
    }
}

// ── SwitchPolicy ─────────────────────────────────────────────────────────────

impl From<&cryo_config::SwitchCfg> for SwitchPolicy {
    fn from(c: &cryo_config::SwitchCfg) -> Self {
        Self {
            off_threshold_v: c.off_threshold_v,
        }
    }
}

// ── SamplerSettings ──────────────────────────────────────────────────────────

impl From<&cryo_config::SamplerCfg> for SamplerSettings {
    fn from(c: &cryo_config::SamplerCfg) -> Self {
        Self {
            interval: Duration::from_millis(c.interval_ms),
            chunk: c.chunk,
            output_dir: PathBuf::from(&c.output_dir),
        }
    }
}
