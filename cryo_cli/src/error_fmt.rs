//! Human-readable error descriptions and structured JSON error formatting.

use cryo_core::protocol::ProtocolError;
use cryo_core::{CommandError, CycleError, DeliveryError};

/// Context attached to every config load failure.
pub const CONFIG_CONTEXT: &str = "invalid configuration";

/// Stable process exit codes. 2 is left to clap usage errors.
pub mod exit {
    pub const GENERIC: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const AGENT_UNREACHABLE: i32 = 4;
    pub const CYCLE_ABORTED: i32 = 5;
    pub const PREFLIGHT: i32 = 6;
    pub const BAD_REQUEST: i32 = 7;
}

fn is_config_error(err: &eyre::Report) -> bool {
    err.chain().any(|e| e.to_string() == CONFIG_CONTEXT)
}

fn unreachable_agent(err: &eyre::Report) -> bool {
    err.downcast_ref::<DeliveryError>().is_some()
        || matches!(err.downcast_ref::<CommandError>(), Some(CommandError::Transient(_)))
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CycleError>() {
        return match ce {
            CycleError::CommandFailed {
                step,
                device,
                channel,
                attempts,
                source,
            } => format!(
                "What happened: The cooldown cycle stopped during '{step}': {device}::{channel} failed after {attempts} attempt(s) ({source}).\nLikely causes: Agent not running or unreachable, instrument not responding, or a channel name that the instrument rejects.\nHow to fix: Check the agent log and instrument connections, then restart the cycle; it begins again at side A."
            ),
            CycleError::Preflight(msg) => format!(
                "What happened: The cycle did not start ({msg}).\nLikely causes: [cycle.a]/[cycle.b] device or channel names do not match what the agent reports.\nHow to fix: Compare the config with `cryo devices` and fix the names."
            ),
            CycleError::AlreadyRunning => {
                "What happened: A cycle is already running.\nLikely causes: A second start was requested.\nHow to fix: Stop the running cycle first.".to_string()
            }
            CycleError::Cancelled => {
                "What happened: The cycle was stopped.\nLikely causes: Ctrl-C or a stop request.\nHow to fix: Nothing to fix; start it again when ready.".to_string()
            }
        };
    }

    if let Some(pe) = err.downcast_ref::<ProtocolError>() {
        return format!(
            "What happened: The command could not be encoded ({pe}).\nLikely causes: Unknown opcode, missing value, or a value that is not a number.\nHow to fix: Use one of set_switch_voltage, turn_off_switch, set_heater_temperature, turn_off_heater, toggle_heater, set_still_percentage, turn_off_still, get_devices."
        );
    }

    if unreachable_agent(err) {
        return format!(
            "What happened: The hardware agent did not accept the request ({err}).\nLikely causes: Agent not running, wrong [agent] host/port, or the agent rejected the command.\nHow to fix: Start `cryo agent`, check --host/--port, and retry with --log-level=debug."
        );
    }

    if is_config_error(err) {
        let root = err.root_cause();
        return format!(
            "What happened: Invalid configuration ({root}).\nLikely causes: A missing file, TOML syntax error, or out-of-range value.\nHow to fix: Edit the config file, then rerun. See etc/cryo_config.toml for a sample."
        );
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<CycleError>() {
        Some(CycleError::CommandFailed { .. }) => return exit::CYCLE_ABORTED,
        Some(CycleError::Preflight(_)) => return exit::PREFLIGHT,
        _ => {}
    }
    if err.downcast_ref::<ProtocolError>().is_some() {
        return exit::BAD_REQUEST;
    }
    if unreachable_agent(err) {
        return exit::AGENT_UNREACHABLE;
    }
    if is_config_error(err) {
        return exit::CONFIG;
    }
    exit::GENERIC
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match exit_code_for_error(err) {
        exit::CONFIG => "Config",
        exit::AGENT_UNREACHABLE => "AgentUnreachable",
        exit::CYCLE_ABORTED => "CycleAborted",
        exit::PREFLIGHT => "Preflight",
        exit::BAD_REQUEST => "BadRequest",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(CycleError::CommandFailed {
        step,
        device,
        channel,
        attempts,
        ..
    }) = err.downcast_ref::<CycleError>()
    {
        return json!({
            "reason": reason_name(err),
            "details": { "step": step, "device": device, "channel": channel, "attempts": attempts },
            "message": humanize(err),
        })
        .to_string();
    }
    json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn config_errors_get_config_exit_code() {
        let err = Err::<(), _>(eyre::eyre!("agent.retries must be >= 1"))
            .wrap_err(CONFIG_CONTEXT)
            .unwrap_err();
        assert_eq!(exit_code_for_error(&err), exit::CONFIG);
        assert!(humanize(&err).contains("agent.retries must be >= 1"));
    }

    #[test]
    fn aborted_cycle_reports_step_in_json() {
        let err = eyre::Report::new(CycleError::CommandFailed {
            step: "CTC100A: switches off".into(),
            device: "CTC100A".into(),
            channel: "4swheat".into(),
            attempts: 3,
            source: CommandError::Transient("timeout".into()),
        });
        assert_eq!(exit_code_for_error(&err), exit::CYCLE_ABORTED);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "CycleAborted");
        assert_eq!(v["details"]["step"], "CTC100A: switches off");
    }

    #[test]
    fn transient_command_error_means_unreachable_agent() {
        let err = eyre::Report::new(CommandError::Transient("connection refused".into()));
        assert_eq!(exit_code_for_error(&err), exit::AGENT_UNREACHABLE);
        assert!(humanize(&err).starts_with("What happened: The hardware agent"));
    }
}
