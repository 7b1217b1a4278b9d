//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub const DEFAULT_CONFIG: &str = "etc/cryo_config.toml";

#[derive(Parser, Debug)]
#[command(name = "cryo", version, about = "He-7 cooldown orchestration")]
pub struct Cli {
    /// Path to config TOML (defaults apply when the default path is absent)
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Agent host (overrides [agent] host)
    #[arg(long, global = true, value_name = "HOST")]
    pub host: Option<String>,

    /// Agent port (overrides [agent] port)
    #[arg(long, global = true, value_name = "PORT")]
    pub port: Option<u16>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Knobs shared by the long-running subcommands.
#[derive(Args, Debug, Clone, Copy)]
pub struct RunLimits {
    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long, value_name = "SECS")]
    pub max_runtime_s: Option<u64>,

    /// How often to report cycle status, in ms
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub status_interval_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the hardware agent over the simulated rig and sample telemetry
    Agent {
        /// Do not run the telemetry sampler
        #[arg(long, action = ArgAction::SetTrue)]
        no_sampler: bool,
        /// Telemetry output directory (overrides [sampler] output_dir)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
        #[command(flatten)]
        limits: RunLimits,
    },
    /// Run the cooldown cycle against a running agent
    Cycle {
        #[command(flatten)]
        limits: RunLimits,
    },
    /// Agent, sampler and cooldown cycle in one process
    Run {
        /// Do not run the telemetry sampler
        #[arg(long, action = ArgAction::SetTrue)]
        no_sampler: bool,
        /// Telemetry output directory (overrides [sampler] output_dir)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
        #[command(flatten)]
        limits: RunLimits,
    },
    /// Send one protocol command to the agent
    Send {
        /// Opcode, e.g. set_switch_voltage
        opcode: String,
        /// Device name, e.g. CTC100A
        device: String,
        /// Channel name, e.g. 4swheat
        channel: String,
        /// Numeric or on/off argument; omitted for turn_off_* commands
        #[arg(allow_hyphen_values = true)]
        value: Option<String>,
    },
    /// Print the agent's device and channel catalog
    Devices,
    /// Validate config and check both sides against the simulated rig
    SelfCheck,
}
