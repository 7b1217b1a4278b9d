mod cli;
mod cooldown;
mod error_fmt;

use std::path::Path;

use clap::Parser;
use cryo_config::Config;
use cryo_core::CancelToken;
use eyre::{Result, WrapErr};

use crate::cli::{Cli, Commands, DEFAULT_CONFIG, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{CONFIG_CONTEXT, exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("Warning: color-eyre not installed: {e}");
    }

    let code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", format_error_json(&err));
            } else {
                eprintln!("{}", humanize(&err));
            }
            tracing::error!(error = %err, "exiting with error");
            exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

/// Load the config; a missing default path falls back to built-in defaults.
fn load_config(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        return Ok(Config::default());
    }
    cryo_config::load_file(path).wrap_err(CONFIG_CONTEXT)
}

fn init_tracing(json: bool, level: Option<&str>, logging: &cryo_config::Logging) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let level = level.or(logging.level.as_deref()).unwrap_or("info");
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("invalid log level '{level}'"))?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true)
                .boxed(),
        );
    }

    if let Some(file) = &logging.file {
        use tracing_appender::rolling;
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match logging.rotation.as_deref() {
            Some("daily") => rolling::daily(dir, name),
            Some("hourly") => rolling::hourly(dir, name),
            _ => rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    let settings = cooldown::agent_settings(&cfg, cli.host.as_deref(), cli.port);

    // Ctrl-C cancels whatever long-running loop is active.
    let stop = CancelToken::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupt received; stopping");
            stop.cancel();
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    match cli.cmd {
        Commands::Agent {
            no_sampler,
            data_dir,
            limits,
        } => cooldown::run_agent(&cfg, &settings, no_sampler, data_dir, limits, &stop, cli.json),
        Commands::Cycle { limits } => cooldown::run_cycle(&cfg, &settings, limits, &stop, cli.json),
        Commands::Run {
            no_sampler,
            data_dir,
            limits,
        } => cooldown::run_colocated(&cfg, &settings, no_sampler, data_dir, limits, &stop, cli.json),
        Commands::Send {
            opcode,
            device,
            channel,
            value,
        } => cooldown::send_one(&settings, &opcode, &device, &channel, value.as_deref(), cli.json),
        Commands::Devices => cooldown::print_devices(&settings, cli.json),
        Commands::SelfCheck => cooldown::self_check(&cfg, cli.json),
    }
}
