//! Subcommand logic: config mapping, component assembly, and the run loops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cryo_config::Config;
use cryo_core::config::{CycleSettings, SwitchPolicy};
use cryo_core::protocol::catalog_to_json;
use cryo_core::sink::CsvSink;
use cryo_core::telemetry::TickSnapshot;
use cryo_core::{
    AgentClient, AgentServer, AgentSettings, CancelToken, ChannelCommand, CycleConfig, CycleRunner,
    HardwareAgent, HardwareCommands, Orchestrator, Sampler, SamplerSettings,
};
use cryo_hardware::simulated_rig;
use cryo_traits::MonotonicClock;
use eyre::{Result, WrapErr};

use crate::cli::RunLimits;

/// Agent address after CLI overrides.
pub fn agent_settings(cfg: &Config, host: Option<&str>, port: Option<u16>) -> AgentSettings {
    let mut s: AgentSettings = (&cfg.agent).into();
    if let Some(h) = host {
        s.host = h.to_string();
    }
    if let Some(p) = port {
        s.port = p;
    }
    s
}

fn simulated_agent(cfg: &Config) -> Arc<HardwareAgent> {
    let rig = simulated_rig(None);
    let switch: SwitchPolicy = (&cfg.switch).into();
    Arc::new(HardwareAgent::new(rig.instruments, switch))
}

fn start_sampler(cfg: &Config, agent: Arc<HardwareAgent>, data_dir: Option<PathBuf>) -> Sampler {
    let mut settings: SamplerSettings = (&cfg.sampler).into();
    if let Some(dir) = data_dir {
        settings.output_dir = dir;
    }
    tracing::info!(
        dir = %settings.output_dir.display(),
        interval_ms = settings.interval.as_millis() as u64,
        chunk = settings.chunk,
        "sampler start"
    );
    let sink = CsvSink::new(settings.output_dir.clone());
    Sampler::spawn(agent, Box::new(sink), &settings, MonotonicClock::new())
}

/// Cancel `stop` once `limit` has passed.
fn arm_deadline(stop: &CancelToken, limit: Option<u64>) {
    let Some(secs) = limit else {
        return;
    };
    let stop = stop.clone();
    let spawned = std::thread::Builder::new()
        .name("cryo-deadline".into())
        .spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(secs);
            while !stop.is_cancelled() {
                if Instant::now() >= deadline {
                    tracing::info!(secs, "max runtime reached");
                    stop.cancel();
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not arm runtime limit");
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{value}");
}

/// Serve the agent on the calling thread until `stop`.
pub fn run_agent(
    cfg: &Config,
    settings: &AgentSettings,
    no_sampler: bool,
    data_dir: Option<PathBuf>,
    limits: RunLimits,
    stop: &CancelToken,
    json: bool,
) -> Result<()> {
    let agent = simulated_agent(cfg);
    let mut server = AgentServer::bind(settings.addr(), agent.clone(), settings.accept_poll)?;
    let addr = server.local_addr().wrap_err("agent local address")?;
    let sampler = (!no_sampler).then(|| start_sampler(cfg, agent, data_dir));
    if json {
        print_json(&serde_json::json!({ "listening": addr.to_string() }));
    } else {
        println!("Agent listening on {addr}");
    }
    arm_deadline(stop, limits.max_runtime_s);
    server.serve(stop);
    if let Some(s) = sampler {
        s.stop();
    }
    Ok(())
}

/// Watch a started cycle until it ends or `stop` fires, reporting status.
fn supervise(
    orch: &mut Orchestrator,
    sampler: Option<&Sampler>,
    limits: RunLimits,
    stop: &CancelToken,
    json: bool,
) -> Result<()> {
    let report_every = Duration::from_millis(limits.status_interval_ms.max(1));
    let mut last_report: Option<Instant> = None;
    let mut tick: Option<TickSnapshot> = None;
    while orch.is_running() && !stop.is_cancelled() {
        if last_report.is_none_or(|t| t.elapsed() >= report_every) {
            refresh_tick(&mut tick, sampler);
            report_status(orch, tick.as_ref(), json);
            last_report = Some(Instant::now());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if stop.is_cancelled() {
        orch.stop();
    } else {
        orch.wait();
    }
    refresh_tick(&mut tick, sampler);
    report_status(orch, tick.as_ref(), json);
    if let Some(e) = orch.failure() {
        return Err(e.into());
    }
    Ok(())
}

/// Keep the newest published tick; the sampler only hands out unread ones.
fn refresh_tick(tick: &mut Option<TickSnapshot>, sampler: Option<&Sampler>) {
    if let Some(latest) = sampler.and_then(Sampler::latest) {
        *tick = Some(latest);
    }
}

fn report_status(orch: &Orchestrator, tick: Option<&TickSnapshot>, json: bool) {
    let st = orch.status();
    let controller = orch.last_known().snapshot();
    if json {
        let report = serde_json::to_value(&st).and_then(|status| {
            Ok(serde_json::json!({
                "status": status,
                "controller": serde_json::to_value(&controller)?,
                "telemetry": serde_json::to_value(tick)?,
            }))
        });
        match report {
            Ok(v) => print_json(&v),
            Err(e) => tracing::warn!(error = %e, "status not serializable"),
        }
        return;
    }
    println!(
        "[{}] {} ({:.0}/{:.0} s)",
        if st.running { "running" } else { "stopped" },
        st.state,
        st.elapsed,
        st.total
    );
    if !controller.states.is_empty() {
        let commanded: Vec<String> = controller
            .states
            .iter()
            .map(|(key, state)| match controller.values.get(key).copied().flatten() {
                Some(v) => format!("{key}={state}@{v}"),
                None => format!("{key}={state}"),
            })
            .collect();
        println!("  commanded: {}", commanded.join(", "));
    }
    if let Some(t) = tick {
        let unavailable = t.values.values().filter(|v| v.is_none()).count();
        println!(
            "  telemetry: tick {} at {:.1} s, {} channels ({} unavailable)",
            t.tick,
            t.timestamp,
            t.values.len(),
            unavailable
        );
    }
}

fn orchestrator(cfg: &Config, commands: Arc<dyn HardwareCommands>) -> Orchestrator {
    let cycle: CycleConfig = (&cfg.cycle).into();
    let settings: CycleSettings = (&cfg.cycle).into();
    Orchestrator::new(commands, cycle, Arc::new(MonotonicClock::new()), settings)
}

/// Drive the cycle against a remote agent.
pub fn run_cycle(
    cfg: &Config,
    settings: &AgentSettings,
    limits: RunLimits,
    stop: &CancelToken,
    json: bool,
) -> Result<()> {
    let client = Arc::new(AgentClient::from_settings(settings));
    let mut orch = orchestrator(cfg, client);
    orch.start()?;
    tracing::info!(agent = %settings.addr(), "cycle started");
    arm_deadline(stop, limits.max_runtime_s);
    supervise(&mut orch, None, limits, stop, json)
}

/// Agent, sampler and cycle in one process. The cycle calls the agent
/// directly; the server stays up for operator commands.
pub fn run_colocated(
    cfg: &Config,
    settings: &AgentSettings,
    no_sampler: bool,
    data_dir: Option<PathBuf>,
    limits: RunLimits,
    stop: &CancelToken,
    json: bool,
) -> Result<()> {
    let agent = simulated_agent(cfg);
    let server = AgentServer::bind(settings.addr(), agent.clone(), settings.accept_poll)?
        .spawn()
        .wrap_err("spawn agent thread")?;
    tracing::info!(addr = %server.local_addr(), "agent listening");
    let sampler = (!no_sampler).then(|| start_sampler(cfg, agent.clone(), data_dir));

    let mut orch = orchestrator(cfg, agent);
    orch.start()?;
    arm_deadline(stop, limits.max_runtime_s);
    let result = supervise(&mut orch, sampler.as_ref(), limits, stop, json);

    if let Some(s) = sampler {
        s.stop();
    }
    server.shutdown();
    result
}

/// Send one command and print the reply.
pub fn send_one(settings: &AgentSettings, opcode: &str, device: &str, channel: &str, value: Option<&str>, json: bool) -> Result<()> {
    let line = format!("{opcode} {device} {channel} {}", value.unwrap_or(cryo_core::protocol::PLACEHOLDER));
    let cmd = ChannelCommand::parse(&line)?;
    let client = AgentClient::from_settings(settings);
    let reply = client.send(&cmd)?;
    if json {
        print_json(&serde_json::json!({ "request": cmd.to_line(), "reply": reply }));
    } else {
        println!("{reply}");
    }
    Ok(())
}

pub fn print_devices(settings: &AgentSettings, json: bool) -> Result<()> {
    let catalog = AgentClient::from_settings(settings).get_devices()?;
    if json {
        println!("{}", catalog_to_json(&catalog));
        return Ok(());
    }
    for (dev, chans) in &catalog {
        println!("{dev}");
        for (ch, kind) in chans {
            println!("  {ch:<10} {kind}");
        }
    }
    Ok(())
}

/// Config is valid and both sides resolve against the simulated rig.
pub fn self_check(cfg: &Config, json: bool) -> Result<()> {
    let agent = simulated_agent(cfg);
    let runner = CycleRunner::new(
        agent.clone(),
        (&cfg.cycle).into(),
        Arc::new(MonotonicClock::new()),
        (&cfg.cycle).into(),
    );
    runner.preflight()?;
    let devices = agent.device_names();
    if json {
        print_json(&serde_json::json!({ "ok": true, "devices": devices }));
    } else {
        println!("OK: {} devices, both sides resolve", devices.len());
    }
    Ok(())
}
