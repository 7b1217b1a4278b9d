//! The two-side cooldown cycle.
//!
//! Per side: switches off and dwell, pump heaters on and dwell, first pump
//! heater off and first switch on and dwell, second pump heater off and
//! second switch on. Then a dwell between sides, then the other side, until
//! stopped. Every dwell is interruptible; every command goes through a
//! bounded retry and a failure that survives it stops the cycle.
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use cryo_traits::{ChannelKind, Clock};

use crate::cancel::{CancelToken, Wait, sleep_interruptible};
use crate::config::{CycleConfig, CycleSettings, Side, SideConfig};
use crate::error::{CommandError, CycleError};
use crate::protocol::{ChannelCommand, DeviceCatalog, HardwareCommands};
use crate::state::LastKnown;
use crate::status::{BETWEEN_SIDES, CycleStatus, STOPPED, StepState};

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

#[derive(Debug)]
struct Shared {
    running: bool,
    step: StepState,
    side: Option<String>,
    last_step: Option<String>,
    last_error: Option<String>,
    failure: Option<CycleError>,
}

/// Executes the cycle on the calling thread. Cheap to clone; clones share
/// status, configuration and the last-known map.
#[derive(Clone)]
pub struct CycleRunner {
    commands: Arc<dyn HardwareCommands>,
    config: Arc<RwLock<CycleConfig>>,
    last_known: Arc<LastKnown>,
    clock: SharedClock,
    settings: CycleSettings,
    shared: Arc<Mutex<Shared>>,
    cancel: CancelToken,
}

impl CycleRunner {
    pub fn new(
        commands: Arc<dyn HardwareCommands>,
        config: CycleConfig,
        clock: SharedClock,
        settings: CycleSettings,
    ) -> Self {
        Self {
            commands,
            config: Arc::new(RwLock::new(config)),
            last_known: Arc::new(LastKnown::new()),
            clock,
            settings,
            shared: Arc::new(Mutex::new(Shared {
                running: false,
                step: StepState::idle(),
                side: None,
                last_step: None,
                last_error: None,
                failure: None,
            })),
            cancel: CancelToken::new(),
        }
    }

    pub fn last_known(&self) -> Arc<LastKnown> {
        self.last_known.clone()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consistent copy of one side's constants.
    pub fn side_config(&self, side: Side) -> SideConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .side(side)
            .clone()
    }

    /// Replace one side's constants; a side already running keeps its copy.
    pub fn set_side_config(&self, side: Side, cfg: SideConfig) {
        *self
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .side_mut(side) = cfg;
    }

    pub fn status(&self) -> CycleStatus {
        let sh = self.shared();
        CycleStatus {
            running: sh.running && !self.cancel.is_cancelled(),
            state: sh.step.label.clone(),
            side: sh.side.clone(),
            elapsed: sh
                .step
                .started
                .map_or(0.0, |t| self.clock.secs_since(t)),
            total: sh.step.nominal.map_or(1.0, |d| d.as_secs_f64()),
            last_step: sh.last_step.clone(),
            last_error: sh.last_error.clone(),
        }
    }

    /// Why the last run ended, if it ended on its own.
    pub fn failure(&self) -> Option<CycleError> {
        self.shared().failure.clone()
    }

    fn enter_step(&self, label: String, nominal: Option<Duration>) {
        tracing::info!(step = %label, nominal = ?nominal, "cycle step");
        let now = self.clock.now();
        let mut sh = self.shared();
        sh.step = StepState {
            label: label.clone(),
            started: Some(now),
            nominal,
        };
        sh.last_step = Some(label);
    }

    fn dwell(&self, d: Duration) -> Result<(), CycleError> {
        match sleep_interruptible(self.clock.as_ref(), d, self.settings.poll, &self.cancel) {
            Wait::Completed => Ok(()),
            Wait::Interrupted => Err(CycleError::Cancelled),
        }
    }

    /// Deliver `cmd` with fixed-delay retry. Configuration errors are not
    /// retried. The last-known map changes only on success.
    fn deliver(&self, step: &str, cmd: &ChannelCommand) -> Result<(), CycleError> {
        let attempts = self.settings.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CycleError::Cancelled);
            }
            let tried = attempt;
            let failed = |source: CommandError| CycleError::CommandFailed {
                step: step.to_string(),
                device: cmd.device.clone(),
                channel: cmd.channel.clone(),
                attempts: tried,
                source,
            };
            match cmd.apply(self.commands.as_ref()) {
                Ok(_) => {
                    self.last_known.record(cmd);
                    return Ok(());
                }
                Err(e @ CommandError::Configuration(_)) => {
                    tracing::error!(command = %cmd, error = %e, "command rejected");
                    return Err(failed(e));
                }
                Err(e) if attempt >= attempts => {
                    tracing::error!(command = %cmd, attempts, error = %e, "command failed");
                    return Err(failed(e));
                }
                Err(e) => {
                    tracing::warn!(command = %cmd, attempt, attempts, error = %e, "command attempt failed");
                    self.dwell(self.settings.retry.delay)?;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the four phases of one side. Phases are strictly ordered: a
    /// phase's commands go out only after all earlier ones succeeded.
    pub fn run_side(&self, c: &SideConfig) -> Result<(), CycleError> {
        let dev = c.device.as_str();
        self.shared().side = Some(c.device.clone());

        let step = format!("{dev}: switches off");
        self.enter_step(step.clone(), Some(c.t_switches_off));
        self.deliver(&step, &ChannelCommand::turn_off_switch(dev, &c.he4_switch))?;
        self.deliver(&step, &ChannelCommand::turn_off_switch(dev, &c.he3_switch))?;
        self.dwell(c.t_switches_off)?;

        let step = format!("{dev}: heaters on");
        self.enter_step(step.clone(), Some(c.t_heaters_on));
        self.deliver(
            &step,
            &ChannelCommand::set_heater_temperature(dev, &c.he4_pump_heater, c.he4_pump_setpoint_k),
        )?;
        self.deliver(
            &step,
            &ChannelCommand::set_heater_temperature(dev, &c.he3_pump_heater, c.he3_pump_setpoint_k),
        )?;
        self.dwell(c.t_heaters_on)?;

        let step = format!("{dev}: {} off, {} on", c.he4_pump_heater, c.he4_switch);
        self.enter_step(step.clone(), Some(c.t_switch_on));
        self.deliver(&step, &ChannelCommand::turn_off_heater(dev, &c.he4_pump_heater))?;
        self.deliver(
            &step,
            &ChannelCommand::set_switch_voltage(dev, &c.he4_switch, c.he4_switch_volts),
        )?;
        self.dwell(c.t_switch_on)?;

        let step = format!("{dev}: {} off, {} on", c.he3_pump_heater, c.he3_switch);
        self.enter_step(step.clone(), None);
        self.deliver(&step, &ChannelCommand::turn_off_heater(dev, &c.he3_pump_heater))?;
        self.deliver(
            &step,
            &ChannelCommand::set_switch_voltage(dev, &c.he3_switch, c.he3_switch_volts),
        )?;
        Ok(())
    }

    /// Alternate sides until cancelled or a command fails for good. Each
    /// side reads its constants once, when it starts.
    pub fn run(&self) -> Result<(), CycleError> {
        let mut side = Side::A;
        loop {
            let c = self.side_config(side);
            self.run_side(&c)?;
            self.enter_step(BETWEEN_SIDES.to_string(), Some(c.t_between_sides));
            self.dwell(c.t_between_sides)?;
            side = side.other();
        }
    }

    /// Check both sides' devices and channels against the agent's catalog.
    pub fn preflight(&self) -> Result<(), CycleError> {
        let catalog = self
            .commands
            .get_devices()
            .map_err(|e| CycleError::Preflight(format!("device catalog unavailable: {e}")))?;
        for side in [Side::A, Side::B] {
            check_side(&catalog, &self.side_config(side))?;
        }
        Ok(())
    }

    fn mark_started(&self) {
        let mut sh = self.shared();
        sh.running = true;
        sh.last_error = None;
        sh.failure = None;
    }

    fn mark_stopped(&self, result: &Result<(), CycleError>) {
        let now = self.clock.now();
        let mut sh = self.shared();
        sh.running = false;
        sh.side = None;
        sh.step = StepState {
            label: STOPPED.to_string(),
            started: Some(now),
            nominal: None,
        };
        match result {
            Err(CycleError::Cancelled) | Ok(()) => {
                tracing::info!(last_step = ?sh.last_step, "cycle stopped");
            }
            Err(e) => {
                tracing::error!(error = %e, last_step = ?sh.last_step, "cycle aborted");
                sh.last_error = Some(e.to_string());
                sh.failure = Some(e.clone());
            }
        }
    }
}

fn check_side(catalog: &DeviceCatalog, c: &SideConfig) -> Result<(), CycleError> {
    let chans = catalog
        .get(&c.device)
        .ok_or_else(|| CycleError::Preflight(format!("unknown device '{}'", c.device)))?;
    for (name, kind) in [
        (&c.he4_pump_heater, ChannelKind::Heater),
        (&c.he3_pump_heater, ChannelKind::Heater),
        (&c.he4_switch, ChannelKind::Switch),
        (&c.he3_switch, ChannelKind::Switch),
    ] {
        match chans.get(name) {
            Some(k) if *k == kind => {}
            Some(k) => {
                return Err(CycleError::Preflight(format!(
                    "{}::{name} is a {k}, expected a {kind}",
                    c.device
                )));
            }
            None => {
                return Err(CycleError::Preflight(format!(
                    "{}: unknown channel '{name}'",
                    c.device
                )));
            }
        }
    }
    Ok(())
}

/// Owns the cycle thread. Dropping it stops and joins the cycle.
pub struct Orchestrator {
    runner: CycleRunner,
    worker: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        commands: Arc<dyn HardwareCommands>,
        config: CycleConfig,
        clock: SharedClock,
        settings: CycleSettings,
    ) -> Self {
        Self {
            runner: CycleRunner::new(commands, config, clock, settings),
            worker: None,
        }
    }

    pub fn last_known(&self) -> Arc<LastKnown> {
        self.runner.last_known()
    }

    pub fn side_config(&self, side: Side) -> SideConfig {
        self.runner.side_config(side)
    }

    pub fn set_side_config(&self, side: Side, cfg: SideConfig) {
        self.runner.set_side_config(side, cfg);
    }

    pub fn status(&self) -> CycleStatus {
        self.runner.status()
    }

    pub fn failure(&self) -> Option<CycleError> {
        self.runner.failure()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Begin the cycle at side A on a new thread.
    pub fn start(&mut self) -> Result<(), CycleError> {
        if self.is_running() {
            return Err(CycleError::AlreadyRunning);
        }
        self.join_worker();
        self.runner.preflight()?;

        self.runner.cancel = CancelToken::new();
        self.runner.mark_started();
        let runner = self.runner.clone();
        let worker = std::thread::Builder::new()
            .name("cryo-cycle".into())
            .spawn(move || {
                let result = runner.run();
                runner.mark_stopped(&result);
            })
            .map_err(|e| CycleError::Preflight(format!("spawn cycle thread: {e}")))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Cancel the cycle and wait for it to reach `Stopped`.
    pub fn stop(&mut self) {
        self.runner.cancel.cancel();
        self.join_worker();
    }

    /// Block until the cycle ends on its own (failure) or is stopped through
    /// the stop token.
    pub fn wait(&mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("cycle thread joined"),
                Err(e) => tracing::warn!(?e, "cycle thread panicked"),
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
