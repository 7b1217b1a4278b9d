//! Example: run side A of the cooldown once against the simulated rig.
//!
//! Dwell times pass on a virtual clock, so this finishes immediately and
//! prints what each controller was told to do.

use std::sync::Arc;

use cryo_core::config::{CycleSettings, SwitchPolicy};
use cryo_core::mocks::ManualClock;
use cryo_core::{CycleConfig, CycleRunner, HardwareAgent, Side};
use cryo_hardware::simulated_rig;

fn main() -> eyre::Result<()> {
    let mut rig = simulated_rig(None);
    let instruments = std::mem::take(&mut rig.instruments);
    let agent = Arc::new(HardwareAgent::new(instruments, SwitchPolicy::default()));

    let runner = CycleRunner::new(
        agent,
        CycleConfig::default(),
        Arc::new(ManualClock::auto_advance()),
        CycleSettings::default(),
    );
    runner.preflight()?;
    runner.run_side(&runner.side_config(Side::A))?;

    for (device, handle) in &rig.handles {
        let journal = handle.journal();
        if journal.is_empty() {
            continue;
        }
        println!("{device}");
        for line in journal {
            println!("  {line}");
        }
    }
    println!("{}", serde_json::to_string_pretty(&runner.last_known().snapshot())?);
    Ok(())
}
