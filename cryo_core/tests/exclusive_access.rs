//! At most one hardware transaction in flight while the cycle, the sampler
//! and network clients all share the agent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cryo_core::config::{CycleSettings, SamplerSettings, SwitchPolicy};
use cryo_core::mocks::ManualClock;
use cryo_core::sink::MemorySink;
use cryo_core::{
    AgentClient, AgentServer, CycleConfig, HardwareAgent, HardwareCommands, Orchestrator,
    RetryPolicy, Sampler,
};
use cryo_hardware::{SimulatedInstrument, TransactionGauge};
use cryo_traits::{Instrument, MonotonicClock};

fn slow_rig(gauge: &TransactionGauge) -> Vec<Box<dyn Instrument>> {
    let latency = Duration::from_micros(300);
    vec![
        Box::new(SimulatedInstrument::ctc100("CTC100A").with_latency(latency).with_gauge(gauge.clone())),
        Box::new(SimulatedInstrument::ctc100("CTC100B").with_latency(latency).with_gauge(gauge.clone())),
        Box::new(
            SimulatedInstrument::lakeshore372("Lakeshore372")
                .with_latency(latency)
                .with_gauge(gauge.clone()),
        ),
    ]
}

#[test]
fn cycle_sampler_and_clients_never_overlap_on_hardware() {
    let gauge = TransactionGauge::new();
    let agent = Arc::new(HardwareAgent::new(slow_rig(&gauge), SwitchPolicy::default()));

    let sampler = Sampler::spawn(
        agent.clone(),
        Box::new(MemorySink::new()),
        &SamplerSettings {
            interval: Duration::from_millis(1),
            chunk: 8,
            output_dir: "unused".into(),
        },
        MonotonicClock::new(),
    );

    let server = AgentServer::bind("127.0.0.1:0", agent.clone(), Duration::from_millis(2))
        .unwrap()
        .spawn()
        .unwrap();
    let addr = server.local_addr().to_string();

    let mut orch = Orchestrator::new(
        agent.clone(),
        CycleConfig::default(),
        Arc::new(ManualClock::auto_advance()),
        CycleSettings::default(),
    );
    orch.start().unwrap();

    let clients: Vec<_> = (0..3)
        .map(|i| {
            let addr = addr.clone();
            std::thread::spawn(move || {
                let c = AgentClient::new(addr, Duration::from_secs(2), RetryPolicy::PROTOCOL);
                for n in 0..15 {
                    let pct = f64::from((i * 15 + n) % 100);
                    c.set_still_percentage("Lakeshore372", "still", pct).unwrap();
                }
            })
        })
        .collect();
    for c in clients {
        c.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while sampler.ticks() < 10 {
        assert!(Instant::now() < deadline, "sampler made no progress");
        std::thread::sleep(Duration::from_millis(2));
    }

    orch.stop();
    sampler.stop();
    server.shutdown();

    assert!(gauge.total() > 50, "only {} transactions", gauge.total());
    assert_eq!(gauge.max_seen(), 1);
    assert!(orch.status().last_error.is_none());
}
