use std::sync::Arc;
use std::time::Duration;

use cryo_core::agent::Reading;
use cryo_core::config::CycleSettings;
use cryo_core::mocks::{ManualClock, ScriptedCommands};
use cryo_core::server::handle_request;
use cryo_core::sink::MemorySink;
use cryo_core::telemetry::TelemetryCollector;
use cryo_core::{ChannelCommand, CycleConfig, CycleRunner, Opcode, SideConfig};
use proptest::prelude::*;

const SIDE_SEQUENCE: [Opcode; 8] = [
    Opcode::TurnOffSwitch,
    Opcode::TurnOffSwitch,
    Opcode::SetHeaterTemperature,
    Opcode::SetHeaterTemperature,
    Opcode::TurnOffHeater,
    Opcode::SetSwitchVoltage,
    Opcode::TurnOffHeater,
    Opcode::SetSwitchVoltage,
];

prop_compose! {
    fn side_strategy()(
        off in 0u64..4000,
        heat in 0u64..4000,
        on in 0u64..4000,
        k4 in 1.0f64..80.0,
        k3 in 1.0f64..80.0,
        v4 in -10.0f64..=10.0,
        v3 in -10.0f64..=10.0,
    ) -> SideConfig {
        let mut c = SideConfig::for_device("CTC100B");
        c.t_switches_off = Duration::from_secs(off);
        c.t_heaters_on = Duration::from_secs(heat);
        c.t_switch_on = Duration::from_secs(on);
        c.he4_pump_setpoint_k = k4;
        c.he3_pump_setpoint_k = k3;
        c.he4_switch_volts = v4;
        c.he3_switch_volts = v3;
        c
    }
}

fn command_strategy() -> impl Strategy<Value = ChannelCommand> {
    let name = "[A-Za-z0-9_]{1,12}";
    (0usize..7, name, name, -1.0e6f64..1.0e6, any::<bool>()).prop_map(|(op, d, c, v, on)| {
        match op {
            0 => ChannelCommand::set_switch_voltage(&d, &c, v),
            1 => ChannelCommand::turn_off_switch(&d, &c),
            2 => ChannelCommand::set_heater_temperature(&d, &c, v),
            3 => ChannelCommand::turn_off_heater(&d, &c),
            4 => ChannelCommand::toggle_heater(&d, &c, on),
            5 => ChannelCommand::set_still_percentage(&d, &c, v),
            _ => ChannelCommand::turn_off_still(&d, &c),
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn phases_run_in_order_for_any_timing(side in side_strategy()) {
        let hw = Arc::new(ScriptedCommands::new());
        let runner = CycleRunner::new(
            hw.clone(),
            CycleConfig::default(),
            Arc::new(ManualClock::auto_advance()),
            CycleSettings::default(),
        );
        runner.run_side(&side).unwrap();
        let calls = hw.calls();
        let ops: Vec<_> = calls.iter().map(|c| c.opcode).collect();
        prop_assert_eq!(ops, SIDE_SEQUENCE.to_vec());
        prop_assert!(calls.iter().all(|c| c.device == "CTC100B"));
        prop_assert_eq!(calls[2].value, Some(side.he4_pump_setpoint_k));
        prop_assert_eq!(calls[7].value, Some(side.he3_switch_volts));
    }

    #[test]
    fn handler_answers_every_line(line in "\\PC{0,200}") {
        let hw = ScriptedCommands::new();
        let reply = handle_request(&line, &hw);
        prop_assert!(reply == "0" || reply == "1" || reply.starts_with('{'), "{}", reply);
    }

    #[test]
    fn encoded_commands_parse_back(cmd in command_strategy()) {
        let parsed = ChannelCommand::parse(&cmd.to_line()).unwrap();
        prop_assert_eq!(parsed, cmd);
    }

    #[test]
    fn buffers_stay_within_chunk(
        chunk in 1usize..16,
        ticks in prop::collection::vec(prop::collection::vec(prop::option::of(-1.0e3f64..1.0e3), 0..4), 1..80),
    ) {
        let mut sink = MemorySink::new();
        let mut col = TelemetryCollector::new(chunk);
        for (i, values) in ticks.iter().enumerate() {
            let readings: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(ch, v)| Reading { device: "dev".into(), channel: ch.to_string(), value: *v })
                .collect();
            col.record_tick(i as f64, &readings, &mut sink);
            prop_assert!(col.max_pending() <= chunk);
        }
        col.flush_all(&mut sink);
        prop_assert_eq!(col.max_pending(), 0);
        prop_assert_eq!(sink.times().len(), ticks.len());
    }
}
