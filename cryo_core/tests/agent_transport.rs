//! Agent server and client over a real loopback socket.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cryo_core::config::SwitchPolicy;
use cryo_core::{
    AgentClient, AgentServer, ChannelCommand, DeliveryError, HardwareAgent, HardwareCommands,
    RetryPolicy, ServerHandle,
};
use cryo_hardware::{SimHandle, simulated_rig};
use cryo_traits::{ChannelKind, IoType};

fn serve_rig() -> (ServerHandle, SimHandle) {
    let rig = simulated_rig(None);
    let ctc = rig.handle("CTC100A").cloned().unwrap();
    let agent = HardwareAgent::new(rig.instruments, SwitchPolicy::default());
    let server = AgentServer::bind("127.0.0.1:0", Arc::new(agent), Duration::from_millis(5)).unwrap();
    (server.spawn().unwrap(), ctc)
}

fn client(server: &ServerHandle) -> AgentClient {
    AgentClient::new(
        server.local_addr().to_string(),
        Duration::from_secs(2),
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(10),
        },
    )
}

fn raw_request(server: &ServerHandle, line: &[u8]) -> String {
    let mut s = TcpStream::connect(server.local_addr()).unwrap();
    s.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    s.write_all(line).unwrap();
    s.shutdown(std::net::Shutdown::Write).unwrap();
    let mut out = String::new();
    s.read_to_string(&mut out).unwrap();
    out
}

#[test]
fn switch_voltage_round_trips_to_hardware() {
    let (server, ctc) = serve_rig();
    let c = client(&server);
    c.set_switch_voltage("CTC100A", "4swheat", 7.0).unwrap();
    let aio = ctc.aio("4swheat");
    assert_eq!(aio.iotype, IoType::SetOut);
    assert_eq!(aio.volts, 7.0);
    server.shutdown();
}

#[test]
fn heater_setpoint_then_off() {
    let (server, ctc) = serve_rig();
    let c = client(&server);
    c.set_heater_temperature("CTC100A", "4puheat", 50.0).unwrap();
    let h = ctc.heater("4puheat");
    assert_eq!(h.setpoint, Some(50.0));
    assert!(h.control_enabled);

    c.turn_off_heater("CTC100A", "4puheat").unwrap();
    let h = ctc.heater("4puheat");
    assert!(!h.control_enabled);
    assert_eq!(h.output, 0.0);
}

#[test]
fn unknown_opcode_gets_failure_token() {
    let (server, _) = serve_rig();
    assert_eq!(raw_request(&server, b"reboot_controller CTC100A _ _\n"), "1\n");
}

#[test]
fn unknown_channel_gets_failure_token() {
    let (server, _) = serve_rig();
    assert_eq!(raw_request(&server, b"turn_off_switch CTC100A nope _\n"), "1\n");
}

#[test]
fn oversized_request_is_rejected() {
    let (server, _) = serve_rig();
    let mut line = vec![b'x'; 4096];
    line.push(b'\n');
    assert_eq!(raw_request(&server, &line), "1\n");
}

#[test]
fn get_devices_returns_catalog_keyed_by_device() {
    let (server, _) = serve_rig();
    let body = raw_request(&server, b"get_devices _ _ _\n");
    let json: serde_json::Value = serde_json::from_str(body.trim()).unwrap();
    let obj = json.as_object().unwrap();
    for dev in ["CTC100A", "CTC100B", "Lakeshore224", "Lakeshore372"] {
        assert!(obj.contains_key(dev), "missing {dev} in {body}");
    }
    assert_eq!(json["CTC100A"]["4swheat"], "switch");
    assert_eq!(json["Lakeshore372"]["still"], "still_heater");

    let catalog = client(&server).get_devices().unwrap();
    assert_eq!(catalog["CTC100B"]["3puheat"], ChannelKind::Heater);
}

#[test]
fn rejected_command_is_retried_then_reported() {
    let (server, _) = serve_rig();
    let err = client(&server)
        .send(&ChannelCommand::turn_off_switch("CTC100A", "nope"))
        .unwrap_err();
    match err {
        DeliveryError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, DeliveryError::Rejected { .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[test]
fn closed_port_exhausts_retries() {
    let (server, _) = serve_rig();
    let addr = server.local_addr();
    server.shutdown();

    let c = AgentClient::new(
        addr.to_string(),
        Duration::from_millis(200),
        RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
        },
    );
    let err = c.turn_off_switch("CTC100A", "4swheat").unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("2 attempts"), "{err}");
}

#[test]
fn shutdown_returns_promptly() {
    let (server, _) = serve_rig();
    let t0 = Instant::now();
    server.shutdown();
    assert!(t0.elapsed() < Duration::from_secs(1));
}

#[test]
fn requests_are_not_delayed_by_accept_timeout() {
    let rig = simulated_rig(None);
    let agent = HardwareAgent::new(rig.instruments, SwitchPolicy::default());
    let server = AgentServer::bind("127.0.0.1:0", Arc::new(agent), Duration::from_secs(1))
        .unwrap()
        .spawn()
        .unwrap();
    // Let the loop settle into a long wait before the first connection.
    std::thread::sleep(Duration::from_millis(50));

    let t0 = Instant::now();
    for _ in 0..5 {
        assert_eq!(raw_request(&server, b"turn_off_heater CTC100A 4puheat _\n"), "0\n");
    }
    assert!(
        t0.elapsed() < Duration::from_millis(800),
        "5 requests took {:?}",
        t0.elapsed()
    );
    server.shutdown();
}
