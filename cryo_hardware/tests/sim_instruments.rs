use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use cryo_hardware::error::HwError;
use cryo_hardware::{SimulatedInstrument, TransactionGauge, simulated_rig};
use cryo_traits::{ChannelKind, Instrument, IoType};
use rstest::rstest;

#[rstest]
#[case("CTC100A", 10)]
#[case("CTC100B", 10)]
#[case("Lakeshore224", 12)]
#[case("Lakeshore372", 18)]
fn rig_channel_counts(#[case] device: &str, #[case] expected: usize) {
    let rig = simulated_rig(None);
    let dev = rig
        .instruments
        .iter()
        .find(|d| d.name() == device)
        .expect("device present");
    assert_eq!(dev.channels().len(), expected);
}

#[test]
fn lakeshore372_still_output_range_is_enforced() {
    let mut dev = SimulatedInstrument::lakeshore372("LS372");
    assert_eq!(dev.channel("still").map(|c| c.kind), Some(ChannelKind::StillHeater));
    let still = dev.as_still_control().expect("still capable");
    still.set_still_output(35.0).unwrap();
    assert_eq!(still.get_still_output().unwrap(), 35.0);
    let err = still.set_still_output(120.0).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HwError>(),
        Some(HwError::PercentOutOfRange(_))
    ));
}

#[test]
fn unknown_channel_is_reported_with_device_name() {
    let mut dev = SimulatedInstrument::lakeshore224("LS224");
    let err = dev
        .as_thermometry()
        .unwrap()
        .get_temperature("Z9")
        .unwrap_err();
    let hw = err.downcast_ref::<HwError>().expect("HwError");
    assert!(!hw.is_transient());
    assert!(hw.to_string().contains("LS224"));
}

#[test]
fn journal_records_writes_in_order() {
    let mut dev = SimulatedInstrument::ctc100("CTC");
    let handle = dev.handle();
    let sw = dev.as_switch_control().unwrap();
    sw.set_aio_iotype("3swheat", IoType::SetOut).unwrap();
    sw.set_aio_voltage("3swheat", 4.5).unwrap();
    assert_eq!(
        handle.journal(),
        ["3swheat.IOType = Set out", "3swheat.Value = 4.5"]
    );
    handle.clear_journal();
    assert!(handle.journal().is_empty());
}

#[test]
fn unavailable_thermometer_times_out_until_cleared() {
    let mut dev = SimulatedInstrument::ctc100("CTC");
    let handle = dev.handle();
    handle.set_unavailable("3pump", true);
    assert!(dev.as_thermometry().unwrap().get_temperature("3pump").is_err());
    handle.set_unavailable("3pump", false);
    assert!(dev.as_thermometry().unwrap().get_temperature("3pump").is_ok());
}

#[test]
fn gauge_sees_overlap_without_a_shared_lock() {
    // Two instruments driven from two threads with no common lock do overlap;
    // this is the condition the hardware agent's mutex exists to prevent.
    let gauge = TransactionGauge::new();
    let a = SimulatedInstrument::ctc100("A")
        .with_latency(Duration::from_millis(20))
        .with_gauge(gauge.clone());
    let b = SimulatedInstrument::ctc100("B")
        .with_latency(Duration::from_millis(20))
        .with_gauge(gauge.clone());
    let start = Arc::new(Barrier::new(2));
    let workers: Vec<_> = [a, b]
        .into_iter()
        .map(|mut dev| {
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..3 {
                    dev.as_thermometry().unwrap().get_temperature("4pump").unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(gauge.total(), 6);
    assert_eq!(gauge.max_seen(), 2);
}

#[test]
fn gauge_stays_at_one_behind_a_mutex() {
    let gauge = TransactionGauge::new();
    let dev = SimulatedInstrument::ctc100("A")
        .with_latency(Duration::from_millis(2))
        .with_gauge(gauge.clone());
    let shared: Arc<Mutex<Box<dyn Instrument>>> = Arc::new(Mutex::new(Box::new(dev)));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let mut guard = shared.lock().unwrap();
                    guard.as_thermometry().unwrap().get_temperature("4switch").unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(gauge.total(), 20);
    assert_eq!(gauge.max_seen(), 1);
}
