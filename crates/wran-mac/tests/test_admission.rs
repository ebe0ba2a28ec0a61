mod common;

use common::{admit_flow, build_bs, register_station, test_config};
use wran_core::{Direction, ModulationType, debug};
use wran_mac::{AdmissionError, DsaState, SchedulingType, ServiceFlow};

/// A UGS flow whose fixed grant cannot fit the uplink subframe is rejected
/// at admission time and never reaches the scheduler.
#[test]
fn test_ugs_oversubscription_rejected() {
    debug::setup_logging_verbose();

    let cfg = test_config(720); // 360 uplink symbols
    let mut bs = build_bs(&cfg);
    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);

    // 1 MB/s at BPSK 1/2 needs 834 symbols per frame, far over 360
    let mut flow = ServiceFlow::new(Direction::Ul, SchedulingType::Ugs);
    flow.min_reserved_traffic_rate = 1_000_000;

    let result = bs.add_service_flow(ss, flow);
    assert!(matches!(
        result,
        Err(AdmissionError::GrantExceedsFrameBudget { needed: 834, budget: 360 })
    ));
    assert!(bs.flows.is_empty(), "rejected flow must not be registered");
}

/// Admission fixes the polling cadence per class: 20 ms for rtPS, 1 s for
/// nrtPS, nothing for BE.
#[test]
fn test_setup_fixes_polling_cadence() {
    debug::setup_logging_verbose();

    let cfg = test_config(720);
    let mut bs = build_bs(&cfg);
    let ss = register_station(&mut bs, 1, ModulationType::Qpsk12);

    let rtps = admit_flow(&mut bs, ss, SchedulingType::Rtps, |_| {});
    let nrtps = admit_flow(&mut bs, ss, SchedulingType::Nrtps, |_| {});
    let be = admit_flow(&mut bs, ss, SchedulingType::Be, |_| {});

    assert_eq!(bs.flows.get(rtps).expect("flow").unsolicited_polling_interval_ms, 20);
    assert_eq!(bs.flows.get(nrtps).expect("flow").unsolicited_polling_interval_ms, 1000);
    assert_eq!(bs.flows.get(be).expect("flow").unsolicited_polling_interval_ms, 0);
}

/// The UGS grant is sized from the reserved rate at the station's
/// negotiated modulation.
#[test]
fn test_ugs_grant_sizing_follows_modulation() {
    debug::setup_logging_verbose();

    let cfg = test_config(720);
    let mut bs = build_bs(&cfg);

    // 24000 bytes/s = 240 bytes/frame: 20 symbols at BPSK 1/2, 5 at 16QAM 1/2
    let ss_slow = register_station(&mut bs, 1, ModulationType::Bpsk12);
    let slow = admit_flow(&mut bs, ss_slow, SchedulingType::Ugs, |f| {
        f.min_reserved_traffic_rate = 24_000;
    });
    let ss_fast = register_station(&mut bs, 2, ModulationType::Qam16_12);
    let fast = admit_flow(&mut bs, ss_fast, SchedulingType::Ugs, |f| {
        f.min_reserved_traffic_rate = 24_000;
    });

    assert_eq!(bs.flows.get(slow).expect("flow").record.grant_size, 20);
    assert_eq!(bs.flows.get(fast).expect("flow").record.grant_size, 5);
}

/// The DSA handshake retries on timer expiry a bounded number of times,
/// then gives up for good; the flow never becomes schedulable.
#[test]
fn test_dsa_retries_exhaust_to_abandoned() {
    debug::setup_logging_verbose();

    let cfg = test_config(720); // max_dsa_retries = 3
    let mut bs = build_bs(&cfg);
    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);

    let mut flow = ServiceFlow::new(Direction::Ul, SchedulingType::Be);
    flow.max_latency_ms = 1000;
    let sfid = bs.add_service_flow(ss, flow).expect("registration");
    assert_eq!(bs.flows.get(sfid).expect("flow").dsa_state, DsaState::Requested);

    for _ in 0..3 {
        assert_eq!(bs.dsa_timer_expired(sfid), DsaState::Requested);
    }
    assert_eq!(bs.dsa_timer_expired(sfid), DsaState::Abandoned);

    let flow = bs.flows.get(sfid).expect("flow");
    assert!(!flow.is_enabled, "abandoned setup leaves the flow disabled");

    // no automatic re-attempt: admitting an abandoned flow is the caller's
    // explicit decision, the timer alone never resurrects it
    assert_eq!(bs.dsa_timer_expired(sfid), DsaState::Abandoned);
}

/// The staged admission path: request, ack, admit, and only then is the
/// flow enabled and visible on the station record.
#[test]
fn test_staged_dsa_admission() {
    debug::setup_logging_verbose();

    let cfg = test_config(720);
    let mut bs = build_bs(&cfg);
    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);

    let mut flow = ServiceFlow::new(Direction::Ul, SchedulingType::Rtps);
    flow.max_latency_ms = 50;
    let sfid = bs.add_service_flow(ss, flow).expect("registration");
    assert!(!bs.flows.get(sfid).expect("flow").is_enabled);
    assert!(!bs.ss_manager.get(ss).expect("ss").has_rtps);

    bs.dsa_acked(sfid);
    assert_eq!(bs.flows.get(sfid).expect("flow").dsa_state, DsaState::Acked);

    bs.admit_service_flow(ss, sfid).expect("admission");
    bs.mark_service_flows_allocated(ss);

    let flow = bs.flows.get(sfid).expect("flow");
    assert!(flow.is_enabled);
    assert_eq!(flow.dsa_state, DsaState::Admitted);
    assert!(bs.ss_manager.get(ss).expect("ss").has_rtps);
    assert!(bs.ss_manager.get(ss).expect("ss").are_service_flows_allocated);
}
