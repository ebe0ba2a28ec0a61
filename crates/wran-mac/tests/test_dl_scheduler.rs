mod common;

use common::{
    admit_flow, build_bs, enqueue_data, register_station, start_frame, suppress_polling,
    test_config, test_config_with,
};
use wran_config::DlSchedulerKind;
use wran_core::{Cid, ModulationType, debug};
use wran_mac::{MacPacket, SchedulingType};

/// With simultaneous demand in Broadcast, Basic and UGS and a budget large
/// enough for only those three, rtPS and BE receive nothing this frame.
#[test]
fn test_class_precedence_under_tight_budget() {
    debug::setup_logging_verbose();

    // 60 symbols per frame -> 30 downlink symbols, all stations at BPSK 1/2
    let cfg = test_config(60);
    let mut bs = build_bs(&cfg);

    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);
    let basic_cid = bs.ss_manager.get(ss).expect("ss").basic_cid;

    // UGS: 10800 bytes/s -> 108 bytes/frame -> 9 symbols at BPSK 1/2
    let ugs = admit_flow(&mut bs, ss, SchedulingType::Ugs, |f| {
        f.min_reserved_traffic_rate = 10_800;
        f.max_latency_ms = 5;
    });
    let ugs_cid = bs.flows.get(ugs).and_then(|f| f.connection).expect("cid");

    let ss2 = register_station(&mut bs, 2, ModulationType::Bpsk12);
    let rtps_a = admit_flow(&mut bs, ss2, SchedulingType::Rtps, |_| {});
    let ss3 = register_station(&mut bs, 3, ModulationType::Bpsk12);
    let rtps_b = admit_flow(&mut bs, ss3, SchedulingType::Rtps, |_| {});
    let be = admit_flow(&mut bs, ss3, SchedulingType::Be, |_| {});
    for sfid in [ugs, rtps_a, rtps_b, be] {
        suppress_polling(&mut bs, sfid);
    }

    // Broadcast and basic demand: 114 + 6 header = 120 bytes = 10 symbols each
    bs.connections.broadcast_mut().enqueue(MacPacket::management(114));
    bs.connections
        .get_connection_mut(basic_cid)
        .expect("basic connection")
        .enqueue(MacPacket::management(114));

    enqueue_data(&mut bs, ugs, 102, 1); // 108 bytes with header = the grant
    enqueue_data(&mut bs, rtps_a, 1000, 4);
    enqueue_data(&mut bs, rtps_b, 1000, 4);
    enqueue_data(&mut bs, be, 200, 4);

    let ctx = start_frame();
    let schedule = bs.on_frame(&ctx);

    let cids: Vec<Cid> = schedule.dl_bursts.iter().map(|b| b.cid).collect();
    assert_eq!(
        cids,
        vec![Cid::broadcast(), basic_cid, ugs_cid],
        "only broadcast, basic and UGS fit the budget"
    );
    assert!(schedule.dl_symbols_used <= 30, "budget invariant violated");
}

/// Three rtPS connections needing 100 symbols each against 150 available:
/// exact 1:1:1 proportional shares of 50 symbols each.
#[test]
fn test_rtps_proportional_scaling_even() {
    debug::setup_logging_verbose();

    // 300 symbols per frame -> 150 downlink
    let cfg = test_config(300);
    let mut bs = build_bs(&cfg);

    let mut sfids = Vec::new();
    for i in 0..3 {
        let ss = register_station(&mut bs, i, ModulationType::Bpsk12);
        let sfid = admit_flow(&mut bs, ss, SchedulingType::Rtps, |_| {});
        suppress_polling(&mut bs, sfid);
        // 1194 + 6 header = 1200 bytes = 100 symbols at BPSK 1/2
        enqueue_data(&mut bs, sfid, 1194, 1);
        sfids.push(sfid);
    }

    let ctx = start_frame();
    let schedule = bs.on_frame(&ctx);

    assert_eq!(schedule.dl_bursts.len(), 3);
    for burst in &schedule.dl_bursts {
        // 50 symbols = 600 bytes of air, minus header and fragmentation
        // subheader leaves 592 payload bytes
        assert_eq!(burst.size_bytes(), 592, "each connection gets a 50-symbol share");
    }
    assert_eq!(schedule.dl_symbols_used, 150);
}

/// Requirements 100/50/50 against a budget of 100: floor-scaled shares of
/// 50/25/25 symbols.
#[test]
fn test_rtps_proportional_scaling_uneven() {
    debug::setup_logging_verbose();

    // 200 symbols per frame -> 100 downlink
    let cfg = test_config(200);
    let mut bs = build_bs(&cfg);

    let demands = [1194u32, 594, 594]; // +6 header: 1200/600/600 bytes
    let mut sfids = Vec::new();
    for (i, len) in demands.iter().enumerate() {
        let ss = register_station(&mut bs, i as u8, ModulationType::Bpsk12);
        let sfid = admit_flow(&mut bs, ss, SchedulingType::Rtps, |_| {});
        suppress_polling(&mut bs, sfid);
        enqueue_data(&mut bs, sfid, *len, 1);
        sfids.push(sfid);
    }

    let ctx = start_frame();
    let schedule = bs.on_frame(&ctx);

    let sizes: Vec<u32> = schedule.dl_bursts.iter().map(|b| b.size_bytes()).collect();
    // 50/25/25 symbol shares at 12 bytes/symbol, minus 8 bytes of headers
    assert_eq!(sizes, vec![592, 292, 292]);
    assert_eq!(schedule.dl_symbols_used, 100);
}

/// A basic-connection packet that does not fit cannot be fragmented; the
/// connection's turn ends and the packet stays queued.
#[test]
fn test_no_fragmentation_outside_transport() {
    debug::setup_logging_verbose();

    // 20 symbols per frame -> 10 downlink symbols = 120 bytes at BPSK 1/2
    let cfg = test_config(20);
    let mut bs = build_bs(&cfg);

    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);
    let basic_cid = bs.ss_manager.get(ss).expect("ss").basic_cid;
    bs.connections
        .get_connection_mut(basic_cid)
        .expect("basic connection")
        .enqueue(MacPacket::management(400));

    let ctx = start_frame();
    let schedule = bs.on_frame(&ctx);

    assert!(schedule.dl_bursts.is_empty(), "oversized packet must not be sent");
    assert_eq!(
        bs.connections
            .get_connection(basic_cid)
            .expect("basic connection")
            .queue
            .len(),
        1,
        "packet remains queued for the next frame"
    );
}

/// A UGS downlink flow is served only when waiting one more frame would
/// miss its latency bound, not every frame.
#[test]
fn test_ugs_downlink_deadline_trigger() {
    debug::setup_logging_verbose();

    let cfg = test_config(720);
    let mut bs = build_bs(&cfg);

    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);
    // 30 ms latency over 10 ms frames: service every third frame
    let ugs = admit_flow(&mut bs, ss, SchedulingType::Ugs, |f| {
        f.min_reserved_traffic_rate = 12_000;
        f.max_latency_ms = 30;
    });
    suppress_polling(&mut bs, ugs);
    let ugs_cid = bs.flows.get(ugs).and_then(|f| f.connection).expect("cid");

    let mut granted_frames = Vec::new();
    let mut ctx = start_frame();
    for frame in 0..8u32 {
        enqueue_data(&mut bs, ugs, 100, 1);
        let schedule = bs.on_frame(&ctx);
        if schedule.dl_bursts.iter().any(|b| b.cid == ugs_cid) {
            granted_frames.push(frame);
        }
        ctx = ctx.next();
    }

    assert_eq!(granted_frames, vec![3, 6], "UGS served on the latency cadence");
}

/// The Simple scheduler variant drains connections in the same class
/// precedence, one selection at a time.
#[test]
fn test_simple_scheduler_precedence() {
    debug::setup_logging_verbose();

    let cfg = test_config_with(720, |c| c.scheduler.dl_scheduler = DlSchedulerKind::Simple);
    let mut bs = build_bs(&cfg);

    let ss = register_station(&mut bs, 1, ModulationType::Bpsk12);
    let basic_cid = bs.ss_manager.get(ss).expect("ss").basic_cid;
    let be = admit_flow(&mut bs, ss, SchedulingType::Be, |_| {});
    suppress_polling(&mut bs, be);
    let be_cid = bs.flows.get(be).and_then(|f| f.connection).expect("cid");

    bs.connections.broadcast_mut().enqueue(MacPacket::management(114));
    bs.connections
        .get_connection_mut(basic_cid)
        .expect("basic connection")
        .enqueue(MacPacket::management(114));
    enqueue_data(&mut bs, be, 100, 2);

    let ctx = start_frame();
    let schedule = bs.on_frame(&ctx);

    let cids: Vec<Cid> = schedule.dl_bursts.iter().map(|b| b.cid).collect();
    assert_eq!(cids, vec![Cid::broadcast(), basic_cid, be_cid]);
    // both BE packets fit into one burst
    assert_eq!(schedule.dl_bursts[2].n_packets(), 2);
}

/// Saturating demand across all classes never overruns the downlink budget.
#[test]
fn test_downlink_budget_invariant_under_saturation() {
    debug::setup_logging_verbose();

    let cfg = test_config(300); // 150 downlink symbols
    let mut bs = build_bs(&cfg);

    let ss = register_station(&mut bs, 1, ModulationType::Qpsk12);
    let basic_cid = bs.ss_manager.get(ss).expect("ss").basic_cid;
    for _ in 0..5 {
        bs.connections.broadcast_mut().enqueue(MacPacket::management(200));
        bs.connections
            .get_connection_mut(basic_cid)
            .expect("basic")
            .enqueue(MacPacket::management(150));
    }

    let mut sfids = Vec::new();
    for (i, scheduling) in [
        SchedulingType::Rtps,
        SchedulingType::Rtps,
        SchedulingType::Nrtps,
        SchedulingType::Be,
    ]
    .iter()
    .enumerate()
    {
        let ss = register_station(&mut bs, 10 + i as u8, ModulationType::Bpsk12);
        let sfid = admit_flow(&mut bs, ss, *scheduling, |_| {});
        suppress_polling(&mut bs, sfid);
        enqueue_data(&mut bs, sfid, 800, 10);
        sfids.push(sfid);
    }

    let mut ctx = start_frame();
    for _ in 0..5 {
        let schedule = bs.on_frame(&ctx);
        assert!(
            schedule.dl_symbols_used <= 150,
            "frame {}: used {} of 150 downlink symbols",
            ctx.frame_number,
            schedule.dl_symbols_used
        );
        ctx = ctx.next();
    }
}
