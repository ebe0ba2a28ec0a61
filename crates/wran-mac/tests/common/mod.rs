//! Shared harness for the scheduler integration tests: builds a base
//! station around the table-driven PHY stub with deterministic parameters.

// not every test binary uses every helper
#![allow(dead_code)]

use std::time::Duration;

use wran_config::{DlSchedulerKind, SharedConfig, StackConfig, StackMode};
use wran_core::{Direction, FrameContext, ModulationType, Sfid, SimpleOfdmPhy, SsId};
use wran_mac::{BsMac, MacAddress, MacPacket, SchedulingType, ServiceFlow};

pub const FRAME_MS: u32 = 10;

/// Test configuration: deterministic, with the contention ranging interval
/// pushed out of the way so maps contain only what a test asked for.
pub fn test_config(symbols_per_frame: u32) -> SharedConfig {
    test_config_with(symbols_per_frame, |_| {})
}

pub fn test_config_with(
    symbols_per_frame: u32,
    patch: impl FnOnce(&mut StackConfig),
) -> SharedConfig {
    let mut cfg = StackConfig::new(StackMode::Bs);
    cfg.phy.symbols_per_frame = symbols_per_frame;
    cfg.phy.frame_duration_ms = FRAME_MS;
    cfg.mac.initial_ranging_interval_ms = 10_000_000;
    cfg.scheduler.dl_scheduler = DlSchedulerKind::Rtps;
    cfg.scheduler.window_interval_ms = 1000;
    patch(&mut cfg);
    SharedConfig::from_config(cfg)
}

pub fn build_bs(cfg: &SharedConfig) -> BsMac {
    let config = cfg.config();
    let phy = SimpleOfdmPhy::new(config.phy.symbols_per_frame, config.phy.frame_duration());
    BsMac::new(cfg.clone(), Box::new(phy))
}

pub fn start_frame() -> FrameContext {
    FrameContext::new(Duration::from_millis(FRAME_MS as u64))
}

/// Register a station and complete its ranging at the given modulation
pub fn register_station(bs: &mut BsMac, last_octet: u8, modulation: ModulationType) -> SsId {
    let ss_id = bs.register_ss(MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, last_octet]));
    bs.complete_ranging(ss_id, modulation);
    ss_id
}

/// Admit an uplink service flow directly (DSA exchange elided)
pub fn admit_flow(
    bs: &mut BsMac,
    ss_id: SsId,
    scheduling: SchedulingType,
    customize: impl FnOnce(&mut ServiceFlow),
) -> Sfid {
    let mut flow = ServiceFlow::new(Direction::Ul, scheduling);
    // latency far away by default; tests that exercise deadlines tighten it
    flow.max_latency_ms = 100_000;
    customize(&mut flow);
    bs.admit_service_flow_directly(ss_id, flow)
        .expect("flow admission should succeed")
}

/// Keep a flow out of the polling machinery so maps stay minimal
pub fn suppress_polling(bs: &mut BsMac, sfid: Sfid) {
    if let Some(flow) = bs.flows.get_mut(sfid) {
        flow.unsolicited_polling_interval_ms = 10_000_000;
    }
}

/// Enqueue `count` downlink data packets on the flow's transport connection
pub fn enqueue_data(bs: &mut BsMac, sfid: Sfid, len_bytes: u32, count: usize) {
    let cid = bs
        .flows
        .get(sfid)
        .and_then(|f| f.connection)
        .expect("flow must have a connection");
    let connection = bs
        .connections
        .get_connection_mut(cid)
        .expect("connection must exist");
    for _ in 0..count {
        connection.enqueue(MacPacket::data(len_bytes));
    }
}
