use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;

use wran_config::{SharedConfig, StackMode, toml_config};
use wran_core::{Direction, FrameContext, ModulationType, SimpleOfdmPhy, debug};
use wran_mac::{
    BandwidthRequest, BandwidthRequestKind, BsMac, MacAddress, MacPacket, SchedulingType,
    ServiceFlow,
};

/// Load configuration file
fn load_config_from_toml(cfg_path: &str) -> SharedConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

/// Build a base station with a small demo topology: one station carrying a
/// UGS voice flow plus BE data, one station carrying rtPS video plus nrtPS
/// bulk data.
fn build_bs_stack(cfg: &SharedConfig) -> BsMac {
    let config = cfg.config();
    let phy = SimpleOfdmPhy::new(config.phy.symbols_per_frame, config.phy.frame_duration());
    let mut bs = BsMac::new(cfg.clone(), Box::new(phy));

    let ss1 = bs.register_ss(MacAddress([0x00, 0x1b, 0x44, 0x00, 0x00, 0x01]));
    bs.complete_ranging(ss1, ModulationType::Qam16_12);

    let mut voice = ServiceFlow::new(Direction::Ul, SchedulingType::Ugs);
    voice.min_reserved_traffic_rate = 12_000; // bytes/s, G.711-sized
    voice.max_latency_ms = 20;
    voice.tolerated_jitter_ms = 10;
    if let Err(e) = bs.admit_service_flow_directly(ss1, voice) {
        eprintln!("voice flow rejected: {}", e);
        std::process::exit(1);
    }
    let mut best_effort = ServiceFlow::new(Direction::Ul, SchedulingType::Be);
    best_effort.max_latency_ms = 1000;
    let be_sfid = match bs.admit_service_flow_directly(ss1, best_effort) {
        Ok(sfid) => sfid,
        Err(e) => {
            eprintln!("BE flow rejected: {}", e);
            std::process::exit(1);
        }
    };
    // let the BE flow be polled next to the UGS flow
    if let Some(record) = bs.ss_manager.get_mut(ss1) {
        record.poll_me = true;
    }

    let ss2 = bs.register_ss(MacAddress([0x00, 0x1b, 0x44, 0x00, 0x00, 0x02]));
    bs.complete_ranging(ss2, ModulationType::Qpsk34);

    let mut video = ServiceFlow::new(Direction::Ul, SchedulingType::Rtps);
    video.min_reserved_traffic_rate = 50_000;
    video.max_latency_ms = 40;
    let video_sfid = match bs.admit_service_flow_directly(ss2, video) {
        Ok(sfid) => sfid,
        Err(e) => {
            eprintln!("video flow rejected: {}", e);
            std::process::exit(1);
        }
    };
    let mut bulk = ServiceFlow::new(Direction::Ul, SchedulingType::Nrtps);
    bulk.min_reserved_traffic_rate = 10_000;
    bulk.max_latency_ms = 1000;
    if let Err(e) = bs.admit_service_flow_directly(ss2, bulk) {
        eprintln!("bulk flow rejected: {}", e);
        std::process::exit(1);
    }

    tracing::info!("demo topology up: BE sfid {}, video sfid {}", be_sfid, video_sfid);
    bs
}

/// Feed synthetic traffic into the base station: downlink packets on the
/// transport connections, uplink bandwidth requests from the stations.
fn offer_traffic(bs: &mut BsMac, ctx: &FrameContext) {
    let mut rng = rand::rng();

    let sfids = bs.flows.all_sfids();
    for sfid in sfids {
        let Some(flow) = bs.flows.get(sfid) else { continue };
        let Some(cid) = flow.connection else { continue };
        let scheduling = flow.scheduling;

        // downlink: a couple of packets per frame on real-time flows,
        // occasional bursts on the rest
        let n_packets = match scheduling {
            SchedulingType::Ugs => 1,
            SchedulingType::Rtps => rng.random_range(0..3),
            _ => {
                if rng.random_range(0..4) == 0 {
                    rng.random_range(1..4)
                } else {
                    0
                }
            }
        };
        for _ in 0..n_packets {
            let len = match scheduling {
                SchedulingType::Ugs => 120,
                _ => rng.random_range(64..1400),
            };
            if let Some(connection) = bs.connections.get_connection_mut(cid) {
                connection.enqueue(MacPacket::data(len));
            }
        }

        // uplink: stations report their backlog now and then
        if scheduling != SchedulingType::Ugs && rng.random_range(0..5) == 0 {
            let request = BandwidthRequest {
                kind: BandwidthRequestKind::Aggregate,
                cid,
                bytes: rng.random_range(200..4000),
            };
            bs.process_bandwidth_request(ctx, &request);
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "WRAN base-station MAC scheduler",
    long_about = "Runs the WRAN base-station MAC frame scheduler against a synthetic demo topology using the provided TOML configuration"
)]
struct Args {
    /// Config file (required)
    #[arg(help = "TOML config with PHY/MAC/scheduler parameters")]
    config: String,

    /// Number of frames to run; 0 runs until interrupted
    #[arg(short = 'n', long, default_value_t = 0)]
    frames: u32,

    /// Sleep one frame duration per frame instead of free-running
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

fn main() {
    eprintln!("wranstation - WRAN base-station MAC frame scheduler\n");

    let args = Args::parse();
    let cfg = load_config_from_toml(&args.config);
    let _log_guard = debug::setup_logging_default(cfg.config().debug_log.clone());

    if cfg.config().stack_mode != StackMode::Bs {
        eprintln!("Only Bs stack mode is supported by this binary");
        std::process::exit(1);
    }

    let mut bs = build_bs_stack(&cfg);

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    let frame_duration = cfg.config().phy.frame_duration();
    let window_interval = Duration::from_millis(cfg.config().scheduler.window_interval_ms as u64);
    let mut ctx = FrameContext::new(frame_duration);
    let mut next_window = window_interval;

    while running.load(Ordering::SeqCst) && (args.frames == 0 || ctx.frame_number < args.frames) {
        offer_traffic(&mut bs, &ctx);

        // the window timer is independent of the frame clock; fire it when
        // its interval elapses
        if ctx.now >= next_window {
            bs.uplink_sched_window_timer();
            next_window += window_interval;
        }

        let schedule = bs.on_frame(&ctx);
        tracing::info!(
            "{}: DL {} bursts / {} symbols, UL {} entries / {} symbols{}{}",
            ctx,
            schedule.dl_bursts.len(),
            schedule.dl_symbols_used,
            schedule.ul_map.len(),
            schedule.ul_symbols_used,
            if schedule.send_dcd { ", DCD" } else { "" },
            if schedule.send_ucd { ", UCD" } else { "" },
        );

        if args.realtime {
            std::thread::sleep(frame_duration);
        }
        ctx = ctx.next();
    }

    tracing::info!("stopped after {} frames", ctx.frame_number);
}
