use wran_core::{Cid, CidType, Direction, FrameContext, ModulationType, PhyPort, Sfid};

use crate::connection::Connection;
use crate::connection_manager::ConnectionManager;
use crate::map::{BURST_PROFILE_1, BurstProfileManager, DlBurst};
use crate::queue::MacPacket;
use crate::service_flow::SchedulingType;
use crate::service_flow_manager::ServiceFlowManager;
use crate::ss_manager::SsManager;

/// Borrowed view of the base station state a downlink pass operates on
pub struct DlCtx<'a> {
    pub phy: &'a dyn PhyPort,
    pub connections: &'a mut ConnectionManager,
    pub ss_manager: &'a SsManager,
    pub flows: &'a mut ServiceFlowManager,
    pub profiles: &'a BurstProfileManager,
}

#[derive(Debug)]
pub struct DlScheduleResult {
    /// Bursts in transmission order, consumed by the PHY as produced
    pub bursts: Vec<DlBurst>,
    pub symbols_used: u32,
    pub symbols_left: u32,
}

/// Per-frame downlink burst selection and packing.
///
/// The set of variants is closed: Simple drains classes via a single
/// connection-selection scan, Rtps adds the bandwidth-proportional rtPS
/// split under saturation.
pub trait DlScheduler: Send {
    fn schedule(
        &mut self,
        ctx: &FrameContext,
        dev: &mut DlCtx<'_>,
        available_symbols: u32,
    ) -> DlScheduleResult;
}

/// Fragmentation is legal only for transport connections, and only when the
/// available bytes exceed the header a fragment must carry.
fn check_for_fragmentation(
    phy: &dyn PhyPort,
    connection: &Connection,
    available_symbols: u32,
    modulation: ModulationType,
) -> bool {
    if connection.cid_type() != CidType::Transport {
        return false;
    }
    let available_bytes = phy.required_bytes(available_symbols, modulation);
    available_bytes > connection.queue.first_packet_header_bytes()
}

/// Drain one connection into a packet burst while the budget lasts.
/// A head packet that does not fit ends the connection's turn; it stays
/// queued for the next frame unless fragmentation is legal.
fn drain_connection(
    phy: &dyn PhyPort,
    connection: &mut Connection,
    modulation: ModulationType,
    available_symbols: &mut u32,
) -> Vec<MacPacket> {
    let mut packets = Vec::new();

    while connection.has_packets() && *available_symbols > 0 {
        let required_bytes = connection.queue.first_packet_required_bytes();
        let required_symbols = phy.required_symbols(required_bytes, modulation);

        if *available_symbols < required_symbols {
            if !check_for_fragmentation(phy, connection, *available_symbols, modulation) {
                break;
            }
            let available_bytes = phy.required_bytes(*available_symbols, modulation);
            if let Some(packet) = connection.dequeue_fragment(available_bytes) {
                packets.push(packet);
            }
            *available_symbols = 0;
            break;
        }

        let Some(packet) = connection.dequeue() else { break };
        packets.push(packet);
        *available_symbols -= required_symbols;
    }

    packets
}

/// Drain packets from a UGS connection into its fixed grant.
/// Fragmentation within the grant is allowed; the grant size itself was
/// fixed at admission time.
fn create_ugs_burst(
    phy: &dyn PhyPort,
    connection: &mut Connection,
    modulation: ModulationType,
    grant_symbols: u32,
) -> Vec<MacPacket> {
    let mut available = grant_symbols;
    let mut packets = Vec::new();

    while connection.has_packets() && available > 0 {
        let required_bytes = connection.queue.first_packet_required_bytes();
        let required_symbols = phy.required_symbols(required_bytes, modulation);

        if available < required_symbols {
            if !check_for_fragmentation(phy, connection, available, modulation) {
                break;
            }
            let available_bytes = phy.required_bytes(available, modulation);
            if let Some(packet) = connection.dequeue_fragment(available_bytes) {
                packets.push(packet);
            }
            break;
        }

        let Some(packet) = connection.dequeue() else { break };
        packets.push(packet);
        available -= required_symbols;
    }

    packets
}

/// Modulation a flow's burst is sent at: the flow's own for multicast,
/// otherwise the owning station's negotiated modulation.
fn flow_modulation(dev: &DlCtx<'_>, sfid: Sfid) -> Option<ModulationType> {
    let flow = dev.flows.get(sfid)?;
    if flow.is_multicast {
        return Some(flow.modulation);
    }
    let ss_id = dev.ss_manager.by_service_flow(sfid)?;
    dev.ss_manager.get(ss_id).map(|ss| ss.modulation)
}

fn log_queue_depths(dev: &DlCtx<'_>, bursts: &[DlBurst], symbols_left: u32) {
    if bursts.is_empty() {
        return;
    }
    tracing::debug!(
        "DL scheduler: {} bursts, {} symbols left; queues: IR {} broadcast {} basic {} primary {} transport {}",
        bursts.len(),
        symbols_left,
        dev.connections.initial_ranging().queue.len(),
        dev.connections.broadcast().queue.len(),
        dev.connections.get_n_packets(CidType::Basic, None, dev.flows),
        dev.connections.get_n_packets(CidType::Primary, None, dev.flows),
        dev.connections.get_n_packets(CidType::Transport, None, dev.flows),
    );
}

////////// RTPS VARIANT //////////

/// Downlink scheduler with per-class passes in strict precedence order:
/// Broadcast, InitialRanging, Basic, Primary, UGS, rtPS, nrtPS, BE.
/// Every rtPS flow with queued packets gets a share of the remaining
/// bandwidth; under saturation the shares shrink proportionally.
#[derive(Debug, Default)]
pub struct RtpsDlScheduler;

impl RtpsDlScheduler {
    pub fn new() -> RtpsDlScheduler {
        RtpsDlScheduler
    }

    fn schedule_broadcast_connection(
        &self,
        dev: &mut DlCtx<'_>,
        available_symbols: &mut u32,
        bursts: &mut Vec<DlBurst>,
    ) {
        let modulation = ModulationType::Bpsk12;
        let phy = dev.phy;
        let connection = dev.connections.broadcast_mut();
        let packets = drain_connection(phy, connection, modulation, available_symbols);
        if !packets.is_empty() {
            bursts.push(DlBurst {
                cid: Cid::broadcast(),
                diuc: BURST_PROFILE_1,
                modulation,
                packets,
            });
        }
    }

    fn schedule_initial_ranging_connection(
        &self,
        dev: &mut DlCtx<'_>,
        available_symbols: &mut u32,
        bursts: &mut Vec<DlBurst>,
    ) {
        let modulation = ModulationType::Bpsk12;
        let phy = dev.phy;
        let connection = dev.connections.initial_ranging_mut();
        let packets = drain_connection(phy, connection, modulation, available_symbols);
        if !packets.is_empty() {
            bursts.push(DlBurst {
                cid: Cid::initial_ranging(),
                diuc: BURST_PROFILE_1,
                modulation,
                packets,
            });
        }
    }

    /// Basic and primary connections are visited in registration order;
    /// each gets its own burst at the station's negotiated modulation.
    fn schedule_management_connections(
        &self,
        dev: &mut DlCtx<'_>,
        cid_type: CidType,
        available_symbols: &mut u32,
        bursts: &mut Vec<DlBurst>,
    ) {
        for cid in dev.connections.cids(cid_type) {
            if *available_symbols == 0 {
                break;
            }
            let Some(ss_id) = dev.ss_manager.by_cid(cid) else {
                tracing::warn!("no station record for {:?} connection {}", cid_type, cid);
                continue;
            };
            let Some(ss) = dev.ss_manager.get(ss_id) else { continue };
            let modulation = ss.modulation;
            let diuc = dev.profiles.burst_profile(modulation, Direction::Dl);

            let phy = dev.phy;
            let Some(connection) = dev.connections.get_connection_mut(cid) else { continue };
            let packets = drain_connection(phy, connection, modulation, available_symbols);
            if !packets.is_empty() {
                bursts.push(DlBurst { cid, diuc, modulation, packets });
            }
        }
    }

    /// A UGS flow is scheduled only when waiting one more frame would make
    /// it miss its declared maximum latency.
    fn schedule_ugs_flows(
        &self,
        ctx: &FrameContext,
        dev: &mut DlCtx<'_>,
        available_symbols: &mut u32,
        bursts: &mut Vec<DlBurst>,
    ) {
        for sfid in dev.flows.flows_of_type(SchedulingType::Ugs) {
            let Some(flow) = dev.flows.get(sfid) else { continue };
            let Some(cid) = flow.connection else { continue };
            let grant_size = flow.record.grant_size;
            let max_latency = flow.max_latency();
            let dl_timestamp = flow.record.dl_timestamp;

            let has_packets = dev
                .connections
                .get_connection(cid)
                .is_some_and(|c| c.has_packets());
            // if latency would exceed in case the grant waits for the next
            // frame, allocate in the current frame
            if !has_packets
                || ctx.elapsed_since(dl_timestamp) + ctx.frame_duration <= max_latency
            {
                continue;
            }

            let Some(modulation) = flow_modulation(dev, sfid) else { continue };
            let diuc = dev.profiles.burst_profile(modulation, Direction::Dl);

            if *available_symbols <= grant_size {
                continue;
            }
            *available_symbols -= grant_size;

            let phy = dev.phy;
            let Some(connection) = dev.connections.get_connection_mut(cid) else { continue };
            let packets = create_ugs_burst(phy, connection, modulation, grant_size);
            if !packets.is_empty() {
                bursts.push(DlBurst { cid, diuc, modulation, packets });
                if let Some(flow) = dev.flows.get_mut(sfid) {
                    flow.record.dl_timestamp = ctx.now;
                }
            }
        }
    }

    /// Every rtPS flow with queued packets gets to transmit; when the total
    /// demand exceeds the remaining budget, all shares are scaled down by
    /// the same ratio in a single proportional pass. Flooring guarantees
    /// the scaled total fits, so one pass is always enough.
    fn schedule_rtps_flows(
        &self,
        ctx: &FrameContext,
        dev: &mut DlCtx<'_>,
        available_symbols: &mut u32,
        bursts: &mut Vec<DlBurst>,
    ) {
        struct Candidate {
            cid: Cid,
            modulation: ModulationType,
            diuc: u8,
            symbols_required: u32,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut total_symbols_required: u32 = 0;

        for sfid in dev.flows.flows_of_type(SchedulingType::Rtps) {
            let Some(flow) = dev.flows.get(sfid) else { continue };
            let Some(cid) = flow.connection else { continue };
            let has_packets = dev
                .connections
                .get_connection(cid)
                .is_some_and(|c| c.has_packets());
            if !has_packets {
                continue;
            }

            let Some(modulation) = flow_modulation(dev, sfid) else { continue };
            let diuc = dev.profiles.burst_profile(modulation, Direction::Dl);

            if let Some(flow) = dev.flows.get_mut(sfid) {
                flow.record.dl_timestamp = ctx.now;
            }

            let data_to_send = dev
                .connections
                .get_connection(cid)
                .map_or(0, |c| c.queue_length_with_overhead());
            let symbols_required = dev.phy.required_symbols(data_to_send, modulation);

            tracing::debug!(
                "rtPS DL: cid {} needs {} bytes = {} symbols",
                cid,
                data_to_send,
                symbols_required
            );

            total_symbols_required += symbols_required;
            candidates.push(Candidate { cid, modulation, diuc, symbols_required });
        }

        // Channel saturation: shrink every share by the same ratio
        if total_symbols_required > *available_symbols {
            let delta = *available_symbols as f64 / total_symbols_required as f64;
            tracing::debug!(
                "rtPS DL saturation: {} required, {} available, delta {:.3}",
                total_symbols_required,
                *available_symbols,
                delta
            );
            total_symbols_required = 0;
            for candidate in &mut candidates {
                candidate.symbols_required =
                    (candidate.symbols_required as f64 * delta).floor() as u32;
                total_symbols_required += candidate.symbols_required;
            }
        }

        // Downlink bandwidth allocation
        for candidate in &mut candidates {
            let phy = dev.phy;
            let Some(connection) = dev.connections.get_connection_mut(candidate.cid) else {
                continue;
            };
            let mut assigned = candidate.symbols_required;
            let mut packets = Vec::new();

            while assigned > 0 && connection.has_packets() {
                let required_bytes = connection.queue.first_packet_required_bytes();
                let required_symbols = phy.required_symbols(required_bytes, candidate.modulation);

                if required_symbols > assigned {
                    if !check_for_fragmentation(phy, connection, assigned, candidate.modulation) {
                        break;
                    }
                    let available_bytes = phy.required_bytes(assigned, candidate.modulation);
                    if let Some(packet) = connection.dequeue_fragment(available_bytes) {
                        packets.push(packet);
                    }
                    assigned = 0;
                } else {
                    let Some(packet) = connection.dequeue() else { break };
                    packets.push(packet);
                    assigned -= required_symbols;
                }
            }

            if !packets.is_empty() {
                bursts.push(DlBurst {
                    cid: candidate.cid,
                    diuc: candidate.diuc,
                    modulation: candidate.modulation,
                    packets,
                });
            }
        }

        *available_symbols -= total_symbols_required;
    }

    /// nrtPS and BE flows are served whole-packet on leftover bandwidth;
    /// no fragmentation, no guarantees.
    fn schedule_opportunistic_flows(
        &self,
        dev: &mut DlCtx<'_>,
        scheduling: SchedulingType,
        available_symbols: &mut u32,
        bursts: &mut Vec<DlBurst>,
    ) {
        for sfid in dev.flows.flows_of_type(scheduling) {
            if *available_symbols == 0 {
                break;
            }
            let Some(flow) = dev.flows.get(sfid) else { continue };
            let Some(cid) = flow.connection else { continue };
            let Some(modulation) = flow_modulation(dev, sfid) else { continue };
            let diuc = dev.profiles.burst_profile(modulation, Direction::Dl);

            let phy = dev.phy;
            let Some(connection) = dev.connections.get_connection_mut(cid) else { continue };
            let mut packets = Vec::new();

            while connection.has_packets() && *available_symbols > 0 {
                let required_bytes = connection.queue.first_packet_required_bytes();
                let required_symbols = phy.required_symbols(required_bytes, modulation);
                if *available_symbols < required_symbols {
                    break;
                }
                let Some(packet) = connection.dequeue() else { break };
                packets.push(packet);
                *available_symbols -= required_symbols;
            }

            if !packets.is_empty() {
                bursts.push(DlBurst { cid, diuc, modulation, packets });
            }
        }
    }
}

impl DlScheduler for RtpsDlScheduler {
    fn schedule(
        &mut self,
        ctx: &FrameContext,
        dev: &mut DlCtx<'_>,
        available_symbols: u32,
    ) -> DlScheduleResult {
        let mut budget = available_symbols;
        let mut bursts = Vec::new();

        self.schedule_broadcast_connection(dev, &mut budget, &mut bursts);
        self.schedule_initial_ranging_connection(dev, &mut budget, &mut bursts);
        self.schedule_management_connections(dev, CidType::Basic, &mut budget, &mut bursts);
        self.schedule_management_connections(dev, CidType::Primary, &mut budget, &mut bursts);
        self.schedule_ugs_flows(ctx, dev, &mut budget, &mut bursts);
        self.schedule_rtps_flows(ctx, dev, &mut budget, &mut bursts);
        self.schedule_opportunistic_flows(dev, SchedulingType::Nrtps, &mut budget, &mut bursts);
        self.schedule_opportunistic_flows(dev, SchedulingType::Be, &mut budget, &mut bursts);

        log_queue_depths(dev, &bursts, budget);

        DlScheduleResult {
            bursts,
            symbols_used: available_symbols - budget,
            symbols_left: budget,
        }
    }
}

////////// SIMPLE VARIANT //////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DlSelection {
    Broadcast,
    InitialRanging,
    Management(Cid),
    Flow(Sfid),
}

/// Single-scan downlink scheduler: repeatedly selects the highest-precedence
/// connection with pending traffic and drains it until the budget runs out.
#[derive(Debug, Default)]
pub struct SimpleDlScheduler;

impl SimpleDlScheduler {
    pub fn new() -> SimpleDlScheduler {
        SimpleDlScheduler
    }

    /// Pick the next connection to serve, in class precedence order.
    /// UGS and rtPS flows are selected only when waiting one more frame
    /// would miss their latency bound; their downlink timestamp is stamped
    /// on selection.
    fn select_connection(&self, ctx: &FrameContext, dev: &mut DlCtx<'_>) -> Option<DlSelection> {
        if dev.connections.broadcast().has_packets() {
            return Some(DlSelection::Broadcast);
        }
        if dev.connections.initial_ranging().has_packets() {
            return Some(DlSelection::InitialRanging);
        }
        for cid_type in [CidType::Basic, CidType::Primary] {
            for cid in dev.connections.cids(cid_type) {
                if dev.connections.get_connection(cid).is_some_and(|c| c.has_packets()) {
                    return Some(DlSelection::Management(cid));
                }
            }
        }

        // Latency-bounded classes: serve only when the deadline is near
        for scheduling in [SchedulingType::Ugs, SchedulingType::Rtps] {
            for sfid in dev.flows.flows_of_type(scheduling) {
                let Some(flow) = dev.flows.get(sfid) else { continue };
                let Some(cid) = flow.connection else { continue };
                let max_latency = flow.max_latency();
                let dl_timestamp = flow.record.dl_timestamp;
                let has_packets = dev
                    .connections
                    .get_connection(cid)
                    .is_some_and(|c| c.has_packets());
                if has_packets
                    && ctx.elapsed_since(dl_timestamp) + ctx.frame_duration > max_latency
                {
                    if let Some(flow) = dev.flows.get_mut(sfid) {
                        flow.record.dl_timestamp = ctx.now;
                    }
                    return Some(DlSelection::Flow(sfid));
                }
            }
        }

        for scheduling in [SchedulingType::Nrtps, SchedulingType::Be] {
            for sfid in dev.flows.flows_of_type(scheduling) {
                let Some(flow) = dev.flows.get(sfid) else { continue };
                let Some(cid) = flow.connection else { continue };
                if dev.connections.get_connection(cid).is_some_and(|c| c.has_packets()) {
                    return Some(DlSelection::Flow(sfid));
                }
            }
        }

        None
    }
}

impl DlScheduler for SimpleDlScheduler {
    fn schedule(
        &mut self,
        ctx: &FrameContext,
        dev: &mut DlCtx<'_>,
        available_symbols: u32,
    ) -> DlScheduleResult {
        let mut budget = available_symbols;
        let mut bursts = Vec::new();

        while budget > 0 {
            let Some(selection) = self.select_connection(ctx, dev) else { break };

            let made_progress = match selection {
                DlSelection::Broadcast | DlSelection::InitialRanging => {
                    let modulation = ModulationType::Bpsk12;
                    let phy = dev.phy;
                    let (cid, connection) = match selection {
                        DlSelection::Broadcast => (Cid::broadcast(), dev.connections.broadcast_mut()),
                        _ => (Cid::initial_ranging(), dev.connections.initial_ranging_mut()),
                    };
                    let packets = drain_connection(phy, connection, modulation, &mut budget);
                    let progress = !packets.is_empty();
                    if progress {
                        bursts.push(DlBurst { cid, diuc: BURST_PROFILE_1, modulation, packets });
                    }
                    progress
                }
                DlSelection::Management(cid) => {
                    let Some(ss_id) = dev.ss_manager.by_cid(cid) else { break };
                    let Some(ss) = dev.ss_manager.get(ss_id) else { break };
                    let modulation = ss.modulation;
                    let diuc = dev.profiles.burst_profile(modulation, Direction::Dl);
                    let phy = dev.phy;
                    let Some(connection) = dev.connections.get_connection_mut(cid) else { break };
                    let packets = drain_connection(phy, connection, modulation, &mut budget);
                    let progress = !packets.is_empty();
                    if progress {
                        bursts.push(DlBurst { cid, diuc, modulation, packets });
                    }
                    progress
                }
                DlSelection::Flow(sfid) => {
                    let Some(flow) = dev.flows.get(sfid) else { break };
                    let Some(cid) = flow.connection else { break };
                    let is_ugs = flow.scheduling == SchedulingType::Ugs;
                    let grant_size = flow.record.grant_size;
                    let Some(modulation) = flow_modulation(dev, sfid) else { break };
                    let diuc = dev.profiles.burst_profile(modulation, Direction::Dl);
                    let phy = dev.phy;
                    let Some(connection) = dev.connections.get_connection_mut(cid) else { break };

                    let packets = if is_ugs {
                        // The fixed grant, clipped to what is left this frame
                        let alloc = grant_size.min(budget);
                        let packets = create_ugs_burst(phy, connection, modulation, alloc);
                        let burst_bytes: u32 = packets.iter().map(|p| p.len_bytes).sum();
                        let burst_symbols = phy.required_symbols(burst_bytes, modulation);
                        budget = budget.saturating_sub(burst_symbols);
                        packets
                    } else {
                        drain_connection(phy, connection, modulation, &mut budget)
                    };
                    let progress = !packets.is_empty();
                    if progress {
                        bursts.push(DlBurst { cid, diuc, modulation, packets });
                    }
                    progress
                }
            };

            // A selected connection that could not transmit anything (head
            // packet too big, fragmentation not legal) ends the pass; its
            // traffic stays queued for the next frame.
            if !made_progress {
                break;
            }
        }

        log_queue_depths(dev, &bursts, budget);

        DlScheduleResult {
            bursts,
            symbols_used: available_symbols - budget,
            symbols_left: budget,
        }
    }
}
