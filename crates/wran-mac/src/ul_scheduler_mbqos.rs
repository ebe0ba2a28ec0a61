use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;

use wran_core::{Cid, Direction, FrameContext, ModulationType, PhyPort, Sfid, SsId};

use wran_config::CfgMac;

use crate::bandwidth_manager::{BandwidthManager, BandwidthRequest};
use crate::connection_manager::ConnectionManager;
use crate::map::{BurstProfileManager, Uiuc, UlMapIe};
use crate::service_flow::{SchedulingType, ServiceFlow};
use crate::service_flow_manager::ServiceFlowManager;
use crate::ss_manager::SsManager;
use crate::ss_record::{RangingStatus, SsRecord};
use crate::ul_job::{PriorityUlJob, ReqType, UlJob, sort_priority_jobs};

/// rtPS jobs whose deadline falls within this many frames are migrated to
/// the high-priority queue by the deadline check.
const DEADLINE_MIGRATION_FRAMES: i64 = 3;

/// Priority assigned to flows already at or above their minimum reserved
/// rate, placing them behind every flow still under its floor.
const PRIORITY_SATISFIED: i64 = -10000;

/// Borrowed view of the base station state an uplink pass operates on
pub struct UlCtx<'a> {
    pub phy: &'a dyn PhyPort,
    pub ss_manager: &'a SsManager,
    pub flows: &'a mut ServiceFlowManager,
    pub profiles: &'a BurstProfileManager,
    pub bandwidth: &'a BandwidthManager,
    pub cfg: &'a CfgMac,
}

#[derive(Debug)]
pub struct UlScheduleResult {
    /// Uplink map entries in allocation order, closed by the end-of-map
    /// sentinel
    pub map: Vec<UlMapIe>,
    pub symbols_used: u32,
    pub symbols_left: u32,
}

/// The MBQoS uplink scheduler: per-frame admission of uplink grants through
/// three FIFO priority queues, deadline-driven migration between them, and
/// minimum-bandwidth enforcement with proportional compensation across
/// scheduling windows.
///
/// A job that cannot be satisfied this frame is neither dropped nor retried
/// by timeout: it stays queued and is re-evaluated by the same per-frame
/// passes.
pub struct MbqosUlScheduler {
    window_interval: Duration,

    jobs_high: VecDeque<UlJob>,
    jobs_inter: VecDeque<UlJob>,
    jobs_low: VecDeque<UlJob>,

    uplink_allocations: Vec<UlMapIe>,

    is_ir_interval_allocated: bool,
    is_inv_ir_interval_allocated: bool,
    nr_ir_opps_allocated: u8,
    timestamp_ir_interval: Duration,

    dcd_timestamp: Duration,
    ucd_timestamp: Duration,
}

impl MbqosUlScheduler {
    pub fn new(window_interval: Duration) -> MbqosUlScheduler {
        MbqosUlScheduler {
            window_interval,
            jobs_high: VecDeque::new(),
            jobs_inter: VecDeque::new(),
            jobs_low: VecDeque::new(),
            uplink_allocations: Vec::new(),
            is_ir_interval_allocated: false,
            is_inv_ir_interval_allocated: false,
            nr_ir_opps_allocated: 0,
            timestamp_ir_interval: Duration::ZERO,
            dcd_timestamp: Duration::ZERO,
            ucd_timestamp: Duration::ZERO,
        }
    }

    pub fn uplink_allocations(&self) -> &[UlMapIe] {
        &self.uplink_allocations
    }

    pub fn jobs_high(&self) -> &VecDeque<UlJob> {
        &self.jobs_high
    }

    pub fn jobs_intermediate(&self) -> &VecDeque<UlJob> {
        &self.jobs_inter
    }

    pub fn jobs_low(&self) -> &VecDeque<UlJob> {
        &self.jobs_low
    }

    pub fn dump_queues(&self) {
        tracing::info!(
            "UL job queues: high {} inter {} low {}",
            self.jobs_high.len(),
            self.jobs_inter.len(),
            self.jobs_low.len()
        );
        for (name, queue) in [
            ("high", &self.jobs_high),
            ("inter", &self.jobs_inter),
            ("low", &self.jobs_low),
        ] {
            for job in queue {
                tracing::info!(
                    "  [{}] ss {} sfid {} {} {:?} size {} deadline {}ms",
                    name,
                    job.ss,
                    job.sfid,
                    job.scheduling,
                    job.req_type,
                    job.size,
                    job.deadline.as_millis()
                );
            }
        }
    }

    fn add_uplink_allocation(
        &mut self,
        mut ul_map_ie: UlMapIe,
        allocation_size: u32,
        symbols_to_allocation: &mut u32,
        available_symbols: &mut u32,
    ) {
        ul_map_ie.duration = allocation_size;
        ul_map_ie.start_time = *symbols_to_allocation;
        self.uplink_allocations.push(ul_map_ie);
        *symbols_to_allocation += allocation_size;
        *available_symbols -= allocation_size;
    }

    /// The per-frame uplink pass: ranging, per-station admission, deadline
    /// migration, minimum-bandwidth promotion, and the three queue drains.
    pub fn schedule(
        &mut self,
        ctx: &FrameContext,
        dev: &mut UlCtx<'_>,
        available_symbols: u32,
    ) -> UlScheduleResult {
        self.uplink_allocations.clear();
        self.is_ir_interval_allocated = false;
        self.is_inv_ir_interval_allocated = false;
        let mut allocation_for_dsa = false;

        let mut symbols_to_allocation: u32 = 0;
        let mut available = available_symbols;

        self.allocate_initial_ranging_interval(ctx, dev, &mut symbols_to_allocation, &mut available);

        let ss_manager = dev.ss_manager;
        for (ss_id, ss_record) in ss_manager.iter() {
            if ss_record.is_broadcast {
                continue;
            }
            let cid = ss_record.basic_cid;

            if ss_record.poll_for_ranging
                && ss_record.ranging_status == RangingStatus::Continue
            {
                // ranging not complete yet, allocate an invited initial
                // ranging opportunity
                let allocation_size = dev.cfg.rang_req_opp_size;
                self.is_inv_ir_interval_allocated = true;

                if available >= allocation_size {
                    let ie = UlMapIe { cid, uiuc: Uiuc::InitialRanging, start_time: 0, duration: 0 };
                    self.add_uplink_allocation(ie, allocation_size, &mut symbols_to_allocation, &mut available);
                } else {
                    break;
                }
            } else {
                // burst profile may vary over time, resolve it every frame
                let uiuc = Uiuc::BurstProfile(
                    dev.profiles.burst_profile(ss_record.modulation, Direction::Ul),
                );

                if ss_record.ranging_status == RangingStatus::Success
                    && !ss_record.are_service_flows_allocated
                {
                    // grant an opportunity to exchange DSA messages so the
                    // station can establish its service flows; one such
                    // allocation per frame, shared by all stations
                    if !allocation_for_dsa {
                        let allocation_size =
                            dev.phy.required_symbols(dev.cfg.dsa_req_size_bytes, ss_record.modulation);
                        if available >= allocation_size {
                            let ie = UlMapIe { cid, uiuc, start_time: 0, duration: 0 };
                            self.add_uplink_allocation(ie, allocation_size, &mut symbols_to_allocation, &mut available);
                            allocation_for_dsa = true;
                        } else {
                            break;
                        }
                    }
                } else if available > 0 {
                    // all service flows of this station are established

                    if ss_record.has_ugs {
                        // UGS grants are served in place once their next
                        // deadline falls within this or the next frame;
                        // they are never queued
                        if let Some(deadline) = self.first_ugs_deadline(dev.flows, ss_record) {
                            if ctx.frames_until(deadline) <= 1 {
                                self.service_unsolicited_grants(
                                    ctx, dev, ss_id, SchedulingType::Ugs, cid, uiuc,
                                    &mut symbols_to_allocation, &mut available,
                                );
                            }
                        }
                    }

                    // one unicast polling job per class present on the station
                    if ss_record.has_rtps {
                        tracing::debug!("{}: offering rtPS unicast polling to ss {}", ctx, ss_id);
                        self.jobs_high.push_back(self.create_polling_job(dev.flows, ss_id, ss_record, SchedulingType::Rtps));
                    }
                    if ss_record.has_nrtps {
                        tracing::debug!("{}: offering nrtPS unicast polling to ss {}", ctx, ss_id);
                        self.jobs_high.push_back(self.create_polling_job(dev.flows, ss_id, ss_record, SchedulingType::Nrtps));
                    }
                    if ss_record.has_be {
                        tracing::debug!("{}: offering BE unicast polling to ss {}", ctx, ss_id);
                        self.jobs_high.push_back(self.create_polling_job(dev.flows, ss_id, ss_record, SchedulingType::Be));
                    }
                }
            }
        }

        // Budget the deadline and minimum-bandwidth passes against what the
        // high-priority queue will already consume
        let high_symbols = self.count_symbols_queue(ctx, dev, &self.jobs_high);
        let mut available_aux = available.saturating_sub(high_symbols);

        self.check_deadline(ctx, dev, &mut available_aux);
        self.check_minimum_bandwidth(ctx, dev, &mut available_aux);

        tracing::debug!(
            "{}: draining queues, high {} inter {} low {}, {} symbols",
            ctx,
            self.jobs_high.len(),
            self.jobs_inter.len(),
            self.jobs_low.len(),
            available
        );

        // Drain high, then intermediate, then low, strictly in that order
        while available > 0 {
            let Some(job) = self.jobs_high.front().cloned() else { break };
            let Some(ss_record) = dev.ss_manager.get(job.ss) else {
                let _ = self.jobs_high.pop_front();
                continue;
            };
            let cid = ss_record.basic_cid;
            let modulation = ss_record.modulation;
            let uiuc = Uiuc::BurstProfile(dev.profiles.burst_profile(modulation, Direction::Ul));

            match job.req_type {
                ReqType::UnicastPolling => {
                    self.service_unsolicited_grants(
                        ctx, dev, job.ss, job.scheduling, cid, uiuc,
                        &mut symbols_to_allocation, &mut available,
                    );
                    let _ = self.jobs_high.pop_front();
                }
                ReqType::Data => {
                    let serviced = self.service_bandwidth_requests_bytes(
                        ctx, dev, job.sfid, cid, uiuc, modulation, job.size,
                        &mut symbols_to_allocation, &mut available,
                    );
                    if serviced {
                        let _ = self.jobs_high.pop_front();
                    } else {
                        // insufficient budget: the job stays at the front
                        // and is re-evaluated next frame
                        break;
                    }
                }
            }
        }

        for priority in [JobQueue::Intermediate, JobQueue::Low] {
            while available > 0 {
                let Some(job) = self.queue(priority).front().cloned() else { break };
                assert!(
                    job.req_type == ReqType::Data,
                    "{:?} priority queue only should enqueue data jobs",
                    priority
                );
                let Some(ss_record) = dev.ss_manager.get(job.ss) else {
                    let _ = self.queue_mut(priority).pop_front();
                    continue;
                };
                let cid = ss_record.basic_cid;
                let modulation = ss_record.modulation;
                let uiuc = Uiuc::BurstProfile(dev.profiles.burst_profile(modulation, Direction::Ul));
                let flow_ids = Self::flows_of_ss(dev.flows, ss_record, job.scheduling);

                let mut serviced = true;
                for sfid in flow_ids {
                    if !self.service_bandwidth_requests(
                        ctx, dev, sfid, cid, uiuc, modulation,
                        &mut symbols_to_allocation, &mut available,
                    ) {
                        serviced = false;
                        break;
                    }
                }
                if serviced {
                    let _ = self.queue_mut(priority).pop_front();
                } else {
                    break;
                }
            }
        }

        // Close the map with the end-of-map sentinel
        self.uplink_allocations.push(UlMapIe {
            cid: Cid::initial_ranging(),
            uiuc: Uiuc::EndOfMap,
            start_time: symbols_to_allocation,
            duration: 0,
        });

        UlScheduleResult {
            map: self.uplink_allocations.clone(),
            symbols_used: available_symbols - available,
            symbols_left: available,
        }
    }

    /// Deadline of the station's first UGS flow: last grant plus the
    /// unsolicited grant interval
    fn first_ugs_deadline(&self, flows: &ServiceFlowManager, ss_record: &SsRecord) -> Option<Duration> {
        for sfid in &ss_record.service_flows {
            if let Some(flow) = flows.get(*sfid) {
                if flow.scheduling == SchedulingType::Ugs {
                    return Some(flow.record.last_grant_time + flow.unsolicited_grant_interval());
                }
            }
        }
        None
    }

    fn flows_of_ss(
        flows: &ServiceFlowManager,
        ss_record: &SsRecord,
        scheduling: SchedulingType,
    ) -> Vec<Sfid> {
        ss_record
            .service_flows
            .iter()
            .copied()
            .filter(|sfid| flows.get(*sfid).is_some_and(|f| f.scheduling == scheduling))
            .collect()
    }

    fn create_polling_job(
        &self,
        flows: &ServiceFlowManager,
        ss_id: SsId,
        ss_record: &SsRecord,
        scheduling: SchedulingType,
    ) -> UlJob {
        let sfid = Self::flows_of_ss(flows, ss_record, scheduling)
            .first()
            .copied()
            .unwrap_or(0);
        UlJob {
            ss: ss_id,
            sfid,
            scheduling,
            req_type: ReqType::UnicastPolling,
            size: 0,
            release_time: Duration::ZERO,
            period: Duration::ZERO,
            deadline: Duration::ZERO,
        }
    }

    /// Symbols a job will consume when drained, without committing anything
    fn count_symbols_job(&self, ctx: &FrameContext, dev: &UlCtx<'_>, job: &UlJob) -> u32 {
        match job.req_type {
            ReqType::UnicastPolling => {
                let Some(flow) = dev.flows.get(job.sfid) else { return 0 };
                if ctx.elapsed_since(flow.record.grant_timestamp)
                    >= flow.unsolicited_polling_interval()
                {
                    dev.cfg.bw_req_opp_size
                } else {
                    0
                }
            }
            ReqType::Data => {
                let Some(flow) = dev.flows.get(job.sfid) else { return 0 };
                let required = flow
                    .record
                    .requested_bandwidth
                    .saturating_sub(flow.record.granted_bandwidth);
                if required == 0 {
                    return 0;
                }
                let modulation = dev
                    .ss_manager
                    .get(job.ss)
                    .map_or(ModulationType::Bpsk12, |ss| ss.modulation);
                if flow.sdu_size > 0 {
                    dev.phy.required_symbols(flow.sdu_size as u32, modulation)
                } else {
                    dev.phy.required_symbols(required, modulation)
                }
            }
        }
    }

    fn count_symbols_queue(&self, ctx: &FrameContext, dev: &UlCtx<'_>, jobs: &VecDeque<UlJob>) -> u32 {
        jobs.iter().map(|job| self.count_symbols_job(ctx, dev, job)).sum()
    }

    /// Step 3: walk the intermediate queue and split rtPS jobs whose
    /// deadline is within reach of missing into high-priority slices, as
    /// large as the remaining budget allows. The residual keeps its place
    /// and deadline.
    fn check_deadline(&mut self, ctx: &FrameContext, dev: &UlCtx<'_>, available_symbols: &mut u32) {
        let mut i = 0;
        while i < self.jobs_inter.len() && *available_symbols > 0 {
            let job = &self.jobs_inter[i];

            // delay bound only applies to rtPS connections
            if job.scheduling != SchedulingType::Rtps {
                i += 1;
                continue;
            }

            let frames = ctx.frames_until(job.deadline);
            if frames > DEADLINE_MIGRATION_FRAMES {
                i += 1;
                continue;
            }

            let modulation = dev
                .ss_manager
                .get(job.ss)
                .map_or(ModulationType::Bpsk12, |ss| ss.modulation);

            let available_bytes = dev.phy.required_bytes(*available_symbols, modulation);
            let mut allocation_size = job.size.min(available_bytes);
            if allocation_size == 0 {
                i += 1;
                continue;
            }
            let mut symbols_to_allocate = dev.phy.required_symbols(allocation_size, modulation);
            if symbols_to_allocate > *available_symbols {
                symbols_to_allocate = *available_symbols;
                allocation_size = dev.phy.required_bytes(symbols_to_allocate, modulation);
            }

            tracing::debug!(
                "{}: deadline migration, sfid {} {} bytes of {} (deadline in {} frames)",
                ctx,
                job.sfid,
                allocation_size,
                job.size,
                frames
            );

            let mut migrated = job.clone();
            migrated.size = allocation_size;
            let residual = job.size - allocation_size;

            self.jobs_high.push_back(migrated);
            *available_symbols -= symbols_to_allocate;

            if residual == 0 {
                let _ = self.jobs_inter.remove(i);
            } else {
                self.jobs_inter[i].size = residual;
                i += 1;
            }
        }
    }

    /// Minimum bytes a flow is entitled to per scheduling window
    fn min_bw_per_window(&self, min_reserved_traffic_rate: u32) -> i64 {
        (min_reserved_traffic_rate as u64 * self.window_interval.as_millis() as u64 / 1000) as i64
    }

    /// Step 4: promote backlogged rtPS/nrtPS jobs still under their minimum
    /// reserved rate into the high queue, most starved first. Flows already
    /// at their floor sort behind everyone else; priority ties are broken
    /// in favor of the smaller backlog.
    fn check_minimum_bandwidth(&mut self, ctx: &FrameContext, dev: &mut UlCtx<'_>, available_symbols: &mut u32) {
        // refresh the temp shadows the priority formula works on
        for flow in dev.flows.iter_mut() {
            if matches!(flow.scheduling, SchedulingType::Rtps | SchedulingType::Nrtps) {
                flow.record.backlogged_temp = flow.record.backlogged as i64;
                flow.record.granted_bandwidth_temp = flow.record.bw_since_last_expiry;
            }
        }

        let mut candidates: Vec<PriorityUlJob> = Vec::new();
        for (index, job) in self.jobs_inter.iter().enumerate() {
            if !matches!(job.scheduling, SchedulingType::Rtps | SchedulingType::Nrtps) {
                continue;
            }
            let Some(flow) = dev.flows.get_mut(job.sfid) else { continue };
            if flow.record.backlogged == 0 {
                continue;
            }

            let min_bw = self.min_bw_per_window(flow.min_reserved_traffic_rate);
            let priority = if min_bw <= flow.record.bw_since_last_expiry {
                PRIORITY_SATISFIED
            } else {
                let mut allocation_size = flow
                    .record
                    .requested_bandwidth
                    .saturating_sub(flow.record.granted_bandwidth);
                if allocation_size > 0 && flow.sdu_size > 0 {
                    allocation_size = flow.sdu_size as u32;
                }
                let priority = flow.record.backlogged_temp
                    - (flow.record.granted_bandwidth_temp - min_bw);
                // project the would-be grant so later jobs of the same flow
                // see the updated picture
                flow.record.granted_bandwidth_temp += allocation_size as i64;
                flow.record.backlogged_temp -= allocation_size as i64;
                priority
            };

            candidates.push(PriorityUlJob {
                priority,
                backlogged: dev.flows.get(job.sfid).map_or(0, |f| f.record.backlogged),
                index,
            });
        }

        sort_priority_jobs(&mut candidates);

        let mut promote_order: Vec<usize> = Vec::new();
        for candidate in &candidates {
            if *available_symbols == 0 {
                break;
            }
            let job = &self.jobs_inter[candidate.index];
            let cost = self.count_symbols_job(ctx, dev, job);
            *available_symbols = available_symbols.saturating_sub(cost);
            promote_order.push(candidate.index);
        }

        if promote_order.is_empty() {
            return;
        }

        // migrate in promotion order; a job is never in two queues at once
        let mut taken = vec![false; self.jobs_inter.len()];
        for index in &promote_order {
            taken[*index] = true;
        }
        for index in promote_order {
            self.jobs_high.push_back(self.jobs_inter[index].clone());
        }
        let mut kept = VecDeque::new();
        for (i, job) in self.jobs_inter.drain(..).enumerate() {
            if !taken[i] {
                kept.push_back(job);
            }
        }
        self.jobs_inter = kept;
    }

    /// Service every flow of one scheduling class on a station: UGS flows
    /// get their fixed data grant, the polling classes get a unicast
    /// bandwidth-request opportunity at the most robust modulation.
    #[allow(clippy::too_many_arguments)]
    fn service_unsolicited_grants(
        &mut self,
        ctx: &FrameContext,
        dev: &mut UlCtx<'_>,
        ss_id: SsId,
        scheduling: SchedulingType,
        cid: Cid,
        uiuc: Uiuc,
        symbols_to_allocation: &mut u32,
        available_symbols: &mut u32,
    ) {
        let ss_manager = dev.ss_manager;
        let bandwidth = dev.bandwidth;
        let bw_req_opp_size = dev.cfg.bw_req_opp_size;
        let Some(ss_record) = ss_manager.get(ss_id) else { return };
        let flow_ids = Self::flows_of_ss(dev.flows, ss_record, scheduling);

        for sfid in flow_ids {
            let Some(flow) = dev.flows.get_mut(sfid) else { continue };
            let allocation_size =
                bandwidth.calculate_allocation_size(ctx, ss_record, flow, bw_req_opp_size);

            if *available_symbols < allocation_size {
                break;
            }
            if allocation_size == 0 {
                continue;
            }

            // unicast polls are sent in a request region at the most robust
            // modulation; UGS data grants use the station's burst profile
            let ie_uiuc = if scheduling == SchedulingType::Ugs {
                tracing::debug!("UL scheduler: UGS allocation, size {} symbols, cid {}", allocation_size, cid);
                uiuc
            } else {
                tracing::debug!(
                    "UL scheduler: {} unicast poll, size {} symbols, cid {}",
                    scheduling,
                    allocation_size,
                    cid
                );
                Uiuc::ReqRegionFull
            };

            flow.record.last_grant_time = ctx.now;
            let ie = UlMapIe { cid, uiuc: ie_uiuc, start_time: 0, duration: 0 };
            self.add_uplink_allocation(ie, allocation_size, symbols_to_allocation, available_symbols);
        }
    }

    /// Grant a high-queue data job: as many of its bytes as the remaining
    /// budget can carry. Returns false when nothing can be granted this
    /// frame, leaving the job in place.
    #[allow(clippy::too_many_arguments)]
    fn service_bandwidth_requests_bytes(
        &mut self,
        ctx: &FrameContext,
        dev: &mut UlCtx<'_>,
        sfid: Sfid,
        cid: Cid,
        uiuc: Uiuc,
        modulation: ModulationType,
        allocation_size_bytes: u32,
        symbols_to_allocation: &mut u32,
        available_symbols: &mut u32,
    ) -> bool {
        let phy = dev.phy;
        let Some(flow) = dev.flows.get_mut(sfid) else { return true };
        if flow.record.requested_bandwidth == 0 {
            return true;
        }

        let mut alloc_bytes = allocation_size_bytes;
        let mut alloc_symbols = phy.required_symbols(alloc_bytes, modulation);
        if alloc_symbols > *available_symbols {
            alloc_symbols = *available_symbols;
            alloc_bytes = phy.required_bytes(alloc_symbols, modulation);
        }
        if alloc_bytes == 0 {
            return false;
        }

        tracing::debug!(
            "{}: UL scheduler, {} allocation, {} symbols, cid {}, sfid {}, requested {}, granting {} bytes",
            ctx,
            flow.scheduling,
            alloc_symbols,
            cid,
            sfid,
            flow.record.requested_bandwidth,
            alloc_bytes
        );

        let record = &mut flow.record;
        record.granted_bandwidth_temp += alloc_bytes as i64;
        record.granted_bandwidth = record.granted_bandwidth.saturating_add(alloc_bytes);
        record.requested_bandwidth = record.requested_bandwidth.saturating_sub(alloc_bytes);
        record.bw_since_last_expiry += alloc_bytes as i64;
        record.backlogged = record.backlogged.saturating_sub(alloc_bytes);
        record.last_grant_time = ctx.now;

        let ie = UlMapIe { cid, uiuc, start_time: 0, duration: 0 };
        self.add_uplink_allocation(ie, alloc_symbols, symbols_to_allocation, available_symbols);
        true
    }

    /// Grant one flow's outstanding demand (or one SDU of it) from the
    /// intermediate/low queues. Returns false on insufficient budget.
    #[allow(clippy::too_many_arguments)]
    fn service_bandwidth_requests(
        &mut self,
        ctx: &FrameContext,
        dev: &mut UlCtx<'_>,
        sfid: Sfid,
        cid: Cid,
        uiuc: Uiuc,
        modulation: ModulationType,
        symbols_to_allocation: &mut u32,
        available_symbols: &mut u32,
    ) -> bool {
        let phy = dev.phy;
        let Some(flow) = dev.flows.get_mut(sfid) else { return true };

        let required_bandwidth = flow
            .record
            .requested_bandwidth
            .saturating_sub(flow.record.granted_bandwidth);
        if required_bandwidth == 0 {
            return true;
        }

        // a declared SDU size fixes the grant quantum
        let alloc_bytes = if flow.sdu_size > 0 { flow.sdu_size as u32 } else { required_bandwidth };
        let alloc_symbols = phy.required_symbols(alloc_bytes, modulation);

        if *available_symbols < alloc_symbols {
            return false;
        }

        tracing::debug!(
            "{}: UL scheduler, {} allocation, {} symbols, cid {}, sfid {}, requested {}, granted {}",
            ctx,
            flow.scheduling,
            alloc_symbols,
            cid,
            sfid,
            flow.record.requested_bandwidth,
            flow.record.granted_bandwidth
        );

        let record = &mut flow.record;
        record.granted_bandwidth = record.granted_bandwidth.saturating_add(alloc_bytes);
        record.bw_since_last_expiry += alloc_bytes as i64;
        record.backlogged = record.backlogged.saturating_sub(alloc_bytes);
        record.last_grant_time = ctx.now;

        let ie = UlMapIe { cid, uiuc, start_time: 0, duration: 0 };
        self.add_uplink_allocation(ie, alloc_symbols, symbols_to_allocation, available_symbols);
        true
    }

    /// Step 1: the contention-based initial ranging interval, allocated
    /// once its interval elapses. One frame of slack is added because the
    /// interval may elapse before the next frame goes out.
    fn allocate_initial_ranging_interval(
        &mut self,
        ctx: &FrameContext,
        dev: &UlCtx<'_>,
        symbols_to_allocation: &mut u32,
        available_symbols: &mut u32,
    ) {
        self.nr_ir_opps_allocated = dev.cfg.ranging_opps_per_interval;
        let allocation_size = self.nr_ir_opps_allocated as u32 * dev.cfg.rang_req_opp_size;
        let interval = Duration::from_millis(dev.cfg.initial_ranging_interval_ms as u64);
        let since_last = ctx.elapsed_since(self.timestamp_ir_interval);

        if since_last + ctx.frame_duration > interval && *available_symbols >= allocation_size {
            self.is_ir_interval_allocated = true;
            tracing::debug!(
                "UL scheduler: initial ranging allocation, {} opportunities, {} symbols",
                self.nr_ir_opps_allocated,
                allocation_size
            );
            let ie = UlMapIe {
                cid: Cid::broadcast(),
                uiuc: Uiuc::InitialRanging,
                start_time: 0,
                duration: 0,
            };
            self.add_uplink_allocation(ie, allocation_size, symbols_to_allocation, available_symbols);
            self.timestamp_ir_interval = ctx.now;
        }
    }

    /// Bytes already covered by queued intermediate jobs of a flow.
    /// New requests are reduced by this amount so outstanding demand is
    /// merged, not accumulated.
    pub fn get_pending_size(&self, sfid: Sfid) -> u32 {
        self.jobs_inter
            .iter()
            .filter(|job| job.sfid == sfid)
            .map(|job| job.size)
            .sum()
    }

    /// BS side: fold a received bandwidth request into a data job.
    /// rtPS/nrtPS demand queues intermediate, BE queues low. Unroutable
    /// requests were already dropped by the bandwidth manager.
    pub fn process_bandwidth_request(
        &mut self,
        ctx: &FrameContext,
        connections: &ConnectionManager,
        flows: &ServiceFlowManager,
        ss_manager: &SsManager,
        request: &BandwidthRequest,
    ) {
        let Some(connection) = connections.get_connection(request.cid) else { return };
        let Some(sfid) = connection.service_flow else { return };
        let Some(flow) = flows.get(sfid) else { return };
        let Some(ss_id) = ss_manager.by_service_flow(sfid) else { return };

        let pending = self.get_pending_size(sfid);
        let size = request.bytes.saturating_sub(pending);
        if size == 0 {
            return;
        }

        let deadline = self.determine_deadline(flow);

        tracing::debug!(
            "{}: bandwidth request from ss {} sfid {} ({}), size {} (aggregate {}), deadline {}ms",
            ctx,
            ss_id,
            sfid,
            flow.scheduling,
            size,
            request.bytes,
            deadline.as_millis()
        );

        let job = UlJob {
            ss: ss_id,
            sfid,
            scheduling: flow.scheduling,
            req_type: ReqType::Data,
            size,
            release_time: ctx.now,
            period: deadline,
            deadline,
        };

        match flow.scheduling {
            SchedulingType::Rtps | SchedulingType::Nrtps => self.jobs_inter.push_back(job),
            _ => self.jobs_low.push_back(job),
        }
    }

    /// Deadline of a request: the flow's latency bound counted from its
    /// last grant
    fn determine_deadline(&self, flow: &ServiceFlow) -> Duration {
        flow.record.last_grant_time + flow.max_latency()
    }

    /// The per-window minimum-bandwidth meter reset, called by an external
    /// timer every window interval. A backlogged flow that missed its
    /// minimum carries the deficit into the next window as a negative
    /// meter value.
    pub fn uplink_sched_window_timer(&mut self, flows: &mut ServiceFlowManager) {
        tracing::debug!("UL scheduler: window reset");
        for flow in flows.iter_mut() {
            if !matches!(flow.scheduling, SchedulingType::Rtps | SchedulingType::Nrtps) {
                continue;
            }
            let min_bw = self.min_bw_per_window(flow.min_reserved_traffic_rate);
            let record = &mut flow.record;
            if record.backlogged > 0 && record.bw_since_last_expiry < min_bw {
                record.bw_since_last_expiry -= min_bw;
                // a flow with less backlog than deficit only needs its
                // backlog compensated
                if (record.backlogged as i64) < record.bw_since_last_expiry {
                    record.bw_since_last_expiry = -(record.backlogged as i64);
                }
            } else {
                record.bw_since_last_expiry = 0;
            }
        }
    }

    /// Admission-time sizing, called once per admitted flow before the
    /// scheduler ever sees it. UGS flows get a fixed per-frame grant and a
    /// grant interval derived from their tolerated jitter; the polling
    /// classes get their polling cadence.
    pub fn setup_service_flow(&self, phy: &dyn PhyPort, ss_record: &SsRecord, flow: &mut ServiceFlow) {
        let frame_duration_ms = phy.frame_duration().as_millis() as u32;

        match flow.scheduling {
            SchedulingType::Ugs => {
                let modulation = if flow.is_multicast { flow.modulation } else { ss_record.modulation };
                let bytes_per_frame = (flow.min_reserved_traffic_rate as u64
                    * phy.frame_duration().as_micros() as u64
                    / 1_000_000) as u32;
                flow.record.grant_size = phy.required_symbols(bytes_per_frame, modulation);

                let mut delay_nr_frames: u32 = 1;
                if flow.tolerated_jitter_ms > frame_duration_ms {
                    delay_nr_frames = flow.tolerated_jitter_ms / frame_duration_ms;
                }
                flow.unsolicited_grant_interval_ms = delay_nr_frames * frame_duration_ms;
            }
            SchedulingType::Rtps => {
                flow.unsolicited_polling_interval_ms = 20;
            }
            SchedulingType::Nrtps => {
                // no real-time guarantees, serviced on available bandwidth
                flow.unsolicited_polling_interval_ms = 1000;
            }
            SchedulingType::Be => {
                // no guarantees at all
            }
        }
    }

    /// Decide whether the DCD/UCD channel descriptors go out this frame.
    /// Descriptors should follow burst profile churn; with none modeled,
    /// a randomized resend plus an interval-based forcing stands in.
    pub fn get_channel_descriptors_to_update(
        &mut self,
        ctx: &FrameContext,
        nr_dcd_sent: u32,
        nr_ucd_sent: u32,
        descriptor_interval: Duration,
    ) -> (bool, bool) {
        let mut rng = rand::rng();
        let mut send_dcd = rng.random_range(0..5) == 0 || nr_dcd_sent == 0;
        let mut send_ucd = rng.random_range(0..5) == 0 || nr_ucd_sent == 0;

        // resend a little more often than the base rate
        if !send_dcd && rng.random_range(0..4) == 0 {
            send_dcd = true;
        }
        if !send_ucd && rng.random_range(0..4) == 0 {
            send_ucd = true;
        }

        if ctx.elapsed_since(self.dcd_timestamp) > descriptor_interval {
            send_dcd = true;
            self.dcd_timestamp = ctx.now;
        }
        if ctx.elapsed_since(self.ucd_timestamp) > descriptor_interval {
            send_ucd = true;
            self.ucd_timestamp = ctx.now;
        }

        (send_dcd, send_ucd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobQueue {
    Intermediate,
    Low,
}

impl MbqosUlScheduler {
    fn queue(&self, which: JobQueue) -> &VecDeque<UlJob> {
        match which {
            JobQueue::Intermediate => &self.jobs_inter,
            JobQueue::Low => &self.jobs_low,
        }
    }

    fn queue_mut(&mut self, which: JobQueue) -> &mut VecDeque<UlJob> {
        match which {
            JobQueue::Intermediate => &mut self.jobs_inter,
            JobQueue::Low => &mut self.jobs_low,
        }
    }
}
