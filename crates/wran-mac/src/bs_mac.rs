use std::sync::Arc;
use std::time::Duration;

use wran_core::{Cid, CidType, FrameContext, ModulationType, PhyPort, Sfid, SsId};

use wran_config::{DlSchedulerKind, SharedConfig, StackConfig};

use crate::bandwidth_manager::{BandwidthManager, BandwidthRequest};
use crate::connection_manager::ConnectionManager;
use crate::dl_scheduler::{DlCtx, DlScheduler, RtpsDlScheduler, SimpleDlScheduler};
use crate::map::{BurstProfileManager, DlBurst, UlMapIe};
use crate::service_flow::{DsaState, SchedulingType, ServiceFlow};
use crate::service_flow_manager::{AdmissionError, ServiceFlowManager};
use crate::ss_manager::SsManager;
use crate::ss_record::{MacAddress, RangingStatus, SsRecord};
use crate::ul_scheduler_mbqos::{MbqosUlScheduler, UlCtx};

/// Everything one frame pass produced: the downlink bursts for the PHY and
/// the uplink map for the map-message encoder.
#[derive(Debug)]
pub struct FrameSchedule {
    pub dl_bursts: Vec<DlBurst>,
    pub ul_map: Vec<UlMapIe>,
    pub dl_symbols_used: u32,
    pub ul_symbols_used: u32,
    pub send_dcd: bool,
    pub send_ucd: bool,
}

/// The base-station MAC: owns the connection/station/flow bookkeeping and
/// the schedulers, and runs one downlink + uplink scheduling pass per frame.
///
/// Single-threaded and frame-clocked: the external frame driver calls
/// `on_frame` once per frame boundary, and the protocol timers call
/// `uplink_sched_window_timer` / `dsa_timer_expired` when they fire.
pub struct BsMac {
    config: Arc<StackConfig>,
    phy: Box<dyn PhyPort>,

    pub connections: ConnectionManager,
    pub ss_manager: SsManager,
    pub flows: ServiceFlowManager,
    pub bandwidth: BandwidthManager,
    pub burst_profiles: BurstProfileManager,

    dl_scheduler: Box<dyn DlScheduler>,
    pub ul_scheduler: MbqosUlScheduler,

    nr_dl_symbols: u32,
    nr_ul_symbols: u32,
    nr_dcd_sent: u32,
    nr_ucd_sent: u32,
}

impl BsMac {
    pub fn new(cfg: SharedConfig, phy: Box<dyn PhyPort>) -> BsMac {
        let config = cfg.config();

        let dl_scheduler: Box<dyn DlScheduler> = match config.scheduler.dl_scheduler {
            DlSchedulerKind::Simple => Box::new(SimpleDlScheduler::new()),
            DlSchedulerKind::Rtps => Box::new(RtpsDlScheduler::new()),
        };
        let ul_scheduler = MbqosUlScheduler::new(Duration::from_millis(
            config.scheduler.window_interval_ms as u64,
        ));

        let bandwidth = BandwidthManager::new();
        let (nr_dl_symbols, nr_ul_symbols) = bandwidth.set_subframe_ratio(phy.as_ref());

        BsMac {
            config,
            phy,
            connections: ConnectionManager::new(),
            ss_manager: SsManager::new(),
            flows: ServiceFlowManager::new(),
            bandwidth,
            burst_profiles: BurstProfileManager::new(),
            dl_scheduler,
            ul_scheduler,
            nr_dl_symbols,
            nr_ul_symbols,
            nr_dcd_sent: 0,
            nr_ucd_sent: 0,
        }
    }

    pub fn phy(&self) -> &dyn PhyPort {
        self.phy.as_ref()
    }

    pub fn nr_dl_symbols(&self) -> u32 {
        self.nr_dl_symbols
    }

    pub fn nr_ul_symbols(&self) -> u32 {
        self.nr_ul_symbols
    }

    /// Register a new subscriber station. Its management connection pair is
    /// allocated immediately; ranging starts in Continue state.
    pub fn register_ss(&mut self, mac_address: MacAddress) -> SsId {
        // placeholder cids, overwritten by the management allocation below
        let mut record = SsRecord::new(mac_address, Cid::padding(), Cid::padding());
        let (basic, primary) = self.connections.allocate_management_connections(&mut record);
        record.ranging_status = RangingStatus::Continue;
        let ss_id = self.ss_manager.register(record);
        tracing::info!(
            "registered SS {} ({}), basic cid {}, primary cid {}",
            ss_id,
            mac_address,
            basic,
            primary
        );
        ss_id
    }

    /// Ranging completed: the station may negotiate service flows
    pub fn complete_ranging(&mut self, ss_id: SsId, modulation: ModulationType) {
        if let Some(record) = self.ss_manager.get_mut(ss_id) {
            record.ranging_status = RangingStatus::Success;
            record.poll_for_ranging = false;
            record.modulation = modulation;
        }
    }

    /// Start admission of a service flow for a station: validates the QoS
    /// contract, fixes grant size / polling cadence, binds a transport
    /// connection, and registers the flow in Requested state.
    ///
    /// A UGS flow whose fixed grant cannot fit the uplink subframe is
    /// rejected here, before the scheduler ever sees it.
    pub fn add_service_flow(
        &mut self,
        ss_id: SsId,
        mut flow: ServiceFlow,
    ) -> Result<Sfid, AdmissionError> {
        let Some(ss_record) = self.ss_manager.get(ss_id) else {
            return Err(AdmissionError::UnknownServiceFlow { sfid: 0 });
        };

        self.ul_scheduler.setup_service_flow(self.phy.as_ref(), ss_record, &mut flow);

        if flow.scheduling == SchedulingType::Ugs {
            // the fixed grant must fit next to every already-admitted grant
            let allocated =
                self.bandwidth.symbols_per_frame_allocated(&self.ss_manager, &self.flows);
            let needed = flow.record.grant_size + allocated;
            if needed > self.nr_ul_symbols {
                tracing::warn!(
                    "rejecting UGS flow for SS {}: grant {} + allocated {} symbols > budget {}",
                    ss_id,
                    flow.record.grant_size,
                    allocated,
                    self.nr_ul_symbols
                );
                return Err(AdmissionError::GrantExceedsFrameBudget {
                    needed,
                    budget: self.nr_ul_symbols,
                });
            }
        }

        let cid = self.connections.create_connection(CidType::Transport);
        flow.connection = Some(cid);
        let scheduling = flow.scheduling;
        let sfid = self.flows.add(flow);
        if let Some(connection) = self.connections.get_connection_mut(cid) {
            connection.service_flow = Some(sfid);
        }
        tracing::debug!(
            "service flow {} ({}) requested for SS {}, transport cid {}",
            sfid,
            scheduling,
            ss_id,
            cid
        );
        Ok(sfid)
    }

    /// DSA-RSP received from the station
    pub fn dsa_acked(&mut self, sfid: Sfid) {
        self.flows.dsa_acked(sfid);
    }

    /// Final DSA-ACK: the flow becomes schedulable and the station record
    /// learns about it
    pub fn admit_service_flow(&mut self, ss_id: SsId, sfid: Sfid) -> Result<(), AdmissionError> {
        self.flows.admit(sfid)?;
        let scheduling = match self.flows.get(sfid) {
            Some(flow) => flow.scheduling,
            None => return Err(AdmissionError::UnknownServiceFlow { sfid }),
        };
        if let Some(record) = self.ss_manager.get_mut(ss_id) {
            record.add_service_flow_ref(sfid, scheduling);
        }
        Ok(())
    }

    /// All negotiated flows of the station are established; the uplink
    /// scheduler stops offering DSA opportunities to it
    pub fn mark_service_flows_allocated(&mut self, ss_id: SsId) {
        if let Some(record) = self.ss_manager.get_mut(ss_id) {
            record.are_service_flows_allocated = true;
        }
    }

    /// Convenience for drivers and tests: register + admit + mark in one
    /// step, skipping the wire-level DSA exchange.
    pub fn admit_service_flow_directly(
        &mut self,
        ss_id: SsId,
        flow: ServiceFlow,
    ) -> Result<Sfid, AdmissionError> {
        let sfid = self.add_service_flow(ss_id, flow)?;
        self.flows.dsa_acked(sfid);
        self.admit_service_flow(ss_id, sfid)?;
        self.mark_service_flows_allocated(ss_id);
        Ok(sfid)
    }

    /// External DSA retry timer fired for a pending flow setup
    pub fn dsa_timer_expired(&mut self, sfid: Sfid) -> DsaState {
        self.flows.dsa_timer_expired(sfid, self.config.mac.max_dsa_retries)
    }

    /// External window timer fired: reset the per-window minimum-bandwidth
    /// meters
    pub fn uplink_sched_window_timer(&mut self) {
        self.ul_scheduler.uplink_sched_window_timer(&mut self.flows);
    }

    /// A bandwidth request arrived on the uplink. Updates the flow record
    /// and feeds the uplink scheduler's job queues. Requests referencing an
    /// unknown connection are dropped silently.
    pub fn process_bandwidth_request(&mut self, ctx: &FrameContext, request: &BandwidthRequest) {
        let resolved =
            self.bandwidth
                .process_bandwidth_request(&mut self.flows, &self.connections, request);
        if resolved.is_none() {
            return;
        }
        self.ul_scheduler.process_bandwidth_request(
            ctx,
            &self.connections,
            &self.flows,
            &self.ss_manager,
            request,
        );
    }

    /// One MAC frame: downlink pass, then uplink pass, then the subframe
    /// split for the next frame.
    pub fn on_frame(&mut self, ctx: &FrameContext) -> FrameSchedule {
        let mut dl_ctx = DlCtx {
            phy: self.phy.as_ref(),
            connections: &mut self.connections,
            ss_manager: &self.ss_manager,
            flows: &mut self.flows,
            profiles: &self.burst_profiles,
        };
        let dl = self.dl_scheduler.schedule(ctx, &mut dl_ctx, self.nr_dl_symbols);

        let mut ul_ctx = UlCtx {
            phy: self.phy.as_ref(),
            ss_manager: &self.ss_manager,
            flows: &mut self.flows,
            profiles: &self.burst_profiles,
            bandwidth: &self.bandwidth,
            cfg: &self.config.mac,
        };
        let ul = self.ul_scheduler.schedule(ctx, &mut ul_ctx, self.nr_ul_symbols);

        wran_core::assert_warn!(
            dl.symbols_used <= self.nr_dl_symbols && ul.symbols_used <= self.nr_ul_symbols,
            "{}: subframe budget overrun (dl {}/{}, ul {}/{})",
            ctx,
            dl.symbols_used,
            self.nr_dl_symbols,
            ul.symbols_used,
            self.nr_ul_symbols
        );

        let descriptor_interval =
            Duration::from_millis(self.config.mac.descriptor_interval_ms as u64);
        let (send_dcd, send_ucd) = self.ul_scheduler.get_channel_descriptors_to_update(
            ctx,
            self.nr_dcd_sent,
            self.nr_ucd_sent,
            descriptor_interval,
        );
        if send_dcd {
            self.nr_dcd_sent += 1;
        }
        if send_ucd {
            self.nr_ucd_sent += 1;
        }

        // DL/UL subframe split for the next frame
        let (dl_symbols, ul_symbols) = self.bandwidth.set_subframe_ratio(self.phy.as_ref());
        self.nr_dl_symbols = dl_symbols;
        self.nr_ul_symbols = ul_symbols;

        FrameSchedule {
            dl_bursts: dl.bursts,
            ul_map: ul.map,
            dl_symbols_used: dl.symbols_used,
            ul_symbols_used: ul.symbols_used,
            send_dcd,
            send_ucd,
        }
    }
}
