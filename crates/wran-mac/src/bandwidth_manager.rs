use wran_core::{Cid, FrameContext, PhyPort, Sfid};

use crate::connection_manager::ConnectionManager;
use crate::queue::{MacPacket, MacPacketKind};
use crate::service_flow::{SchedulingType, ServiceFlow};
use crate::service_flow_manager::ServiceFlowManager;
use crate::ss_manager::SsManager;
use crate::ss_record::SsRecord;

/// Byte size of a bandwidth request header on the air
pub const BW_REQUEST_HEADER_BYTES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthRequestKind {
    /// Add the requested bytes to the flow's outstanding demand
    Incremental,
    /// Replace the flow's outstanding demand with the requested bytes
    Aggregate,
}

/// The logical content of a bandwidth request: which connection asks, and
/// for how many bytes (MAC overhead included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthRequest {
    pub kind: BandwidthRequestKind,
    pub cid: Cid,
    pub bytes: u32,
}

/// Translates QoS-class semantics into grant opportunity sizes and drives
/// the request/grant handshake: the SS side builds and sends requests, the
/// BS side folds received requests into the flow records.
#[derive(Debug, Default)]
pub struct BandwidthManager {
    pub nr_bw_reqs_sent: u32,
}

impl BandwidthManager {
    pub fn new() -> BandwidthManager {
        BandwidthManager::default()
    }

    /// How many symbols a grant opportunity for this flow should carry
    /// right now.
    ///
    /// UGS: the fixed grant, re-issued only once the unsolicited grant
    /// interval elapsed. rtPS: a request opportunity on its polling
    /// interval. nrtPS/BE: a request opportunity whenever asked, they are
    /// serviced purely on leftover bandwidth.
    ///
    /// If the station has a UGS flow, its non-UGS flows are polled only
    /// when the station set the poll-me bit; opportunities are not wasted
    /// on stations with nothing to say outside their UGS flow.
    pub fn calculate_allocation_size(
        &self,
        ctx: &FrameContext,
        ss_record: &SsRecord,
        service_flow: &mut ServiceFlow,
        bw_req_opp_size: u32,
    ) -> u32 {
        if service_flow.scheduling != SchedulingType::Ugs
            && ss_record.has_ugs
            && !ss_record.poll_me
        {
            return 0;
        }

        match service_flow.scheduling {
            SchedulingType::Ugs => {
                if ctx.elapsed_since(service_flow.record.grant_timestamp)
                    >= service_flow.unsolicited_grant_interval()
                {
                    service_flow.record.grant_timestamp = ctx.now;
                    service_flow.record.grant_size
                } else {
                    0
                }
            }
            SchedulingType::Rtps => {
                if ctx.elapsed_since(service_flow.record.grant_timestamp)
                    >= service_flow.unsolicited_polling_interval()
                {
                    service_flow.record.grant_timestamp = ctx.now;
                    bw_req_opp_size
                } else {
                    0
                }
            }
            SchedulingType::Nrtps | SchedulingType::Be => bw_req_opp_size,
        }
    }

    /// SS side: pick the flow to request bandwidth for, scanning rtPS,
    /// nrtPS, then BE, and return it with the full overhead-inclusive queue
    /// length to ask for.
    pub fn select_flow_for_request(
        &self,
        flows: &ServiceFlowManager,
        connections: &ConnectionManager,
    ) -> Option<(Sfid, u32)> {
        for scheduling in [SchedulingType::Rtps, SchedulingType::Nrtps, SchedulingType::Be] {
            for sfid in flows.flows_of_type(scheduling) {
                let Some(flow) = flows.get(sfid) else { continue };
                let Some(cid) = flow.connection else { continue };
                let Some(conn) = connections.get_connection(cid) else { continue };
                if conn.has_packets() {
                    return Some((sfid, conn.queue_length_with_overhead()));
                }
            }
        }
        None
    }

    /// SS side: build an aggregate bandwidth request for the selected flow
    /// and enqueue it on that flow's connection, to be transmitted in the
    /// just-granted request opportunity.
    ///
    /// Returns the request for the wire, or None when nothing is backlogged.
    pub fn send_bandwidth_request(
        &mut self,
        flows: &ServiceFlowManager,
        connections: &mut ConnectionManager,
    ) -> Option<BandwidthRequest> {
        let (sfid, bytes_to_request) = self.select_flow_for_request(flows, connections)?;
        if bytes_to_request == 0 {
            return None;
        }
        let cid = flows.get(sfid)?.connection?;

        // bytes_to_request is the queue length of the service flow, so the
        // request is of aggregate type
        let request = BandwidthRequest {
            kind: BandwidthRequestKind::Aggregate,
            cid,
            bytes: bytes_to_request,
        };

        let conn = connections.get_connection_mut(cid)?;
        conn.enqueue(MacPacket {
            kind: MacPacketKind::BandwidthRequest(request.clone()),
            len_bytes: BW_REQUEST_HEADER_BYTES,
        });
        self.nr_bw_reqs_sent += 1;

        tracing::debug!(
            "sent bandwidth request: cid {}, {} bytes (total sent: {})",
            cid,
            bytes_to_request,
            self.nr_bw_reqs_sent
        );
        Some(request)
    }

    /// BS side: apply a received bandwidth request to the owning flow's
    /// record. Incremental requests add to the outstanding demand,
    /// aggregate requests overwrite it; either way the backlog grows by the
    /// requested amount.
    ///
    /// A request referencing an unknown connection is dropped: it is a
    /// malformed or stale protocol message, and the sender's own retry
    /// timer is the only recovery path. Returns the resolved flow, if any.
    pub fn process_bandwidth_request(
        &mut self,
        flows: &mut ServiceFlowManager,
        connections: &ConnectionManager,
        request: &BandwidthRequest,
    ) -> Option<Sfid> {
        let Some(connection) = connections.get_connection(request.cid) else {
            tracing::debug!(
                "bandwidth request for unknown cid {}, dropping",
                request.cid
            );
            return None;
        };
        let Some(sfid) = connection.service_flow else {
            tracing::debug!(
                "bandwidth request on cid {} without service flow, dropping",
                request.cid
            );
            return None;
        };
        let Some(flow) = flows.get_mut(sfid) else {
            tracing::debug!("bandwidth request for stale sfid {}, dropping", sfid);
            return None;
        };

        match request.kind {
            BandwidthRequestKind::Incremental => {
                flow.record.requested_bandwidth =
                    flow.record.requested_bandwidth.saturating_add(request.bytes);
            }
            BandwidthRequestKind::Aggregate => {
                flow.record.requested_bandwidth = request.bytes;
            }
        }
        flow.record.backlogged = flow.record.backlogged.saturating_add(request.bytes);

        tracing::debug!(
            "bandwidth request: cid {}, sfid {}, {:?} {} bytes, now requested {}",
            request.cid,
            sfid,
            request.kind,
            request.bytes,
            flow.record.requested_bandwidth
        );
        Some(sfid)
    }

    /// Subframe symbol split for the next frame.
    /// Halved for now; a richer policy would follow the UL/DL traffic ratio.
    pub fn set_subframe_ratio(&self, phy: &dyn PhyPort) -> (u32, u32) {
        let half = phy.symbols_per_frame() / 2;
        (half, half)
    }

    /// Sum of the fixed per-frame grants across all admitted flows, used by
    /// admission control to reject over-subscription.
    pub fn symbols_per_frame_allocated(
        &self,
        ss_manager: &SsManager,
        flows: &ServiceFlowManager,
    ) -> u32 {
        let mut allocation = 0;
        for (_, record) in ss_manager.iter() {
            for sfid in &record.service_flows {
                if let Some(flow) = flows.get(*sfid) {
                    allocation += flow.record.grant_size;
                }
            }
        }
        allocation
    }
}
