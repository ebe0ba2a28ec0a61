use core::fmt;

use wran_core::{Cid, ModulationType, Sfid};

use crate::service_flow::SchedulingType;

/// 48-bit station MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingStatus {
    Expired,
    Continue,
    Abort,
    Success,
}

/// Per-subscriber bookkeeping at the base station: management connections,
/// ranging progress, negotiated modulation, and the flows it owns.
#[derive(Debug)]
pub struct SsRecord {
    pub mac_address: MacAddress,
    pub basic_cid: Cid,
    pub primary_cid: Cid,

    pub modulation: ModulationType,
    pub ranging_status: RangingStatus,
    pub poll_for_ranging: bool,
    /// The station asked to be polled for its non-UGS flows
    pub poll_me: bool,
    /// All negotiated service flows are established
    pub are_service_flows_allocated: bool,
    /// Marker record for broadcast traffic; skipped by the uplink scheduler
    pub is_broadcast: bool,

    pub service_flows: Vec<Sfid>,
    pub has_ugs: bool,
    pub has_rtps: bool,
    pub has_nrtps: bool,
    pub has_be: bool,

    pub ranging_correction_retries: u8,
    pub invited_ranging_retries: u8,
}

impl SsRecord {
    pub fn new(mac_address: MacAddress, basic_cid: Cid, primary_cid: Cid) -> SsRecord {
        SsRecord {
            mac_address,
            basic_cid,
            primary_cid,
            modulation: ModulationType::Bpsk12,
            ranging_status: RangingStatus::Expired,
            poll_for_ranging: false,
            poll_me: false,
            are_service_flows_allocated: false,
            is_broadcast: false,
            service_flows: Vec::new(),
            has_ugs: false,
            has_rtps: false,
            has_nrtps: false,
            has_be: false,
            ranging_correction_retries: 0,
            invited_ranging_retries: 0,
        }
    }

    /// Record an admitted flow and update the per-class presence flags
    pub fn add_service_flow_ref(&mut self, sfid: Sfid, scheduling: SchedulingType) {
        self.service_flows.push(sfid);
        match scheduling {
            SchedulingType::Ugs => self.has_ugs = true,
            SchedulingType::Rtps => self.has_rtps = true,
            SchedulingType::Nrtps => self.has_nrtps = true,
            SchedulingType::Be => self.has_be = true,
        }
    }

    pub fn has_flow_of(&self, scheduling: SchedulingType) -> bool {
        match scheduling {
            SchedulingType::Ugs => self.has_ugs,
            SchedulingType::Rtps => self.has_rtps,
            SchedulingType::Nrtps => self.has_nrtps,
            SchedulingType::Be => self.has_be,
        }
    }
}
