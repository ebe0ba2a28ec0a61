use core::fmt;
use std::time::Duration;

use wran_core::{Cid, Direction, ModulationType, Sfid};

use crate::service_flow_record::ServiceFlowRecord;

/// The four standard QoS scheduling classes. Exactly one is set per flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingType {
    /// Unsolicited Grant Service: fixed periodic grants, no requests needed
    Ugs,
    /// real-time Polling Service: periodic request opportunity, latency-bounded
    Rtps,
    /// non-real-time Polling Service: opportunistic, rate-guaranteed
    Nrtps,
    /// Best Effort: opportunistic, no guarantee
    Be,
}

impl fmt::Display for SchedulingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulingType::Ugs => "UGS",
            SchedulingType::Rtps => "rtPS",
            SchedulingType::Nrtps => "nrtPS",
            SchedulingType::Be => "BE",
        };
        write!(f, "{}", s)
    }
}

/// DSA handshake phases for one service flow setup attempt.
/// Abandoned is terminal: the flow stays disabled and is never retried
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsaState {
    Requested,
    Acked,
    Admitted,
    Abandoned,
}

/// Static QoS contract for one traffic stream, bound 1:1 to a connection
/// once admitted. Owns its record; they are created and destroyed together.
#[derive(Debug)]
pub struct ServiceFlow {
    pub sfid: Sfid,
    pub direction: Direction,
    pub scheduling: SchedulingType,
    pub connection: Option<Cid>,

    /// Rates in bytes per second
    pub max_sustained_traffic_rate: u32,
    pub min_reserved_traffic_rate: u32,
    pub min_tolerable_traffic_rate: u32,

    pub max_latency_ms: u32,
    pub tolerated_jitter_ms: u32,
    pub max_traffic_burst: u32,
    /// Fixed SDU size in bytes; 0 means variable-size SDUs
    pub sdu_size: u16,
    pub traffic_priority: u8,

    /// Grant/polling cadence, fixed at admission time
    pub unsolicited_grant_interval_ms: u32,
    pub unsolicited_polling_interval_ms: u32,

    /// True only after admission completed
    pub is_enabled: bool,
    pub is_multicast: bool,
    /// Modulation for multicast flows; unicast flows use the station's
    pub modulation: ModulationType,

    pub dsa_state: DsaState,
    pub dsa_retries: u8,

    pub record: ServiceFlowRecord,
}

impl ServiceFlow {
    pub fn new(direction: Direction, scheduling: SchedulingType) -> ServiceFlow {
        ServiceFlow {
            sfid: 0, // assigned on registration
            direction,
            scheduling,
            connection: None,
            max_sustained_traffic_rate: 0,
            min_reserved_traffic_rate: 0,
            min_tolerable_traffic_rate: 0,
            max_latency_ms: 0,
            tolerated_jitter_ms: 0,
            max_traffic_burst: 0,
            sdu_size: 0,
            traffic_priority: 0,
            unsolicited_grant_interval_ms: 0,
            unsolicited_polling_interval_ms: 0,
            is_enabled: false,
            is_multicast: false,
            modulation: ModulationType::Bpsk12,
            dsa_state: DsaState::Requested,
            dsa_retries: 0,
            record: ServiceFlowRecord::new(),
        }
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms as u64)
    }

    pub fn unsolicited_grant_interval(&self) -> Duration {
        Duration::from_millis(self.unsolicited_grant_interval_ms as u64)
    }

    pub fn unsolicited_polling_interval(&self) -> Duration {
        Duration::from_millis(self.unsolicited_polling_interval_ms as u64)
    }
}
