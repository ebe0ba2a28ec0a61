use std::time::Duration;

/// Mutable runtime counters for one admitted service flow.
///
/// Created zeroed together with its ServiceFlow and never shared across
/// flows. The scheduler updates it every frame; every bandwidth-request
/// event updates the request/backlog counters.
#[derive(Debug, Clone, Default)]
pub struct ServiceFlowRecord {
    /// Fixed UGS grant size in symbols, set at admission time only
    pub grant_size: u32,

    /// When the last unsolicited grant / polling opportunity was handed out
    pub grant_timestamp: Duration,
    /// When the flow was last served on the downlink
    pub dl_timestamp: Duration,
    /// When the flow was last granted uplink capacity
    pub last_grant_time: Duration,

    /// Bytes the subscriber asked for and has not been granted yet
    pub requested_bandwidth: u32,
    /// Bytes granted so far
    pub granted_bandwidth: u32,
    /// Bytes the subscriber reports queued
    pub backlogged: u32,

    /// Shadow copies used mid-computation by the minimum-bandwidth pass;
    /// signed because the projected values may dip below zero
    pub granted_bandwidth_temp: i64,
    pub backlogged_temp: i64,

    /// Bytes granted since the last scheduling-window expiry. Driven
    /// negative by the window timer to carry a missed minimum-bandwidth
    /// share into the next window.
    pub bw_since_last_expiry: i64,

    pub pkts_sent: u32,
    pub pkts_rcvd: u32,
    pub bytes_sent: u64,
    pub bytes_rcvd: u64,
}

impl ServiceFlowRecord {
    pub fn new() -> ServiceFlowRecord {
        ServiceFlowRecord::default()
    }
}
