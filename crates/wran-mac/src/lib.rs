//! WRAN base-station MAC: frame-based QoS bandwidth scheduling
//!
//! The core of this crate is the per-frame partitioning of the OFDM symbol
//! budget among subscriber connections across the four scheduling classes
//! (UGS, rtPS, nrtPS, BE):
//! - `dl_scheduler`: downlink burst schedulers (Simple and rtPS variants)
//! - `ul_scheduler_mbqos`: the MBQoS uplink job scheduler (three priority
//!   queues, deadline migration, minimum-bandwidth enforcement)
//! - `bandwidth_manager`: grant sizing and the bandwidth request/grant
//!   handshake
//! - connection / service-flow / subscriber-station bookkeeping feeding them
//!
//! The MAC is single-threaded and frame-clocked: an external driver calls
//! `BsMac::on_frame` once per frame boundary with a `FrameContext`.

pub mod bandwidth_manager;
pub mod bs_mac;
pub mod connection;
pub mod connection_manager;
pub mod dl_scheduler;
pub mod map;
pub mod queue;
pub mod service_flow;
pub mod service_flow_manager;
pub mod service_flow_record;
pub mod ss_manager;
pub mod ss_record;
pub mod ul_job;
pub mod ul_scheduler_mbqos;

pub use bandwidth_manager::{BandwidthManager, BandwidthRequest, BandwidthRequestKind};
pub use bs_mac::{BsMac, FrameSchedule};
pub use connection::Connection;
pub use connection_manager::ConnectionManager;
pub use dl_scheduler::{DlCtx, DlScheduleResult, DlScheduler, RtpsDlScheduler, SimpleDlScheduler};
pub use map::{BurstProfileManager, DlBurst, Uiuc, UlMapIe};
pub use queue::{MacPacket, MacPacketKind, MacQueue};
pub use service_flow::{DsaState, SchedulingType, ServiceFlow};
pub use service_flow_manager::{AdmissionError, ServiceFlowManager};
pub use service_flow_record::ServiceFlowRecord;
pub use ss_manager::SsManager;
pub use ss_record::{MacAddress, RangingStatus, SsRecord};
pub use ul_job::{ReqType, UlJob};
pub use ul_scheduler_mbqos::{MbqosUlScheduler, UlCtx, UlScheduleResult};
