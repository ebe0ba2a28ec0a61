//! Core utilities for the WRAN base-station stack
//!
//! This crate provides fundamental types used across the MAC:
//! - FrameContext for the MAC frame clock
//! - Connection identifiers (CIDs) and the CID allocation scheme
//! - The PHY port (symbol/byte conversion seam)
//! - Common macros and debug utilities

pub mod cid;
pub mod debug;
pub mod direction;
pub mod frame_time;
pub mod phy;

// Re-export commonly used items
pub use cid::{Cid, CidFactory, CidType};
pub use direction::Direction;
pub use frame_time::FrameContext;
pub use phy::{ModulationType, PhyPort, SimpleOfdmPhy};

/// Service flow identifier, allocated by the service flow manager
pub type Sfid = u32;

/// Index of a subscriber station record in the SS manager's registry.
/// Stable for the lifetime of the registration.
pub type SsId = usize;
