use wran_core::{Cid, Direction, ModulationType};

use crate::queue::MacPacket;

/// Uplink interval usage codes. Logical values only; the map-message wire
/// encoding is the encoder's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uiuc {
    /// Contention or invited initial ranging region
    InitialRanging,
    /// Bandwidth-request region, sent at the most robust modulation
    ReqRegionFull,
    /// Data grant using the numbered uplink burst profile
    BurstProfile(u8),
    /// Sentinel closing the uplink map
    EndOfMap,
}

/// One uplink map entry: a grant of `duration` symbols starting at
/// `start_time` symbols into the uplink subframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlMapIe {
    pub cid: Cid,
    pub uiuc: Uiuc,
    pub start_time: u32,
    pub duration: u32,
}

/// One downlink burst: a contiguous group of packets for one connection
/// under one burst profile.
#[derive(Debug, Clone)]
pub struct DlBurst {
    pub cid: Cid,
    pub diuc: u8,
    pub modulation: ModulationType,
    pub packets: Vec<MacPacket>,
}

impl DlBurst {
    pub fn n_packets(&self) -> usize {
        self.packets.len()
    }

    pub fn size_bytes(&self) -> u32 {
        self.packets.iter().map(|p| p.len_bytes).sum()
    }
}

/// The most robust profile, used for broadcast and ranging traffic
pub const BURST_PROFILE_1: u8 = 1;

/// Maps between modulation schemes and burst profile indices (DIUC/UIUC).
/// The mapping may vary over time in a richer implementation; here it is a
/// fixed ladder, most robust first.
#[derive(Debug, Default)]
pub struct BurstProfileManager;

const PROFILE_LADDER: [ModulationType; 7] = [
    ModulationType::Bpsk12,
    ModulationType::Qpsk12,
    ModulationType::Qpsk34,
    ModulationType::Qam16_12,
    ModulationType::Qam16_34,
    ModulationType::Qam64_23,
    ModulationType::Qam64_34,
];

impl BurstProfileManager {
    pub fn new() -> BurstProfileManager {
        BurstProfileManager
    }

    /// Burst profile index for a modulation. The direction parameter keeps
    /// the seam: downlink and uplink profiles are managed separately even
    /// though the ladder is currently identical.
    pub fn burst_profile(&self, modulation: ModulationType, _direction: Direction) -> u8 {
        match PROFILE_LADDER.iter().position(|m| *m == modulation) {
            Some(idx) => (idx + 1) as u8,
            None => unreachable!(),
        }
    }

    pub fn modulation(&self, profile: u8, _direction: Direction) -> Option<ModulationType> {
        if profile == 0 {
            return None;
        }
        PROFILE_LADDER.get(profile as usize - 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_round_trip() {
        let mgr = BurstProfileManager::new();
        for m in PROFILE_LADDER {
            let p = mgr.burst_profile(m, Direction::Dl);
            assert_eq!(mgr.modulation(p, Direction::Dl), Some(m));
        }
        assert_eq!(mgr.burst_profile(ModulationType::Bpsk12, Direction::Ul), BURST_PROFILE_1);
        assert_eq!(mgr.modulation(0, Direction::Ul), None);
        assert_eq!(mgr.modulation(8, Direction::Ul), None);
    }
}
