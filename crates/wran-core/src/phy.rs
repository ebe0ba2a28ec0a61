use std::time::Duration;

use serde::Deserialize;

/// Modulation/FEC schemes, ordered from most robust to highest rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ModulationType {
    Bpsk12,
    Qpsk12,
    Qpsk34,
    Qam16_12,
    Qam16_34,
    Qam64_23,
    Qam64_34,
}

impl ModulationType {
    /// Data bytes carried by one OFDM symbol (192 data subcarriers).
    pub fn bytes_per_symbol(self) -> u32 {
        match self {
            ModulationType::Bpsk12 => 12,
            ModulationType::Qpsk12 => 24,
            ModulationType::Qpsk34 => 36,
            ModulationType::Qam16_12 => 48,
            ModulationType::Qam16_34 => 72,
            ModulationType::Qam64_23 => 96,
            ModulationType::Qam64_34 => 108,
        }
    }
}

/// The seam between the MAC and the physical layer.
///
/// The scheduler never computes symbol counts itself: all byte/symbol
/// conversion and the per-frame symbol budget come through this port.
pub trait PhyPort {
    /// Number of OFDM symbols required to carry `bytes` at `modulation`
    fn required_symbols(&self, bytes: u32, modulation: ModulationType) -> u32;

    /// Number of bytes `symbols` OFDM symbols can carry at `modulation`
    fn required_bytes(&self, symbols: u32, modulation: ModulationType) -> u32;

    /// Total symbol budget of one MAC frame (both subframes)
    fn symbols_per_frame(&self) -> u32;

    /// Fixed MAC frame duration
    fn frame_duration(&self) -> Duration;
}

/// Table-driven OFDM PHY model, sufficient for the frame driver and tests.
#[derive(Debug, Clone)]
pub struct SimpleOfdmPhy {
    symbols_per_frame: u32,
    frame_duration: Duration,
}

impl SimpleOfdmPhy {
    pub fn new(symbols_per_frame: u32, frame_duration: Duration) -> SimpleOfdmPhy {
        SimpleOfdmPhy {
            symbols_per_frame,
            frame_duration,
        }
    }
}

impl PhyPort for SimpleOfdmPhy {
    fn required_symbols(&self, bytes: u32, modulation: ModulationType) -> u32 {
        bytes.div_ceil(modulation.bytes_per_symbol())
    }

    fn required_bytes(&self, symbols: u32, modulation: ModulationType) -> u32 {
        symbols * modulation.bytes_per_symbol()
    }

    fn symbols_per_frame(&self) -> u32 {
        self.symbols_per_frame
    }

    fn frame_duration(&self) -> Duration {
        self.frame_duration
    }
}
