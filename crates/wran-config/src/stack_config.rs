use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StackMode {
    Bs,
    Ss,
}

/// Downlink scheduler variant. The set is fixed by configuration; there is no
/// runtime extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DlSchedulerKind {
    Simple,
    Rtps,
}

/// PHY layer parameters the MAC needs to know about
#[derive(Debug, Clone)]
pub struct CfgPhy {
    /// Total OFDM symbol budget of one MAC frame (both subframes)
    pub symbols_per_frame: u32,
    /// MAC frame duration in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for CfgPhy {
    fn default() -> Self {
        Self {
            symbols_per_frame: 720,
            frame_duration_ms: 10,
        }
    }
}

impl CfgPhy {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }
}

/// MAC protocol parameters
#[derive(Debug, Clone)]
pub struct CfgMac {
    /// Size of one ranging-request opportunity in symbols:
    /// preamble + RNG-REQ + round-trip propagation margin
    pub rang_req_opp_size: u32,
    /// Size of one bandwidth-request opportunity in symbols:
    /// preamble + bandwidth request header
    pub bw_req_opp_size: u32,
    /// Interval between contention-based initial ranging allocations, ms
    pub initial_ranging_interval_ms: u32,
    /// Ranging opportunities allocated per initial ranging interval
    pub ranging_opps_per_interval: u8,
    /// Byte size of a DSA-REQ message, used to size the per-frame
    /// negotiation opportunity for not-yet-admitted stations
    pub dsa_req_size_bytes: u32,
    /// DSA handshake retries before the setup attempt is abandoned
    pub max_dsa_retries: u8,
    /// DCD/UCD channel descriptor resend interval, ms
    pub descriptor_interval_ms: u32,
}

impl Default for CfgMac {
    fn default() -> Self {
        Self {
            rang_req_opp_size: 8,
            bw_req_opp_size: 2,
            initial_ranging_interval_ms: 50,
            ranging_opps_per_interval: 1,
            dsa_req_size_bytes: 24,
            max_dsa_retries: 3,
            descriptor_interval_ms: 100,
        }
    }
}

/// Scheduler selection and tuning
#[derive(Debug, Clone)]
pub struct CfgScheduler {
    pub dl_scheduler: DlSchedulerKind,
    /// MBQoS minimum-bandwidth window interval, ms
    pub window_interval_ms: u32,
}

impl Default for CfgScheduler {
    fn default() -> Self {
        Self {
            dl_scheduler: DlSchedulerKind::Rtps,
            window_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub stack_mode: StackMode,
    pub debug_log: Option<String>,

    pub phy: CfgPhy,
    pub mac: CfgMac,
    pub scheduler: CfgScheduler,
}

impl StackConfig {
    pub fn new(mode: StackMode) -> Self {
        StackConfig {
            stack_mode: mode,
            debug_log: None,
            phy: CfgPhy::default(),
            mac: CfgMac::default(),
            scheduler: CfgScheduler::default(),
        }
    }

    /// Validate that all required configuration fields are properly set.
    pub fn validate(&self) -> Result<(), &str> {
        if self.phy.symbols_per_frame == 0 {
            return Err("phy.symbols_per_frame must be nonzero");
        }
        if self.phy.symbols_per_frame % 2 != 0 {
            return Err("phy.symbols_per_frame must be even (split over DL and UL subframes)");
        }
        if self.phy.frame_duration_ms == 0 {
            return Err("phy.frame_duration_ms must be nonzero");
        }
        if self.mac.bw_req_opp_size == 0 || self.mac.rang_req_opp_size == 0 {
            return Err("mac opportunity sizes must be nonzero");
        }
        // An opportunity that cannot fit in a subframe can never be granted
        if self.mac.rang_req_opp_size * self.mac.ranging_opps_per_interval as u32
            > self.phy.symbols_per_frame / 2
        {
            return Err("ranging interval does not fit in the uplink subframe");
        }
        if self.scheduler.window_interval_ms == 0 {
            return Err("scheduler.window_interval_ms must be nonzero");
        }
        Ok(())
    }
}

/// Shared, read-only configuration handle.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    cfg: Arc<StackConfig>,
}

impl SharedConfig {
    pub fn new(mode: StackMode) -> Self {
        Self::from_config(StackConfig::new(mode))
    }

    pub fn from_config(cfg: StackConfig) -> Self {
        // Check config for validity before returning the SharedConfig object
        match cfg.validate() {
            Ok(_) => {}
            Err(e) => panic!("Invalid stack configuration: {}", e),
        }

        Self { cfg: Arc::new(cfg) }
    }

    /// Access immutable config.
    pub fn config(&self) -> Arc<StackConfig> {
        Arc::clone(&self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let cfg = StackConfig::new(StackMode::Bs);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_oversized_ranging_interval_rejected() {
        let mut cfg = StackConfig::new(StackMode::Bs);
        cfg.phy.symbols_per_frame = 16;
        cfg.mac.rang_req_opp_size = 10;
        assert!(cfg.validate().is_err());
    }
}
