use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use toml::Value;

use super::stack_config::{
    CfgMac, CfgPhy, CfgScheduler, DlSchedulerKind, SharedConfig, StackConfig, StackMode,
};

/// Build `SharedConfig` from a TOML configuration file
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    // Various sanity checks
    let expected_config_version = "0.4";
    if !root.config_version.eq(expected_config_version) {
        return Err(format!(
            "Unrecognized config_version: {}, expect {}",
            root.config_version, expected_config_version
        )
        .into());
    }
    if !root.extra.is_empty() {
        return Err(format!("Unrecognized top-level fields: {:?}", sorted_keys(&root.extra)).into());
    }
    if let Some(ref phy) = root.phy {
        if !phy.extra.is_empty() {
            return Err(format!("Unrecognized fields: phy::{:?}", sorted_keys(&phy.extra)).into());
        }
    }
    if let Some(ref mac) = root.mac {
        if !mac.extra.is_empty() {
            return Err(format!("Unrecognized fields: mac::{:?}", sorted_keys(&mac.extra)).into());
        }
    }
    if let Some(ref sched) = root.scheduler {
        if !sched.extra.is_empty() {
            return Err(format!("Unrecognized fields: scheduler::{:?}", sorted_keys(&sched.extra)).into());
        }
    }

    // Build config from required and optional values
    let mut cfg = StackConfig {
        stack_mode: root.stack_mode,
        debug_log: root.debug_log,
        phy: CfgPhy::default(),
        mac: CfgMac::default(),
        scheduler: CfgScheduler::default(),
    };

    if let Some(phy) = root.phy {
        apply_phy_patch(&mut cfg.phy, phy);
    }
    if let Some(mac) = root.mac {
        apply_mac_patch(&mut cfg.mac, mac);
    }
    if let Some(sched) = root.scheduler {
        apply_scheduler_patch(&mut cfg.scheduler, sched);
    }

    if let Err(e) = cfg.validate() {
        return Err(format!("Invalid configuration: {}", e).into());
    }

    Ok(SharedConfig::from_config(cfg))
}

/// Build `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    let r = BufReader::new(f);
    let cfg = from_reader(r)?;
    Ok(cfg)
}

fn apply_phy_patch(dst: &mut CfgPhy, src: PhyDto) {
    if let Some(v) = src.symbols_per_frame {
        dst.symbols_per_frame = v;
    }
    if let Some(v) = src.frame_duration_ms {
        dst.frame_duration_ms = v;
    }
}

fn apply_mac_patch(dst: &mut CfgMac, src: MacDto) {
    if let Some(v) = src.rang_req_opp_size {
        dst.rang_req_opp_size = v;
    }
    if let Some(v) = src.bw_req_opp_size {
        dst.bw_req_opp_size = v;
    }
    if let Some(v) = src.initial_ranging_interval_ms {
        dst.initial_ranging_interval_ms = v;
    }
    if let Some(v) = src.ranging_opps_per_interval {
        dst.ranging_opps_per_interval = v;
    }
    if let Some(v) = src.dsa_req_size_bytes {
        dst.dsa_req_size_bytes = v;
    }
    if let Some(v) = src.max_dsa_retries {
        dst.max_dsa_retries = v;
    }
    if let Some(v) = src.descriptor_interval_ms {
        dst.descriptor_interval_ms = v;
    }
}

fn apply_scheduler_patch(dst: &mut CfgScheduler, src: SchedulerDto) {
    if let Some(v) = src.dl_scheduler {
        dst.dl_scheduler = v;
    }
    if let Some(v) = src.window_interval_ms {
        dst.window_interval_ms = v;
    }
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

#[derive(Debug, Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    stack_mode: StackMode,
    debug_log: Option<String>,

    phy: Option<PhyDto>,
    mac: Option<MacDto>,
    scheduler: Option<SchedulerDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PhyDto {
    symbols_per_frame: Option<u32>,
    frame_duration_ms: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MacDto {
    rang_req_opp_size: Option<u32>,
    bw_req_opp_size: Option<u32>,
    initial_ranging_interval_ms: Option<u32>,
    ranging_opps_per_interval: Option<u8>,
    dsa_req_size_bytes: Option<u32>,
    max_dsa_retries: Option<u8>,
    descriptor_interval_ms: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SchedulerDto {
    dl_scheduler: Option<DlSchedulerKind>,
    window_interval_ms: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let toml = r#"
            config_version = "0.4"
            stack_mode = "Bs"
        "#;
        let shared = from_toml_str(toml).expect("minimal config should load");
        let cfg = shared.config();
        assert_eq!(cfg.stack_mode, StackMode::Bs);
        assert_eq!(cfg.phy.symbols_per_frame, 720);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            config_version = "0.4"
            stack_mode = "Bs"
            debug_log = "/tmp/wran-debug.log"

            [phy]
            symbols_per_frame = 300
            frame_duration_ms = 10

            [mac]
            bw_req_opp_size = 2
            rang_req_opp_size = 8
            initial_ranging_interval_ms = 50

            [scheduler]
            dl_scheduler = "Rtps"
            window_interval_ms = 1000
        "#;
        let shared = from_toml_str(toml).expect("full config should load");
        let cfg = shared.config();
        assert_eq!(cfg.phy.symbols_per_frame, 300);
        assert_eq!(cfg.scheduler.dl_scheduler, DlSchedulerKind::Rtps);
        assert_eq!(cfg.debug_log.as_deref(), Some("/tmp/wran-debug.log"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            config_version = "0.4"
            stack_mode = "Bs"

            [phy]
            symbols_per_frame = 300
            made_up_knob = 7
        "#;
        assert!(from_toml_str(toml).is_err());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let toml = r#"
            config_version = "9.9"
            stack_mode = "Bs"
        "#;
        assert!(from_toml_str(toml).is_err());
    }
}
