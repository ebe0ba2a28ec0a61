pub mod stack_config;
pub mod toml_config;

pub use stack_config::{
    CfgMac, CfgPhy, CfgScheduler, DlSchedulerKind, SharedConfig, StackConfig, StackMode,
};
