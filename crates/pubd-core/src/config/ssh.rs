//! SSH daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::LogConfig;

/// Configuration for the SSH daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SshConfig {
    /// Address specification to listen on, eg. "localhost:2222" or "systemd/"
    pub addr: String,

    /// Path to the host private key
    pub host_key_file: Option<PathBuf>,

    /// Subsystems to decline without logging a warning
    pub disabled_subsystems: Vec<String>,

    /// Logging
    #[serde(flatten)]
    pub log: LogConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:2222".to_string(),
            host_key_file: None,
            disabled_subsystems: Vec::new(),
            log: LogConfig::default(),
        }
    }
}
