//! Configuration for pubd daemons
//!
//! Config files are TOML. Command-line flags are layered on top by each
//! binary, so a file only needs to contain what differs from the defaults.

mod log;
mod ssh;

pub use log::LogConfig;
pub use ssh::SshConfig;

use crate::error::ConfigError;
use std::path::Path;

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}
