//! Logging configuration

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Common configuration for logging
///
/// `quiet` and `verbose` are not opposites: setting both doesn't cancel out.
/// `-v` enables debug logging (`-vv` trace), while `-q` disables info, `-qq`
/// warnings and `-qqq` errors. `-vq` thus logs debug messages and warnings, but
/// no info messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Disable info/warn/error logging
    pub quiet: u8,
    /// Enable debug/trace logging
    pub verbose: u8,
}

impl LogConfig {
    /// Whether events at `level` should be logged
    pub fn enabled(&self, level: &Level) -> bool {
        if *level == Level::TRACE {
            self.verbose >= 2
        } else if *level == Level::DEBUG {
            self.verbose >= 1
        } else if *level == Level::INFO {
            self.quiet < 1
        } else if *level == Level::WARN {
            self.quiet < 2
        } else {
            self.quiet < 3
        }
    }
}
