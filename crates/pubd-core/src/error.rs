//! Core error types for pubd

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned while resolving an address specification into listeners
///
/// Every variant names the network that was attempted.
#[derive(Error, Debug)]
pub enum ListenError {
    /// Binding or registering the socket failed
    #[error("listen/{network}: {source}")]
    Io {
        network: String,
        #[source]
        source: io::Error,
    },

    /// The address specification started with a '/', eg. "/localhost:2222"
    #[error("listen/: empty network name in '{0}'; did you mean 'tcp/{0}'?")]
    EmptyNetwork(String),

    /// Network isn't one of tcp, tcp4, tcp6, unix or systemd
    #[error("listen/{0}: unsupported network")]
    UnsupportedNetwork(String),

    /// Socket activation failed
    #[error("listen/systemd: {0}")]
    Activation(#[from] ActivationError),
}

/// Socket activation errors
#[derive(Error, Debug)]
pub enum ActivationError {
    /// An address was given along with the systemd network
    #[error("no arguments defined, but got '{0}'")]
    UnexpectedArgument(String),

    /// LISTEN_PID/LISTEN_FDS are missing, or meant for another process
    #[error("not socket activated; if running in a systemd service, maybe you need to add a 'Requires=foo.socket' dependency?")]
    NotActivated,

    /// Activated, but the socket unit doesn't pass any sockets
    #[error("socket activated, but no sockets were passed; check the ListenStream= lines of the socket unit")]
    NoSockets,

    /// An activation variable couldn't be parsed
    #[error("invalid {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    /// A passed file descriptor couldn't be turned into a listener
    #[error("[{index}]: {name}: {source}")]
    Fd {
        index: usize,
        name: String,
        #[source]
        source: io::Error,
    },

    /// Socket activation isn't available on this platform
    #[error("systemd support not built for {0}")]
    Unsupported(&'static str),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file couldn't be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
