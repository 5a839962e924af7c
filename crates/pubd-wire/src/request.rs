//! RFC 4254 connection protocol names
//!
//! Channel requests are identified on the wire by a string. The server only
//! cares about a small, fixed set of them; everything else is carried through
//! as [`RequestType::Other`] so it can be logged and declined.

use std::fmt;

/// Channel type of an interactive session (RFC 4254 §6.1)
pub const CHANNEL_SESSION: &str = "session";

/// Channel request type (RFC 4254 §6)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Start a named subsystem, eg. "sftp"
    Subsystem,
    /// Start the user's login shell
    Shell,
    /// Run a command
    Exec,
    /// Allocate a pseudo-terminal
    PtyReq,
    /// Set an environment variable
    Env,
    /// Terminal dimensions changed
    WindowChange,
    /// X11 forwarding
    X11Req,
    /// Client-side flow control
    XonXoff,
    /// Deliver a signal to the remote process
    Signal,
    /// Exit status of the remote process (server to client)
    ExitStatus,
    /// Anything else
    Other(String),
}

impl RequestType {
    /// Parse a request type from its wire name
    pub fn from_name(name: &str) -> Self {
        match name {
            "subsystem" => Self::Subsystem,
            "shell" => Self::Shell,
            "exec" => Self::Exec,
            "pty-req" => Self::PtyReq,
            "env" => Self::Env,
            "window-change" => Self::WindowChange,
            "x11-req" => Self::X11Req,
            "xon-xoff" => Self::XonXoff,
            "signal" => Self::Signal,
            "exit-status" => Self::ExitStatus,
            other => Self::Other(other.to_string()),
        }
    }

    /// Get the wire name of this request type
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subsystem => "subsystem",
            Self::Shell => "shell",
            Self::Exec => "exec",
            Self::PtyReq => "pty-req",
            Self::Env => "env",
            Self::WindowChange => "window-change",
            Self::X11Req => "x11-req",
            Self::XonXoff => "xon-xoff",
            Self::Signal => "signal",
            Self::ExitStatus => "exit-status",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RequestType {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

/// Reason code of an SSH_MSG_CHANNEL_OPEN_FAILURE (RFC 4254 §5.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpenFailure {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl OpenFailure {
    /// Human-readable description, sent alongside the reason code
    pub fn description(self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "administratively prohibited",
            Self::ConnectFailed => "connect failed",
            Self::UnknownChannelType => "unknown channel type",
            Self::ResourceShortage => "resource shortage",
        }
    }
}

impl fmt::Display for OpenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
