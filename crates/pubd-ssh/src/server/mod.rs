//! SSH server implementation

mod handler;
mod listener;

pub use handler::{HandlerEvents, RusshChannel, RusshTransport, ServerConfig, SessionHandler};
pub use listener::SshServer;
