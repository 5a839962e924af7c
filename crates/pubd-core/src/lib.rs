//! pubd-core: Listener orchestration and configuration for pubd
//!
//! Every protocol server in pubd is a [`Server`]: something that accepts
//! connections on one [`Listener`] until its cancellation token fires. This
//! crate resolves an address specification into listeners (binding them, or
//! taking them over from systemd socket activation) and runs a server over all
//! of them at once.

pub mod config;
pub mod error;
pub mod listen;
pub mod serve;
pub mod signal;
pub mod systemd;

pub use error::{ActivationError, ConfigError, ListenError};
pub use listen::{listen, split_addr, Addr, Listener, Stream};
pub use serve::{listen_and_serve, serve, server_fn, Server};
