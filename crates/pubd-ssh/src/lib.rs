//! pubd-ssh: SSH server for pubd
//!
//! Accepts SSH connections from any client, and hands `session` channels over
//! to named subsystems such as SFTP. Shells and commands are refused.
//!
//! The transport itself (key exchange, encryption, authentication) is handled
//! by russh. Once a connection is authenticated, [`server::handler`] turns
//! russh's callbacks into a stream of events, which the connection state
//! machine in [`session`] consumes.

pub mod keys;
pub mod server;
pub mod session;
pub mod subsystem;

pub use server::{ServerConfig, SshServer};
pub use subsystem::{ByteStream, Resolution, Subsystem, Subsystems};
