//! pubd-wire: SSH wire primitives for pubd
//!
//! The SSH transport (key exchange, packet framing, encryption) is handled by
//! russh. What remains above it are the handful of RFC 4251 scalar types that
//! appear in channel request payloads, and the names and reason codes of the
//! RFC 4254 connection protocol that the server dispatches on.

pub mod codec;
pub mod error;
pub mod request;

pub use codec::{
    decode_string, decode_uint32, encode_uint32, put_string, put_uint32, read_utf8_string,
};
pub use error::WireError;
pub use request::{OpenFailure, RequestType, CHANNEL_SESSION};
