//! Address specifications and listeners
//!
//! An address specification is either a plain address, or a network/address
//! pair:
//!
//! - `localhost:2222`, `127.0.0.1:2222`, `:2222` (TCP, the default)
//! - `tcp4/0.0.0.0:2222`, `tcp6/[::1]:2222`
//! - `unix//run/pubd.sock`
//! - `systemd/`: take over sockets passed by systemd socket activation

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::error::ListenError;
use crate::systemd;

/// Network used when the address specification doesn't name one
pub const DEFAULT_NETWORK: &str = "tcp";

/// Network that selects systemd socket activation
pub const SYSTEMD_NETWORK: &str = "systemd";

/// Split an address specification into a network/address pair
///
/// Splits on the first '/'. Without one, the network is "tcp" and the whole
/// string is the address. This never fails; a leading '/' yields an empty
/// network, which [`listen`] rejects.
pub fn split_addr(raw: &str) -> (&str, &str) {
    match raw.split_once('/') {
        Some((network, addr)) => (network, addr),
        None => (DEFAULT_NETWORK, raw),
    }
}

/// Listen on an address specification
///
/// Returns one listener for a direct bind, or one per passed socket for
/// systemd socket activation.
pub async fn listen(raw: &str) -> Result<Vec<Listener>, ListenError> {
    let (network, addr) = split_addr(raw);
    match network {
        SYSTEMD_NETWORK => Ok(systemd::listen_systemd(addr)?),
        "tcp" | "tcp4" | "tcp6" => {
            let listener = bind_tcp(network, addr)
                .await
                .map_err(|source| ListenError::Io {
                    network: network.to_string(),
                    source,
                })?;
            Ok(vec![Listener::Tcp(listener)])
        }
        #[cfg(unix)]
        "unix" => {
            let listener = UnixListener::bind(addr).map_err(|source| ListenError::Io {
                network: network.to_string(),
                source,
            })?;
            Ok(vec![Listener::Unix {
                listener,
                unlink: Some(PathBuf::from(addr)),
            }])
        }
        "" => Err(ListenError::EmptyNetwork(addr.to_string())),
        other => Err(ListenError::UnsupportedNetwork(other.to_string())),
    }
}

/// Bind a TCP listener, restricted to one address family for tcp4/tcp6
///
/// An empty host (":2222") binds the unspecified address of the family, and an
/// empty address binds a random port.
async fn bind_tcp(network: &str, addr: &str) -> io::Result<TcpListener> {
    let addr = match addr {
        "" => format!("{}:0", unspecified_host(network)),
        a if a.starts_with(':') => format!("{}{}", unspecified_host(network), a),
        a => a.to_string(),
    };

    let mut last_err = None;
    for candidate in tokio::net::lookup_host(&addr).await? {
        let family_ok = match network {
            "tcp4" => candidate.is_ipv4(),
            "tcp6" => candidate.is_ipv6(),
            _ => true,
        };
        if !family_ok {
            continue;
        }
        match TcpListener::bind(candidate).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no suitable address found for '{}'", addr),
        )
    }))
}

fn unspecified_host(network: &str) -> &'static str {
    match network {
        "tcp6" => "[::]",
        _ => "0.0.0.0",
    }
}

/// A bound listening socket
pub enum Listener {
    /// TCP listener
    Tcp(TcpListener),
    /// Unix domain socket listener
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        /// Socket file to remove when the listener is dropped; only set for
        /// sockets we bound ourselves, not for ones passed in by systemd
        unlink: Option<PathBuf>,
    },
}

impl Listener {
    /// Accept a new connection
    pub async fn accept(&self) -> io::Result<(Stream, Addr)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Stream::Tcp(stream), Addr::Tcp(addr)))
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, addr) = listener.accept().await?;
                let path = addr.as_pathname().map(|p| p.to_path_buf());
                Ok((Stream::Unix(stream), Addr::Unix(path)))
            }
        }
    }

    /// Get the address this listener is bound to
    pub fn local_addr(&self) -> io::Result<Addr> {
        match self {
            Self::Tcp(listener) => Ok(Addr::Tcp(listener.local_addr()?)),
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let addr = listener.local_addr()?;
                Ok(Addr::Unix(addr.as_pathname().map(|p| p.to_path_buf())))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Self::Unix {
            unlink: Some(path), ..
        } = self
        {
            if let Err(e) = std::fs::remove_file(&*path) {
                tracing::debug!("Failed to remove socket {:?}: {}", path, e);
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr() {
            Ok(addr) => write!(f, "Listener({})", addr),
            Err(_) => f.write_str("Listener(?)"),
        }
    }
}

/// Address of a listener or a connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    /// TCP address
    Tcp(std::net::SocketAddr),
    /// Unix socket path; peers connecting to a Unix socket are usually unnamed
    Unix(Option<PathBuf>),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{}", addr),
            Self::Unix(Some(path)) => write!(f, "{}", path.display()),
            Self::Unix(None) => f.write_str("@"),
        }
    }
}

/// An accepted connection
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
