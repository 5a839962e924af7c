//! systemd socket activation
//!
//! With socket activation, systemd binds the listening sockets itself and
//! passes them to the service as file descriptors 3, 4, ..., announced through
//! the LISTEN_PID, LISTEN_FDS and LISTEN_FDNAMES environment variables.
//!
//! See: <https://www.freedesktop.org/software/systemd/man/sd_listen_fds.html>

use crate::error::ActivationError;
use crate::listen::Listener;

/// First file descriptor passed by socket activation
pub const SD_LISTEN_FDS_START: i32 = 3;

/// Listen on file descriptors passed by systemd socket activation
///
/// `addr` is reserved for future arguments and must be empty.
///
/// Fails if no file descriptors were passed, which means either we're not
/// running in a systemd unit, or it was started directly without the
/// accompanying socket. The easiest way to avoid the latter is to add an
/// explicit `Requires=` to the service.
///
/// The activation variables are removed from the environment, so child
/// processes don't try to use the same sockets.
pub fn listen_systemd(addr: &str) -> Result<Vec<Listener>, ActivationError> {
    if !addr.is_empty() {
        return Err(ActivationError::UnexpectedArgument(addr.to_string()));
    }
    imp::listeners()
}

/// Parse LISTEN_PID and LISTEN_FDS into the number of passed descriptors
///
/// Missing variables, or a LISTEN_PID naming another process, mean we weren't
/// activated; LISTEN_FDS=0 means we were, but without any sockets.
pub fn parse_listen_fds(
    pid: Option<&str>,
    fds: Option<&str>,
    own_pid: u32,
) -> Result<usize, ActivationError> {
    let (Some(pid), Some(fds)) = (pid, fds) else {
        return Err(ActivationError::NotActivated);
    };

    let pid: u32 = pid.trim().parse().map_err(|_| ActivationError::InvalidEnv {
        var: "LISTEN_PID",
        value: pid.to_string(),
    })?;
    if pid != own_pid {
        return Err(ActivationError::NotActivated);
    }

    let count: usize = fds.trim().parse().map_err(|_| ActivationError::InvalidEnv {
        var: "LISTEN_FDS",
        value: fds.to_string(),
    })?;
    if count == 0 {
        return Err(ActivationError::NoSockets);
    }
    Ok(count)
}

/// Names of the passed descriptors, from LISTEN_FDNAMES
///
/// Descriptors without a name are called "LISTEN_FD_<fd>".
pub fn fd_names(names: Option<&str>, count: usize) -> Vec<String> {
    let mut given = names.map(|n| n.split(':')).into_iter().flatten();
    (0..count)
        .map(|i| match given.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("LISTEN_FD_{}", SD_LISTEN_FDS_START + i as i32),
        })
        .collect()
}

#[cfg(target_os = "linux")]
mod imp {
    use std::env;
    use std::io;
    use std::os::fd::{FromRawFd, OwnedFd, RawFd};

    use tokio::net::{TcpListener, UnixListener};

    use super::{fd_names, parse_listen_fds, SD_LISTEN_FDS_START};
    use crate::error::ActivationError;
    use crate::listen::Listener;

    pub(super) fn listeners() -> Result<Vec<Listener>, ActivationError> {
        let pid = env::var("LISTEN_PID").ok();
        let fds = env::var("LISTEN_FDS").ok();
        let names = env::var("LISTEN_FDNAMES").ok();
        for var in ["LISTEN_PID", "LISTEN_FDS", "LISTEN_FDNAMES"] {
            env::remove_var(var);
        }

        let count = parse_listen_fds(pid.as_deref(), fds.as_deref(), std::process::id())?;
        let names = fd_names(names.as_deref(), count);
        tracing::debug!("Socket activated with {} descriptors: {:?}", count, names);

        names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let fd = SD_LISTEN_FDS_START + index as RawFd;
                listener_from_fd(fd).map_err(|source| ActivationError::Fd {
                    index,
                    name,
                    source,
                })
            })
            .collect()
    }

    fn listener_from_fd(fd: RawFd) -> io::Result<Listener> {
        // Fails with EBADF if the descriptor isn't open, before we claim it.
        set_cloexec(fd)?;

        // SAFETY: the descriptor is open, and socket activation hands its
        // ownership to us; the variables announcing it were just removed.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        match socket_family(fd)? {
            libc::AF_UNIX => {
                let listener = std::os::unix::net::UnixListener::from(owned);
                listener.set_nonblocking(true)?;
                Ok(Listener::Unix {
                    listener: UnixListener::from_std(listener)?,
                    unlink: None,
                })
            }
            libc::AF_INET | libc::AF_INET6 => {
                let listener = std::net::TcpListener::from(owned);
                listener.set_nonblocking(true)?;
                Ok(Listener::Tcp(TcpListener::from_std(listener)?))
            }
            family => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported address family {}", family),
            )),
        }
    }

    fn set_cloexec(fd: RawFd) -> io::Result<()> {
        // SAFETY: fcntl on an arbitrary integer is safe; it fails on bad fds.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn socket_family(fd: RawFd) -> io::Result<libc::c_int> {
        // SAFETY: sockaddr_storage is plain old data, and getsockname writes at
        // most `len` bytes into it.
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                fd,
                &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(libc::c_int::from(storage.ss_family))
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use crate::error::ActivationError;
    use crate::listen::Listener;

    pub(super) fn listeners() -> Result<Vec<Listener>, ActivationError> {
        Err(ActivationError::Unsupported(std::env::consts::OS))
    }
}
