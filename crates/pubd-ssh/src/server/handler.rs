//! russh handler implementation
//!
//! russh drives the protocol and calls into [`SessionHandler`] for every
//! authentication attempt, channel open and request. The handler doesn't make
//! any decisions itself: it forwards each event to the connection state
//! machine and waits for its answer, which it then passes back to russh.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, Disconnect, MethodSet, Pty, Sig};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use pubd_wire::{decode_uint32, put_string, put_uint32, RequestType};

use crate::session::{NewChannel, Request, SessionChannel, Transport};

/// Pending channel opens and connection-level requests
const QUEUE_SIZE: usize = 16;

/// Pending requests per channel
const CHANNEL_QUEUE_SIZE: usize = 8;

/// What a [`SessionHandler`] hands to the connection state machine
pub struct HandlerEvents {
    /// Resolves to the user name once the client has authenticated
    pub authenticated: oneshot::Receiver<String>,
    pub channels: mpsc::Receiver<NewChannel<RusshChannel>>,
    pub requests: mpsc::Receiver<Request>,
}

/// Handler for a single SSH client connection
pub struct SessionHandler {
    /// Fired on the first successful authentication
    authenticated: Option<oneshot::Sender<String>>,
    channels: mpsc::Sender<NewChannel<RusshChannel>>,
    requests: mpsc::Sender<Request>,
    /// Request queues of accepted channels
    channel_requests: HashMap<ChannelId, mpsc::Sender<Request>>,
}

impl SessionHandler {
    pub fn new() -> (Self, HandlerEvents) {
        let (auth_tx, auth_rx) = oneshot::channel();
        let (channels_tx, channels_rx) = mpsc::channel(QUEUE_SIZE);
        let (requests_tx, requests_rx) = mpsc::channel(QUEUE_SIZE);

        let handler = Self {
            authenticated: Some(auth_tx),
            channels: channels_tx,
            requests: requests_tx,
            channel_requests: HashMap::new(),
        };
        let events = HandlerEvents {
            authenticated: auth_rx,
            channels: channels_rx,
            requests: requests_rx,
        };
        (handler, events)
    }

    /// Every client is let in; the log is the only record of who they claimed to be.
    fn accept(&mut self, method: &str, user: &str) -> Auth {
        tracing::debug!("Authentication: method={} user={} accepted", method, user);
        if let Some(tx) = self.authenticated.take() {
            let _ = tx.send(user.to_string());
        }
        Auth::Accept
    }

    /// Offer a channel to the state machine, and wait for its decision
    async fn open_channel(
        &mut self,
        channel_type: &str,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> bool {
        let id = channel.id();
        let (tx, rx) = mpsc::channel(CHANNEL_QUEUE_SIZE);
        let channel = RusshChannel::new(channel, session.handle());
        let (new, decision) = NewChannel::new(channel_type, channel, rx);

        if self.channels.send(new).await.is_err() {
            return false;
        }
        match decision.await {
            Ok(Ok(())) => {
                self.channel_requests.insert(id, tx);
                true
            }
            Ok(Err(reason)) => {
                // russh answers every refused open with "administratively prohibited"
                tracing::warn!(
                    "Rejected {} channel: {} (sent as administratively prohibited)",
                    channel_type,
                    reason
                );
                false
            }
            Err(_) => false,
        }
    }

    /// Forward a channel request, and pass the answer on to the peer
    ///
    /// russh only sends the answer if the peer asked for one.
    async fn channel_request(
        &mut self,
        channel: ChannelId,
        kind: RequestType,
        payload: Bytes,
        session: &mut Session,
    ) {
        let ok = match self.channel_requests.get(&channel) {
            Some(tx) => {
                let (req, reply) = Request::new(kind.as_str(), true, payload);
                tx.send(req).await.is_ok() && reply.await.unwrap_or(false)
            }
            None => false,
        };
        if ok {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
    }

    /// Forward a connection-level request
    async fn global_request(&mut self, kind: &str, payload: Bytes) -> bool {
        let (req, reply) = Request::new(kind, true, payload);
        self.requests.send(req).await.is_ok() && reply.await.unwrap_or(false)
    }
}

fn encode(parts: &[&[u8]]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    for part in parts {
        put_string(&mut buf, part)?;
    }
    Ok(buf.freeze())
}

fn encode_dimensions(dims: [u32; 4]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    for dim in dims {
        put_uint32(&mut buf, dim);
    }
    buf.freeze()
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept("none", user))
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept("password", user))
    }

    /// Key offers aren't authentication yet, so they're only logged
    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        tracing::debug!(
            "Authentication: method=publickey user={} offered key {}",
            user,
            public_key.fingerprint()
        );
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        tracing::trace!("Public key: {}", public_key.fingerprint());
        Ok(self.accept("publickey", user))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("session", channel, session).await)
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("x11", channel, session).await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("direct-tcpip", channel, session).await)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel("forwarded-tcpip", channel, session).await)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("Channel closed: {:?}", channel);
        self.channel_requests.remove(&channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let payload = encode(&[name.as_bytes()])?;
        self.channel_request(channel, RequestType::Subsystem, payload, session)
            .await;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channel_request(channel, RequestType::Shell, Bytes::new(), session)
            .await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let payload = encode(&[data])?;
        self.channel_request(channel, RequestType::Exec, payload, session)
            .await;
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let mut payload = BytesMut::new();
        put_string(&mut payload, term.as_bytes())?;
        payload.extend_from_slice(&encode_dimensions([
            col_width, row_height, pix_width, pix_height,
        ]));
        self.channel_request(channel, RequestType::PtyReq, payload.freeze(), session)
            .await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let payload = encode(&[variable_name.as_bytes(), variable_value.as_bytes()])?;
        self.channel_request(channel, RequestType::Env, payload, session)
            .await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let payload = encode_dimensions([col_width, row_height, pix_width, pix_height]);
        self.channel_request(channel, RequestType::WindowChange, payload, session)
            .await;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channel_request(channel, RequestType::X11Req, Bytes::new(), session)
            .await;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("Signal: {:?}", signal);
        self.channel_request(channel, RequestType::Signal, Bytes::new(), session)
            .await;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let mut payload = BytesMut::new();
        put_string(&mut payload, address.as_bytes())?;
        put_uint32(&mut payload, *port);
        Ok(self.global_request("tcpip-forward", payload.freeze()).await)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let mut payload = BytesMut::new();
        put_string(&mut payload, address.as_bytes())?;
        put_uint32(&mut payload, port);
        Ok(self
            .global_request("cancel-tcpip-forward", payload.freeze())
            .await)
    }
}

trait ChannelIo: AsyncRead + AsyncWrite + Send {}

impl<T> ChannelIo for T where T: AsyncRead + AsyncWrite + Send {}

/// An accepted russh channel
pub struct RusshChannel {
    id: ChannelId,
    handle: Handle,
    io: Pin<Box<dyn ChannelIo>>,
}

impl RusshChannel {
    fn new(channel: Channel<Msg>, handle: Handle) -> Self {
        Self {
            id: channel.id(),
            handle,
            io: Box::pin(channel.into_stream()),
        }
    }
}

fn connection_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}

impl AsyncRead for RusshChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().io.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for RusshChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().io.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().io.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().io.as_mut().poll_shutdown(cx)
    }
}

#[async_trait]
impl SessionChannel for RusshChannel {
    async fn send_request(&mut self, kind: &str, payload: &[u8]) -> io::Result<()> {
        match RequestType::from_name(kind) {
            RequestType::ExitStatus => {
                let status = decode_uint32(&mut &payload[..]).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "malformed exit status")
                })?;
                self.handle
                    .exit_status_request(self.id, status)
                    .await
                    .map_err(|_| connection_closed())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("can't send {} requests", kind),
            )),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.handle.eof(self.id).await.map_err(|_| connection_closed())?;
        self.handle
            .close(self.id)
            .await
            .map_err(|_| connection_closed())
    }
}

/// A running russh session
pub struct RusshTransport {
    handle: Handle,
    session: Option<JoinHandle<Result<()>>>,
}

impl RusshTransport {
    pub fn new(handle: Handle, session: JoinHandle<Result<()>>) -> Self {
        Self {
            handle,
            session: Some(session),
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Channel = RusshChannel;

    async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        if !session.is_finished() {
            let disconnected = self
                .handle
                .disconnect(
                    Disconnect::ByApplication,
                    "Server shutting down".to_string(),
                    "en".to_string(),
                )
                .await;
            if disconnected.is_err() {
                tracing::trace!("Session ended before disconnecting");
            }
        }

        match session.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("session task failed: {}", e)),
        }
    }
}

/// Configuration for the SSH server
#[derive(Clone)]
pub struct ServerConfig {
    /// russh server configuration
    pub ssh_config: Arc<russh::server::Config>,
}

impl ServerConfig {
    /// Create a new server configuration with the given host key
    pub fn new(host_key: KeyPair) -> Self {
        let mut config = russh::server::Config::default();
        config.keys.push(host_key);
        config.methods = MethodSet::NONE | MethodSet::PASSWORD | MethodSet::PUBLICKEY;
        config.auth_rejection_time = Duration::from_secs(1);
        config.auth_rejection_time_initial = Some(Duration::from_secs(0));

        Self {
            ssh_config: Arc::new(config),
        }
    }
}
