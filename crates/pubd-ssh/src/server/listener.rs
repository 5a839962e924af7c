//! SSH server listener
//!
//! Accepts incoming connections and spawns a task for each client.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use pubd_core::{Addr, Listener, Server, Stream};

use crate::server::handler::{RusshTransport, ServerConfig, SessionHandler};
use crate::session::{Connection, Transport};
use crate::subsystem::Subsystems;

/// SSH server that serves subsystems over session channels
pub struct SshServer {
    config: ServerConfig,
    subsystems: Arc<Subsystems>,
}

impl SshServer {
    pub fn new(config: ServerConfig, subsystems: Subsystems) -> Self {
        Self {
            config,
            subsystems: Arc::new(subsystems),
        }
    }
}

#[async_trait]
impl Server for SshServer {
    async fn serve(&self, cancel: CancellationToken, listener: Listener) -> Result<()> {
        match listener.local_addr() {
            Ok(addr) => tracing::info!("SSH server listening on {}", addr),
            Err(e) => tracing::warn!("SSH server listening on unknown address: {}", e),
        }

        // Connections outlive the accept loop, not the server.
        let conn_cancel = cancel.child_token();
        let mut conns = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break Ok(());
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let span = tracing::info_span!(
                            "conn",
                            addr = %peer,
                            user = tracing::field::Empty
                        );
                        conns.spawn(
                            serve_conn(
                                Arc::clone(&self.config.ssh_config),
                                Arc::clone(&self.subsystems),
                                conn_cancel.clone(),
                                stream,
                                peer,
                            )
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        if cancel.is_cancelled() {
                            break Ok(());
                        }
                        break Err(anyhow::Error::new(e).context("couldn't accept connection"));
                    }
                },

                Some(joined) = conns.join_next(), if !conns.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        };

        drop(listener);
        if result.is_err() {
            conn_cancel.cancel();
        }
        if !conns.is_empty() {
            tracing::debug!("Waiting for {} connections to finish", conns.len());
        }
        while let Some(joined) = conns.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }
        result
    }
}

/// Whether russh ended a session because the client never authenticated
fn is_auth_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<russh::Error>(),
        Some(russh::Error::NotAuthenticated | russh::Error::NoAuthMethod)
    )
}

/// Handshake, authenticate and serve a single connection
async fn serve_conn(
    config: Arc<russh::server::Config>,
    subsystems: Arc<Subsystems>,
    cancel: CancellationToken,
    stream: Stream,
    peer: Addr,
) {
    tracing::debug!("Accepted connection from {}", peer);

    let (handler, mut events) = SessionHandler::new();
    let running = tokio::select! {
        _ = cancel.cancelled() => return,
        running = russh::server::run_stream(config, stream, handler) => running,
    };
    let running = match running {
        Ok(running) => running,
        Err(e) => {
            tracing::error!("Handshake failed: {:#}", e);
            return;
        }
    };
    let handle = running.handle();
    let session = tokio::spawn(running);

    let user = tokio::select! {
        _ = cancel.cancelled() => None,
        user = &mut events.authenticated => user.ok(),
    };
    let Some(user) = user else {
        let mut transport = RusshTransport::new(handle, session);
        match transport.close().await {
            Ok(()) => tracing::debug!("Disconnected before authenticating"),
            Err(e) if is_auth_failure(&e) => tracing::warn!("Authentication failed: {:#}", e),
            Err(e) => tracing::error!("Handshake failed: {:#}", e),
        }
        return;
    };

    let span = tracing::Span::current();
    span.record("user", user.as_str());
    tracing::info!("Connected");

    let transport = RusshTransport::new(handle, session);
    let conn = Connection::new(span.clone(), transport, events.channels, events.requests);
    conn.serve(cancel, subsystems).await;

    tracing::info!("Disconnected");
}
