//! The per-connection dispatch loop

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use pubd_wire::{OpenFailure, CHANNEL_SESSION};

use super::channel::{serve_channel, Outcome};
use super::transport::{lazy_reply, NewChannel, Request, SessionChannel, Transport};
use crate::subsystem::Subsystems;

/// An authenticated connection, ready to be served
pub struct Connection<T: Transport> {
    span: tracing::Span,
    transport: T,
    channels: mpsc::Receiver<NewChannel<T::Channel>>,
    requests: mpsc::Receiver<Request>,
}

impl<T: Transport> Connection<T> {
    /// `span` identifies the connection in logs; sessions log under it.
    pub fn new(
        span: tracing::Span,
        transport: T,
        channels: mpsc::Receiver<NewChannel<T::Channel>>,
        requests: mpsc::Receiver<Request>,
    ) -> Self {
        Self {
            span,
            transport,
            channels,
            requests,
        }
    }

    /// Serve the connection until the peer goes away or `cancel` fires
    ///
    /// Either way, the transport is closed and every session on it has
    /// finished by the time this returns.
    pub async fn serve(mut self, cancel: CancellationToken, subsystems: Arc<Subsystems>) {
        let span = self.span.clone();
        let cancel = cancel.child_token();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(parent: &span, "Cancelled");
                    break;
                }
                new = self.channels.recv() => match new {
                    Some(new) => self.open_channel(new, &mut sessions, &cancel, &subsystems),
                    None => break,
                },
                req = self.requests.recv() => match req {
                    Some(mut req) => {
                        tracing::debug!(parent: &span, "Discarding out-of-band request: {}", req.kind());
                        lazy_reply(&mut req, false);
                    }
                    None => break,
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(parent: &span, "Session task failed: {}", e);
                    }
                }
            }
        }

        // Anything still queued is declined by dropping it.
        drop(self.channels);
        drop(self.requests);
        cancel.cancel();

        if let Err(e) = self.transport.close().await {
            tracing::debug!(parent: &span, "Error closing connection: {:#}", e);
        }
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                tracing::error!(parent: &span, "Session task failed: {}", e);
            }
        }
    }

    fn open_channel(
        &self,
        new: NewChannel<T::Channel>,
        sessions: &mut JoinSet<()>,
        cancel: &CancellationToken,
        subsystems: &Arc<Subsystems>,
    ) {
        if new.channel_type() != CHANNEL_SESSION {
            tracing::warn!(parent: &self.span, "Unknown channel type: {}", new.channel_type());
            if let Err(e) = new.reject(OpenFailure::UnknownChannelType) {
                tracing::debug!(parent: &self.span, "Couldn't reject channel: {}", e);
            }
            return;
        }

        let (channel, requests) = match new.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(parent: &self.span, "Couldn't accept channel: {}", e);
                return;
            }
        };

        let span = tracing::debug_span!(parent: &self.span, "sess");
        let cancel = cancel.clone();
        let subsystems = Arc::clone(subsystems);
        sessions.spawn(
            run_session(cancel, span.clone(), subsystems, channel, requests).instrument(span),
        );
    }
}

async fn run_session<C: SessionChannel>(
    cancel: CancellationToken,
    span: tracing::Span,
    subsystems: Arc<Subsystems>,
    mut channel: C,
    mut requests: mpsc::Receiver<Request>,
) {
    tracing::debug!("Session opened");
    let outcome = serve_channel(&cancel, &span, &subsystems, &mut channel, &mut requests).await;
    drop(requests);

    if outcome != Outcome::Closed {
        if let Err(e) = channel.close().await {
            tracing::debug!("Error closing channel: {}", e);
        }
    }
    tracing::debug!("Session closed: {:?}", outcome);
}
