//! What the connection state machine needs from an SSH transport
//!
//! An authenticated transport hands the state machine two streams: incoming
//! channel opens, and out-of-band (connection-level) requests. Each accepted
//! channel comes with its own stream of requests. Decisions flow back through
//! oneshot senders, so the transport can turn them into wire replies.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use pubd_wire::{OpenFailure, RequestType};

/// Errors answering a request or channel open
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    #[error("peer didn't ask for a reply")]
    NotWanted,

    #[error("request was already answered")]
    AlreadyAnswered,

    #[error("connection closed")]
    Closed,
}

/// A channel or connection-level request
#[derive(Debug)]
pub struct Request {
    kind: String,
    want_reply: bool,
    payload: Bytes,
    reply: Option<oneshot::Sender<bool>>,
}

impl Request {
    /// Create a request, and the receiver its reply will arrive on
    ///
    /// The receiver errors if the request is dropped unanswered, which is
    /// always the case when `want_reply` is false.
    pub fn new(
        kind: impl Into<String>,
        want_reply: bool,
        payload: impl Into<Bytes>,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            kind: kind.into(),
            want_reply,
            payload: payload.into(),
            reply: Some(tx),
        };
        (request, rx)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn request_type(&self) -> RequestType {
        RequestType::from_name(&self.kind)
    }

    pub fn want_reply(&self) -> bool {
        self.want_reply
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Accept or decline the request
    ///
    /// Replying to a request that didn't ask for it is a protocol error.
    pub fn reply(&mut self, ok: bool) -> Result<(), ReplyError> {
        if !self.want_reply {
            return Err(ReplyError::NotWanted);
        }
        let tx = self.reply.take().ok_or(ReplyError::AlreadyAnswered)?;
        tx.send(ok).map_err(|_| ReplyError::Closed)
    }
}

/// Reply to a request if the peer asked for it, else do nothing
pub fn lazy_reply(request: &mut Request, ok: bool) {
    if !request.want_reply() {
        return;
    }
    if let Err(e) = request.reply(ok) {
        tracing::warn!(
            "Couldn't {} {} request: {}",
            if ok { "accept" } else { "decline" },
            request.kind(),
            e
        );
    }
}

/// An incoming channel open, waiting for a decision
pub struct NewChannel<C> {
    channel_type: String,
    channel: C,
    requests: mpsc::Receiver<Request>,
    decision: oneshot::Sender<Result<(), OpenFailure>>,
}

impl<C> NewChannel<C> {
    /// Create a pending channel, and the receiver the decision will arrive on
    pub fn new(
        channel_type: impl Into<String>,
        channel: C,
        requests: mpsc::Receiver<Request>,
    ) -> (Self, oneshot::Receiver<Result<(), OpenFailure>>) {
        let (tx, rx) = oneshot::channel();
        let new = Self {
            channel_type: channel_type.into(),
            channel,
            requests,
            decision: tx,
        };
        (new, rx)
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    /// Accept the channel, returning it along with its requests
    pub fn accept(self) -> Result<(C, mpsc::Receiver<Request>), ReplyError> {
        self.decision.send(Ok(())).map_err(|_| ReplyError::Closed)?;
        Ok((self.channel, self.requests))
    }

    pub fn reject(self, reason: OpenFailure) -> Result<(), ReplyError> {
        self.decision
            .send(Err(reason))
            .map_err(|_| ReplyError::Closed)
    }
}

/// An accepted session channel
#[async_trait]
pub trait SessionChannel: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Send a request to the peer, without asking for a reply
    async fn send_request(&mut self, kind: &str, payload: &[u8]) -> io::Result<()>;

    /// Send EOF and close the channel
    async fn close(&mut self) -> io::Result<()>;
}

/// An authenticated SSH connection
#[async_trait]
pub trait Transport: Send + 'static {
    type Channel: SessionChannel;

    /// Close the connection, and wait for it to wind down
    ///
    /// Channel I/O fails from here on, which is what unblocks any subsystems
    /// still running on it. Closing an already closed connection is fine.
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply() {
        let (mut req, rx) = Request::new("pty-req", true, Bytes::new());
        assert_eq!(req.request_type(), RequestType::PtyReq);
        req.reply(true).unwrap();
        assert!(rx.await.unwrap());

        assert_eq!(req.reply(false), Err(ReplyError::AlreadyAnswered));
    }

    #[tokio::test]
    async fn test_reply_not_wanted() {
        let (mut req, rx) = Request::new("env", false, Bytes::new());
        assert_eq!(req.reply(true), Err(ReplyError::NotWanted));

        lazy_reply(&mut req, true);
        drop(req);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_reply_peer_gone() {
        let (mut req, rx) = Request::new("exec", true, Bytes::new());
        drop(rx);
        assert_eq!(req.reply(true), Err(ReplyError::Closed));
    }

    #[tokio::test]
    async fn test_lazy_reply() {
        let (mut req, rx) = Request::new("x11-req", true, Bytes::new());
        lazy_reply(&mut req, false);
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_decision() {
        let (_tx, requests) = mpsc::channel(1);
        let (new, decision) = NewChannel::new("direct-tcpip", (), requests);
        assert_eq!(new.channel_type(), "direct-tcpip");
        new.reject(OpenFailure::UnknownChannelType).unwrap();
        assert_eq!(decision.await.unwrap(), Err(OpenFailure::UnknownChannelType));

        let (_tx, requests) = mpsc::channel(1);
        let (new, decision) = NewChannel::new("session", 42u32, requests);
        let (channel, _requests) = new.accept().unwrap();
        assert_eq!(channel, 42);
        assert_eq!(decision.await.unwrap(), Ok(()));
    }

    #[test]
    fn test_accept_after_peer_gone() {
        let (_tx, requests) = mpsc::channel(1);
        let (new, decision) = NewChannel::new("session", (), requests);
        drop(decision);
        assert!(matches!(new.accept(), Err(ReplyError::Closed)));
    }
}
