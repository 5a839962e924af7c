//! The per-channel request loop
//!
//! A session channel starts out idle, and is driven by its requests: setup
//! requests a client sends ahead of a shell (ptys, environment variables,
//! window sizes) are accepted and ignored, unsupported ones are declined, and
//! the first request that can actually do something ends the loop. That's
//! either a shell or command, which is refused with exit status 255, or an
//! enabled subsystem, which takes over the channel until it returns.

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pubd_wire::{encode_uint32, read_utf8_string, RequestType};

use super::transport::{lazy_reply, Request, SessionChannel};
use crate::subsystem::{Resolution, Subsystems};

/// Sent to clients asking for a shell or a command
pub const SHELL_REFUSAL: &str = "// Shell access is not allowed.\n";

/// Exit status of a refused shell or command
pub const SHELL_EXIT_STATUS: u32 = 255;

/// Why a channel's request loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The peer stopped sending requests
    Closed,
    Cancelled,
    /// A shell or command was refused
    Refused,
    /// A subsystem ran and returned
    Finished,
}

/// Serve requests on a session channel until one of them ends it
pub async fn serve_channel<C: SessionChannel>(
    cancel: &CancellationToken,
    span: &tracing::Span,
    subsystems: &Subsystems,
    channel: &mut C,
    requests: &mut mpsc::Receiver<Request>,
) -> Outcome {
    loop {
        let mut req = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Cancelled,
            req = requests.recv() => match req {
                Some(req) => req,
                None => return Outcome::Closed,
            },
        };

        tracing::trace!(
            parent: span,
            "Request: {} (want_reply={})",
            req.kind(),
            req.want_reply()
        );

        match req.request_type() {
            RequestType::Subsystem => {
                if let Some(outcome) =
                    subsystem_request(cancel, span, subsystems, channel, requests, req).await
                {
                    return outcome;
                }
            }
            RequestType::Shell | RequestType::Exec => {
                refuse_shell(span, channel, req).await;
                return Outcome::Refused;
            }
            // Supporting requests for shells; declining them makes clients complain.
            RequestType::PtyReq | RequestType::Env | RequestType::WindowChange => {
                tracing::debug!(parent: span, "Ignoring {} request", req.kind());
                lazy_reply(&mut req, true);
            }
            RequestType::X11Req | RequestType::XonXoff | RequestType::Signal => {
                tracing::debug!(parent: span, "Unsupported request: {}", req.kind());
                lazy_reply(&mut req, false);
            }
            _ => {
                tracing::warn!(parent: span, "Unknown request type: {}", req.kind());
                lazy_reply(&mut req, false);
            }
        }
    }
}

/// Handle a subsystem request; returns an outcome if it ended the loop
async fn subsystem_request<C: SessionChannel>(
    cancel: &CancellationToken,
    span: &tracing::Span,
    subsystems: &Subsystems,
    channel: &mut C,
    requests: &mut mpsc::Receiver<Request>,
    mut req: Request,
) -> Option<Outcome> {
    let name = match read_utf8_string(req.payload()) {
        Ok(name) => name.to_string(),
        Err(e) => {
            tracing::warn!(parent: span, "Malformed subsystem request: {}", e);
            lazy_reply(&mut req, false);
            return None;
        }
    };

    let subsystem = match subsystems.resolve(&name) {
        Resolution::Enabled(subsystem) => subsystem,
        Resolution::Disabled => {
            tracing::debug!(parent: span, "Subsystem is disabled: {}", name);
            lazy_reply(&mut req, false);
            return None;
        }
        Resolution::Unknown => {
            tracing::warn!(parent: span, "Unsupported subsystem: {}", name);
            lazy_reply(&mut req, false);
            return None;
        }
    };

    lazy_reply(&mut req, true);
    drop(req);

    let sub_span = tracing::info_span!(parent: span, "sub", name = %name);
    tracing::debug!(parent: &sub_span, "Starting");

    let mut exec = subsystem.exec(cancel.clone(), sub_span.clone(), channel);
    let result = loop {
        tokio::select! {
            result = &mut exec => break result,
            Some(mut stray) = requests.recv() => {
                tracing::debug!(
                    parent: &sub_span,
                    "Declining {} request while running",
                    stray.kind()
                );
                lazy_reply(&mut stray, false);
            }
        }
    };

    match result {
        Ok(()) => tracing::debug!(parent: &sub_span, "Finished"),
        Err(e) => tracing::error!(parent: &sub_span, "Error: {:#}", e),
    }
    Some(Outcome::Finished)
}

/// Accept a shell or exec request, then tell the client it's not allowed
async fn refuse_shell<C: SessionChannel>(span: &tracing::Span, channel: &mut C, mut req: Request) {
    tracing::info!(parent: span, "Refusing {} request", req.kind());
    lazy_reply(&mut req, true);

    let written = async {
        channel.write_all(SHELL_REFUSAL.as_bytes()).await?;
        channel.flush().await
    }
    .await;
    if let Err(e) = written {
        tracing::debug!(parent: span, "Couldn't write refusal: {}", e);
    }

    if let Err(e) = channel
        .send_request(RequestType::ExitStatus.as_str(), &encode_uint32(SHELL_EXIT_STATUS))
        .await
    {
        tracing::debug!(parent: span, "Couldn't send exit status: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::oneshot;

    use pubd_wire::{decode_uint32, put_string};

    use super::*;
    use crate::session::testing::MockChannel;
    use crate::subsystem::{ByteStream, Subsystem};

    /// Echoes everything back until EOF
    struct Echo;

    #[async_trait]
    impl Subsystem for Echo {
        async fn exec(
            &self,
            _cancel: CancellationToken,
            _span: tracing::Span,
            stream: &mut dyn ByteStream,
        ) -> anyhow::Result<()> {
            let mut buf = [0u8; 64];
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                stream.write_all(&buf[..n]).await?;
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl Subsystem for Failing {
        async fn exec(
            &self,
            _cancel: CancellationToken,
            _span: tracing::Span,
            _stream: &mut dyn ByteStream,
        ) -> anyhow::Result<()> {
            anyhow::bail!("nope")
        }
    }

    fn subsystem_payload(name: &str) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, name.as_bytes()).unwrap();
        buf.freeze()
    }

    struct Harness {
        requests: mpsc::Sender<Request>,
        peer: DuplexStream,
        sent: Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<(Outcome, mpsc::Receiver<Request>)>,
    }

    impl Harness {
        fn start(subsystems: Subsystems) -> Self {
            let (mut channel, peer) = MockChannel::pair();
            let sent = channel.probe().sent;
            let (tx, mut rx) = mpsc::channel(8);
            let cancel = CancellationToken::new();
            let task = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let span = tracing::Span::none();
                    let outcome =
                        serve_channel(&cancel, &span, &subsystems, &mut channel, &mut rx).await;
                    (outcome, rx)
                })
            };
            Self {
                requests: tx,
                peer,
                sent,
                cancel,
                task,
            }
        }

        async fn send(
            &self,
            kind: &str,
            want_reply: bool,
            payload: Bytes,
        ) -> oneshot::Receiver<bool> {
            let (req, rx) = Request::new(kind, want_reply, payload);
            self.requests.send(req).await.unwrap();
            rx
        }

        async fn finish(self) -> (Outcome, mpsc::Receiver<Request>) {
            drop(self.requests);
            tokio::time::timeout(Duration::from_secs(5), self.task)
                .await
                .expect("channel loop didn't return")
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_exec_is_refused() {
        let mut h = Harness::start(Subsystems::new());
        let reply = h.send("exec", true, subsystem_payload("ls -la")).await;
        assert!(reply.await.unwrap());

        let mut out = vec![0u8; SHELL_REFUSAL.len()];
        h.peer.read_exact(&mut out).await.unwrap();
        assert_eq!(out, SHELL_REFUSAL.as_bytes());

        let sent = Arc::clone(&h.sent);
        let (outcome, _) = h.finish().await;
        assert_eq!(outcome, Outcome::Refused);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "exit-status");
        assert_eq!(decode_uint32(&mut &sent[0].1[..]), Some(255));
    }

    #[tokio::test]
    async fn test_nothing_is_processed_after_shell() {
        let h = Harness::start(Subsystems::new());
        let reply = h.send("shell", true, Bytes::new()).await;
        assert!(reply.await.unwrap());

        let _late = h.send("env", true, Bytes::new()).await;
        let (outcome, mut rx) = h.finish().await;
        assert_eq!(outcome, Outcome::Refused);

        // Still queued, never looked at
        let late = rx.try_recv().unwrap();
        assert_eq!(late.kind(), "env");
    }

    #[tokio::test]
    async fn test_unknown_subsystem_is_declined() {
        let h = Harness::start(Subsystems::new());
        let reply = h.send("subsystem", true, subsystem_payload("sftp")).await;
        assert!(!reply.await.unwrap());

        // The loop carries on
        let reply = h.send("pty-req", true, Bytes::new()).await;
        assert!(reply.await.unwrap());

        let (outcome, _) = h.finish().await;
        assert_eq!(outcome, Outcome::Closed);
    }

    #[tokio::test]
    async fn test_disabled_subsystem_is_declined() {
        let mut subsystems = Subsystems::new();
        subsystems.disable("sftp");
        let h = Harness::start(subsystems);
        let reply = h.send("subsystem", true, subsystem_payload("sftp")).await;
        assert!(!reply.await.unwrap());

        let (outcome, _) = h.finish().await;
        assert_eq!(outcome, Outcome::Closed);
    }

    #[tokio::test]
    async fn test_malformed_subsystem_request() {
        let h = Harness::start(Subsystems::new());
        let reply = h
            .send("subsystem", true, Bytes::from_static(&[0, 0, 0, 9, b's']))
            .await;
        assert!(!reply.await.unwrap());

        let reply = h.send("env", true, Bytes::new()).await;
        assert!(reply.await.unwrap());
        let (outcome, _) = h.finish().await;
        assert_eq!(outcome, Outcome::Closed);
    }

    #[tokio::test]
    async fn test_enabled_subsystem_takes_over() {
        let mut subsystems = Subsystems::new();
        subsystems.enable("echo", Arc::new(Echo));
        let mut h = Harness::start(subsystems);

        let reply = h.send("subsystem", true, subsystem_payload("echo")).await;
        assert!(reply.await.unwrap());

        h.peer.write_all(b"hello").await.unwrap();
        let mut out = [0u8; 5];
        h.peer.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello");

        // Requests arriving while it runs are declined
        let stray = h.send("subsystem", true, subsystem_payload("echo")).await;
        assert!(!stray.await.unwrap());

        h.peer.shutdown().await.unwrap();
        let (outcome, _) = h.finish().await;
        assert_eq!(outcome, Outcome::Finished);
    }

    #[tokio::test]
    async fn test_failing_subsystem_ends_the_loop() {
        let mut subsystems = Subsystems::new();
        subsystems.enable("broken", Arc::new(Failing));
        let h = Harness::start(subsystems);

        let reply = h.send("subsystem", true, subsystem_payload("broken")).await;
        assert!(reply.await.unwrap());

        let _late = h.send("env", true, Bytes::new()).await;
        let (outcome, mut rx) = h.finish().await;
        assert_eq!(outcome, Outcome::Finished);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_and_unknown_requests_are_declined() {
        let h = Harness::start(Subsystems::new());
        for kind in ["x11-req", "xon-xoff", "signal", "auth-agent-req@openssh.com"] {
            let reply = h.send(kind, true, Bytes::new()).await;
            assert!(!reply.await.unwrap(), "{} wasn't declined", kind);
        }
        for kind in ["pty-req", "env", "window-change"] {
            let reply = h.send(kind, true, Bytes::new()).await;
            assert!(reply.await.unwrap(), "{} wasn't accepted", kind);
        }
        let (outcome, _) = h.finish().await;
        assert_eq!(outcome, Outcome::Closed);
    }

    #[tokio::test]
    async fn test_no_reply_unless_wanted() {
        let h = Harness::start(Subsystems::new());
        let quiet = h.send("window-change", false, Bytes::new()).await;
        let quiet_unknown = h.send("bogus", false, Bytes::new()).await;

        // Once this is answered, the two before it have been handled
        let reply = h.send("env", true, Bytes::new()).await;
        assert!(reply.await.unwrap());

        assert!(quiet.await.is_err());
        assert!(quiet_unknown.await.is_err());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_cancellation() {
        let h = Harness::start(Subsystems::new());
        h.cancel.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .expect("channel loop didn't return")
            .unwrap()
            .0;
        assert_eq!(outcome, Outcome::Cancelled);
    }
}
