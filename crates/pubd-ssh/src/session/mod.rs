//! The connection state machine
//!
//! Transport-agnostic: [`Connection`] consumes the channels and requests of
//! an authenticated connection, and runs one task per session channel. The
//! russh side of things lives in [`crate::server`].

mod channel;
mod connection;
mod transport;

pub use channel::{serve_channel, Outcome, SHELL_EXIT_STATUS, SHELL_REFUSAL};
pub use connection::Connection;
pub use transport::{lazy_reply, NewChannel, ReplyError, Request, SessionChannel, Transport};

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory stand-ins for a transport and its channels

    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

    use super::{SessionChannel, Transport};

    /// Requests sent on a channel, as (kind, payload)
    pub type Sent = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    /// A channel backed by an in-memory pipe
    pub struct MockChannel {
        stream: DuplexStream,
        sent: Sent,
        closed: Arc<AtomicBool>,
    }

    /// Observes a [`MockChannel`] after it's been handed off
    #[derive(Clone)]
    pub struct ChannelProbe {
        pub sent: Sent,
        pub closed: Arc<AtomicBool>,
    }

    impl MockChannel {
        /// A channel, and the peer's end of it
        pub fn pair() -> (Self, DuplexStream) {
            let (ours, theirs) = tokio::io::duplex(1024);
            let channel = Self {
                stream: ours,
                sent: Sent::default(),
                closed: Arc::new(AtomicBool::new(false)),
            };
            (channel, theirs)
        }

        pub fn probe(&self) -> ChannelProbe {
            ChannelProbe {
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }
        }
    }

    impl AsyncRead for MockChannel {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for MockChannel {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().stream).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
        }
    }

    #[async_trait]
    impl SessionChannel for MockChannel {
        async fn send_request(&mut self, kind: &str, payload: &[u8]) -> io::Result<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((kind.to_string(), payload.to_vec()));
            }
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.stream.shutdown().await
        }
    }

    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Channel = MockChannel;

        async fn close(&mut self) -> anyhow::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
