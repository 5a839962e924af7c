//! Running a server over a set of listeners
//!
//! [`serve`] runs one task per listener. The tasks share a cancellation token
//! which is cancelled as soon as any of them returns, or when the caller's
//! token is cancelled, so one listener failing takes the others down with it.
//! The first error wins; `serve` only returns once every task has.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::listen::{listen, Listener};

/// A protocol server
///
/// Implementations accept connections on `listener` until `cancel` fires, then
/// stop accepting and return once in-flight connections have finished. An
/// accept error after cancellation isn't an error; one before it is.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Serve connections from one listener
    async fn serve(&self, cancel: CancellationToken, listener: Listener) -> Result<()>;
}

/// A [`Server`] backed by a closure
pub struct ServerFn<F>(F);

/// Create a [`Server`] from a closure
pub fn server_fn<F, Fut>(f: F) -> ServerFn<F>
where
    F: Fn(CancellationToken, Listener) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    ServerFn(f)
}

#[async_trait]
impl<F, Fut> Server for ServerFn<F>
where
    F: Fn(CancellationToken, Listener) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn serve(&self, cancel: CancellationToken, listener: Listener) -> Result<()> {
        (self.0)(cancel, listener).await
    }
}

/// Run `server` on each listener until one of them returns or `cancel` fires
///
/// Returns the first error returned by any of the tasks.
pub async fn serve<S>(
    cancel: &CancellationToken,
    listeners: Vec<Listener>,
    server: Arc<S>,
) -> Result<()>
where
    S: Server + ?Sized,
{
    let cancel = cancel.child_token();
    let mut tasks = JoinSet::new();

    for listener in listeners {
        let server = Arc::clone(&server);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = server.serve(cancel.clone(), listener).await;
            cancel.cancel();
            result
        });
    }

    let mut first_err = None;
    while let Some(joined) = tasks.join_next().await {
        // A panicking task never reached its own cancel() call
        cancel.cancel();

        let result = joined.unwrap_or_else(|e| Err(anyhow!("server task failed: {}", e)));
        if let Err(e) = result {
            if first_err.is_none() {
                first_err = Some(e);
            } else {
                tracing::debug!("Discarding subsequent server error: {:#}", e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Shorthand for [`listen`] followed by [`serve`]
pub async fn listen_and_serve<S>(
    cancel: &CancellationToken,
    addr: &str,
    server: Arc<S>,
) -> Result<()>
where
    S: Server + ?Sized,
{
    let listeners = listen(addr).await?;
    serve(cancel, listeners, server).await
}
