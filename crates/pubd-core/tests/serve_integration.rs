//! Listen and serve over real sockets

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pubd_core::{listen, serve, server_fn, Listener};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Echo server: copies every connection back to itself until cancelled
async fn echo(cancel: CancellationToken, listener: Listener) -> anyhow::Result<()> {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (mut stream, _peer) = accepted?;
                let cancel = cancel.clone();
                conns.spawn(async move {
                    let mut buf = [0u8; 256];
                    loop {
                        let n = tokio::select! {
                            _ = cancel.cancelled() => return,
                            n = stream.read(&mut buf) => match n {
                                Ok(0) | Err(_) => return,
                                Ok(n) => n,
                            },
                        };
                        if stream.write_all(&buf[..n]).await.is_err() {
                            return;
                        }
                    }
                });
            }
        }
    }
    while conns.join_next().await.is_some() {}
    Ok(())
}

#[tokio::test]
async fn test_serve_tcp() {
    let listeners = listen("127.0.0.1:0").await.unwrap();
    let addr = listeners[0].local_addr().unwrap().to_string();

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { serve(&cancel, listeners, Arc::new(server_fn(echo))).await })
    };

    let mut client = tokio::net::TcpStream::connect(&addr).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    // Shutdown doesn't wait for the client to hang up
    cancel.cancel();
    let result = timeout(TIMEOUT, task).await.expect("serve didn't return").unwrap();
    assert!(result.is_ok());
}

#[cfg(unix)]
#[tokio::test]
async fn test_serve_unix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pubd.sock");
    let listeners = listen(&format!("unix/{}", path.display())).await.unwrap();
    assert_eq!(listeners.len(), 1);

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { serve(&cancel, listeners, Arc::new(server_fn(echo))).await })
    };

    let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
    drop(client);

    cancel.cancel();
    let result = timeout(TIMEOUT, task).await.expect("serve didn't return").unwrap();
    assert!(result.is_ok());

    // The socket file goes away with the listener
    assert!(!path.exists());
}
