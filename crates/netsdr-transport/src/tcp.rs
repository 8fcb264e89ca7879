//! TCP control transport.
//!
//! This module provides [`TcpControlTransport`], which implements the
//! [`ControlTransport`] trait over a tokio [`TcpStream`]. The stream is
//! split on connect: the write half stays with the transport for
//! [`send`](ControlTransport::send), and the read half moves into a spawned
//! reader task that pushes every chunk it reads onto the [`Inbound`]
//! channel returned by [`connect`](ControlTransport::connect).
//!
//! # Example
//!
//! ```no_run
//! use netsdr_core::transport::ControlTransport;
//! use netsdr_transport::TcpControlTransport;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut transport = TcpControlTransport::new("192.168.1.50:50000");
//! let mut inbound = transport.connect().await?;
//!
//! // Ask the receiver for its current frequency.
//! transport.send(&[0x05, 0x20, 0x20, 0x00, 0x00]).await?;
//! let reply = inbound.recv().await;
//!
//! transport.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use netsdr_core::error::{Error, Result};
use netsdr_core::transport::{ControlTransport, INBOUND_CHANNEL_CAPACITY, Inbound};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size; one maximum-size NetSDR message.
const READ_BUF_SIZE: usize = 8194;

/// Handle to a running reader task.
#[derive(Debug)]
struct ReaderTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// TCP transport for the NetSDR control link.
///
/// The transport is created disconnected; [`connect`](ControlTransport::connect)
/// opens the socket and may be called again after a
/// [`disconnect`](ControlTransport::disconnect).
#[derive(Debug)]
pub struct TcpControlTransport {
    /// The `host:port` string to connect to.
    addr: String,
    /// Maximum time to wait for the TCP handshake.
    connect_timeout: Duration,
    /// Write half of the stream, `None` while disconnected.
    writer: Option<OwnedWriteHalf>,
    /// The reader task, `None` while disconnected.
    reader: Option<ReaderTask>,
    /// Cleared by the reader task when the peer closes or the read fails.
    alive: Arc<AtomicBool>,
}

impl TcpControlTransport {
    /// Create a transport for `addr` using the default connect timeout.
    ///
    /// The `addr` parameter should be a `host:port` string, e.g.
    /// `"192.168.1.50:50000"`. No connection is made until
    /// [`connect`](ControlTransport::connect) is called.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_connect_timeout(addr, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a transport for `addr` with a specific connect timeout.
    pub fn with_connect_timeout(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: timeout,
            writer: None,
            reader: None,
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the address string this transport connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ControlTransport for TcpControlTransport {
    async fn connect(&mut self) -> Result<Inbound> {
        if self.is_connected() {
            return Err(Error::Transport(format!("already connected to {}", self.addr)));
        }
        // A previous connection may have died on its own; drop its leftovers.
        self.disconnect().await?;

        tracing::debug!(
            addr = %self.addr,
            timeout_ms = self.connect_timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %self.addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %self.addr, error = %e, "TCP connection failed");
                map_connect_error(e, &self.addr)
            })?;

        // Control messages are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %self.addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        self.alive.store(true, Ordering::SeqCst);
        let task = tokio::spawn(read_loop(
            read_half,
            tx,
            cancel.clone(),
            Arc::clone(&self.alive),
            self.addr.clone(),
        ));

        self.writer = Some(write_half);
        self.reader = Some(ReaderTask { cancel, task });

        tracing::info!(addr = %self.addr, "TCP connection established");
        Ok(rx)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        writer.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send data");
            map_io_error(e)
        })?;
        writer.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Stop the reader before releasing the socket.
        if let Some(reader) = self.reader.take() {
            reader.cancel.cancel();
            if let Err(e) = reader.task.await {
                tracing::debug!(addr = %self.addr, error = %e, "TCP reader task ended abnormally");
            }
        }

        if let Some(mut writer) = self.writer.take() {
            tracing::debug!(addr = %self.addr, "Closing TCP connection");
            if let Err(e) = writer.shutdown().await {
                // Expected when the peer already went away.
                tracing::debug!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown TCP stream (continuing anyway)"
                );
            }
            tracing::info!(addr = %self.addr, "TCP connection closed");
        }

        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for TcpControlTransport {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            tracing::debug!(addr = %self.addr, "TcpControlTransport dropped, stopping reader");
            reader.cancel.cancel();
        }
    }
}

/// Reader task: forward every chunk read from the socket until cancelled,
/// the peer closes, or the inbound receiver is dropped.
async fn read_loop(
    mut reader: OwnedReadHalf,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    addr: String,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(addr = %addr, "TCP reader cancelled");
                break;
            }

            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    tracing::warn!(addr = %addr, "Peer closed connection (0 bytes read)");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(addr = %addr, error = %e, "Failed to receive data");
                    break;
                }
            },
        };

        tracing::trace!(addr = %addr, bytes = n, data = ?&buf[..n], "Received data");

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            sent = tx.send(buf[..n].to_vec()) => {
                if sent.is_err() {
                    tracing::debug!(addr = %addr, "Inbound receiver dropped, stopping TCP reader");
                    break;
                }
            }
        }
    }

    // Cleared before `tx` drops so a consumer that sees the channel close
    // also sees the transport as disconnected.
    alive.store(false, Ordering::SeqCst);
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Helper: bind a TcpListener on a random available port and return it
    /// along with its address string.
    async fn test_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, addr) = test_listener().await;

        // Echo one buffer back.
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut transport = TcpControlTransport::new(&addr);
        let mut inbound = transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let data = [0x04, 0x20, 0x18, 0x00];
        transport.send(&data).await.unwrap();

        let echoed = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, data);

        transport.disconnect().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        // Bind a listener and immediately drop it so the port is not listening
        let (listener, addr) = test_listener().await;
        drop(listener);

        let mut transport = TcpControlTransport::new(&addr);
        let err = transport.connect().await.unwrap_err();
        match &err {
            Error::Transport(msg) => assert!(
                msg.contains("connection refused"),
                "expected 'connection refused' in message, got: {}",
                msg
            ),
            other => panic!("expected Transport error, got: {:?}", other),
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn connect_timeout_to_nonexistent_host() {
        // RFC 5737 TEST-NET-1 addresses are black-holed, not refused.
        let mut transport =
            TcpControlTransport::with_connect_timeout("192.0.2.1:50000", Duration::from_millis(100));
        let err = transport.connect().await.unwrap_err();
        assert!(
            matches!(err, Error::Timeout | Error::Io(_)),
            "expected Timeout or Io, got: {:?}",
            err
        );
    }

    #[tokio::test]
    async fn peer_close_ends_inbound_and_clears_connected() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut transport = TcpControlTransport::new(&addr);
        let mut inbound = transport.connect().await.unwrap();
        server.await.unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert!(!transport.is_connected());

        let result = transport.send(&[0x02, 0x00]).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_closes_inbound_and_is_idempotent() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpControlTransport::new(&addr);
        let mut inbound = transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert!(inbound.recv().await.is_none());

        // Closing again is a no-op, should not error
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());

        let result = transport.send(&[0x02, 0x00]).await;
        assert!(matches!(result, Err(Error::NotConnected)));

        server.abort();
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpControlTransport::new(&addr);
        let _inbound = transport.connect().await.unwrap();
        assert!(matches!(transport.connect().await, Err(Error::Transport(_))));

        transport.disconnect().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn reconnect_after_disconnect() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 16];
                let n = stream.read(&mut buf).await.unwrap();
                stream.write_all(&buf[..n]).await.unwrap();
            }
        });

        let mut transport = TcpControlTransport::new(&addr);
        for round in 0u8..2 {
            let mut inbound = transport.connect().await.unwrap();
            transport.send(&[0x02, round]).await.unwrap();
            let echoed = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(echoed, vec![0x02, round]);
            transport.disconnect().await.unwrap();
        }

        server.await.unwrap();
    }

    #[test]
    fn addr_accessor() {
        let transport = TcpControlTransport::new("10.0.0.42:50000");
        assert_eq!(transport.addr(), "10.0.0.42:50000");
        assert!(!transport.is_connected());
    }
}
