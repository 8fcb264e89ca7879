//! UDP datagram transport for the IQ sample stream.
//!
//! This module provides [`UdpDatagramTransport`], which implements the
//! [`DatagramTransport`] trait over a tokio [`UdpSocket`]. The socket is
//! bound when receiving starts and released when it stops, so the local
//! port is only held while the device is streaming.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_core::transport::DatagramTransport;
//! use netsdr_transport::UdpDatagramTransport;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut transport = UdpDatagramTransport::bind_port(60000);
//! let mut inbound = transport.start_receiving().await?;
//!
//! while let Some(datagram) = inbound.recv().await {
//!     println!("Received {} bytes", datagram.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use async_trait::async_trait;
use netsdr_core::error::{Error, Result};
use netsdr_core::transport::{DatagramTransport, INBOUND_CHANNEL_CAPACITY, Inbound};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug)]
struct ReceiverTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// UDP receiver for NetSDR data messages.
///
/// Each received datagram is delivered as one buffer on the [`Inbound`]
/// channel. The sender address is not checked.
#[derive(Debug)]
pub struct UdpDatagramTransport {
    /// Local `host:port` to bind when receiving starts.
    bind_addr: String,
    /// Address actually bound, `None` while stopped.
    local_addr: Option<SocketAddr>,
    receiver: Option<ReceiverTask>,
}

impl UdpDatagramTransport {
    /// Create a transport that binds `bind_addr` (e.g. `"0.0.0.0:60000"`).
    ///
    /// No socket is opened until [`start_receiving`](DatagramTransport::start_receiving).
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            local_addr: None,
            receiver: None,
        }
    }

    /// Create a transport listening on `port` on all IPv4 interfaces.
    pub fn bind_port(port: u16) -> Self {
        Self::new(format!("0.0.0.0:{}", port))
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// The address the socket is bound to while receiving.
    ///
    /// Useful when binding port 0 and the OS picks the port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl DatagramTransport for UdpDatagramTransport {
    async fn start_receiving(&mut self) -> Result<Inbound> {
        // Restarting replaces the previous socket.
        if self.receiver.is_some() {
            tracing::debug!(addr = %self.bind_addr, "Restarting UDP receiver");
            self.stop_receiving().await?;
        }

        tracing::debug!(addr = %self.bind_addr, "Binding UDP socket");

        let socket = UdpSocket::bind(&self.bind_addr).await.map_err(|e| {
            tracing::error!(addr = %self.bind_addr, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;
        let local_addr = socket.local_addr().map_err(Error::Io)?;

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv_loop(socket, tx, cancel.clone(), local_addr));

        self.local_addr = Some(local_addr);
        self.receiver = Some(ReceiverTask { cancel, task });

        tracing::info!(local_addr = %local_addr, "UDP receiver started");
        Ok(rx)
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(());
        };

        receiver.cancel.cancel();
        if let Err(e) = receiver.task.await {
            tracing::debug!(addr = %self.bind_addr, error = %e, "UDP receiver task ended abnormally");
        }

        if let Some(local_addr) = self.local_addr.take() {
            tracing::info!(local_addr = %local_addr, "UDP receiver stopped");
        }
        Ok(())
    }

    fn is_receiving(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }
}

impl Drop for UdpDatagramTransport {
    fn drop(&mut self) {
        if let Some(receiver) = &self.receiver {
            receiver.cancel.cancel();
        }
    }
}

/// Receive task. Owns the socket, so it is released when the task ends.
async fn recv_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let n = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            result = socket.recv_from(&mut buf) => match result {
                Ok((n, src)) => {
                    tracing::trace!(
                        local_addr = %local_addr,
                        src = %src,
                        bytes = n,
                        "Received UDP datagram"
                    );
                    n
                }
                Err(e) => {
                    tracing::error!(local_addr = %local_addr, error = %e, "Failed to receive UDP datagram");
                    break;
                }
            },
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            sent = tx.send(buf[..n].to_vec()) => {
                if sent.is_err() {
                    tracing::debug!(local_addr = %local_addr, "Inbound receiver dropped, stopping UDP receiver");
                    break;
                }
            }
        }
    }
}
