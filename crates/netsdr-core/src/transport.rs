//! Transport traits for device communication.
//!
//! The NetSDR protocol is split across two links: a TCP control link for
//! commands and acknowledgements, and a UDP data link for the IQ sample
//! stream. Each link is abstracted by a trait so the client can run
//! against real sockets (`netsdr-transport`) or scripted mocks
//! (`netsdr-test-harness`).
//!
//! Inbound traffic is not delivered through callbacks. Opening a link
//! returns an [`Inbound`] channel receiver; the transport's own receive
//! task pushes every buffer onto it and drops the sender when the link
//! closes, so consumers see `None` from `recv()` on closure.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Capacity of the inbound buffer channel created by transports.
pub const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Receiving end of a transport's inbound buffer channel.
pub type Inbound = mpsc::Receiver<Vec<u8>>;

/// Connection-oriented byte transport carrying control messages.
///
/// The transport is byte-level: a buffer delivered on [`Inbound`] may hold
/// part of a message, exactly one message, or several. Reassembly into
/// whole messages is the control channel's job.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Open the connection and start delivering inbound buffers.
    ///
    /// Calling `connect()` on an already connected transport is an error;
    /// the client checks [`is_connected`](Self::is_connected) first.
    async fn connect(&mut self) -> Result<Inbound>;

    /// Send raw bytes to the device.
    ///
    /// Returns [`Error::NotConnected`](crate::Error::NotConnected) when the
    /// connection is not open.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Close the connection.
    ///
    /// Stops the receive task first, then releases the socket. Closing an
    /// already closed transport is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Datagram transport carrying the sample stream.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Bind the receive socket and start delivering datagrams, one per buffer.
    async fn start_receiving(&mut self) -> Result<Inbound>;

    /// Stop the receive task and release the socket.
    ///
    /// Stopping a transport that is not receiving is a no-op.
    async fn stop_receiving(&mut self) -> Result<()>;

    /// Check whether the transport is currently receiving.
    fn is_receiving(&self) -> bool;
}
