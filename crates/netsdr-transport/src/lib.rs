//! Socket transports for the NetSDR client.
//!
//! This crate provides concrete implementations of the transport traits
//! from `netsdr-core`:
//!
//! - [`TcpControlTransport`]: the TCP control link (device port 50000)
//! - [`UdpDatagramTransport`]: the UDP sample stream (local port 60000)
//!
//! # Example
//!
//! ```no_run
//! use netsdr_core::transport::{ControlTransport, DatagramTransport};
//! use netsdr_transport::{TcpControlTransport, UdpDatagramTransport};
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut control = TcpControlTransport::new("192.168.1.50:50000");
//! let mut data = UdpDatagramTransport::bind_port(60000);
//!
//! let _replies = control.connect().await?;
//! let _datagrams = data.start_receiving().await?;
//! # Ok(())
//! # }
//! ```

pub mod tcp;
pub mod udp;

pub use tcp::TcpControlTransport;
pub use udp::UdpDatagramTransport;
