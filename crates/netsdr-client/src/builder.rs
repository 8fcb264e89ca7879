//! NetSdrBuilder -- fluent builder for constructing [`NetSdrClient`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! network parameters, stream format, and the sample sink before the
//! client opens any socket.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_client::builder::NetSdrBuilder;
//! use netsdr_client::sink::ChannelSink;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let (sink, mut blocks) = ChannelSink::new(64);
//! let mut client = NetSdrBuilder::new()
//!     .host("192.168.1.50")
//!     .sink(sink)
//!     .build()?;
//!
//! client.connect().await?;
//! client.change_frequency(7_074_000, 0).await?;
//! client.start_iq().await?;
//! let first = blocks.recv().await;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use netsdr_core::error::{Error, Result};
use netsdr_core::sink::SampleSink;
use netsdr_core::transport::{ControlTransport, DatagramTransport};
use netsdr_transport::{TcpControlTransport, UdpDatagramTransport};

use crate::client::{ClientOptions, NetSdrClient};
use crate::codec::DataLayout;
use crate::samples::SampleWidth;
use crate::stream::StreamConfig;

/// Default NetSDR TCP control port.
const DEFAULT_TCP_PORT: u16 = 50000;

/// Default local UDP port for the IQ stream.
const DEFAULT_UDP_PORT: u16 = 60000;

/// Fluent builder for [`NetSdrClient`].
///
/// Everything except the host and the sample sink has a default:
///
/// ```ignore
/// let client = NetSdrBuilder::new()
///     .host("192.168.1.50")
///     .sink(my_sink)
///     .build()?;
/// ```
pub struct NetSdrBuilder {
    host: Option<String>,
    tcp_port: u16,
    udp_port: u16,
    command_timeout: Duration,
    sample_rate: u32,
    sample_bits: u16,
    data_layout: DataLayout,
    event_capacity: usize,
    sink: Option<Box<dyn SampleSink>>,
}

impl NetSdrBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        let defaults = ClientOptions::default();
        NetSdrBuilder {
            host: None,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            command_timeout: defaults.command_timeout,
            sample_rate: defaults.sample_rate,
            sample_bits: defaults.stream.width.bits(),
            data_layout: defaults.stream.layout,
            event_capacity: defaults.event_capacity,
            sink: None,
        }
    }

    /// Set the receiver's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the device's TCP control port (default: 50000).
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Set the local UDP port the IQ stream is received on (default: 60000).
    pub fn udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    /// Set the command response timeout (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the IQ output sample rate sent on connect (default: 100000 Hz).
    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = hz;
        self
    }

    /// Set the sample width in bits (default: 16). Validated at build time.
    pub fn sample_width(mut self, bits: u16) -> Self {
        self.sample_bits = bits;
        self
    }

    /// Set the data message body layout (default: sequenced).
    pub fn data_layout(mut self, layout: DataLayout) -> Self {
        self.data_layout = layout;
        self
    }

    /// Set the event broadcast channel capacity (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the destination for decoded samples. Required.
    pub fn sink(mut self, sink: impl SampleSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Build a client using the TCP and UDP socket transports.
    ///
    /// Requires [`host()`](Self::host) and [`sink()`](Self::sink). No
    /// connection is made; call [`NetSdrClient::connect`] next.
    pub fn build(self) -> Result<NetSdrClient> {
        let host = self.host.as_ref().ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;

        let control = TcpControlTransport::new(format!("{}:{}", host, self.tcp_port));
        let datagrams = UdpDatagramTransport::bind_port(self.udp_port);

        tracing::debug!(
            host = %host,
            tcp_port = self.tcp_port,
            udp_port = self.udp_port,
            "Building NetSDR client"
        );
        self.build_with_transports(Box::new(control), Box::new(datagrams))
    }

    /// Build a client over caller-supplied transports.
    ///
    /// This is the primary entry point for testing: pass mock transports
    /// from `netsdr-test-harness`. The host and ports are ignored.
    pub fn build_with_transports(
        mut self,
        control: Box<dyn ControlTransport>,
        datagrams: Box<dyn DatagramTransport>,
    ) -> Result<NetSdrClient> {
        let options = self.options()?;
        let sink = self.sink.take().ok_or_else(|| {
            Error::InvalidParameter("sample sink is required: call .sink() before building".into())
        })?;

        NetSdrClient::new(control, datagrams, sink, options)
    }

    fn options(&self) -> Result<ClientOptions> {
        let width = SampleWidth::from_bits(self.sample_bits)?;
        Ok(ClientOptions {
            command_timeout: self.command_timeout,
            sample_rate: self.sample_rate,
            stream: StreamConfig {
                width,
                layout: self.data_layout,
            },
            event_capacity: self.event_capacity,
        })
    }
}

impl Default for NetSdrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
