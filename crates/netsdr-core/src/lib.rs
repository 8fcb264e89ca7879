//! netsdr-core: Core traits, types, and error definitions for the NetSDR client.
//!
//! This crate defines the transport-agnostic abstractions shared by the
//! client, the socket transports, and the test harness.
//!
//! # Key types
//!
//! - [`ControlTransport`] / [`DatagramTransport`] -- the two device links
//! - [`SampleSink`] -- destination for decoded IQ samples
//! - [`ClientEvent`] -- asynchronous state change notifications
//! - [`Error`] / [`ProtocolError`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod sink;
pub mod transport;

pub use error::{Error, ProtocolError, Result};
pub use events::ClientEvent;
pub use sink::SampleSink;
pub use transport::{ControlTransport, DatagramTransport, INBOUND_CHANNEL_CAPACITY, Inbound};
