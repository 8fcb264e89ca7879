//! NetSDR receiver client.
//!
//! This crate implements the binary control and streaming protocol of
//! NetSDR software-defined receivers. It provides:
//!
//! - **Codec** ([`codec`]) -- encode and decode control and data messages,
//!   plus the parameter layouts of the commands the client sends.
//! - **Sample decoding** ([`samples`]) -- lazily reconstruct signed samples
//!   of 8 to 32 bits from a data message body.
//! - **Control channel** ([`control`]) -- one outstanding request at a time
//!   over the TCP link, with stream reassembly and unsolicited reporting.
//! - **Stream channel** ([`stream`]) -- start/stop of the UDP sample stream
//!   and its decode loop.
//! - **NetSdrClient** ([`client`]) -- the connect/tune/stream state machine.
//! - **NetSdrBuilder** ([`builder`]) -- fluent construction over socket or
//!   caller-supplied transports.
//! - **ChannelSink** ([`sink`]) -- deliver sample blocks to an mpsc receiver.
//!
//! # Architecture
//!
//! The receiver uses a split transport:
//! - **TCP** (port 50000) for control items: every command is echoed or
//!   NAKed by the device before the next one is sent.
//! - **UDP** (port 60000) for IQ data, one data message per datagram.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_client::{ChannelSink, NetSdrBuilder};
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let (sink, mut blocks) = ChannelSink::new(64);
//! let mut client = NetSdrBuilder::new().host("192.168.1.50").sink(sink).build()?;
//!
//! client.connect().await?;
//! client.start_iq().await?;
//! while let Some(block) = blocks.recv().await {
//!     println!("{} samples", block.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod codec;
pub mod control;
pub mod samples;
pub mod sink;
pub mod stream;

pub use builder::NetSdrBuilder;
pub use client::{ClientOptions, ConnectionState, NetSdrClient};
pub use codec::{ControlItemCode, DataLayout, Message, MessageKind};
pub use samples::{SampleWidth, Samples, decode_samples};
pub use sink::ChannelSink;
pub use stream::StreamConfig;
