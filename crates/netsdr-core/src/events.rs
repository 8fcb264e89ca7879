//! Asynchronous client event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel when the
//! client's connection or stream state changes, and when the device sends
//! something the client reports but does not treat as an error.

/// An event emitted by the NetSDR client.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow subscribers may miss events under heavy sample traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The control connection is up.
    Connected,

    /// The control connection was closed or lost.
    Disconnected,

    /// The IQ sample stream started.
    StreamStarted,

    /// The IQ sample stream stopped.
    StreamStopped,

    /// The device sent a control message while no request was pending.
    UnsolicitedMessage {
        /// Raw 3-bit message kind from the header.
        kind: u8,
        /// Control item code, when the message decoded as a known control item.
        item: Option<i16>,
        /// Total message length in bytes.
        len: usize,
    },

    /// A data message arrived with an unexpected sequence number.
    SequenceGap {
        /// The sequence number that should have arrived next.
        expected: u16,
        /// The sequence number that did arrive.
        received: u16,
    },

    /// A datagram could not be decoded and was discarded.
    MalformedDatagram {
        /// Human-readable decode failure.
        reason: String,
    },

    /// A control command failed.
    CommandFailed {
        /// Name of the control item the command addressed.
        item: String,
        /// Human-readable failure.
        reason: String,
    },
}
