//! Error types for the NetSDR client.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Wire-format problems are described by
//! [`ProtocolError`] and wrapped in [`Error::Protocol`].

/// Malformed-data errors raised by the message codec and sample decoder.
///
/// These never tear down a channel: the offending message is discarded and
/// the caller keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The encoded message would not fit in the 13-bit length field.
    #[error("payload too large: {length} bytes exceeds maximum of {max}")]
    PayloadTooLarge { length: usize, max: usize },

    /// The header's declared length does not match the buffer length.
    #[error("length mismatch: header declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Sample width is not a positive multiple of 8 no larger than 32.
    #[error("invalid sample width: {0} bits")]
    InvalidSampleWidth(u16),

    /// The buffer ends before a required field.
    #[error("message truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    /// A control message carries an item code this client does not know.
    ///
    /// Callers treat this as "could not translate", not as a fatal error.
    #[error("unrecognized control item code 0x{0:04X}")]
    UnrecognizedItem(i16),

    /// A control-only operation was given a data kind, or vice versa.
    #[error("message kind {kind} is not a {expected} kind")]
    WrongCategory { kind: u8, expected: &'static str },

    /// A header that cannot describe any valid message.
    #[error("malformed header 0x{0:04X}")]
    MalformedHeader(u16),
}

/// The error type for all NetSDR client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket, UDP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// The device sent, or the caller supplied, malformed protocol data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Timed out waiting for a response from the device.
    #[error("timeout waiting for response")]
    Timeout,

    /// A command was attempted without a live control connection.
    #[error("not connected")]
    NotConnected,

    /// A control request was issued while another one is still outstanding.
    ///
    /// The control channel carries exactly one request at a time; issuing a
    /// second one would risk attributing a reply to the wrong request.
    #[error("a control request is already in flight")]
    RequestAlreadyInFlight,

    /// A pending control request was abandoned because the channel closed.
    #[error("control channel closed")]
    ChannelClosed,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The device answered a command with a NAK.
    #[error("device rejected {item} command")]
    Rejected { item: String },

    /// An invalid parameter was passed to a client operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_display_in_flight() {
        assert_eq!(
            Error::RequestAlreadyInFlight.to_string(),
            "a control request is already in flight"
        );
    }

    #[test]
    fn error_display_channel_closed() {
        assert_eq!(Error::ChannelClosed.to_string(), "control channel closed");
    }

    #[test]
    fn error_display_rejected() {
        let e = Error::Rejected {
            item: "ReceiverState".into(),
        };
        assert_eq!(e.to_string(), "device rejected ReceiverState command");
    }

    #[test]
    fn protocol_error_display_length_mismatch() {
        let e = ProtocolError::LengthMismatch {
            declared: 4,
            actual: 3,
        };
        assert_eq!(
            e.to_string(),
            "length mismatch: header declares 4 bytes, buffer holds 3"
        );
    }

    #[test]
    fn protocol_error_display_unrecognized_item() {
        let e = ProtocolError::UnrecognizedItem(-1);
        assert_eq!(e.to_string(), "unrecognized control item code 0xFFFF");
    }

    #[test]
    fn protocol_error_converts_into_error() {
        let e: Error = ProtocolError::InvalidSampleWidth(12).into();
        assert!(matches!(
            e,
            Error::Protocol(ProtocolError::InvalidSampleWidth(12))
        ));
        assert_eq!(e.to_string(), "protocol error: invalid sample width: 12 bits");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
