//! NetSDR binary message encoding and decoding.
//!
//! Every message starts with a 16-bit little-endian header that packs the
//! message kind into the top three bits and the total message length
//! (header included) into the low thirteen bits. Control messages follow
//! the header with a 16-bit item code and the item's parameters; data
//! messages follow it with the sample payload.
//!
//! # Message layout
//!
//! ```text
//! Header:   [len_lo, kind << 5 | len_hi]        (u16 LE)
//! Control:  Header | item code (i16 LE) | parameters
//! Data:     Header | body
//! Data (sequenced body): Header | sequence (u16 LE) | samples
//! ```
//!
//! A data message carrying exactly 8192 payload bytes does not fit the
//! 13-bit length field; the device encodes it with a length of zero.
//!
//! All encoding/decoding in this module is pure -- no I/O is performed.

use std::fmt;

use bytes::{BufMut, BytesMut};
use netsdr_core::ProtocolError;

/// Header size in bytes.
pub const HEADER_LEN: usize = 2;

/// Size of the control item code that follows a control header.
pub const ITEM_CODE_LEN: usize = 2;

/// Size of the sequence number in a sequenced data body.
pub const SEQUENCE_LEN: usize = 2;

/// Largest length representable in the header.
pub const MAX_MESSAGE_LEN: usize = 0x1FFF;

/// Total length of a maximum-size data message (header plus 8192 bytes).
pub const MAX_DATA_MESSAGE_LEN: usize = HEADER_LEN + 8192;

/// The device's negative acknowledgement: a bare header with length 2.
pub const NAK: [u8; 2] = [0x02, 0x00];

const LENGTH_MASK: u16 = 0x1FFF;
const KIND_SHIFT: u16 = 13;

// ---------------------------------------------------------------------------
// Message kinds and control items
// ---------------------------------------------------------------------------

/// The 3-bit message kind carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Host sets a control item; the device echoes it back.
    SetControlItem = 0,
    /// Request for, or report of, a control item's current value.
    CurrentControlItem = 1,
    /// Request for, or report of, a control item's valid range.
    ControlItemRange = 2,
    /// Data-item acknowledgement.
    Ack = 3,
    DataItem0 = 4,
    DataItem1 = 5,
    DataItem2 = 6,
    DataItem3 = 7,
}

impl MessageKind {
    /// Map the low three bits of `bits` to a kind. Every 3-bit value is valid.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MessageKind::SetControlItem,
            1 => MessageKind::CurrentControlItem,
            2 => MessageKind::ControlItemRange,
            3 => MessageKind::Ack,
            4 => MessageKind::DataItem0,
            5 => MessageKind::DataItem1,
            6 => MessageKind::DataItem2,
            _ => MessageKind::DataItem3,
        }
    }

    /// The 3-bit wire value.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Kinds 0-3 carry a control item code.
    pub fn is_control(self) -> bool {
        self.bits() < 4
    }

    /// Kinds 4-7 carry sample data.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// Control items understood by the client.
///
/// Values are the item codes from the receiver's interface document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ControlItemCode {
    None = 0x0000,
    ReceiverState = 0x0018,
    ReceiverFrequency = 0x0020,
    RfFilter = 0x0044,
    AdModes = 0x008A,
    IqOutputDataSampleRate = 0x00B8,
}

impl ControlItemCode {
    /// The 16-bit wire value.
    pub fn code(self) -> i16 {
        self as i16
    }

    /// Human-readable item name, used in logs, events and errors.
    pub fn name(self) -> &'static str {
        match self {
            ControlItemCode::None => "None",
            ControlItemCode::ReceiverState => "ReceiverState",
            ControlItemCode::ReceiverFrequency => "ReceiverFrequency",
            ControlItemCode::RfFilter => "RFFilter",
            ControlItemCode::AdModes => "ADModes",
            ControlItemCode::IqOutputDataSampleRate => "IQOutputDataSampleRate",
        }
    }
}

impl TryFrom<i16> for ControlItemCode {
    type Error = ProtocolError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0x0000 => Ok(ControlItemCode::None),
            0x0018 => Ok(ControlItemCode::ReceiverState),
            0x0020 => Ok(ControlItemCode::ReceiverFrequency),
            0x0044 => Ok(ControlItemCode::RfFilter),
            0x008A => Ok(ControlItemCode::AdModes),
            0x00B8 => Ok(ControlItemCode::IqOutputDataSampleRate),
            other => Err(ProtocolError::UnrecognizedItem(other)),
        }
    }
}

impl fmt::Display for ControlItemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the body of a data message is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLayout {
    /// Everything after the header is the body.
    #[default]
    Raw,
    /// A 16-bit little-endian sequence number precedes the samples.
    Sequenced,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A decoded NetSDR message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A control-category message (kinds 0-3).
    Control {
        kind: MessageKind,
        item: ControlItemCode,
        parameters: Vec<u8>,
    },
    /// A data-category message (kinds 4-7).
    Data {
        kind: MessageKind,
        /// Present only when decoded with [`DataLayout::Sequenced`].
        sequence: Option<u16>,
        body: Vec<u8>,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Control { kind, .. } | Message::Data { kind, .. } => *kind,
        }
    }

    /// The control item, for control messages.
    pub fn item(&self) -> Option<ControlItemCode> {
        match self {
            Message::Control { item, .. } => Some(*item),
            Message::Data { .. } => None,
        }
    }

    /// The sequence number, for sequenced data messages.
    pub fn sequence(&self) -> Option<u16> {
        match self {
            Message::Control { .. } => None,
            Message::Data { sequence, .. } => *sequence,
        }
    }

    /// Control parameters or data body.
    pub fn body(&self) -> &[u8] {
        match self {
            Message::Control { parameters, .. } => parameters,
            Message::Data { body, .. } => body,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn header(kind: MessageKind, total_len: usize) -> u16 {
    let length = if kind.is_data() && total_len == MAX_DATA_MESSAGE_LEN {
        0
    } else {
        total_len as u16 & LENGTH_MASK
    };
    (u16::from(kind.bits()) << KIND_SHIFT) | length
}

/// Encode a control message: header, item code, parameters.
///
/// Fails with [`ProtocolError::WrongCategory`] for data kinds and with
/// [`ProtocolError::PayloadTooLarge`] when the message would exceed 8191 bytes.
pub fn encode_control_message(
    kind: MessageKind,
    item: ControlItemCode,
    parameters: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if !kind.is_control() {
        return Err(ProtocolError::WrongCategory {
            kind: kind.bits(),
            expected: "control",
        });
    }

    let total = HEADER_LEN + ITEM_CODE_LEN + parameters.len();
    if total > MAX_MESSAGE_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            length: total,
            max: MAX_MESSAGE_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16_le(header(kind, total));
    buf.put_i16_le(item.code());
    buf.put_slice(parameters);
    Ok(buf.to_vec())
}

/// Encode a data message: header followed by `body` verbatim.
///
/// Accepts bodies up to 8189 bytes, and exactly 8192 bytes using the
/// zero-length escape.
pub fn encode_data_message(kind: MessageKind, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if !kind.is_data() {
        return Err(ProtocolError::WrongCategory {
            kind: kind.bits(),
            expected: "data",
        });
    }

    let total = HEADER_LEN + body.len();
    if total > MAX_MESSAGE_LEN && total != MAX_DATA_MESSAGE_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            length: total,
            max: MAX_MESSAGE_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16_le(header(kind, total));
    buf.put_slice(body);
    Ok(buf.to_vec())
}

/// Encode a data message whose body starts with a sequence number.
pub fn encode_sequenced_data_message(
    kind: MessageKind,
    sequence: u16,
    samples: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let mut body = BytesMut::with_capacity(SEQUENCE_LEN + samples.len());
    body.put_u16_le(sequence);
    body.put_slice(samples);
    encode_data_message(kind, &body)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Total message length announced by `header`.
///
/// Handles the zero-length escape for data messages. Returns
/// [`ProtocolError::MalformedHeader`] when the length cannot describe a
/// message (shorter than the header itself); stream reassembly uses this to
/// detect a desynchronised byte stream.
pub fn frame_length(header: u16) -> Result<usize, ProtocolError> {
    let kind = MessageKind::from_bits((header >> KIND_SHIFT) as u8);
    let length = usize::from(header & LENGTH_MASK);

    if length == 0 && kind.is_data() {
        return Ok(MAX_DATA_MESSAGE_LEN);
    }
    if length < HEADER_LEN {
        return Err(ProtocolError::MalformedHeader(header));
    }
    Ok(length)
}

/// Read the header at the start of `bytes`, if there are at least two bytes.
pub fn peek_header(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Decode one complete message, treating data bodies as [`DataLayout::Raw`].
pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    decode_message_with(bytes, DataLayout::Raw)
}

/// Decode one complete message using the given data layout.
///
/// `bytes` must hold exactly one message: the declared length has to match
/// the buffer length.
pub fn decode_message_with(bytes: &[u8], layout: DataLayout) -> Result<Message, ProtocolError> {
    let header = peek_header(bytes).ok_or(ProtocolError::Truncated {
        needed: HEADER_LEN,
        actual: bytes.len(),
    })?;
    let kind = MessageKind::from_bits((header >> KIND_SHIFT) as u8);

    let declared = match frame_length(header) {
        Ok(len) => len,
        Err(_) => usize::from(header & LENGTH_MASK),
    };
    if declared != bytes.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    if kind.is_control() {
        let min = HEADER_LEN + ITEM_CODE_LEN;
        if bytes.len() < min {
            return Err(ProtocolError::Truncated {
                needed: min,
                actual: bytes.len(),
            });
        }
        let code = i16::from_le_bytes([bytes[2], bytes[3]]);
        let item = ControlItemCode::try_from(code)?;
        return Ok(Message::Control {
            kind,
            item,
            parameters: bytes[min..].to_vec(),
        });
    }

    match layout {
        DataLayout::Raw => Ok(Message::Data {
            kind,
            sequence: None,
            body: bytes[HEADER_LEN..].to_vec(),
        }),
        DataLayout::Sequenced => {
            let min = HEADER_LEN + SEQUENCE_LEN;
            if bytes.len() < min {
                return Err(ProtocolError::Truncated {
                    needed: min,
                    actual: bytes.len(),
                });
            }
            Ok(Message::Data {
                kind,
                sequence: Some(u16::from_le_bytes([bytes[2], bytes[3]])),
                body: bytes[min..].to_vec(),
            })
        }
    }
}

/// Whether `bytes` is the device's negative acknowledgement.
pub fn is_nak(bytes: &[u8]) -> bool {
    bytes == NAK
}

// ---------------------------------------------------------------------------
// Command parameters
//
// Each builder returns the parameter bytes only; the item code and header
// are added by `encode_control_message`.
// ---------------------------------------------------------------------------

/// IQ output sample rate for channel 0.
///
/// Layout: `[0x00, rate (u32 LE)]`
pub fn sample_rate_parameters(rate_hz: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(0x00);
    buf.put_u32_le(rate_hz);
    buf.to_vec()
}

/// RF filter selection: channel 0, automatic.
pub fn rf_filter_parameters() -> Vec<u8> {
    vec![0x00, 0x00]
}

/// A/D modes: channel 0, dither and gain bits set.
pub fn ad_modes_parameters() -> Vec<u8> {
    vec![0x00, 0x03]
}

/// Receiver state: complex IQ, run, 16-bit contiguous capture.
pub fn receiver_start_parameters() -> Vec<u8> {
    vec![0x80, 0x02, 0x01, 0x01]
}

/// Receiver state: idle.
pub fn receiver_stop_parameters() -> Vec<u8> {
    vec![0x00, 0x01, 0x00, 0x00]
}

/// Receiver frequency for `channel`.
///
/// The frequency is sent as a 40-bit little-endian value; higher bits are
/// discarded.
pub fn frequency_parameters(hz: u64, channel: u8) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(channel);
    buf.put_slice(&hz.to_le_bytes()[..5]);
    buf.to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
