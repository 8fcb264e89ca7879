//! IQ sample extraction from data message bodies.
//!
//! The device packs samples as little-endian two's-complement integers of a
//! fixed byte width. [`decode_samples`] walks a body in chunks of that width
//! and sign-extends each chunk to `i32`.

use std::iter::FusedIterator;
use std::slice::ChunksExact;

use netsdr_core::ProtocolError;

/// Validated sample width: 8, 16, 24 or 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleWidth(u8);

impl SampleWidth {
    pub const BITS_8: SampleWidth = SampleWidth(1);
    pub const BITS_16: SampleWidth = SampleWidth(2);
    pub const BITS_24: SampleWidth = SampleWidth(3);
    pub const BITS_32: SampleWidth = SampleWidth(4);

    /// Validate a width in bits.
    ///
    /// Anything that is not a positive multiple of 8 up to 32 is rejected
    /// with [`ProtocolError::InvalidSampleWidth`].
    pub fn from_bits(bits: u16) -> Result<Self, ProtocolError> {
        if bits == 0 || bits > 32 || bits % 8 != 0 {
            return Err(ProtocolError::InvalidSampleWidth(bits));
        }
        Ok(SampleWidth((bits / 8) as u8))
    }

    pub fn bits(self) -> u16 {
        u16::from(self.0) * 8
    }

    pub fn bytes(self) -> usize {
        usize::from(self.0)
    }

    /// Iterate over the samples in `body`. A trailing partial chunk is ignored.
    pub fn decode(self, body: &[u8]) -> Samples<'_> {
        Samples {
            chunks: body.chunks_exact(self.bytes()),
        }
    }
}

impl Default for SampleWidth {
    fn default() -> Self {
        SampleWidth::BITS_16
    }
}

/// Decode `body` as samples of `bits` width.
///
/// The returned iterator is lazy and can be cloned to restart it.
pub fn decode_samples(bits: u16, body: &[u8]) -> Result<Samples<'_>, ProtocolError> {
    Ok(SampleWidth::from_bits(bits)?.decode(body))
}

/// Lazy iterator over the samples of one body.
#[derive(Debug, Clone)]
pub struct Samples<'a> {
    chunks: ChunksExact<'a, u8>,
}

impl Iterator for Samples<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        self.chunks.next().map(sign_extend)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Samples<'_> {}

impl FusedIterator for Samples<'_> {}

/// Assemble a 1-4 byte little-endian chunk and sign-extend it from its
/// natural width.
fn sign_extend(chunk: &[u8]) -> i32 {
    let raw = chunk
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    let shift = 32 - 8 * chunk.len() as u32;
    ((raw << shift) as i32) >> shift
}

/// Narrow a sample to 16 bits for the sink, keeping the low 16 bits.
pub fn narrow(sample: i32) -> i16 {
    sample as i16
}
