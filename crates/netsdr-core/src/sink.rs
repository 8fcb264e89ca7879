//! Destination for reconstructed IQ samples.

use async_trait::async_trait;

use crate::error::Result;

/// Consumer of decoded sample blocks.
///
/// The stream channel calls [`append`](SampleSink::append) once per data
/// message, with every sample already narrowed to 16 bits. Implementations
/// must not wait on control-channel state; a slow sink only delays the
/// sample stream.
#[async_trait]
pub trait SampleSink: Send {
    /// Append one block of samples.
    async fn append(&mut self, samples: &[i16]) -> Result<()>;

    /// Flush any buffered samples. Called when the stream stops.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
