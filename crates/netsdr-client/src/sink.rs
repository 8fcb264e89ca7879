//! Channel-backed sample sink.
//!
//! [`ChannelSink`] forwards every sample block onto a bounded mpsc channel
//! so an application task can consume the stream. Blocks are dropped, not
//! queued, when the consumer falls behind: the decode loop must never stall
//! on a slow reader.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use netsdr_core::error::{Error, Result};
use netsdr_core::sink::SampleSink;

/// A [`SampleSink`] that delivers blocks over an mpsc channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<i16>>,
    dropped: u64,
}

impl ChannelSink {
    /// Create a sink and the receiver for its blocks.
    ///
    /// `capacity` is the number of blocks buffered before new ones are
    /// dropped; it must be non-zero.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<i16>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    /// Number of blocks dropped because the receiver was full.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped
    }
}

#[async_trait]
impl SampleSink for ChannelSink {
    async fn append(&mut self, samples: &[i16]) -> Result<()> {
        match self.tx.try_send(samples.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(block)) => {
                self.dropped += 1;
                tracing::trace!(
                    samples = block.len(),
                    dropped = self.dropped,
                    "Sample receiver full, dropping block"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(Error::Transport("sample receiver dropped".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_blocks_in_order() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.append(&[1, 2]).await.unwrap();
        sink.append(&[-3]).await.unwrap();

        assert_eq!(rx.recv().await, Some(vec![1, 2]));
        assert_eq!(rx.recv().await, Some(vec![-3]));
        assert_eq!(sink.dropped_blocks(), 0);
    }

    #[tokio::test]
    async fn drops_when_full() {
        let (mut sink, mut rx) = ChannelSink::new(1);
        sink.append(&[1]).await.unwrap();
        sink.append(&[2]).await.unwrap();
        assert_eq!(sink.dropped_blocks(), 1);

        assert_eq!(rx.recv().await, Some(vec![1]));
        sink.append(&[3]).await.unwrap();
        assert_eq!(rx.recv().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn closed_receiver_is_an_error() {
        let (mut sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert!(matches!(sink.append(&[1]).await, Err(Error::Transport(_))));
        sink.flush().await.unwrap();
    }
}
