//! Mock datagram transport and recording sample sink.
//!
//! [`MockDatagramTransport`] stands in for the UDP socket: the test injects
//! datagrams through a [`MockDatagramHandle`] while the client's stream
//! loop consumes them. [`RecordingSink`] captures what the loop produces.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netsdr_core::error::{Error, Result};
use netsdr_core::sink::SampleSink;
use netsdr_core::transport::{DatagramTransport, INBOUND_CHANNEL_CAPACITY, Inbound};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct DatagramState {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    fail_start: bool,
    start_count: usize,
    stop_count: usize,
}

/// A mock [`DatagramTransport`].
#[derive(Debug)]
pub struct MockDatagramTransport {
    state: Arc<Mutex<DatagramState>>,
}

/// Test-side handle to a [`MockDatagramTransport`].
#[derive(Debug, Clone)]
pub struct MockDatagramHandle {
    state: Arc<Mutex<DatagramState>>,
}

impl MockDatagramTransport {
    /// Create a stopped mock transport and its handle.
    pub fn new() -> (Self, MockDatagramHandle) {
        let state = Arc::new(Mutex::new(DatagramState::default()));
        (
            MockDatagramTransport {
                state: Arc::clone(&state),
            },
            MockDatagramHandle { state },
        )
    }
}

impl MockDatagramHandle {
    /// Deliver a datagram. Returns `false` if the transport is not receiving.
    pub async fn inject(&self, datagram: &[u8]) -> bool {
        let tx = lock(&self.state).tx.clone();
        match tx {
            Some(tx) => tx.send(datagram.to_vec()).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the socket failing: the inbound channel closes.
    pub fn close(&self) {
        lock(&self.state).tx = None;
    }

    /// Make subsequent `start_receiving()` calls fail.
    pub fn fail_start(&self, fail: bool) {
        lock(&self.state).fail_start = fail;
    }

    pub fn is_receiving(&self) -> bool {
        lock(&self.state).tx.is_some()
    }

    /// Number of successful `start_receiving()` calls.
    pub fn start_count(&self) -> usize {
        lock(&self.state).start_count
    }

    /// Number of `stop_receiving()` calls that released a receiver.
    pub fn stop_count(&self) -> usize {
        lock(&self.state).stop_count
    }
}

#[async_trait]
impl DatagramTransport for MockDatagramTransport {
    async fn start_receiving(&mut self) -> Result<Inbound> {
        let mut state = lock(&self.state);
        if state.fail_start {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "mock bind failure",
            )));
        }
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        state.tx = Some(tx);
        state.start_count += 1;
        Ok(rx)
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.tx.take().is_some() {
            state.stop_count += 1;
        }
        Ok(())
    }

    fn is_receiving(&self) -> bool {
        lock(&self.state).tx.is_some()
    }
}

#[derive(Debug, Default)]
struct Recording {
    blocks: Vec<Vec<i16>>,
    flushes: usize,
    failing: bool,
}

/// A [`SampleSink`] that records every block. Clones share the recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    recording: Arc<Mutex<Recording>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded samples, concatenated.
    pub fn samples(&self) -> Vec<i16> {
        lock(&self.recording).blocks.concat()
    }

    /// Recorded blocks, one per `append()`.
    pub fn blocks(&self) -> Vec<Vec<i16>> {
        lock(&self.recording).blocks.clone()
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.recording).flushes
    }

    /// Make `append()` fail without recording.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.recording).failing = failing;
    }

    /// Poll until at least `count` blocks were recorded or `timeout` passes.
    pub async fn wait_for_blocks(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.recording).blocks.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl SampleSink for RecordingSink {
    async fn append(&mut self, samples: &[i16]) -> Result<()> {
        let mut recording = lock(&self.recording);
        if recording.failing {
            return Err(Error::Transport("recording sink failure".into()));
        }
        recording.blocks.push(samples.to_vec());
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        lock(&self.recording).flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inject_requires_receiving() {
        let (mut mock, handle) = MockDatagramTransport::new();
        assert!(!handle.inject(&[0x04, 0x80]).await);

        let mut inbound = mock.start_receiving().await.unwrap();
        assert!(handle.inject(&[0x04, 0x80]).await);
        assert_eq!(inbound.recv().await, Some(vec![0x04, 0x80]));

        mock.stop_receiving().await.unwrap();
        assert_eq!(inbound.recv().await, None);
        assert_eq!(handle.start_count(), 1);
        assert_eq!(handle.stop_count(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let (mut mock, handle) = MockDatagramTransport::new();
        mock.stop_receiving().await.unwrap();
        assert_eq!(handle.stop_count(), 0);
    }

    #[tokio::test]
    async fn failing_start() {
        let (mut mock, handle) = MockDatagramTransport::new();
        handle.fail_start(true);
        assert!(matches!(mock.start_receiving().await, Err(Error::Io(_))));
        assert!(!mock.is_receiving());
    }

    #[tokio::test]
    async fn recording_sink_shares_state() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.append(&[1, 2]).await.unwrap();
        writer.append(&[3]).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(sink.samples(), vec![1, 2, 3]);
        assert_eq!(sink.blocks().len(), 2);
        assert_eq!(sink.flush_count(), 1);

        sink.set_failing(true);
        assert!(writer.append(&[4]).await.is_err());
        assert_eq!(sink.samples(), vec![1, 2, 3]);
    }
}
