//! Mock control transport for deterministic testing of the control path.
//!
//! [`MockControlTransport`] implements [`ControlTransport`] with pre-loaded
//! request/response pairs. The transport itself is handed to the client;
//! the paired [`MockControlHandle`] stays with the test to script the
//! device, inject unsolicited traffic, and inspect what was sent.
//!
//! # Example
//!
//! ```
//! use netsdr_test_harness::MockControlTransport;
//!
//! let (transport, device) = MockControlTransport::new();
//! // When the client sends the sample-rate command, echo it back.
//! device.expect(&[0x09, 0x00, 0xB8, 0x00, 0x00, 0xA0, 0x86, 0x01, 0x00],
//!               &[0x09, 0x00, 0xB8, 0x00, 0x00, 0xA0, 0x86, 0x01, 0x00]);
//! # drop(transport);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netsdr_core::error::{Error, Result};
use netsdr_core::transport::{ControlTransport, INBOUND_CHANNEL_CAPACITY, Inbound};

/// A pre-loaded request and the device's reply, if any.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Delivered on the inbound channel when the request matches.
    response: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Shared {
    expectations: VecDeque<Expectation>,
    sent_log: Vec<Vec<u8>>,
    connected: bool,
    inbound_tx: Option<mpsc::Sender<Vec<u8>>>,
    refuse_connect: bool,
    connect_count: usize,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A panicking test thread must not cascade into unrelated assertions.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock [`ControlTransport`] for testing without a device.
///
/// Expectations are consumed in order. When `send()` is called, the data is
/// recorded and matched against the next expectation; its response (if
/// any) is pushed onto the inbound channel. With no expectations left the
/// device stays silent. A mismatch is returned as [`Error::Transport`].
#[derive(Debug)]
pub struct MockControlTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side handle to a [`MockControlTransport`].
#[derive(Debug, Clone)]
pub struct MockControlHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockControlTransport {
    /// Create a disconnected mock transport and its handle.
    pub fn new() -> (Self, MockControlHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            MockControlTransport {
                shared: Arc::clone(&shared),
            },
            MockControlHandle { shared },
        )
    }
}

impl MockControlHandle {
    /// Add an expected request and the response the device sends back.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        lock(&self.shared).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: Some(response.to_vec()),
        });
    }

    /// Add an expected request that the device never answers.
    pub fn expect_silence(&self, request: &[u8]) {
        lock(&self.shared).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: None,
        });
    }

    /// Push bytes onto the inbound channel as if the device sent them.
    ///
    /// Returns `false` when the transport is not connected.
    pub fn push_inbound(&self, data: &[u8]) -> bool {
        let shared = lock(&self.shared);
        match &shared.inbound_tx {
            Some(tx) => tx.try_send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulate the device closing the connection.
    pub fn drop_connection(&self) {
        let mut shared = lock(&self.shared);
        shared.connected = false;
        shared.inbound_tx = None;
    }

    /// Make subsequent `connect()` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.shared).refuse_connect = refuse;
    }

    /// All data sent through the transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).sent_log.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.shared).expectations.len()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        lock(&self.shared).connect_count
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }

    /// Poll until at least `count` sends were recorded or `timeout` passes.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.shared).sent_log.len() >= count {
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
impl ControlTransport for MockControlTransport {
    async fn connect(&mut self) -> Result<Inbound> {
        let mut shared = lock(&self.shared);
        if shared.refuse_connect {
            return Err(Error::Transport("connection refused: mock device".into()));
        }
        if shared.connected {
            return Err(Error::Transport("already connected".into()));
        }

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        shared.inbound_tx = Some(tx);
        shared.connected = true;
        shared.connect_count += 1;
        Ok(rx)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        if !shared.connected {
            return Err(Error::NotConnected);
        }

        // Record what was sent.
        shared.sent_log.push(data.to_vec());

        let Some(expectation) = shared.expectations.pop_front() else {
            return Ok(());
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Transport(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        }

        if let (Some(response), Some(tx)) = (expectation.response, &shared.inbound_tx) {
            if tx.try_send(response).is_err() {
                tracing::warn!("Mock control inbound channel full, response dropped");
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.connected = false;
        shared.inbound_tx = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_reply_arrives_on_inbound() {
        let (mut mock, device) = MockControlTransport::new();
        device.expect(&[0x04, 0x20, 0x20, 0x00], &[0x05, 0x20, 0x20, 0x00, 0x00]);

        let mut inbound = mock.connect().await.unwrap();
        mock.send(&[0x04, 0x20, 0x20, 0x00]).await.unwrap();

        assert_eq!(inbound.recv().await, Some(vec![0x05, 0x20, 0x20, 0x00, 0x00]));
        assert_eq!(device.sent_data(), vec![vec![0x04, 0x20, 0x20, 0x00]]);
        assert_eq!(device.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn wrong_data_errors() {
        let (mut mock, device) = MockControlTransport::new();
        device.expect(&[0x01], &[0xFF]);

        let _inbound = mock.connect().await.unwrap();
        let result = mock.send(&[0x99]).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn silent_device_records_without_reply() {
        let (mut mock, device) = MockControlTransport::new();
        device.expect_silence(&[0x01, 0x02]);

        let mut inbound = mock.connect().await.unwrap();
        mock.send(&[0x01, 0x02]).await.unwrap();
        mock.send(&[0x03]).await.unwrap();

        assert!(inbound.try_recv().is_err());
        assert_eq!(device.sent_data().len(), 2);
    }

    #[tokio::test]
    async fn send_while_disconnected() {
        let (mut mock, _device) = MockControlTransport::new();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send(&[0x01]).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn drop_connection_closes_inbound() {
        let (mut mock, device) = MockControlTransport::new();
        let mut inbound = mock.connect().await.unwrap();
        assert!(device.push_inbound(&[0x02, 0x00]));

        device.drop_connection();
        assert_eq!(inbound.recv().await, Some(vec![0x02, 0x00]));
        assert_eq!(inbound.recv().await, None);
        assert!(!mock.is_connected());
        assert!(!device.push_inbound(&[0x02, 0x00]));
    }

    #[tokio::test]
    async fn refused_connection() {
        let (mut mock, device) = MockControlTransport::new();
        device.refuse_connections(true);
        assert!(matches!(mock.connect().await, Err(Error::Transport(_))));
        assert_eq!(device.connect_count(), 0);

        device.refuse_connections(false);
        let _inbound = mock.connect().await.unwrap();
        assert_eq!(device.connect_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_then_reconnect() {
        let (mut mock, device) = MockControlTransport::new();
        let mut first = mock.connect().await.unwrap();
        mock.disconnect().await.unwrap();
        assert_eq!(first.recv().await, None);

        let _second = mock.connect().await.unwrap();
        assert!(device.is_connected());
        assert_eq!(device.connect_count(), 2);
    }
}
