//! Mock NetSDR device over TCP.
//!
//! [`MockNetSdrServer`] provides a lightweight TCP listener pre-loaded with
//! scripted replies, enabling end-to-end tests of the socket transport and
//! client without a receiver on the network.
//!
//! # Example
//!
//! ```
//! use netsdr_test_harness::MockNetSdrServer;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut server = MockNetSdrServer::new().await?;
//!
//! // When the client sends the RF filter command, echo it back.
//! server.expect(&[0x06, 0x00, 0x44, 0x00, 0x00, 0x00], &[0x06, 0x00, 0x44, 0x00, 0x00, 0x00]);
//! server.start();
//!
//! let port = server.port();
//! // ... connect and test ...
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use netsdr_core::error::{Error, Result};

/// A scripted exchange for the mock server.
#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes we expect the client to send.
    request: Vec<u8>,
    /// Written back once the request has been read; `None` stays silent.
    response: Option<Vec<u8>>,
}

/// A mock NetSDR device for testing over a real TCP connection.
///
/// The server listens on a random available port on localhost. Once
/// [`start`](MockNetSdrServer::start) is called, it accepts a single
/// connection and processes expectations in order. After the script it
/// keeps the connection open until the client closes it.
pub struct MockNetSdrServer {
    listener: Option<TcpListener>,
    addr: SocketAddr,
    expectations: VecDeque<TcpExpectation>,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockNetSdrServer {
    /// Create a new mock server listening on a random port.
    ///
    /// Connections are not accepted until [`start`](MockNetSdrServer::start)
    /// is called, allowing expectations to be loaded first. The OS queues
    /// early connection attempts, so clients may connect before `start`.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock NetSDR server: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?;

        Ok(Self {
            listener: Some(listener),
            addr,
            expectations: VecDeque::new(),
            server_handle: None,
        })
    }

    /// Add an expected request and the reply to send.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: Some(response.to_vec()),
        });
    }

    /// Add an expected request that gets no reply.
    pub fn expect_silence(&mut self, request: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: None,
        });
    }

    /// Get the address the server is listening on, e.g. `"127.0.0.1:54321"`.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Start serving the script on a background task.
    ///
    /// Call [`wait`](MockNetSdrServer::wait) to collect the outcome.
    /// Calling `start` twice has no effect.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;

            for (i, expectation) in expectations.iter().enumerate() {
                read_request(&mut stream, i, &expectation.request).await?;

                if let Some(response) = &expectation.response {
                    stream
                        .write_all(response)
                        .await
                        .map_err(|e| format!("expectation {}: write error: {}", i, e))?;
                    stream
                        .flush()
                        .await
                        .map_err(|e| format!("expectation {}: flush error: {}", i, e))?;
                }
            }

            // Hold the connection until the client hangs up.
            let mut sink = [0u8; 256];
            loop {
                match stream.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => tracing::debug!(bytes = n, "Mock server ignoring unscripted data"),
                }
            }
            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to complete and return any errors.
    ///
    /// Completes once the client has disconnected.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.server_handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?,
            None => Ok(()),
        }
    }
}

/// Read exactly `expected.len()` bytes and compare.
async fn read_request(
    stream: &mut TcpStream,
    index: usize,
    expected: &[u8],
) -> std::result::Result<(), String> {
    let mut buf = vec![0u8; expected.len()];
    let mut total_read = 0;

    while total_read < expected.len() {
        let n = stream
            .read(&mut buf[total_read..])
            .await
            .map_err(|e| format!("expectation {}: read error: {}", index, e))?;
        if n == 0 {
            return Err(format!(
                "expectation {}: client disconnected after {} bytes (expected {})",
                index,
                total_read,
                expected.len()
            ));
        }
        total_read += n;
    }

    if buf != expected {
        return Err(format!(
            "expectation {}: request mismatch: expected {:02X?}, got {:02X?}",
            index, expected, buf
        ));
    }
    Ok(())
}
