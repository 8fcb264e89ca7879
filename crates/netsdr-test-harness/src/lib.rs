//! netsdr-test-harness: Mock transports, sinks, and a scripted device for
//! testing the NetSDR client.
//!
//! This crate provides [`MockControlTransport`] and [`MockDatagramTransport`]
//! for deterministic unit testing of the client without a receiver,
//! [`RecordingSink`] to capture decoded samples, and [`MockNetSdrServer`]
//! for tests that go through a real TCP socket.

pub mod mock_control;
pub mod mock_datagram;
pub mod mock_server;

pub use mock_control::{MockControlHandle, MockControlTransport};
pub use mock_datagram::{MockDatagramHandle, MockDatagramTransport, RecordingSink};
pub use mock_server::MockNetSdrServer;
