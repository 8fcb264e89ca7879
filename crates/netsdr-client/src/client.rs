//! NetSDR client state machine.
//!
//! [`NetSdrClient`] drives a [`ControlChannel`] and a [`StreamChannel`]
//! through `Disconnected -> Connected -> Streaming`. It encodes the
//! receiver's control commands, maps device NAKs to errors, and broadcasts
//! [`ClientEvent`]s as the state changes.

use std::time::Duration;

use tokio::sync::broadcast;

use netsdr_core::error::{Error, Result};
use netsdr_core::events::ClientEvent;
use netsdr_core::sink::SampleSink;
use netsdr_core::transport::{ControlTransport, DatagramTransport};

use crate::codec::{self, ControlItemCode, MessageKind};
use crate::control::ControlChannel;
use crate::stream::{StreamChannel, StreamConfig};

/// Default command timeout (2 seconds).
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default IQ output sample rate in Hz.
const DEFAULT_SAMPLE_RATE: u32 = 100_000;

/// Broadcast channel capacity for ClientEvent subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Options for configuring the client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for individual command responses.
    pub command_timeout: Duration,
    /// IQ output sample rate sent during connect.
    pub sample_rate: u32,
    /// Datagram interpretation.
    pub stream: StreamConfig,
    /// Capacity of the event broadcast channel. Must be non-zero.
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            stream: StreamConfig::default(),
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Streaming,
}

/// NetSDR receiver client.
///
/// Operations take `&mut self`: the device accepts one command at a time,
/// and the client serializes them by construction.
pub struct NetSdrClient {
    control: ControlChannel,
    stream: StreamChannel,
    state: ConnectionState,
    options: ClientOptions,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl NetSdrClient {
    /// Assemble a client from its transports and sink. Nothing is opened
    /// until [`connect`](Self::connect).
    ///
    /// Returns [`Error::InvalidParameter`] for a zero event capacity.
    pub fn new(
        control: Box<dyn ControlTransport>,
        datagrams: Box<dyn DatagramTransport>,
        sink: Box<dyn SampleSink>,
        options: ClientOptions,
    ) -> Result<Self> {
        if options.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event capacity must be non-zero".into(),
            ));
        }

        let (event_tx, _) = broadcast::channel(options.event_capacity);
        let control = ControlChannel::new(control, options.command_timeout, event_tx.clone());
        let stream = StreamChannel::new(
            datagrams,
            sink,
            options.stream,
            control.connection_flag(),
            event_tx.clone(),
        );

        Ok(Self {
            control,
            stream,
            state: ConnectionState::Disconnected,
            options,
            event_tx,
        })
    }

    /// Open the control link and configure the receiver.
    ///
    /// Sends the sample rate, RF filter and A/D mode commands in that
    /// order, each acknowledged before the next. If one fails the rest are
    /// skipped and the error is returned, but the link stays up.
    pub async fn connect(&mut self) -> Result<()> {
        if self.control.is_connected() {
            tracing::debug!("Already connected");
            return Ok(());
        }

        // A stream left over from a link that dropped was never started on
        // the new connection.
        if self.state == ConnectionState::Streaming || self.stream.is_running() {
            tracing::warn!("Stopping IQ stream left over from a lost connection");
            self.stream.stop().await?;
            if self.state == ConnectionState::Streaming {
                let _ = self.event_tx.send(ClientEvent::StreamStopped);
            }
            self.state = ConnectionState::Disconnected;
        }

        if let Err(e) = self.control.open().await {
            tracing::error!(error = %e, "Failed to open control connection");
            self.state = ConnectionState::Disconnected;
            return Err(e);
        }

        self.state = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected);
        tracing::info!("NetSDR client connected");

        let setup = [
            (
                ControlItemCode::IqOutputDataSampleRate,
                codec::sample_rate_parameters(self.options.sample_rate),
            ),
            (ControlItemCode::RfFilter, codec::rf_filter_parameters()),
            (ControlItemCode::AdModes, codec::ad_modes_parameters()),
        ];
        for (item, parameters) in setup {
            self.command(item, &parameters).await?;
        }

        tracing::debug!(sample_rate = self.options.sample_rate, "Receiver configured");
        Ok(())
    }

    /// Stop streaming if needed and close the control link. Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected && !self.control.is_connected() {
            return Ok(());
        }

        if self.state == ConnectionState::Streaming {
            if let Err(e) = self.stop_iq().await {
                tracing::warn!(error = %e, "Stop IQ failed during disconnect (continuing)");
            }
        }
        self.stream.stop().await?;

        if let Err(e) = self.control.close().await {
            tracing::debug!(error = %e, "Error closing control connection (ignored)");
        }

        self.state = ConnectionState::Disconnected;
        let _ = self.event_tx.send(ClientEvent::Disconnected);
        tracing::info!("NetSDR client disconnected");
        Ok(())
    }

    /// Tune `channel` to `hz`. Only the low 40 bits of `hz` are sent.
    pub async fn change_frequency(&mut self, hz: u64, channel: u8) -> Result<()> {
        if !self.control.is_connected() {
            tracing::warn!(hz = hz, channel = channel, "Cannot change frequency: not connected");
            return Err(Error::NotConnected);
        }

        self.command(
            ControlItemCode::ReceiverFrequency,
            &codec::frequency_parameters(hz, channel),
        )
        .await?;
        tracing::debug!(hz = hz, channel = channel, "Frequency changed");
        Ok(())
    }

    /// Start the receiver's IQ output, then the local sample stream.
    pub async fn start_iq(&mut self) -> Result<()> {
        if !self.control.is_connected() {
            tracing::warn!("Cannot start IQ: not connected");
            return Err(Error::NotConnected);
        }
        if self.state == ConnectionState::Streaming && self.stream.is_running() {
            tracing::debug!("IQ stream already running");
            return Ok(());
        }

        self.command(ControlItemCode::ReceiverState, &codec::receiver_start_parameters())
            .await?;
        self.stream.start().await?;

        self.state = ConnectionState::Streaming;
        let _ = self.event_tx.send(ClientEvent::StreamStarted);
        tracing::info!("IQ stream started");
        Ok(())
    }

    /// Stop the receiver's IQ output and the local sample stream.
    ///
    /// The local stream stops even if the device does not acknowledge.
    pub async fn stop_iq(&mut self) -> Result<()> {
        if !self.control.is_connected() {
            tracing::warn!("Cannot stop IQ: not connected");
            return Err(Error::NotConnected);
        }

        let result = self
            .command(ControlItemCode::ReceiverState, &codec::receiver_stop_parameters())
            .await;
        self.stream.stop().await?;

        if self.state == ConnectionState::Streaming {
            self.state = ConnectionState::Connected;
            let _ = self.event_tx.send(ClientEvent::StreamStopped);
            tracing::info!("IQ stream stopped");
        }
        result.map(drop)
    }

    /// Current state. A control link that dropped reads as `Disconnected`.
    pub fn state(&self) -> ConnectionState {
        if self.control.is_connected() {
            self.state
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether the control link is up.
    pub fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    /// Whether the local sample stream is running.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_running()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Get the event broadcast receiver.
    ///
    /// Multiple subscribers can be created; each gets an independent copy
    /// of every event.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Tear the client down.
    ///
    /// Stops the datagram loop and the control inbound task, tells a
    /// streaming receiver to go idle without waiting for the reply, then
    /// disconnects and releases both transports. Errors along the way are
    /// logged and ignored.
    pub async fn shutdown(mut self) {
        let was_connected = self.control.is_connected();

        if let Err(e) = self.stream.stop().await {
            tracing::debug!(error = %e, "Error stopping sample stream (ignored)");
        }

        let farewell = if self.state == ConnectionState::Streaming && was_connected {
            codec::encode_control_message(
                MessageKind::SetControlItem,
                ControlItemCode::ReceiverState,
                &codec::receiver_stop_parameters(),
            )
            .map_err(|e| tracing::debug!(error = %e, "Error encoding stop IQ (ignored)"))
            .ok()
        } else {
            None
        };

        if let Err(e) = self.control.close_with(farewell.as_deref()).await {
            tracing::debug!(error = %e, "Error closing control connection (ignored)");
        }

        self.state = ConnectionState::Disconnected;
        if was_connected {
            let _ = self.event_tx.send(ClientEvent::Disconnected);
        }
        tracing::debug!("NetSDR client shut down");
    }

    /// Send a set-item command and wait for the device's reply.
    ///
    /// A NAK becomes [`Error::Rejected`]. Failures are logged and
    /// broadcast as [`ClientEvent::CommandFailed`].
    async fn command(&mut self, item: ControlItemCode, parameters: &[u8]) -> Result<Vec<u8>> {
        let message = codec::encode_control_message(MessageKind::SetControlItem, item, parameters)?;
        tracing::debug!(item = %item, parameters = ?parameters, "Sending command");

        let result = match self.control.send_and_await(&message).await {
            Ok(reply) if codec::is_nak(&reply) => Err(Error::Rejected {
                item: item.name().to_string(),
            }),
            other => other,
        };

        match &result {
            Ok(reply) => {
                tracing::trace!(item = %item, reply = ?reply, "Command acknowledged");
            }
            Err(e) => {
                tracing::warn!(item = %item, error = %e, "Command failed");
                let _ = self.event_tx.send(ClientEvent::CommandFailed {
                    item: item.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
