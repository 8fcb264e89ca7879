//! Sample stream: decode datagrams and feed the sample sink.
//!
//! [`StreamChannel`] starts the datagram transport and spawns one task that
//! decodes every datagram into samples, narrows them to 16 bits, and
//! appends them to the [`SampleSink`]. The task owns the sink while it runs
//! and hands it back when it stops, so the stream can be restarted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use netsdr_core::error::{Error, Result};
use netsdr_core::events::ClientEvent;
use netsdr_core::sink::SampleSink;
use netsdr_core::transport::{DatagramTransport, Inbound};

use crate::codec::{self, DataLayout, Message};
use crate::samples::{self, SampleWidth};

/// How datagrams are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: SampleWidth,
    pub layout: DataLayout,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: SampleWidth::BITS_16,
            layout: DataLayout::Sequenced,
        }
    }
}

/// Tracks the device's 16-bit datagram counter.
///
/// The counter skips zero when it wraps; a zero only appears on the first
/// datagram after the receiver starts, so it restarts tracking instead of
/// counting as a gap.
#[derive(Debug, Default)]
struct SequenceTracker {
    next: Option<u16>,
}

impl SequenceTracker {
    /// Record `sequence`; returns the expected value if it was skipped.
    fn observe(&mut self, sequence: u16) -> Option<u16> {
        let gap = match self.next {
            Some(expected) if sequence != 0 && sequence != expected => Some(expected),
            _ => None,
        };
        self.next = Some(match sequence {
            u16::MAX => 1,
            s => s + 1,
        });
        gap
    }
}

struct StreamTask {
    cancel: CancellationToken,
    task: JoinHandle<Box<dyn SampleSink>>,
}

/// Start/stop control over the datagram transport and its decode loop.
pub struct StreamChannel {
    transport: Box<dyn DatagramTransport>,
    /// Parked here while the stream is stopped.
    sink: Option<Box<dyn SampleSink>>,
    config: StreamConfig,
    connected: Arc<AtomicBool>,
    event_tx: broadcast::Sender<ClientEvent>,
    running: Option<StreamTask>,
}

impl StreamChannel {
    /// `connected` is the control channel's connection flag; the stream
    /// refuses to start while it is clear.
    pub fn new(
        transport: Box<dyn DatagramTransport>,
        sink: Box<dyn SampleSink>,
        config: StreamConfig,
        connected: Arc<AtomicBool>,
        event_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            transport,
            sink: Some(sink),
            config,
            connected,
            event_tx,
            running: None,
        }
    }

    /// Start receiving and decoding datagrams.
    ///
    /// Returns [`Error::NotConnected`] when the control link is down.
    /// Starting a running stream is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.is_running() {
            return Ok(());
        }
        // A loop that ended on its own still holds the sink.
        self.reclaim().await;

        let sink = self
            .sink
            .take()
            .ok_or_else(|| Error::InvalidParameter("sample sink unavailable".into()))?;

        let inbound = match self.transport.start_receiving().await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.sink = Some(sink);
                tracing::error!(error = %e, "Failed to start datagram transport");
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(stream_loop(
            inbound,
            sink,
            self.config,
            self.event_tx.clone(),
            cancel.clone(),
        ));
        self.running = Some(StreamTask { cancel, task });

        tracing::debug!(
            bits = self.config.width.bits(),
            layout = ?self.config.layout,
            "Sample stream started"
        );
        Ok(())
    }

    /// Stop the decode loop and release the datagram socket.
    ///
    /// Idempotent. Transport errors while releasing are logged and ignored.
    pub async fn stop(&mut self) -> Result<()> {
        if self.running.is_none() {
            return Ok(());
        }
        self.reclaim().await;

        if let Err(e) = self.transport.stop_receiving().await {
            tracing::debug!(error = %e, "Error stopping datagram transport (ignored)");
        }
        tracing::debug!("Sample stream stopped");
        Ok(())
    }

    /// Whether the decode loop is running.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    /// Stop the loop (if any) and take the sink back.
    async fn reclaim(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        match running.task.await {
            Ok(sink) => self.sink = Some(sink),
            Err(e) => tracing::error!(error = %e, "Sample stream task failed; sink lost"),
        }
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// Decode loop. Runs until cancelled or the transport closes its channel.
async fn stream_loop(
    mut inbound: Inbound,
    mut sink: Box<dyn SampleSink>,
    config: StreamConfig,
    event_tx: broadcast::Sender<ClientEvent>,
    cancel: CancellationToken,
) -> Box<dyn SampleSink> {
    let mut tracker = SequenceTracker::default();
    let mut block: Vec<i16> = Vec::new();

    loop {
        let datagram = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            datagram = inbound.recv() => match datagram {
                Some(d) => d,
                None => {
                    tracing::warn!("Datagram transport closed");
                    break;
                }
            },
        };

        let (sequence, body) = match codec::decode_message_with(&datagram, config.layout) {
            Ok(Message::Data { sequence, body, .. }) => (sequence, body),
            Ok(other) => {
                let reason = format!("control message kind {} on data channel", other.kind().bits());
                report_malformed(&event_tx, reason, datagram.len());
                continue;
            }
            Err(e) => {
                report_malformed(&event_tx, e.to_string(), datagram.len());
                continue;
            }
        };

        if let Some(sequence) = sequence {
            if let Some(expected) = tracker.observe(sequence) {
                tracing::warn!(expected = expected, received = sequence, "Datagram sequence gap");
                let _ = event_tx.send(ClientEvent::SequenceGap {
                    expected,
                    received: sequence,
                });
            }
        }

        block.clear();
        block.extend(config.width.decode(&body).map(samples::narrow));
        tracing::trace!(sequence = ?sequence, samples = block.len(), "Decoded datagram");

        if let Err(e) = sink.append(&block).await {
            tracing::warn!(error = %e, samples = block.len(), "Sample sink rejected block");
        }
    }

    if let Err(e) = sink.flush().await {
        tracing::warn!(error = %e, "Sample sink flush failed");
    }
    sink
}

fn report_malformed(event_tx: &broadcast::Sender<ClientEvent>, reason: String, bytes: usize) {
    tracing::warn!(reason = %reason, bytes = bytes, "Discarding malformed datagram");
    let _ = event_tx.send(ClientEvent::MalformedDatagram { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::codec::MessageKind;
    use netsdr_test_harness::{MockDatagramHandle, MockDatagramTransport, RecordingSink};

    struct Fixture {
        channel: StreamChannel,
        data: MockDatagramHandle,
        sink: RecordingSink,
        connected: Arc<AtomicBool>,
        events: broadcast::Receiver<ClientEvent>,
    }

    /// Helper: a stream channel over mocks, with the control link "up".
    fn fixture(config: StreamConfig) -> Fixture {
        let (mock, data) = MockDatagramTransport::new();
        let sink = RecordingSink::new();
        let connected = Arc::new(AtomicBool::new(true));
        let (event_tx, events) = broadcast::channel(16);
        let channel = StreamChannel::new(
            Box::new(mock),
            Box::new(sink.clone()),
            config,
            Arc::clone(&connected),
            event_tx,
        );
        Fixture {
            channel,
            data,
            sink,
            connected,
            events,
        }
    }

    fn sequenced(sequence: u16, samples: &[u8]) -> Vec<u8> {
        codec::encode_sequenced_data_message(MessageKind::DataItem0, sequence, samples).unwrap()
    }

    async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    // -----------------------------------------------------------------
    // Start / stop
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_start_requires_connection() {
        let mut f = fixture(StreamConfig::default());
        f.connected.store(false, Ordering::SeqCst);

        assert!(matches!(f.channel.start().await, Err(Error::NotConnected)));
        assert_eq!(f.data.start_count(), 0);
        assert!(!f.channel.is_running());
    }

    #[tokio::test]
    async fn test_decodes_sequenced_datagrams_into_sink() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();
        assert!(f.channel.is_running());

        assert!(f.data.inject(&sequenced(1, &[0x01, 0x00, 0x02, 0x00, 0xFF, 0xFF])).await);
        assert!(f.data.inject(&sequenced(2, &[0x00, 0x80])).await);
        assert!(f.sink.wait_for_blocks(2, Duration::from_secs(1)).await);

        assert_eq!(f.sink.blocks(), vec![vec![1, 2, -1], vec![i16::MIN]]);
        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_layout_eight_bit() {
        let mut f = fixture(StreamConfig {
            width: SampleWidth::BITS_8,
            layout: DataLayout::Raw,
        });
        f.channel.start().await.unwrap();

        let datagram = codec::encode_data_message(MessageKind::DataItem1, &[1, 2, 3, 0xFE]).unwrap();
        assert!(f.data.inject(&datagram).await);
        assert!(f.sink.wait_for_blocks(1, Duration::from_secs(1)).await);
        assert_eq!(f.sink.samples(), vec![1, 2, 3, -2]);

        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wide_samples_are_narrowed() {
        let mut f = fixture(StreamConfig {
            width: SampleWidth::BITS_24,
            layout: DataLayout::Raw,
        });
        f.channel.start().await.unwrap();

        // 0x012345 keeps its low 16 bits.
        let datagram = codec::encode_data_message(MessageKind::DataItem0, &[0x45, 0x23, 0x01]).unwrap();
        assert!(f.data.inject(&datagram).await);
        assert!(f.sink.wait_for_blocks(1, Duration::from_secs(1)).await);
        assert_eq!(f.sink.samples(), vec![0x2345]);

        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_flushes() {
        let mut f = fixture(StreamConfig::default());
        f.channel.stop().await.unwrap();
        assert_eq!(f.data.stop_count(), 0);

        f.channel.start().await.unwrap();
        f.channel.stop().await.unwrap();
        f.channel.stop().await.unwrap();

        assert!(!f.channel.is_running());
        assert!(!f.data.is_receiving());
        assert_eq!(f.data.stop_count(), 1);
        assert_eq!(f.sink.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_reuses_sink() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();
        f.channel.stop().await.unwrap();
        f.channel.start().await.unwrap();

        assert!(f.data.inject(&sequenced(0, &[0x05, 0x00])).await);
        assert!(f.sink.wait_for_blocks(1, Duration::from_secs(1)).await);
        assert_eq!(f.sink.samples(), vec![5]);
        assert_eq!(f.data.start_count(), 2);

        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_keeps_sink() {
        let mut f = fixture(StreamConfig::default());
        f.data.fail_start(true);
        assert!(matches!(f.channel.start().await, Err(Error::Io(_))));
        assert!(!f.channel.is_running());

        f.data.fail_start(false);
        f.channel.start().await.unwrap();
        assert!(f.channel.is_running());
        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_closure_ends_loop() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();

        f.data.close();
        for _ in 0..100 {
            if !f.channel.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!f.channel.is_running());

        // Stopping afterwards still succeeds and the stream can restart.
        f.channel.stop().await.unwrap();
        f.channel.start().await.unwrap();
        assert!(f.channel.is_running());
        f.channel.stop().await.unwrap();
    }

    // -----------------------------------------------------------------
    // Reported conditions
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_malformed_datagram_discarded() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();

        // Declares 6 bytes, carries 5.
        assert!(f.data.inject(&[0x06, 0x80, 0x01, 0x00, 0x01]).await);
        assert!(f.data.inject(&sequenced(2, &[0x07, 0x00])).await);
        assert!(f.sink.wait_for_blocks(1, Duration::from_secs(1)).await);

        assert_eq!(f.sink.samples(), vec![7]);
        match next_event(&mut f.events).await {
            ClientEvent::MalformedDatagram { reason } => {
                assert!(reason.contains("length mismatch"), "unexpected reason: {reason}");
            }
            other => panic!("expected MalformedDatagram, got {other:?}"),
        }
        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_control_message_on_data_channel_discarded() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();

        assert!(f.data.inject(&[0x04, 0x00, 0x18, 0x00]).await);
        assert!(matches!(
            next_event(&mut f.events).await,
            ClientEvent::MalformedDatagram { .. }
        ));
        assert!(f.sink.blocks().is_empty());
        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequence_gap_reported() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();

        assert!(f.data.inject(&sequenced(10, &[0x01, 0x00])).await);
        assert!(f.data.inject(&sequenced(13, &[0x02, 0x00])).await);
        assert!(f.sink.wait_for_blocks(2, Duration::from_secs(1)).await);

        assert_eq!(
            next_event(&mut f.events).await,
            ClientEvent::SequenceGap {
                expected: 11,
                received: 13
            }
        );
        // Both blocks were delivered regardless.
        assert_eq!(f.sink.samples(), vec![1, 2]);
        f.channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sink_error_does_not_stop_stream() {
        let mut f = fixture(StreamConfig::default());
        f.channel.start().await.unwrap();

        f.sink.set_failing(true);
        assert!(f.data.inject(&sequenced(1, &[0x01, 0x00])).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.sink.set_failing(false);
        assert!(f.data.inject(&sequenced(2, &[0x02, 0x00])).await);

        assert!(f.sink.wait_for_blocks(1, Duration::from_secs(1)).await);
        assert_eq!(f.sink.samples(), vec![2]);
        assert!(f.channel.is_running());
        f.channel.stop().await.unwrap();
    }

    // -----------------------------------------------------------------
    // Sequence tracking
    // -----------------------------------------------------------------

    #[test]
    fn tracker_in_order() {
        let mut tracker = SequenceTracker::default();
        for seq in 0u16..10 {
            assert_eq!(tracker.observe(seq), None);
        }
    }

    #[test]
    fn tracker_reports_gap_and_resyncs() {
        let mut tracker = SequenceTracker::default();
        assert_eq!(tracker.observe(5), None);
        assert_eq!(tracker.observe(8), Some(6));
        assert_eq!(tracker.observe(9), None);
    }

    #[test]
    fn tracker_wraps_past_zero() {
        let mut tracker = SequenceTracker::default();
        assert_eq!(tracker.observe(u16::MAX), None);
        assert_eq!(tracker.observe(1), None);
    }

    #[test]
    fn tracker_zero_restarts() {
        let mut tracker = SequenceTracker::default();
        assert_eq!(tracker.observe(100), None);
        assert_eq!(tracker.observe(0), None);
        assert_eq!(tracker.observe(1), None);
    }

    #[test]
    fn default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.width.bits(), 16);
        assert_eq!(config.layout, DataLayout::Sequenced);
    }
}
