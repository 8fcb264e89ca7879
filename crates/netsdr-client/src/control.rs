//! Control channel: one outstanding request at a time over the TCP link.
//!
//! [`ControlChannel`] owns the control transport and a background inbound
//! task. The task reassembles the transport's byte stream into whole
//! messages and hands each one either to the pending requester or, when
//! nobody is waiting, reports it as unsolicited.
//!
//! The pending slot is a single `Option<oneshot::Sender>` behind a mutex.
//! Installing a request and resolving it both happen under that lock, so a
//! reply can never be delivered to a request that was not yet installed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use netsdr_core::error::{Error, ProtocolError, Result};
use netsdr_core::events::ClientEvent;
use netsdr_core::transport::{ControlTransport, Inbound};

use crate::codec;

type PendingSlot = Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>;

/// Outcome of trying to cut one message off the front of the reassembly buffer.
#[derive(Debug)]
enum Reassembly {
    /// A whole message.
    Frame(Vec<u8>),
    /// Not enough bytes yet.
    Incomplete,
    /// The header cannot describe a message; the stream is out of sync.
    Invalid(ProtocolError),
}

#[derive(Debug)]
struct InboundTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Request/response correlation over a [`ControlTransport`].
pub struct ControlChannel {
    transport: Mutex<Box<dyn ControlTransport>>,
    pending: PendingSlot,
    /// Set by `open`, cleared by `close` or when the inbound stream ends.
    connected: Arc<AtomicBool>,
    inbound: Option<InboundTask>,
    event_tx: broadcast::Sender<ClientEvent>,
    command_timeout: Duration,
}

impl ControlChannel {
    /// Wrap `transport`. Nothing is opened until [`open`](Self::open).
    pub fn new(
        transport: Box<dyn ControlTransport>,
        command_timeout: Duration,
        event_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            transport: Mutex::new(transport),
            pending: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            inbound: None,
            event_tx,
            command_timeout,
        }
    }

    /// Connect the transport and start the inbound task.
    ///
    /// Opening an already open channel is a no-op.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        // Leftovers from a connection that died underneath us.
        self.stop_inbound().await;

        let transport = self.transport.get_mut();
        let inbound = transport.connect().await?;
        if !transport.is_connected() {
            tracing::warn!("Control transport did not report connected after connect");
            if let Err(e) = transport.disconnect().await {
                tracing::debug!(error = %e, "Error releasing control transport (ignored)");
            }
            return Err(Error::NotConnected);
        }

        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        let task = tokio::spawn(inbound_loop(
            inbound,
            Arc::clone(&self.pending),
            Arc::clone(&self.connected),
            self.event_tx.clone(),
            cancel.clone(),
        ));
        self.inbound = Some(InboundTask { cancel, task });

        tracing::debug!("Control channel open");
        Ok(())
    }

    /// Stop the inbound task, abandon any pending request, and disconnect
    /// the transport.
    ///
    /// A pending requester receives [`Error::ChannelClosed`]. Closing a
    /// closed channel is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.close_with(None).await
    }

    /// Like [`close`](Self::close), but write `farewell` to the device
    /// after inbound processing has stopped and before disconnecting.
    ///
    /// No reply is awaited and none is reported. A failed write is logged
    /// and the transport is still disconnected.
    pub async fn close_with(&mut self, farewell: Option<&[u8]>) -> Result<()> {
        self.stop_inbound().await;
        self.pending.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);

        let transport = self.transport.get_mut();
        if let Some(message) = farewell {
            if transport.is_connected() {
                tracing::trace!(bytes = message.len(), data = ?message, "Sending control message before close");
                if let Err(e) = transport.send(message).await {
                    tracing::debug!(error = %e, "Error sending final control message (ignored)");
                }
            }
        }
        transport.disconnect().await?;
        tracing::debug!("Control channel closed");
        Ok(())
    }

    /// Send an encoded message and wait for the next inbound message.
    ///
    /// Fails fast with [`Error::RequestAlreadyInFlight`] when another
    /// request is outstanding; that request is left untouched. Waiting is
    /// bounded by the command timeout.
    pub async fn send_and_await(&self, message: &[u8]) -> Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let rx = {
            let mut slot = self.pending.lock().await;
            // The inbound loop clears the flag before it empties the slot.
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }
            if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
                tracing::warn!("Control request attempted while another is in flight");
                return Err(Error::RequestAlreadyInFlight);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };

        tracing::trace!(bytes = message.len(), data = ?message, "Sending control request");

        let sent = self.transport.lock().await.send(message).await;
        if let Err(e) = sent {
            self.pending.lock().await.take();
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                tracing::trace!(bytes = response.len(), data = ?response, "Control response received");
                Ok(response)
            }
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                // Our receiver is gone, so only clear the slot if it still
                // holds our (now closed) sender.
                let mut slot = self.pending.lock().await;
                if slot.as_ref().is_some_and(|tx| tx.is_closed()) {
                    slot.take();
                }
                tracing::warn!(
                    timeout_ms = self.command_timeout.as_millis(),
                    "Control request timed out"
                );
                Err(Error::Timeout)
            }
        }
    }

    /// Whether the channel is open and its inbound stream is alive.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shared view of the connection flag.
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    async fn stop_inbound(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            inbound.cancel.cancel();
            if let Err(e) = inbound.task.await {
                tracing::debug!(error = %e, "Control inbound task ended abnormally");
            }
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Some(inbound) = &self.inbound {
            inbound.cancel.cancel();
        }
    }
}

/// Cut the next whole message off the front of `buf`.
fn take_frame(buf: &mut BytesMut) -> Reassembly {
    let Some(header) = codec::peek_header(&buf[..]) else {
        return Reassembly::Incomplete;
    };
    match codec::frame_length(header) {
        Ok(len) if buf.len() >= len => Reassembly::Frame(buf.split_to(len).to_vec()),
        Ok(_) => Reassembly::Incomplete,
        Err(e) => Reassembly::Invalid(e),
    }
}

/// Inbound task: reassemble messages and resolve or report each one.
async fn inbound_loop(
    mut inbound: Inbound,
    pending: PendingSlot,
    connected: Arc<AtomicBool>,
    event_tx: broadcast::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(codec::MAX_DATA_MESSAGE_LEN);

    loop {
        let chunk = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Control inbound task cancelled");
                break;
            }

            chunk = inbound.recv() => match chunk {
                Some(chunk) => chunk,
                None => {
                    tracing::warn!("Control transport closed");
                    break;
                }
            },
        };

        buf.extend_from_slice(&chunk);

        loop {
            match take_frame(&mut buf) {
                Reassembly::Frame(frame) => dispatch(frame, &pending, &event_tx).await,
                Reassembly::Incomplete => break,
                Reassembly::Invalid(e) => {
                    tracing::warn!(
                        error = %e,
                        discarded = buf.len(),
                        "Discarding unframeable control bytes"
                    );
                    buf.clear();
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    // Dropping the sender wakes a pending requester with `ChannelClosed`.
    pending.lock().await.take();

    if !cancel.is_cancelled() {
        let _ = event_tx.send(ClientEvent::Disconnected);
    }
}

async fn dispatch(
    frame: Vec<u8>,
    pending: &PendingSlot,
    event_tx: &broadcast::Sender<ClientEvent>,
) {
    let waiter = pending.lock().await.take();
    match waiter {
        Some(tx) => {
            if let Err(frame) = tx.send(frame) {
                tracing::debug!(bytes = frame.len(), "Response arrived after requester gave up");
            }
        }
        None => report_unsolicited(&frame, event_tx),
    }
}

fn report_unsolicited(frame: &[u8], event_tx: &broadcast::Sender<ClientEvent>) {
    let kind = codec::peek_header(frame).map_or(0, |h| (h >> 13) as u8);
    let item = match codec::decode_message(frame) {
        Ok(msg) => msg.item().map(|i| i.code()),
        Err(ProtocolError::UnrecognizedItem(code)) => Some(code),
        Err(_) => None,
    };

    tracing::warn!(
        kind = kind,
        item = ?item,
        bytes = frame.len(),
        "Unsolicited control message"
    );
    let _ = event_tx.send(ClientEvent::UnsolicitedMessage {
        kind,
        item,
        len: frame.len(),
    });
}
