//! Outbound command path from feature modules to the session task.
//!
//! ```text
//! MixEffect ──────┐
//! DownstreamKey ──┼─► CommandSink (try_send) ─► mpsc ─► Session task ─► UDP
//! CameraControl ──┘
//! ```
//!
//! Submission never blocks or awaits: a full queue is reported as
//! `Backpressure` and the caller decides what to do. Stopping the session
//! does not go through this queue.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::{AtemError, Result};
use crate::protocol::Tag;
use crate::transport::SessionState;

/// Default capacity of the outbound command queue.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 256;

/// A command waiting to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub tag: Tag,
    pub body: Bytes,
}

impl OutboundCommand {
    #[inline]
    pub fn new(tag: Tag, body: Bytes) -> Self {
        Self { tag, body }
    }
}

/// Where feature modules submit their commands.
pub trait CommandSink: Send + Sync {
    /// Queue a command; returns once submitted, not once delivered.
    fn send_command(&self, tag: Tag, body: Bytes) -> Result<()>;
}

/// Handle for submitting commands to a running session.
///
/// Cheap to clone and share across feature modules.
#[derive(Clone)]
pub struct CommandWriter {
    tx: mpsc::Sender<OutboundCommand>,
    state: watch::Receiver<SessionState>,
}

impl CommandWriter {
    pub(crate) fn new(
        tx: mpsc::Sender<OutboundCommand>,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self { tx, state }
    }

    /// Commands queued but not yet taken by the session task.
    pub fn pending_count(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl CommandSink for CommandWriter {
    fn send_command(&self, tag: Tag, body: Bytes) -> Result<()> {
        if *self.state.borrow() != SessionState::Ready {
            return Err(AtemError::NotConnected);
        }

        self.tx
            .try_send(OutboundCommand::new(tag, body))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AtemError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => AtemError::ConnectionClosed,
            })
    }
}

/// Create a writer and the receiving end the session task drains.
pub(crate) fn command_channel(
    capacity: usize,
    state: watch::Receiver<SessionState>,
) -> (CommandWriter, mpsc::Receiver<OutboundCommand>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandWriter::new(tx, state), rx)
}

/// Sink that keeps every command in memory.
///
/// Lets feature modules be exercised without a device.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundCommand>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands recorded so far.
    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything recorded.
    pub fn take(&self) -> Vec<OutboundCommand> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Most recent command, if any.
    pub fn last(&self) -> Option<OutboundCommand> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl CommandSink for RecordingSink {
    fn send_command(&self, tag: Tag, body: Bytes) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OutboundCommand::new(tag, body));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DCUT: Tag = Tag::new(*b"DCut");

    #[tokio::test]
    async fn test_writer_rejects_until_ready() {
        let (state_tx, state_rx) = watch::channel(SessionState::AwaitingHello);
        let (writer, mut rx) = command_channel(4, state_rx);

        assert!(matches!(
            writer.send_command(DCUT, Bytes::from_static(&[0; 4])),
            Err(AtemError::NotConnected)
        ));

        state_tx.send_replace(SessionState::Ready);
        writer
            .send_command(DCUT, Bytes::from_static(&[0; 4]))
            .unwrap();
        assert_eq!(writer.pending_count(), 1);

        let command = rx.recv().await.unwrap();
        assert_eq!(command.tag, DCUT);
    }

    #[tokio::test]
    async fn test_full_queue_is_backpressure() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Ready);
        let (writer, _rx) = command_channel(1, state_rx);

        writer.send_command(DCUT, Bytes::new()).unwrap();
        assert!(matches!(
            writer.send_command(DCUT, Bytes::new()),
            Err(AtemError::Backpressure)
        ));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Ready);
        let (writer, rx) = command_channel(1, state_rx);
        drop(rx);

        assert!(matches!(
            writer.send_command(DCUT, Bytes::new()),
            Err(AtemError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());

        sink.send_command(DCUT, Bytes::from_static(&[1, 0, 0, 0])).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.last().unwrap().body[0], 1);

        let taken = sink.take();
        assert_eq!(taken.len(), 1);
        assert!(sink.is_empty());
    }
}
