//! Push subscriptions as async streams.
//!
//! A [`SnapshotStream`] is the consumer half of a device subscription. The
//! producer half, [`SnapshotSender`], is held by whatever task receives the
//! device's push notifications. Either side can end the subscription:
//!
//! - the consumer calls [`SnapshotStream::close`] or drops the stream, which
//!   cancels the producer through a shared cancellation token;
//! - the producer drops its sender, which ends the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dyson_types::DeviceStateSnapshot;

use crate::error::Error;

/// Default buffer size for subscription channels.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Result type for stream items.
pub type SnapshotResult = std::result::Result<DeviceStateSnapshot, Error>;

/// A stream of snapshots pushed by one device.
pub struct SnapshotStream {
    receiver: mpsc::Receiver<SnapshotResult>,
    cancel_token: CancellationToken,
}

impl SnapshotStream {
    /// Create a connected sender/stream pair.
    pub fn channel(buffer_size: usize) -> (SnapshotSender, SnapshotStream) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let cancel_token = CancellationToken::new();
        (
            SnapshotSender {
                sender: tx,
                cancel_token: cancel_token.clone(),
            },
            SnapshotStream {
                receiver: rx,
                cancel_token,
            },
        )
    }

    /// Close the stream and signal the producer to stop.
    pub fn close(self) {
        self.cancel_token.cancel();
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for SnapshotStream {
    type Item = SnapshotResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Producer half of a [`SnapshotStream`].
#[derive(Debug, Clone)]
pub struct SnapshotSender {
    sender: mpsc::Sender<SnapshotResult>,
    cancel_token: CancellationToken,
}

impl SnapshotSender {
    /// Deliver an item, waiting for buffer space.
    ///
    /// Returns `false` once the consumer is gone; the producer should stop.
    pub async fn send(&self, item: SnapshotResult) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        self.sender.send(item).await.is_ok()
    }

    /// Deliver an item without waiting.
    ///
    /// Returns `false` if the consumer is gone or the buffer is full.
    pub fn try_send(&self, item: SnapshotResult) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        self.sender.try_send(item).is_ok()
    }

    /// Whether the consumer has closed or dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }

    /// Wait until the consumer closes or drops the stream.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel_token.cancelled() => {}
            _ = self.sender.closed() => {}
        }
    }
}
