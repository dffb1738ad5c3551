//! Bounded hand-off queue from connection handlers to the storage consumer.
//!
//! Items from one connection arrive in the order its transactions complete.
//! Items from different connections interleave arbitrarily.

use crate::mail::MailItem;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;

/// Default time a push may wait for queue capacity.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a mail item could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Queue stayed full for the whole push timeout.
    #[error("mail item channel is saturated")]
    Saturated,
    /// Receiver was dropped.
    #[error("mail item channel is closed")]
    Closed,
    /// Cancellation fired while waiting.
    #[error("push cancelled")]
    Cancelled,
}

/// Creates a bounded mail item channel.
///
/// A capacity of zero is raised to one.
#[must_use]
pub fn mail_channel(capacity: usize) -> (MailItemSender, MailItemReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MailItemSender {
            tx,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        },
        MailItemReceiver { rx },
    )
}

/// Producer side, cloned into every connection handler.
#[derive(Debug, Clone)]
pub struct MailItemSender {
    tx: mpsc::Sender<MailItem>,
    push_timeout: Duration,
}

impl MailItemSender {
    /// Sets how long a push may wait for capacity.
    #[must_use]
    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.push_timeout = push_timeout;
        self
    }

    /// Returns the configured push timeout.
    #[must_use]
    pub const fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    /// Queues a mail item.
    ///
    /// Waits for capacity at most the push timeout, and gives up as soon as
    /// `cancel` fires. Nothing is queued once `cancel` has fired.
    ///
    /// # Errors
    ///
    /// Returns [`PushError`] when the item was not queued.
    pub async fn push(&self, item: MailItem, cancel: &CancellationToken) -> Result<(), PushError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PushError::Cancelled),
            result = self.tx.send_timeout(item, self.push_timeout) => {
                result.map_err(|err| match err {
                    SendTimeoutError::Timeout(_) => PushError::Saturated,
                    SendTimeoutError::Closed(_) => PushError::Closed,
                })
            }
        }
    }

    /// Returns `true` once the receiver is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer side, owned by the storage consumer.
#[derive(Debug)]
pub struct MailItemReceiver {
    rx: mpsc::Receiver<MailItem>,
}

impl MailItemReceiver {
    /// Receives the next item; `None` once every sender is dropped and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<MailItem> {
        self.rx.recv().await
    }

    /// Receives an item if one is queued.
    pub fn try_recv(&mut self) -> Option<MailItem> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting new items; queued items can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
