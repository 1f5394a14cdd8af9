//! Live query subscriptions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, Notify};

use super::{Document, StoreError};

/// One emission of a live query: the complete, ordered result set, or the
/// failure that ended the listener
pub type Snapshot = Result<Vec<Document>, StoreError>;

#[derive(Debug)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancels a [`Subscription`] from anywhere, any number of times
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: String,
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Stop the subscription. Calling this again is a no-op.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("subscription {} cancelled", self.id);
        self.state.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// Consumer side of a live query
///
/// Every emission replaces the previous one wholesale. Once cancelled (or
/// dropped) no further snapshot is returned.
#[derive(Debug)]
pub struct Subscription {
    handle: CancelHandle,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

/// Producer side, held by the store backend
#[derive(Debug)]
pub(crate) struct SubscriptionSink {
    handle: CancelHandle,
    tx: mpsc::UnboundedSender<Snapshot>,
}

impl SubscriptionSink {
    pub(crate) fn id(&self) -> &str {
        &self.handle.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.handle.is_cancelled() || self.tx.is_closed()
    }

    /// Deliver a snapshot; returns `false` once the consumer is gone
    pub(crate) fn emit(&self, snapshot: Snapshot) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(snapshot).is_ok()
    }
}

/// Create a connected sink/subscription pair
pub(crate) fn channel() -> (SubscriptionSink, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = CancelHandle {
        id: uuid::Uuid::new_v4().to_string(),
        state: Arc::new(CancelState {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }),
    };
    let sink = SubscriptionSink {
        handle: handle.clone(),
        tx,
    };
    (sink, Subscription { handle, rx })
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// A handle that can cancel this subscription from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Wait for the next snapshot; `None` after cancellation or when the
    /// backend stopped the listener
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.handle.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.handle.state.notify.notified() => None,
            snapshot = self.rx.recv() => {
                if self.handle.is_cancelled() {
                    None
                } else {
                    snapshot
                }
            }
        }
    }

    /// Return an already delivered snapshot without waiting
    pub fn try_next(&mut self) -> Option<Snapshot> {
        if self.handle.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop the subscription. Idempotent.
    pub fn cancel(&mut self) {
        self.handle.cancel();
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
