//! Inbound FIFO queues between the ingress tasks and the forwarding loops.
//!
//! Unbounded by default. With a capacity, a push onto a full queue fails and the
//! caller drops the newest item; queued items are never reordered or coalesced.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is closed")]
    Closed,
}

/// Create a queue. `None` is unbounded; `Some(n)` holds at most `n` items (min 1).
pub fn channel<T>(capacity: Option<usize>) -> (QueueSender<T>, QueueReceiver<T>) {
    match capacity {
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
    }
}

#[derive(Debug)]
pub enum QueueSender<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>),
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue without waiting.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        match self {
            Self::Unbounded(tx) => tx.send(item).map_err(|_| QueueError::Closed),
            Self::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Unbounded(tx) => tx.is_closed(),
            Self::Bounded(tx) => tx.is_closed(),
        }
    }
}

#[derive(Debug)]
pub enum QueueReceiver<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

impl<T> QueueReceiver<T> {
    /// Next item in arrival order; `None` once every sender is gone and the queue
    /// is drained. Cancel safe.
    pub async fn recv(&mut self) -> Option<T> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }

    /// Next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        match self {
            Self::Unbounded(rx) => rx.try_recv().ok(),
            Self::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Unbounded(rx) => rx.len(),
            Self::Bounded(rx) => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new items; already queued items can still be received.
    pub fn close(&mut self) {
        match self {
            Self::Unbounded(rx) => rx.close(),
            Self::Bounded(rx) => rx.close(),
        }
    }
}
