//! Bounded per-connection outbound queue.
//!
//! Each student connection owns one of these between the application layer
//! (which enqueues) and the writer task (which drains onto the socket).  The
//! whole non-blocking-send story lives here:
//!
//! - `push` never blocks and never waits for the peer;
//! - when the queue is full, the oldest *frame* is shed to make room, because
//!   a newer frame always supersedes an older one;
//! - control messages are never shed.  If the queue is full of nothing but
//!   control traffic the peer has stopped draining its socket, and `push`
//!   reports that so the caller can disconnect the slow consumer.
//!
//! One writer task consumes each queue, so the [`Notify`] permit semantics
//! make the pop loop lossless: a `notify_one` with no waiter parks a permit
//! that the next `notified().await` consumes immediately.

use std::collections::VecDeque;
use std::sync::Mutex;

use focusclass_core::ClassMessage;
use thiserror::Error;
use tokio::sync::Notify;

/// Default queue depth per connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Error returned by [`SendQueue::push`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is full of control messages the peer is not draining.
    #[error("outbound queue saturated with control messages")]
    ControlSaturated,
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<ClassMessage>,
    dropped_frames: u64,
    closed: bool,
}

/// Bounded outbound queue for one connection.
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    /// Wakes the writer task when an entry arrives or the queue closes.
    notify: Notify,
    /// Wakes a `drained` waiter when the queue empties.
    drain_notify: Notify,
    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            drain_notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues a message without blocking.
    ///
    /// Frames may be shed (oldest first, then the incoming one) to protect
    /// control traffic.  After `close` the message is silently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::ControlSaturated`] when a control message
    /// arrives and the queue holds nothing sheddable.
    pub fn push(&self, message: ClassMessage) -> Result<(), EnqueueError> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.closed {
            return Ok(());
        }

        if inner.entries.len() < self.capacity {
            inner.entries.push_back(message);
            drop(inner);
            self.notify.notify_one();
            return Ok(());
        }

        // Full.  Shed the oldest frame to make room; a stale frame is worth
        // less than anything newer.
        if let Some(pos) = inner.entries.iter().position(ClassMessage::is_droppable) {
            inner.entries.remove(pos);
            inner.dropped_frames += 1;
            inner.entries.push_back(message);
            drop(inner);
            self.notify.notify_one();
            return Ok(());
        }

        // Nothing sheddable in the queue.  An incoming frame can itself be
        // shed; an incoming control message means the peer is wedged.
        if message.is_droppable() {
            inner.dropped_frames += 1;
            return Ok(());
        }
        Err(EnqueueError::ControlSaturated)
    }

    /// Takes the next message, waiting for one to arrive.  Returns `None`
    /// once the queue has been closed.
    pub async fn pop(&self) -> Option<ClassMessage> {
        loop {
            {
                let mut inner = self.inner.lock().expect("lock poisoned");
                if inner.closed {
                    return None;
                }
                if let Some(message) = inner.entries.pop_front() {
                    if inner.entries.is_empty() {
                        self.drain_notify.notify_one();
                    }
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Waits until the writer has drained every entry, or the queue closes.
    ///
    /// Used by the disconnect path to flush a final notice (kick, session
    /// ended) before the socket goes away; callers wrap it in a timeout.
    pub async fn drained(&self) {
        loop {
            {
                let inner = self.inner.lock().expect("lock poisoned");
                if inner.entries.is_empty() || inner.closed {
                    return;
                }
            }
            self.drain_notify.notified().await;
        }
    }

    /// Closes the queue: pending entries are discarded and the writer's next
    /// `pop` returns `None`.  Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.closed = true;
            inner.entries.clear();
        }
        self.notify.notify_waiters();
        self.drain_notify.notify_waiters();
        // Park permits for waiters that have not registered yet.
        self.notify.notify_one();
        self.drain_notify.notify_one();
    }

    /// Frames shed so far, for diagnostics.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").dropped_frames
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
