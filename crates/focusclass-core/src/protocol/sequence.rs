//! Sequence numbering for connections and frame streams.
//!
//! # What are sequence numbers used for here? (for beginners)
//!
//! Two counters exist in FocusClass, and they solve different problems:
//!
//! - Every message header carries a per-connection counter stamped by the
//!   sender.  It exists for diagnostics: gaps in a packet capture tell you
//!   where a send queue shed frames under pressure.
//! - Every screen frame *payload* carries a per-stream counter.  Frames may
//!   be dropped by congested queues, so the receiver can see 5, 6, 9, 10 —
//!   that is fine.  What must never happen is *rendering backwards*: once
//!   frame 9 is on screen, a late frame 7 has to be discarded, not drawn.
//!
//! [`SequenceCounter`] produces the numbers; [`FrameGate`] enforces the
//! forward-only rule on the receiving side.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter for sequence numbers.
///
/// Numbers start at 0 and increment by 1 with each call to [`next`].
/// The counter wraps around at `u64::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use focusclass_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next sequence number and atomically increments the counter.
    ///
    /// `Ordering::Relaxed` is sufficient: the values only order messages, they
    /// are never used to synchronise memory between threads.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.  By the time the caller
    /// looks at it another thread may have advanced the counter further; it is
    /// for logging only.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver-side filter that accepts only strictly advancing frame sequences.
///
/// Queues on the sending side drop frames under backpressure, so gaps are
/// normal and accepted.  Stale or duplicate frames (sequence at or below the
/// last accepted one) are rejected so the viewer never renders backwards.
///
/// # Examples
///
/// ```rust
/// use focusclass_core::protocol::FrameGate;
///
/// let mut gate = FrameGate::new();
/// assert!(gate.accept(0));
/// assert!(gate.accept(5));   // gap is fine
/// assert!(!gate.accept(3));  // stale, discard
/// assert!(!gate.accept(5));  // duplicate, discard
/// ```
#[derive(Debug, Default)]
pub struct FrameGate {
    last_accepted: Option<u64>,
}

impl FrameGate {
    /// Creates a gate that will accept any first sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and advances the gate when `sequence` is newer than
    /// everything seen so far; returns `false` for stale or duplicate frames.
    pub fn accept(&mut self, sequence: u64) -> bool {
        match self.last_accepted {
            Some(last) if sequence <= last => false,
            _ => {
                self.last_accepted = Some(sequence);
                true
            }
        }
    }

    /// Highest sequence accepted so far, if any.
    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    /// Forgets all history, e.g. when a new stream starts after a
    /// screen-sharing stop/start cycle.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}
