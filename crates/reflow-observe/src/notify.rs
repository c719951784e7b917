//! Suspend/resume gating and notification coalescing.
//!
//! A [`NotificationGate`] decides whether a notification is delivered now or
//! deferred. Suspension is reference-counted: every `suspend()` must be paired
//! with a `resume()` before delivery becomes active again. While suspended,
//! notifications coalesce into a per-path queue instead of being dropped.
//!
//! # Invariants
//!
//! 1. The suspend count never underflows; extra `resume()` calls are ignored.
//! 2. At most one queue entry exists per path. Repeated notifications for the
//!    same path keep the earliest `before` and the latest `after` —
//!    intermediate transitions are collapsed, not replayed.
//! 3. Queue entries drain in first-enqueue order.
//! 4. Disabling the queue discards everything pending and everything that
//!    arrives while suspended.

use std::cell::{Cell, RefCell};

use crate::value::Value;

/// A notification captured while delivery was suspended.
#[derive(Clone, Debug)]
pub struct QueuedChange {
    /// The notified path.
    pub path: String,
    /// Value before the first suspended mutation.
    pub before: Value,
    /// Value after the most recent suspended mutation.
    pub after: Value,
}

/// Reference-counted delivery gate with a coalescing queue.
#[derive(Debug, Default)]
pub struct NotificationGate {
    suspended: Cell<u32>,
    queue_disabled: Cell<bool>,
    queue: RefCell<Vec<QueuedChange>>,
}

impl NotificationGate {
    /// Create an active gate with queueing enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether notifications are delivered immediately.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.suspended.get() == 0
    }

    /// Current suspend depth.
    #[must_use]
    pub fn suspend_count(&self) -> u32 {
        self.suspended.get()
    }

    /// Suspend delivery. Pairs with [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.suspended.set(self.suspended.get() + 1);
    }

    /// Release one suspension. Returns `true` when delivery is active after
    /// the call, i.e. the caller should flush the queue.
    pub fn resume(&self) -> bool {
        let count = self.suspended.get();
        if count > 0 {
            self.suspended.set(count - 1);
        }
        self.is_active()
    }

    /// Whether suspended notifications are being queued.
    #[must_use]
    pub fn queue_enabled(&self) -> bool {
        !self.queue_disabled.get()
    }

    /// Enable or disable the queue. Disabling discards pending entries.
    pub fn set_queue_enabled(&self, enabled: bool) {
        self.queue_disabled.set(!enabled);
        if !enabled {
            self.queue.borrow_mut().clear();
        }
    }

    /// Record a suspended notification, merging with an existing entry for
    /// the same path. No-op while the queue is disabled.
    pub fn coalesce(&self, path: &str, before: &Value, after: &Value) {
        if self.queue_disabled.get() {
            return;
        }
        let mut queue = self.queue.borrow_mut();
        if let Some(entry) = queue.iter_mut().find(|q| q.path == path) {
            entry.after = after.clone();
        } else {
            queue.push(QueuedChange {
                path: path.to_string(),
                before: before.clone(),
                after: after.clone(),
            });
        }
    }

    /// Take every queued entry, leaving the queue empty.
    pub fn drain(&self) -> Vec<QueuedChange> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    /// Number of distinct paths currently queued.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.borrow().len()
    }
}
