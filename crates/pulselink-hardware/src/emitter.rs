//! Synchronous fan-out of decoded pulse events.
//!
//! The read loop hands every decoded [`PulseEvent`] to [`PulseEmitter::emit`],
//! which calls each subscriber in registration order on the calling thread.
//! There is no queue between the serial port and the subscribers: delivery
//! order is decode order, each event is delivered at most once, and a slow
//! subscriber slows the read loop down.

use pulselink_core::PulseEvent;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Callback invoked for each decoded event.
pub type PulseCallback = Arc<dyn Fn(&PulseEvent) + Send + Sync>;

/// Identifies a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered list of pulse subscribers.
#[derive(Default)]
pub struct PulseEmitter {
    subscribers: RwLock<Vec<(SubscriptionId, PulseCallback)>>,
    next_id: AtomicU64,
}

impl PulseEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    ///
    /// The callback runs synchronously on the serial read worker, once per
    /// decoded frame, in the order frames arrived. While it runs no further
    /// bytes are read, so it must not perform long blocking work inline.
    /// Hand the event to a channel or spawn a task for anything slow.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulselink_hardware::PulseEmitter;
    /// use std::sync::mpsc;
    ///
    /// let emitter = PulseEmitter::new();
    /// let (tx, rx) = mpsc::channel();
    ///
    /// emitter.subscribe(move |event| {
    ///     let _ = tx.send(event.clone());
    /// });
    /// # drop(rx);
    /// ```
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PulseEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// A panicking subscriber is logged and skipped; the remaining
    /// subscribers still receive the event.
    pub fn emit(&self, event: &PulseEvent) {
        // Snapshot so callbacks can subscribe or unsubscribe without deadlocking
        let snapshot: Vec<(SubscriptionId, PulseCallback)> = self.read().clone();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    subscription = %id,
                    pulse_count = event.pulse_count(),
                    "Pulse subscriber panicked"
                );
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(SubscriptionId, PulseCallback)>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(SubscriptionId, PulseCallback)>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for PulseEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
