//! Single-slot, drop-oldest hand-off between the tick thread and the worker.
//!
//! The producer never blocks: offering a frame while one is pending replaces
//! it. The consumer blocks until a frame arrives or the queue is stopped.

use parking_lot::{Condvar, Mutex};

use crate::types::Frame;

struct Slot<T> {
    pending: Option<T>,
    stopped: bool,
}

/// Bounded queue of capacity one for exactly one producer and one consumer.
pub struct FrameQueue<T = Frame> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `item` as the pending item. Returns true if an older pending
    /// item was discarded to make room.
    pub fn offer(&self, item: T) -> bool {
        let replaced = {
            let mut slot = self.slot.lock();
            slot.pending.replace(item).is_some()
        };
        self.ready.notify_one();
        replaced
    }

    /// Wait for the pending item.
    ///
    /// Returns `None` once the queue is stopped and nothing is pending.
    pub fn take_blocking(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while slot.pending.is_none() && !slot.stopped {
            self.ready.wait(&mut slot);
        }
        slot.pending.take()
    }

    /// Take the pending item without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().pending.take()
    }

    /// Raise the stop flag and wake the consumer unconditionally.
    pub fn stop(&self) {
        self.slot.lock().stopped = true;
        self.ready.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.slot.lock().stopped
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
