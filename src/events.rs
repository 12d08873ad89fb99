//! Event inbox: plugin-originated events crossing from the GUI thread
//! to the audio thread.
//!
//! Producers (editor callbacks) take a blocking lock; the audio thread
//! drains with `try_lock` and swaps the queue out to keep the hold time
//! to a pointer exchange. A failed `try_lock` just leaves the events for
//! a later tick.

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum InboxEvent {
    ParamAutomated { index: i32, value: f32 },
    Midi { data: [u8; 3], delta: i32 },
    Sysex { data: Vec<u8>, delta: i32 },
}

#[derive(Debug, Default)]
pub struct EventInbox {
    queue: Mutex<Vec<InboxEvent>>,
}

impl EventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking push; called from the GUI thread.
    pub fn push(&self, event: InboxEvent) {
        self.queue.lock().push(event);
    }

    /// Non-blocking drain; called from the audio thread. Returns `None`
    /// when the lock is contended (events stay queued) or when there is
    /// nothing to deliver.
    pub fn try_drain(&self) -> Option<Vec<InboxEvent>> {
        let mut guard = self.queue.try_lock()?;
        if guard.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *guard))
    }

    /// Number of queued events (blocking; for tests and diagnostics).
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
