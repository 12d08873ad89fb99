//! Listener adapter: routes backend callbacks to the right thread.
//!
//! A backend may call back during `process` (audio thread), during a
//! worker-side command (worker thread), or from its editor (GUI thread).
//! Each origin gets its own delivery path so the audio thread is never
//! blocked and replies still come out in a well-defined order:
//!
//! - audio thread: pushed to a lock-free queue the host drains right
//!   after `process` returns (the backend mutex is held during the
//!   callback, so emission is deferred by a few microseconds);
//! - worker thread: posted as a one-shot reply command, delivered on the
//!   next audio tick;
//! - GUI thread: pushed onto the [`EventInbox`] under its mutex.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use crate::backend::{MidiEvent, SysexEvent};
use crate::commands::CommandReply;
use crate::events::{EventInbox, InboxEvent};

const RT_EVENT_CAPACITY: usize = 64;

pub type ListenerHandle = Arc<ListenerHub>;

pub struct ListenerHub {
    /// Audio thread id, refreshed by the host at the top of each tick.
    audio_thread: Mutex<Option<ThreadId>>,
    /// Worker thread id, recorded during the open handshake.
    worker_thread: Mutex<Option<ThreadId>>,
    /// Events that originated on the audio thread itself; drained by the
    /// host after the backend lock is released.
    rt_events: ArrayQueue<InboxEvent>,
    /// Return path to the audio thread for worker-originated automation.
    reply_queue: Arc<ArrayQueue<CommandReply>>,
    inbox: Arc<EventInbox>,
}

impl ListenerHub {
    pub(crate) fn new(reply_queue: Arc<ArrayQueue<CommandReply>>, inbox: Arc<EventInbox>) -> Self {
        Self {
            audio_thread: Mutex::new(None),
            worker_thread: Mutex::new(None),
            rt_events: ArrayQueue::new(RT_EVENT_CAPACITY),
            reply_queue,
            inbox,
        }
    }

    pub fn note_audio_thread(&self) {
        *self.audio_thread.lock() = Some(thread::current().id());
    }

    pub fn note_worker_thread(&self) {
        *self.worker_thread.lock() = Some(thread::current().id());
    }

    fn on_audio_thread(&self) -> bool {
        *self.audio_thread.lock() == Some(thread::current().id())
    }

    fn on_worker_thread(&self) -> bool {
        *self.worker_thread.lock() == Some(thread::current().id())
    }

    /// A parameter changed inside the plugin (automation, editor drag).
    pub fn parameter_automated(&self, index: i32, value: f32) {
        let event = InboxEvent::ParamAutomated { index, value };
        if self.on_audio_thread() {
            if self.rt_events.push(event).is_err() {
                tracing::warn!(index, "rt event queue full, automation dropped");
            }
        } else if self.on_worker_thread() {
            if self
                .reply_queue
                .push(CommandReply::Automated { index, value })
                .is_err()
            {
                tracing::warn!(index, "reply queue full, automation dropped");
            }
        } else {
            self.inbox.push(event);
        }
    }

    /// The plugin produced a MIDI message.
    pub fn midi_event(&self, event: MidiEvent) {
        let entry = InboxEvent::Midi {
            data: event.data,
            delta: event.delta,
        };
        if self.on_audio_thread() {
            if self.rt_events.push(entry).is_err() {
                tracing::warn!("rt event queue full, MIDI event dropped");
            }
        } else if self.on_worker_thread() {
            // Backends emitting MIDI from the worker thread are out of
            // contract; nothing sensible to do with it.
            tracing::debug!("ignoring MIDI event from worker thread");
        } else {
            self.inbox.push(entry);
        }
    }

    /// The plugin produced a sysex message.
    pub fn sysex_event(&self, event: SysexEvent) {
        let entry = InboxEvent::Sysex {
            data: event.data,
            delta: event.delta,
        };
        if self.on_audio_thread() {
            if self.rt_events.push(entry).is_err() {
                tracing::warn!("rt event queue full, sysex event dropped");
            }
        } else if self.on_worker_thread() {
            tracing::debug!("ignoring sysex event from worker thread");
        } else {
            self.inbox.push(entry);
        }
    }

    /// Drain one audio-thread-originated event, if any.
    pub fn pop_rt_event(&self) -> Option<InboxEvent> {
        self.rt_events.pop()
    }
}
