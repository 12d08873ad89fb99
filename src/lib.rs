//! Embedding host for native audio plugins.
//!
//! `plughost` loads V2 (FXP/FXB era) and V3 plugin modules and exposes
//! them to a realtime audio engine as pluggable processors driven over a
//! message-based command channel. Three threads cooperate around every
//! instance:
//!
//! - the **audio thread** ticks [`PluginHost::next`] block by block,
//!   submits commands and emits replies; it never blocks;
//! - a **worker thread** ([`WorkerEngine`]) services loading, preset
//!   I/O, program changes and teardown;
//! - a **GUI thread** runs the native editor's event loop and feeds
//!   plugin callbacks back through a try-locked event inbox.
//!
//! ## Usage
//!
//! ```ignore
//! use plughost::{HostCommand, HostConfig, PluginHost, WorkerEngine};
//!
//! let engine = WorkerEngine::spawn();
//! let mut host = PluginHost::new(HostConfig::default(), engine.sender(), reply_sink);
//!
//! // From the engine's command stream:
//! host.dispatch(HostCommand::Open { path: "/plugins/synth1.vst3".into(), editor: true });
//!
//! // From the audio callback:
//! host.next(bypass, &inputs, &mut outputs, &controls, &buses, frames);
//! ```
//!
//! Backend ABIs are feature-gated (`vst2`, `vst3`); the preset codecs,
//! command protocol and host machinery build without them.

pub mod error;
pub use error::{HostError, LoadStage, Result};

pub mod backend;
pub use backend::{BackendKind, MidiEvent, PluginBackend, ProcessPrecision, SysexEvent};

pub mod info;
pub use info::{ParamInfo, PluginFlags, PluginInfo, UniqueId};

pub mod config;
pub use config::{GuiMode, HostConfig};

pub mod dispatch;
pub use dispatch::{HostCommand, ParamValue, Reply, ReplySink};

pub mod host;
pub use host::{HostState, PluginHost};

mod commands;
pub use commands::{CommandSender, WorkerEngine};

pub mod events;
pub use events::{EventInbox, InboxEvent};

pub mod listener;
pub use listener::{ListenerHandle, ListenerHub};

pub mod params;
pub use params::{BusReader, ParamSlot, ParamTable};

pub mod transport;
pub use transport::{TransportCell, TransportState};

pub mod window;
pub use window::{BackendFactory, RawWindowHandle, Window, WindowFactory};

pub mod registry;

pub mod vst2;
pub mod vst3;

#[cfg(test)]
pub(crate) mod testutil;
