//! Plugin backend abstraction.
//!
//! A backend is an instantiated plugin behind one of the two supported
//! ABIs. The concrete adapters live in [`crate::vst2`] and [`crate::vst3`];
//! everything above them talks to the [`PluginBackend`] capability set.
//! Dispatch between the two ABIs is a tagged variant ([`PluginModule`]),
//! not a vtable hierarchy; `Box<dyn PluginBackend>` exists only so the
//! host and tests can also carry mock backends.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, LoadStage, Result};
use crate::info::PluginInfo;
use crate::listener::ListenerHandle;
use crate::window::RawWindowHandle;

/// Which ABI a plugin module speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    V2,
    V3,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::V2 => write!(f, "V2"),
            BackendKind::V3 => write!(f, "V3"),
        }
    }
}

/// Sample precision for the process call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPrecision {
    Single,
    Double,
}

/// A raw 3-byte MIDI message with a sample offset into the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub data: [u8; 3],
    pub delta: i32,
}

impl MidiEvent {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            data: [status, data1, data2],
            delta: 0,
        }
    }

    pub fn with_delta(mut self, delta: i32) -> Self {
        self.delta = delta;
        self
    }
}

/// A system-exclusive message with a sample offset into the current block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysexEvent {
    pub data: Vec<u8>,
    pub delta: i32,
}

impl SysexEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            delta: 0,
        }
    }
}

/// The capability set every plugin backend exposes to the host.
///
/// Methods marked RT-safe in the backend contract (`process`, parameter
/// get/set, MIDI send, transport setters) may be called from the audio
/// thread; everything else runs on the worker or GUI thread. Preset
/// data methods have default implementations in terms of the codec the
/// ABI uses; the file forms default to read-file-then-parse.
impl std::fmt::Debug for dyn PluginBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn PluginBackend")
            .field("info", self.info())
            .finish()
    }
}

pub trait PluginBackend: Send {
    fn info(&self) -> &PluginInfo;

    // ---- lifecycle / processing setup ----

    fn set_sample_rate(&mut self, rate: f32);
    fn set_block_size(&mut self, frames: usize);
    fn has_precision(&self, precision: ProcessPrecision) -> bool;
    fn set_precision(&mut self, precision: ProcessPrecision);
    fn set_num_speakers(&mut self, inputs: usize, outputs: usize);
    fn suspend(&mut self);
    fn resume(&mut self);

    /// Process one block in single precision. `inputs`/`outputs` hold at
    /// least the channel counts declared in [`PluginInfo`]; each channel
    /// holds at least `frames` samples.
    fn process(&mut self, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>], frames: usize);

    /// Process one block in double precision.
    fn process_double(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>], frames: usize);

    // ---- parameters ----

    fn set_parameter(&mut self, index: usize, value: f32);
    /// Set a parameter from its textual representation. Returns false if
    /// the backend could not parse the string.
    fn set_parameter_text(&mut self, index: usize, text: &str) -> bool;
    fn parameter(&self, index: usize) -> f32;
    fn parameter_name(&self, index: usize) -> String;
    fn parameter_label(&self, index: usize) -> String;
    fn parameter_display(&self, index: usize) -> String;

    // ---- programs ----

    fn set_program(&mut self, index: usize);
    fn program(&self) -> usize;
    fn set_program_name(&mut self, name: &str);
    fn program_name(&self) -> String;
    fn program_name_indexed(&self, index: usize) -> String;

    // ---- opaque chunks ----

    fn has_chunk_data(&self) -> bool {
        self.info().flags.has_chunk_data
    }
    fn program_chunk(&mut self) -> Result<Vec<u8>>;
    fn set_program_chunk(&mut self, data: &[u8]) -> Result<()>;
    fn bank_chunk(&mut self) -> Result<Vec<u8>>;
    fn set_bank_chunk(&mut self, data: &[u8]) -> Result<()>;

    // ---- preset data / files ----
    //
    // The data forms round-trip the ABI's preset container (FXP/FXB for
    // V2, the chunk-list format for V3); adapters implement them through
    // the codec modules. The file forms default to read-then-parse.

    fn read_program_data(&mut self, data: &[u8]) -> Result<()>;
    fn write_program_data(&mut self) -> Result<Vec<u8>>;
    fn read_bank_data(&mut self, data: &[u8]) -> Result<()>;
    fn write_bank_data(&mut self) -> Result<Vec<u8>>;

    fn read_program_file(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read(path)?;
        self.read_program_data(&data)
    }

    fn write_program_file(&mut self, path: &Path) -> Result<()> {
        let data = self.write_program_data()?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn read_bank_file(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read(path)?;
        self.read_bank_data(&data)
    }

    fn write_bank_file(&mut self, path: &Path) -> Result<()> {
        let data = self.write_bank_data()?;
        std::fs::write(path, data)?;
        Ok(())
    }

    // ---- events ----

    fn send_midi(&mut self, event: MidiEvent);
    fn send_sysex(&mut self, event: SysexEvent);

    // ---- transport ----

    fn set_tempo(&mut self, bpm: f64);
    fn set_time_signature(&mut self, numerator: i32, denominator: i32);
    fn set_transport_playing(&mut self, playing: bool);
    fn set_transport_position(&mut self, beats: f64);
    fn transport_position(&self) -> f64;

    // ---- queries ----

    fn can_do(&mut self, what: &str) -> i32;
    fn vendor_specific(&mut self, index: i32, value: isize, data: &[u8], opt: f32) -> isize;

    // ---- editor ----

    fn has_editor(&self) -> bool {
        self.info().flags.has_editor
    }
    fn open_editor(&mut self, parent: RawWindowHandle) -> Result<()>;
    fn close_editor(&mut self);
    /// (left, top, right, bottom) of the editor, if the plugin reports one.
    fn editor_rect(&self) -> Option<(i32, i32, i32, i32)>;

    // ---- listener ----

    fn set_listener(&mut self, listener: ListenerHandle);
}

/// A loaded plugin shared between the audio and worker threads.
///
/// The ownership protocol keeps the two sides from contending: the
/// worker holds the lock during Loading/Closing and preset I/O, the
/// audio thread during `process`. The audio thread only ever uses
/// `try_lock`, falling back to bypass for the block when the worker has
/// the plugin.
pub type SharedBackend = Arc<Mutex<Box<dyn PluginBackend>>>;

/// Guess the ABI from the module path.
pub fn kind_from_path(path: &Path) -> BackendKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some("vst3") => BackendKind::V3,
        _ => BackendKind::V2,
    }
}

/// Load a plugin module from disk and box it for the host.
///
/// The ABI is inferred from the file extension unless `kind` is given.
pub fn load_module(path: &Path, kind: Option<BackendKind>) -> Result<Box<dyn PluginBackend>> {
    let kind = kind.unwrap_or_else(|| kind_from_path(path));
    match kind {
        BackendKind::V2 => {
            #[cfg(feature = "vst2")]
            {
                Ok(Box::new(crate::vst2::Vst2Backend::load(path)?))
            }
            #[cfg(not(feature = "vst2"))]
            {
                Err(HostError::LoadFailed {
                    path: path.to_path_buf(),
                    stage: LoadStage::Opening,
                    reason: "V2 support not compiled (enable the 'vst2' feature)".to_string(),
                })
            }
        }
        BackendKind::V3 => {
            #[cfg(feature = "vst3")]
            {
                Ok(Box::new(crate::vst3::Vst3Backend::load(path)?))
            }
            #[cfg(not(feature = "vst3"))]
            {
                Err(HostError::LoadFailed {
                    path: path.to_path_buf(),
                    stage: LoadStage::Opening,
                    reason: "V3 support not compiled (enable the 'vst3' feature)".to_string(),
                })
            }
        }
    }
}
