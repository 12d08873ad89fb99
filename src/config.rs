//! Host configuration.

use serde::{Deserialize, Serialize};

/// How plugin instances that want an editor are created.
///
/// Some backends insist that instantiation, editor and message loop all
/// live on one thread; others only need the editor opened from a thread
/// that pumps events. `Dedicated` spawns a GUI thread per instance and
/// runs the window's event loop there; `Inline` creates everything on
/// the worker thread and leaves event pumping to the embedder (via
/// [`crate::window::WindowFactory::poll`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuiMode {
    #[default]
    Dedicated,
    Inline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub sample_rate: f32,
    pub block_size: usize,
    /// Maximum preset bytes per `/program_data` / `/bank_data` reply
    /// packet, keeping each reply UDP-friendly.
    pub packet_budget: usize,
    #[serde(default)]
    pub gui_mode: GuiMode,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 512,
            packet_budget: 1600,
            gui_mode: GuiMode::Dedicated,
        }
    }
}
