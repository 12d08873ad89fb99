//! Immutable plugin descriptions.
//!
//! A [`PluginInfo`] is produced when a module is loaded (or probed out of
//! process) and is consumed read-only afterwards. It is serializable so
//! probe results can be cached on disk by the registry.

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Unique plugin identifier: 32-bit for V2 plugins, 128-bit class id for V3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniqueId {
    V2(i32),
    V3([u8; 16]),
}

impl UniqueId {
    /// The V2 id, or 0 for a V3 plugin (FXP/FXB headers want a 32-bit id).
    pub fn as_i32(&self) -> i32 {
        match self {
            UniqueId::V2(id) => *id,
            UniqueId::V3(_) => 0,
        }
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        UniqueId::V2(0)
    }
}

/// Capability flags reported by the backend at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginFlags {
    pub has_editor: bool,
    pub is_synth: bool,
    pub single_precision: bool,
    pub double_precision: bool,
    pub midi_input: bool,
    pub midi_output: bool,
    pub sysex_input: bool,
    pub sysex_output: bool,
    #[serde(default)]
    pub has_chunk_data: bool,
}

/// Descriptor for one parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub label: String,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

/// Plugin description, immutable after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginInfo {
    pub path: String,
    pub name: String,
    pub vendor: String,
    pub category: String,
    pub version: String,
    /// Numeric plugin version as embedded in preset headers.
    #[serde(default)]
    pub version_num: i32,
    pub kind: BackendKind,
    pub unique_id: UniqueId,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub num_parameters: usize,
    pub num_programs: usize,
    pub flags: PluginFlags,
    /// Parameter descriptors in plugin-declared order.
    pub parameters: Vec<ParamInfo>,
    /// Program names as reported at load time.
    pub programs: Vec<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            version: "0.0.0".to_string(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn version_num(mut self, version: i32) -> Self {
        self.version_num = version;
        self
    }

    pub fn unique_id(mut self, id: UniqueId) -> Self {
        self.unique_id = id;
        self
    }

    pub fn audio_io(mut self, inputs: usize, outputs: usize) -> Self {
        self.num_inputs = inputs;
        self.num_outputs = outputs;
        self
    }

    pub fn parameters(mut self, parameters: Vec<ParamInfo>) -> Self {
        self.num_parameters = parameters.len();
        self.parameters = parameters;
        self
    }

    pub fn programs(mut self, programs: Vec<String>) -> Self {
        self.num_programs = programs.len();
        self.programs = programs;
        self
    }

    pub fn flags(mut self, flags: PluginFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Look up a parameter index by name (exact match).
    pub fn find_parameter(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }
}
