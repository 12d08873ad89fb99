//! Error types for the plugin host.

use std::path::PathBuf;
use thiserror::Error;

/// Stage of the plugin load sequence an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    Factory,
    Instantiation,
    Initialization,
    Setup,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening module"),
            LoadStage::Factory => write!(f, "getting factory"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Initialization => write!(f, "initializing"),
            LoadStage::Setup => write!(f, "setting up audio"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Plugin load failed at {stage} stage: {path}\n  Reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Parameter index {index} out of range (plugin has {count})")]
    IndexOutOfRange { index: i32, count: usize },

    #[error("No plugin loaded")]
    NotLoaded,

    #[error("Preset data rejected: {0}")]
    BadPreset(String),

    #[error("Plugin editor error: {0}")]
    EditorError(String),

    #[error("Command queue full, command dropped")]
    QueueFull,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
