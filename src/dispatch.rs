//! Control and reply surfaces.
//!
//! The embedding engine drives a host instance with [`HostCommand`]
//! values (one variant per ASCII command tag) and receives
//! [`Reply`] messages through its [`ReplySink`]. Both sides are plain
//! serializable enums so transports can forward them verbatim.

use serde::{Deserialize, Serialize};

/// A parameter value in a `set`/`setn` command: numeric, or the textual
/// form the backend parses itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f32),
    Text(String),
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Commands understood by a plugin host instance.
///
/// Dispatched on the audio thread; side-effectful or potentially
/// blocking commands are forwarded to the worker thread internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostCommand {
    Open { path: String, editor: bool },
    Close,
    Reset { is_async: bool },
    Vis { show: bool },
    /// Pairs of (index, value).
    Set { pairs: Vec<(i32, ParamValue)> },
    /// Spans of (onset index, values…).
    SetN { spans: Vec<(i32, Vec<ParamValue>)> },
    ParamQuery { onset: i32, count: i32 },
    Get { index: i32 },
    GetN { index: i32, count: i32 },
    /// Bind `channels` consecutive parameters starting at `index` to
    /// consecutive buses starting at `bus`.
    Map { index: i32, bus: i32, channels: i32 },
    /// Unbind the given parameters; empty means all.
    Unmap { indices: Vec<i32> },
    ProgramSet { index: i32 },
    ProgramQuery { onset: i32, count: i32 },
    ProgramName { name: String },
    ProgramRead { path: String },
    ProgramWrite { path: String },
    ProgramDataSet { total: usize, onset: usize, bytes: Vec<u8> },
    ProgramDataGet { budget: usize },
    BankRead { path: String },
    BankWrite { path: String },
    BankDataSet { total: usize, onset: usize, bytes: Vec<u8> },
    BankDataGet { budget: usize },
    MidiMsg { status: u8, data1: u8, data2: u8 },
    MidiSysex { bytes: Vec<u8> },
    Tempo { bpm: f32 },
    TimeSig { numerator: i32, denominator: i32 },
    TransportPlay { play: bool },
    TransportSet { position: f32 },
    TransportGet,
    CanDo { what: String },
    VendorMethod { index: i32, value: isize, data: Vec<u8>, opt: f32 },
}

impl HostCommand {
    /// The ASCII command tag this variant corresponds to.
    pub fn tag(&self) -> &'static str {
        match self {
            HostCommand::Open { .. } => "open",
            HostCommand::Close => "close",
            HostCommand::Reset { .. } => "reset",
            HostCommand::Vis { .. } => "vis",
            HostCommand::Set { .. } => "set",
            HostCommand::SetN { .. } => "setn",
            HostCommand::ParamQuery { .. } => "param_query",
            HostCommand::Get { .. } => "get",
            HostCommand::GetN { .. } => "getn",
            HostCommand::Map { .. } => "map",
            HostCommand::Unmap { .. } => "unmap",
            HostCommand::ProgramSet { .. } => "program_set",
            HostCommand::ProgramQuery { .. } => "program_query",
            HostCommand::ProgramName { .. } => "program_name",
            HostCommand::ProgramRead { .. } => "program_read",
            HostCommand::ProgramWrite { .. } => "program_write",
            HostCommand::ProgramDataSet { .. } => "program_data_set",
            HostCommand::ProgramDataGet { .. } => "program_data_get",
            HostCommand::BankRead { .. } => "bank_read",
            HostCommand::BankWrite { .. } => "bank_write",
            HostCommand::BankDataSet { .. } => "bank_data_set",
            HostCommand::BankDataGet { .. } => "bank_data_get",
            HostCommand::MidiMsg { .. } => "midi_msg",
            HostCommand::MidiSysex { .. } => "midi_sysex",
            HostCommand::Tempo { .. } => "tempo",
            HostCommand::TimeSig { .. } => "time_sig",
            HostCommand::TransportPlay { .. } => "transport_play",
            HostCommand::TransportSet { .. } => "transport_set",
            HostCommand::TransportGet => "transport_get",
            HostCommand::CanDo { .. } => "can_do",
            HostCommand::VendorMethod { .. } => "vendor_method",
        }
    }
}

/// Messages a host instance emits back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Open { ok: bool, has_editor: bool },
    Param { index: i32, value: f32, display: String },
    Auto { index: i32, value: f32 },
    Set { value: f32 },
    SetN { values: Vec<f32> },
    ProgramIndex { index: i32 },
    ProgramName { index: i32, name: String },
    ProgramRead { ok: bool },
    ProgramWrite { ok: bool },
    BankRead { ok: bool },
    BankWrite { ok: bool },
    ProgramData { total: usize, onset: usize, bytes: Vec<u8> },
    BankData { total: usize, onset: usize, bytes: Vec<u8> },
    Midi { status: u8, data1: u8, data2: u8 },
    Sysex { bytes: Vec<u8> },
    Transport { position: f64 },
    CanDo { result: i32 },
    VendorMethod { result: i64 },
}

impl Reply {
    /// The reply address this variant is delivered under.
    pub fn address(&self) -> &'static str {
        match self {
            Reply::Open { .. } => "/open",
            Reply::Param { .. } => "/param",
            Reply::Auto { .. } => "/auto",
            Reply::Set { .. } => "/set",
            Reply::SetN { .. } => "/setn",
            Reply::ProgramIndex { .. } => "/program_index",
            Reply::ProgramName { .. } => "/program_name",
            Reply::ProgramRead { .. } => "/program_read",
            Reply::ProgramWrite { .. } => "/program_write",
            Reply::BankRead { .. } => "/bank_read",
            Reply::BankWrite { .. } => "/bank_write",
            Reply::ProgramData { .. } => "/program_data",
            Reply::BankData { .. } => "/bank_data",
            Reply::Midi { .. } => "/midi",
            Reply::Sysex { .. } => "/sysex",
            Reply::Transport { .. } => "/transport",
            Reply::CanDo { .. } => "/can_do",
            Reply::VendorMethod { .. } => "/vendor_method",
        }
    }
}

/// Where a host instance delivers its replies. Implementations must be
/// callable from the audio thread without blocking.
pub trait ReplySink: Send + Sync {
    fn send(&self, reply: Reply);
}
