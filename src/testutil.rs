//! In-crate mocks for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::{Reply, ReplySink};

use crate::backend::{MidiEvent, PluginBackend, ProcessPrecision, SysexEvent};
use crate::error::{HostError, Result};
use crate::info::{ParamInfo, PluginFlags, PluginInfo, UniqueId};
use crate::listener::ListenerHandle;
use crate::transport::TransportState;
use crate::window::RawWindowHandle;

/// Captures every reply a host emits.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub replies: Mutex<Vec<Reply>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.replies.lock())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.replies.lock().iter().any(|r| r.address() == address)
    }
}

impl ReplySink for RecordingSink {
    fn send(&self, reply: Reply) {
        self.replies.lock().push(reply);
    }
}

/// A scripted plugin: applies a fixed gain, keeps parameter/program
/// state in plain vectors and records every `set_parameter` call so
/// tests can assert on exactly what the host sent.
pub(crate) struct TestBackend {
    info: PluginInfo,
    params: Vec<Vec<f32>>,
    program_names: Vec<String>,
    program: usize,
    program_chunk: Vec<u8>,
    bank_chunk: Vec<u8>,
    transport: TransportState,
    listener: Option<ListenerHandle>,
    pub gain: f32,
    pub set_calls: Arc<Mutex<Vec<(usize, f32)>>>,
    pub suspend_count: Arc<Mutex<usize>>,
    pub resume_count: Arc<Mutex<usize>>,
    pub midi_out: Arc<Mutex<Vec<MidiEvent>>>,
    pub editor_open: bool,
}

impl TestBackend {
    pub fn new(num_params: usize, num_programs: usize) -> Self {
        let num_programs = num_programs.max(1);
        let parameters = (0..num_params)
            .map(|i| ParamInfo::new(format!("Param {i}"), ""))
            .collect();
        let program_names: Vec<String> =
            (0..num_programs).map(|i| format!("Program {i}")).collect();
        let info = PluginInfo::new("Test Plugin", crate::backend::BackendKind::V2)
            .vendor("TestCo")
            .version("1.0.0")
            .version_num(1)
            .unique_id(UniqueId::V2(0x54657374))
            .audio_io(2, 2)
            .parameters(parameters)
            .programs(program_names.clone())
            .flags(PluginFlags {
                single_precision: true,
                ..Default::default()
            });
        Self {
            info,
            params: vec![vec![0.0; num_params]; num_programs],
            program_names,
            program: 0,
            program_chunk: Vec::new(),
            bank_chunk: Vec::new(),
            transport: TransportState::default(),
            listener: None,
            gain: 0.5,
            set_calls: Arc::new(Mutex::new(Vec::new())),
            suspend_count: Arc::new(Mutex::new(0)),
            resume_count: Arc::new(Mutex::new(0)),
            midi_out: Arc::new(Mutex::new(Vec::new())),
            editor_open: false,
        }
    }

    pub fn chunked(mut self) -> Self {
        self.info.flags.has_chunk_data = true;
        self
    }

    pub fn with_editor(mut self) -> Self {
        self.info.flags.has_editor = true;
        self
    }

    #[allow(dead_code)]
    pub fn listener(&self) -> Option<ListenerHandle> {
        self.listener.clone()
    }
}

impl PluginBackend for TestBackend {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn set_sample_rate(&mut self, _rate: f32) {}
    fn set_block_size(&mut self, _frames: usize) {}

    fn has_precision(&self, precision: ProcessPrecision) -> bool {
        precision == ProcessPrecision::Single
    }

    fn set_precision(&mut self, _precision: ProcessPrecision) {}
    fn set_num_speakers(&mut self, _inputs: usize, _outputs: usize) {}

    fn suspend(&mut self) {
        *self.suspend_count.lock() += 1;
    }

    fn resume(&mut self) {
        *self.resume_count.lock() += 1;
    }

    fn process(&mut self, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>], frames: usize) {
        for (ch, out) in outputs.iter_mut().enumerate() {
            for i in 0..frames.min(out.len()) {
                let sample = inputs
                    .get(ch)
                    .and_then(|input| input.get(i))
                    .copied()
                    .unwrap_or(0.0);
                out[i] = sample * self.gain;
            }
        }
    }

    fn process_double(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>], frames: usize) {
        for (ch, out) in outputs.iter_mut().enumerate() {
            for i in 0..frames.min(out.len()) {
                let sample = inputs
                    .get(ch)
                    .and_then(|input| input.get(i))
                    .copied()
                    .unwrap_or(0.0);
                out[i] = sample * self.gain as f64;
            }
        }
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.params[self.program].get_mut(index) {
            *slot = value;
            self.set_calls.lock().push((index, value));
        }
    }

    fn set_parameter_text(&mut self, index: usize, text: &str) -> bool {
        match text.parse::<f32>() {
            Ok(value) => {
                self.set_parameter(index, value);
                true
            }
            Err(_) => false,
        }
    }

    fn parameter(&self, index: usize) -> f32 {
        self.params[self.program].get(index).copied().unwrap_or(0.0)
    }

    fn parameter_name(&self, index: usize) -> String {
        self.info
            .parameters
            .get(index)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    fn parameter_label(&self, index: usize) -> String {
        self.info
            .parameters
            .get(index)
            .map(|p| p.label.clone())
            .unwrap_or_default()
    }

    fn parameter_display(&self, index: usize) -> String {
        format!("{:.2}", self.parameter(index))
    }

    fn set_program(&mut self, index: usize) {
        if index < self.params.len() {
            self.program = index;
        }
    }

    fn program(&self) -> usize {
        self.program
    }

    fn set_program_name(&mut self, name: &str) {
        self.program_names[self.program] = name.to_string();
    }

    fn program_name(&self) -> String {
        self.program_names[self.program].clone()
    }

    fn program_name_indexed(&self, index: usize) -> String {
        self.program_names.get(index).cloned().unwrap_or_default()
    }

    fn program_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(self.program_chunk.clone())
    }

    fn set_program_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.program_chunk = data.to_vec();
        Ok(())
    }

    fn bank_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(self.bank_chunk.clone())
    }

    fn set_bank_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.bank_chunk = data.to_vec();
        Ok(())
    }

    fn read_program_data(&mut self, data: &[u8]) -> Result<()> {
        crate::vst2::fxp::read_program(self, data)
    }

    fn write_program_data(&mut self) -> Result<Vec<u8>> {
        crate::vst2::fxp::write_program(self)
    }

    fn read_bank_data(&mut self, data: &[u8]) -> Result<()> {
        crate::vst2::fxp::read_bank(self, data)
    }

    fn write_bank_data(&mut self) -> Result<Vec<u8>> {
        crate::vst2::fxp::write_bank(self)
    }

    fn send_midi(&mut self, event: MidiEvent) {
        self.midi_out.lock().push(event);
    }

    fn send_sysex(&mut self, _event: SysexEvent) {}

    fn set_tempo(&mut self, bpm: f64) {
        self.transport.tempo_bpm = bpm;
    }

    fn set_time_signature(&mut self, numerator: i32, denominator: i32) {
        self.transport.time_sig_numerator = numerator;
        self.transport.time_sig_denominator = denominator;
    }

    fn set_transport_playing(&mut self, playing: bool) {
        self.transport.playing = playing;
    }

    fn set_transport_position(&mut self, beats: f64) {
        self.transport.position_beats = beats;
    }

    fn transport_position(&self) -> f64 {
        self.transport.position_beats
    }

    fn can_do(&mut self, what: &str) -> i32 {
        match what {
            "receiveMidi" | "sendMidi" => 1,
            _ => 0,
        }
    }

    fn vendor_specific(&mut self, index: i32, _value: isize, _data: &[u8], _opt: f32) -> isize {
        index as isize
    }

    fn open_editor(&mut self, _parent: RawWindowHandle) -> Result<()> {
        if !self.has_editor() {
            return Err(HostError::EditorError("plugin has no editor".to_string()));
        }
        self.editor_open = true;
        Ok(())
    }

    fn close_editor(&mut self) {
        self.editor_open = false;
    }

    fn editor_rect(&self) -> Option<(i32, i32, i32, i32)> {
        if self.has_editor() {
            Some((0, 0, 640, 480))
        } else {
            None
        }
    }

    fn set_listener(&mut self, listener: ListenerHandle) {
        self.listener = Some(listener);
    }
}
