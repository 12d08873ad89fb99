//! Shared test doubles: a scripted plugin backend, a recording reply
//! sink and a headless window.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use plughost::window::{RawWindowHandle, Window, WindowFactory};
use plughost::{
    BackendKind, HostError, ListenerHandle, MidiEvent, ParamInfo, PluginBackend, PluginFlags,
    PluginInfo, ProcessPrecision, Reply, ReplySink, Result, SysexEvent, TransportState, UniqueId,
};

/// Captures every reply the host emits.
#[derive(Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<Reply>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.replies.lock())
    }

    pub fn snapshot(&self) -> Vec<Reply> {
        self.replies.lock().clone()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.replies.lock().iter().any(|r| r.address() == address)
    }

    pub fn count(&self, address: &str) -> usize {
        self.replies
            .lock()
            .iter()
            .filter(|r| r.address() == address)
            .count()
    }
}

impl ReplySink for RecordingSink {
    fn send(&self, reply: Reply) {
        self.replies.lock().push(reply);
    }
}

/// Observable innards of a [`MockBackend`], shared with the test body.
#[derive(Default)]
pub struct MockProbe {
    pub set_calls: Mutex<Vec<(usize, f32)>>,
    pub suspend_count: Mutex<usize>,
    pub resume_count: Mutex<usize>,
    pub process_count: Mutex<usize>,
    pub midi_in: Mutex<Vec<MidiEvent>>,
    pub listener: Mutex<Option<ListenerHandle>>,
}

/// A scripted plugin: multiplies input by a fixed gain and keeps all
/// state in plain vectors so tests can assert on exact values.
pub struct MockBackend {
    info: PluginInfo,
    params: Vec<Vec<f32>>,
    program_names: Vec<String>,
    program: usize,
    program_chunk: Vec<u8>,
    bank_chunk: Vec<u8>,
    transport: TransportState,
    gain: f32,
    pub probe: Arc<MockProbe>,
}

impl MockBackend {
    pub fn new(num_params: usize, num_programs: usize) -> Self {
        let num_programs = num_programs.max(1);
        let parameters = (0..num_params)
            .map(|i| ParamInfo::new(format!("Param {i}"), ""))
            .collect();
        let program_names: Vec<String> =
            (0..num_programs).map(|i| format!("Program {i}")).collect();
        let info = PluginInfo::new("Mock Plugin", BackendKind::V2)
            .vendor("MockCo")
            .version("1.0.0")
            .version_num(1)
            .unique_id(UniqueId::V2(0x4D6F636B))
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
            gain: 0.5,
            probe: Arc::new(MockProbe::default()),
        }
    }

    pub fn with_editor(mut self) -> Self {
        self.info.flags.has_editor = true;
        self
    }

    pub fn chunked(mut self) -> Self {
        self.info.flags.has_chunk_data = true;
        self
    }

    pub fn with_probe(mut self, probe: Arc<MockProbe>) -> Self {
        self.probe = probe;
        self
    }
}

impl PluginBackend for MockBackend {
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
        *self.probe.suspend_count.lock() += 1;
    }

    fn resume(&mut self) {
        *self.probe.resume_count.lock() += 1;
    }

    fn process(&mut self, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>], frames: usize) {
        *self.probe.process_count.lock() += 1;
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
            self.probe.set_calls.lock().push((index, value));
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
        plughost::vst2::fxp::read_program(self, data)
    }

    fn write_program_data(&mut self) -> Result<Vec<u8>> {
        plughost::vst2::fxp::write_program(self)
    }

    fn read_bank_data(&mut self, data: &[u8]) -> Result<()> {
        plughost::vst2::fxp::read_bank(self, data)
    }

    fn write_bank_data(&mut self) -> Result<Vec<u8>> {
        plughost::vst2::fxp::write_bank(self)
    }

    fn send_midi(&mut self, event: MidiEvent) {
        self.probe.midi_in.lock().push(event);
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
        if !self.info.flags.has_editor {
            return Err(HostError::EditorError("plugin has no editor".to_string()));
        }
        Ok(())
    }

    fn close_editor(&mut self) {}

    fn editor_rect(&self) -> Option<(i32, i32, i32, i32)> {
        if self.info.flags.has_editor {
            Some((0, 0, 640, 480))
        } else {
            None
        }
    }

    fn set_listener(&mut self, listener: ListenerHandle) {
        *self.probe.listener.lock() = Some(listener);
    }
}

/// A headless window whose event loop blocks on a condvar until quit.
pub struct MockWindow {
    running: Mutex<bool>,
    quit_signal: Condvar,
}

impl Default for MockWindow {
    fn default() -> Self {
        Self {
            running: Mutex::new(true),
            quit_signal: Condvar::new(),
        }
    }
}

impl Window for MockWindow {
    fn handle(&self) -> RawWindowHandle {
        0x1000
    }

    fn set_title(&self, _title: &str) {}
    fn set_geometry(&self, _left: i32, _top: i32, _right: i32, _bottom: i32) {}
    fn show(&self) {}
    fn hide(&self) {}
    fn bring_to_top(&self) {}

    fn run(&self) {
        let mut running = self.running.lock();
        while *running {
            self.quit_signal.wait(&mut running);
        }
    }

    fn quit(&self) {
        *self.running.lock() = false;
        self.quit_signal.notify_all();
    }
}

#[derive(Default)]
pub struct MockWindowFactory;

impl WindowFactory for MockWindowFactory {
    fn create(&self, _title: &str) -> Result<Arc<dyn Window>> {
        Ok(Arc::new(MockWindow::default()))
    }
}

/// Drive one audio block through the host with the given 2-channel
/// input, returning the produced output.
pub fn run_block(
    host: &mut plughost::PluginHost,
    bypass: bool,
    input: &[f32],
    controls: &[(f32, f32)],
    buses: &[f32],
) -> Vec<Vec<f32>> {
    let frames = input.len();
    let in1 = input.to_vec();
    let mut out0 = vec![0.0f32; frames];
    let mut out1 = vec![0.0f32; frames];
    {
        let inputs: [&[f32]; 2] = [input, &in1];
        let mut outs: [&mut [f32]; 2] = [&mut out0, &mut out1];
        host.next(bypass, &inputs, &mut outs, controls, buses, frames);
    }
    vec![out0, out1]
}

/// Tick empty blocks until `predicate` holds or the timeout hits.
pub fn drive_until(
    host: &mut plughost::PluginHost,
    mut predicate: impl FnMut(&plughost::PluginHost) -> bool,
) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        run_block(host, false, &[0.0f32; 16], &[], &[]);
        if predicate(host) {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for host condition"
        );
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
