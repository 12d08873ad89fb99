//! The per-plugin host instance.
//!
//! A [`PluginHost`] ties one loaded plugin to the embedding engine: it
//! owns the lifecycle state machine, the parameter table, the event
//! inbox and the reply path, submits worker commands, and carries the
//! realtime [`next`](PluginHost::next) routine the engine ticks with
//! audio blocks.
//!
//! Thread contract: `dispatch` and `next` run on the audio thread; the
//! worker and GUI threads only ever see the resources that commands
//! moved or cloned out of the instance.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::queue::ArrayQueue;

use crate::backend::SharedBackend;
use crate::commands::{
    CommandReply, CommandSender, OpenRequest, ReplyQueue, WorkerPayload,
};
use crate::config::HostConfig;
use crate::dispatch::{HostCommand, ParamValue, Reply, ReplySink};
use crate::events::{EventInbox, InboxEvent};
use crate::info::PluginInfo;
use crate::listener::{ListenerHandle, ListenerHub};
use crate::params::{BusReader, ParamTable};
use crate::window::{BackendFactory, Window, WindowFactory};

const REPLY_QUEUE_SIZE: usize = 256;

/// Lifecycle of a host instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// No plugin attached.
    Empty,
    /// An Open command is in flight on the worker thread.
    Loading,
    /// Plugin attached and processing.
    Ready,
    /// Plugin attached, bypass input is high.
    Bypassed,
    /// A Close command is in flight; the instance can be reopened.
    Closing,
}

#[derive(Default)]
struct UploadState {
    data: Vec<u8>,
    total: usize,
    received: usize,
}

pub struct PluginHost {
    config: HostConfig,
    sender: CommandSender,
    sink: Arc<dyn ReplySink>,
    reply_queue: ReplyQueue,
    inbox: Arc<EventInbox>,
    listener: ListenerHandle,
    factory: BackendFactory,
    windows: Option<Arc<dyn WindowFactory>>,

    state: HostState,
    backend: Option<SharedBackend>,
    window: Option<Arc<dyn Window>>,
    gui_thread: Option<JoinHandle<()>>,
    info: Option<PluginInfo>,
    params: ParamTable,
    upload: UploadState,
    single_precision: bool,

    // Plugin-side scratch, sized once per Open so `next` never allocates.
    scratch_in: Vec<Vec<f32>>,
    scratch_out: Vec<Vec<f32>>,
}

impl PluginHost {
    pub fn new(config: HostConfig, sender: CommandSender, sink: Arc<dyn ReplySink>) -> Self {
        let reply_queue: ReplyQueue = Arc::new(ArrayQueue::new(REPLY_QUEUE_SIZE));
        let inbox = Arc::new(EventInbox::new());
        let listener = Arc::new(ListenerHub::new(
            Arc::clone(&reply_queue),
            Arc::clone(&inbox),
        ));
        Self {
            config,
            sender,
            sink,
            reply_queue,
            inbox,
            listener,
            factory: Arc::new(|path: &std::path::Path| crate::backend::load_module(path, None)),
            windows: None,
            state: HostState::Empty,
            backend: None,
            window: None,
            gui_thread: None,
            info: None,
            params: ParamTable::default(),
            upload: UploadState::default(),
            single_precision: false,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }

    /// Replace how plugin modules are instantiated (tests, probing hosts).
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Register the embedder's windowing backend.
    pub fn with_window_factory(mut self, windows: Arc<dyn WindowFactory>) -> Self {
        self.windows = Some(windows);
        self
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn info(&self) -> Option<&PluginInfo> {
        self.info.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn has_editor_window(&self) -> bool {
        self.window.is_some()
    }

    /// The callback hub this instance hands to backends through
    /// `set_listener`. Embedders wiring up custom backends route plugin
    /// callbacks through it.
    pub fn listener(&self) -> ListenerHandle {
        Arc::clone(&self.listener)
    }

    // -----------------------------------------------------------------
    // control surface
    // -----------------------------------------------------------------

    /// Dispatch one engine command. Runs on the audio thread.
    pub fn dispatch(&mut self, command: HostCommand) {
        match command {
            HostCommand::Open { path, editor } => self.open(&path, editor),
            HostCommand::Close => self.close(),
            HostCommand::Reset { is_async } => self.reset(is_async),
            HostCommand::Vis { show } => self.show_editor(show),
            HostCommand::Set { pairs } => {
                for (index, value) in pairs {
                    self.set_param(index, value);
                }
            }
            HostCommand::SetN { spans } => {
                for (onset, values) in spans {
                    for (k, value) in values.into_iter().enumerate() {
                        self.set_param(onset + k as i32, value);
                    }
                }
            }
            HostCommand::ParamQuery { onset, count } => self.query_params(onset, count),
            HostCommand::Get { index } => self.get_param(index),
            HostCommand::GetN { index, count } => self.get_params(index, count),
            HostCommand::Map {
                index,
                bus,
                channels,
            } => {
                if bus < 0 {
                    tracing::warn!(bus, "invalid bus number");
                } else {
                    for k in 0..channels.max(0) {
                        self.map_param(index + k, (bus + k) as u32);
                    }
                }
            }
            HostCommand::Unmap { indices } => {
                if indices.is_empty() {
                    self.params.unmap_all();
                } else {
                    for index in indices {
                        self.unmap_param(index);
                    }
                }
            }
            HostCommand::ProgramSet { index } => self.set_program(index),
            HostCommand::ProgramQuery { onset, count } => self.query_programs(onset, count),
            HostCommand::ProgramName { name } => self.set_program_name(&name),
            HostCommand::ProgramRead { path } => self.read_program(&path),
            HostCommand::ProgramWrite { path } => self.write_program(&path),
            HostCommand::ProgramDataSet {
                total,
                onset,
                bytes,
            } => self.send_program_data(total, onset, &bytes, false),
            HostCommand::ProgramDataGet { budget } => self.receive_program_data(budget, false),
            HostCommand::BankRead { path } => self.read_bank(&path),
            HostCommand::BankWrite { path } => self.write_bank(&path),
            HostCommand::BankDataSet {
                total,
                onset,
                bytes,
            } => self.send_program_data(total, onset, &bytes, true),
            HostCommand::BankDataGet { budget } => self.receive_program_data(budget, true),
            HostCommand::MidiMsg {
                status,
                data1,
                data2,
            } => self.send_midi(status, data1, data2),
            HostCommand::MidiSysex { bytes } => self.send_sysex(&bytes),
            HostCommand::Tempo { bpm } => self.set_tempo(bpm),
            HostCommand::TimeSig {
                numerator,
                denominator,
            } => self.set_time_sig(numerator, denominator),
            HostCommand::TransportPlay { play } => self.set_transport_playing(play),
            HostCommand::TransportSet { position } => self.set_transport_pos(position),
            HostCommand::TransportGet => self.get_transport_pos(),
            HostCommand::CanDo { what } => self.can_do(&what),
            HostCommand::VendorMethod {
                index,
                value,
                data,
                opt,
            } => self.vendor_method(index, value, &data, opt),
        }
    }

    /// Load a plugin, optionally with its native editor. Replies `/open`.
    pub fn open(&mut self, path: &str, with_editor: bool) {
        if self.state == HostState::Loading {
            tracing::warn!("already loading!");
            return;
        }
        self.close();

        let request = OpenRequest {
            path: PathBuf::from(path),
            with_editor,
            factory: Arc::clone(&self.factory),
            windows: self.windows.clone(),
            gui_mode: self.config.gui_mode,
            sample_rate: self.config.sample_rate,
            block_size: self.config.block_size,
            engine_inputs: self.scratch_hint_inputs(),
            engine_outputs: self.scratch_hint_outputs(),
            listener: Arc::clone(&self.listener),
        };
        if self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::Open(Box::new(request)),
        ) {
            self.state = HostState::Loading;
        }
    }

    /// Detach the current plugin. The handle, editor window and GUI
    /// thread travel with the command; our fields clear immediately so
    /// the instance can be reopened before the teardown finishes.
    pub fn close(&mut self) {
        if self.backend.is_none() && self.window.is_none() {
            return;
        }
        let payload = WorkerPayload::Close {
            backend: self.backend.take(),
            window: self.window.take(),
            gui_thread: self.gui_thread.take(),
        };
        self.info = None;
        self.params.clear();
        self.single_precision = false;
        self.scratch_in.clear();
        self.scratch_out.clear();
        if self.sender.submit(Arc::clone(&self.reply_queue), payload) {
            self.state = HostState::Closing;
        } else {
            // Queue full: the resources were already moved into the
            // payload and dropped with it. The instance stays usable.
            self.state = HostState::Empty;
        }
    }

    /// Suspend+resume the plugin. Async runs on the worker thread (some
    /// backends are not RT-safe to reset); otherwise inline right here.
    pub fn reset(&mut self, is_async: bool) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        if is_async {
            self.sender.submit(
                Arc::clone(&self.reply_queue),
                WorkerPayload::Reset { backend },
            );
        } else if let Some(mut guard) = backend.try_lock() {
            guard.suspend();
            guard.resume();
        } else {
            tracing::warn!("plugin busy, reset skipped");
        }
    }

    /// Show or hide the editor window.
    pub fn show_editor(&mut self, show: bool) {
        if let (Some(_), Some(window)) = (&self.backend, &self.window) {
            self.sender.submit(
                Arc::clone(&self.reply_queue),
                WorkerPayload::ShowEditor {
                    window: Arc::clone(window),
                    show,
                },
            );
        }
    }

    /// Set one parameter; `/param` follows on completion.
    pub fn set_param(&mut self, index: i32, value: ParamValue) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let index = match self.check_param_index(index) {
            Some(index) => index,
            None => return,
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::SetParam {
                backend,
                index,
                value,
            },
        );
    }

    /// Bind a parameter to a control bus. Audio-thread only, no worker.
    pub fn map_param(&mut self, index: i32, bus: u32) {
        if !self.check() {
            return;
        }
        if let Some(index) = self.check_param_index(index) {
            self.params.map(index, bus);
        }
    }

    /// Drop a parameter's bus binding.
    pub fn unmap_param(&mut self, index: i32) {
        if !self.check() {
            return;
        }
        if let Some(index) = self.check_param_index(index) {
            self.params.unmap(index);
        }
    }

    /// Emit `/param` for `count` parameters starting at `onset`.
    pub fn query_params(&mut self, onset: i32, count: i32) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let (onset, count) = match self.clamp_range(onset, count, self.num_parameters()) {
            Some(range) => range,
            None => return,
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::ParamQuery {
                backend,
                onset,
                count,
            },
        );
    }

    /// Emit `/set` with one parameter value.
    pub fn get_param(&mut self, index: i32) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let index = match self.check_param_index(index) {
            Some(index) => index,
            None => return,
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::GetParam { backend, index },
        );
    }

    /// Emit `/setn` with a run of parameter values.
    pub fn get_params(&mut self, onset: i32, count: i32) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let (onset, count) = match self.clamp_range(onset, count, self.num_parameters()) {
            Some(range) => range,
            None => return,
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::GetParams {
                backend,
                onset,
                count,
            },
        );
    }

    /// Switch programs; `/program_index` follows.
    pub fn set_program(&mut self, index: i32) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let count = self.num_programs();
        if index < 0 || index as usize >= count {
            tracing::warn!(index, "program number out of range!");
            return;
        }
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::SetProgram {
                backend,
                index: index as usize,
            },
        );
    }

    /// Emit `/program_name` for `count` programs starting at `onset`.
    pub fn query_programs(&mut self, onset: i32, count: i32) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let (onset, count) = match self.clamp_range(onset, count, self.num_programs()) {
            Some(range) => range,
            None => return,
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::ProgramQuery {
                backend,
                onset,
                count,
            },
        );
    }

    /// Rename the current program; `/program_name` follows.
    pub fn set_program_name(&mut self, name: &str) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::SetProgramName {
                backend,
                name: name.to_string(),
            },
        );
    }

    pub fn read_program(&mut self, path: &str) {
        self.preset_file_command(path, false, true);
    }

    pub fn write_program(&mut self, path: &str) {
        self.preset_file_command(path, false, false);
    }

    pub fn read_bank(&mut self, path: &str) {
        self.preset_file_command(path, true, true);
    }

    pub fn write_bank(&mut self, path: &str) {
        self.preset_file_command(path, true, false);
    }

    fn preset_file_command(&mut self, path: &str, bank: bool, read: bool) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let path = PathBuf::from(path);
        let payload = if read {
            WorkerPayload::ReadPresetFile {
                backend,
                path,
                bank,
            }
        } else {
            WorkerPayload::WritePresetFile {
                backend,
                path,
                bank,
            }
        };
        self.sender.submit(Arc::clone(&self.reply_queue), payload);
    }

    /// Accumulate one packet of a streamed preset upload. The first
    /// packet (onset 0) sizes the buffer; the final one hands the whole
    /// image to the worker.
    pub fn send_program_data(&mut self, total: usize, onset: usize, bytes: &[u8], bank: bool) {
        if !self.check() {
            return;
        }
        tracing::debug!(total, onset, size = bytes.len(), "got preset packet");
        if onset == 0 {
            if self.upload.received != 0 {
                tracing::warn!("last preset upload wasn't completed!");
            }
            self.upload.data.clear();
            self.upload.data.resize(total, 0);
            self.upload.total = total;
            self.upload.received = 0;
        } else if onset >= self.upload.total {
            tracing::error!(onset, "bad preset packet onset!");
            return;
        }
        if self.upload.total == 0 {
            return;
        }
        let mut n = bytes.len();
        if n > self.upload.total - onset {
            tracing::error!("preset data exceeding total size!");
            n = self.upload.total - onset;
        }
        self.upload.data[onset..onset + n].copy_from_slice(&bytes[..n]);
        if onset != self.upload.received {
            tracing::warn!("preset packet onset and received bytes out of sync!");
        }
        self.upload.received = onset + n;
        if self.upload.received >= self.upload.total {
            let data = std::mem::take(&mut self.upload.data);
            self.upload.total = 0;
            self.upload.received = 0;
            if let Some(backend) = self.checked_backend() {
                self.sender.submit(
                    Arc::clone(&self.reply_queue),
                    WorkerPayload::SetPresetData {
                        backend,
                        bytes: data,
                        bank,
                    },
                );
            }
        }
    }

    /// Stream the serialized program or bank back as `/program_data` /
    /// `/bank_data` packets of at most `budget` bytes (0 = configured
    /// default).
    pub fn receive_program_data(&mut self, budget: usize, bank: bool) {
        let backend = match self.checked_backend() {
            Some(backend) => backend,
            None => return,
        };
        let budget = if budget == 0 {
            self.config.packet_budget
        } else {
            budget
        };
        self.sender.submit(
            Arc::clone(&self.reply_queue),
            WorkerPayload::GetPresetData {
                backend,
                bank,
                budget,
            },
        );
    }

    /// Send a raw MIDI message to the plugin. RT-safe backend call.
    pub fn send_midi(&mut self, status: u8, data1: u8, data2: u8) {
        self.with_backend_inline(|b| {
            b.send_midi(crate::backend::MidiEvent::new(status, data1, data2));
        });
    }

    /// Send a sysex message to the plugin.
    pub fn send_sysex(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            tracing::warn!("empty sysex message");
            return;
        }
        self.with_backend_inline(|b| {
            b.send_sysex(crate::backend::SysexEvent::new(bytes.to_vec()));
        });
    }

    pub fn set_tempo(&mut self, bpm: f32) {
        self.with_backend_inline(|b| b.set_tempo(bpm as f64));
    }

    pub fn set_time_sig(&mut self, numerator: i32, denominator: i32) {
        self.with_backend_inline(|b| b.set_time_signature(numerator, denominator));
    }

    pub fn set_transport_playing(&mut self, play: bool) {
        self.with_backend_inline(|b| b.set_transport_playing(play));
    }

    pub fn set_transport_pos(&mut self, position: f32) {
        self.with_backend_inline(|b| b.set_transport_position(position as f64));
    }

    /// Emit `/transport` with the current position.
    pub fn get_transport_pos(&mut self) {
        let mut position = None;
        self.with_backend_inline(|b| position = Some(b.transport_position()));
        if let Some(position) = position {
            self.sink.send(Reply::Transport { position });
        }
    }

    /// Forward a capability query; `/can_do` carries the result.
    pub fn can_do(&mut self, what: &str) {
        let mut result = None;
        self.with_backend_inline(|b| result = Some(b.can_do(what)));
        if let Some(result) = result {
            self.sink.send(Reply::CanDo { result });
        }
    }

    /// Forward a vendor-specific call; `/vendor_method` carries the result.
    pub fn vendor_method(&mut self, index: i32, value: isize, data: &[u8], opt: f32) {
        let mut result = None;
        self.with_backend_inline(|b| result = Some(b.vendor_specific(index, value, data, opt)));
        if let Some(result) = result {
            self.sink.send(Reply::VendorMethod {
                result: result as i64,
            });
        }
    }

    // -----------------------------------------------------------------
    // audio thread
    // -----------------------------------------------------------------

    /// Process one block. `controls` carries UGen-style (index, value)
    /// parameter pairs; `buses` reads the engine's control buses for
    /// mapped parameters. Bypass copies inputs through; outlets beyond
    /// what was produced are zeroed.
    pub fn next<B: BusReader + ?Sized>(
        &mut self,
        bypass: bool,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        controls: &[(f32, f32)],
        buses: &B,
        frames: usize,
    ) {
        self.listener.note_audio_thread();
        self.drain_replies();

        // Bypass transitions don't reset the plugin; reset is explicit.
        match self.state {
            HostState::Ready if bypass => self.state = HostState::Bypassed,
            HostState::Bypassed if !bypass => self.state = HostState::Ready,
            _ => {}
        }

        let frames = frames.min(self.config.block_size);
        let produced = if self.state == HostState::Ready && self.single_precision {
            self.process_block(inputs, outputs, controls, buses, frames)
        } else {
            None
        };
        let produced = produced.unwrap_or_else(|| copy_through(inputs, outputs, frames));

        for out in outputs.iter_mut().skip(produced) {
            let n = frames.min(out.len());
            out[..n].fill(0.0);
        }
    }

    fn process_block<B: BusReader + ?Sized>(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        controls: &[(f32, f32)],
        buses: &B,
        frames: usize,
    ) -> Option<usize> {
        let backend = self.backend.as_ref()?;
        // The worker holds the plugin during preset I/O; rather than
        // block the audio thread we bypass for the block.
        let mut guard = backend.try_lock()?;

        let num_params = self.params.len();

        // Parameters bound to control buses: send on change only.
        for (i, slot) in self.params.iter_mut() {
            if let Some(bus) = slot.bus {
                let value = buses.read(bus);
                if slot.last != value {
                    guard.set_parameter(i, value);
                    slot.last = value;
                }
            }
        }

        // UGen-style (index, value) control pairs. Bus mappings win, and
        // NaN (never sent) compares unequal so the first write goes out.
        for &(index, value) in controls {
            let index = index as i32;
            if index >= 0 && (index as usize) < num_params {
                if let Some(slot) = self.params.get_mut(index as usize) {
                    if slot.bus.is_none() && slot.last != value {
                        guard.set_parameter(index as usize, value);
                        slot.last = value;
                    }
                }
            }
        }

        // Bridge engine channels through the plugin-sized scratch.
        for (ch, buf) in self.scratch_in.iter_mut().enumerate() {
            match inputs.get(ch) {
                Some(input) => {
                    let n = frames.min(input.len()).min(buf.len());
                    let end = frames.min(buf.len());
                    buf[..n].copy_from_slice(&input[..n]);
                    buf[n..end].fill(0.0);
                }
                None => {
                    let end = frames.min(buf.len());
                    buf[..end].fill(0.0)
                }
            }
        }
        guard.process(&self.scratch_in, &mut self.scratch_out, frames);
        drop(guard);

        let produced = self.scratch_out.len().min(outputs.len());
        for ch in 0..produced {
            let out = &mut outputs[ch];
            let n = frames.min(out.len()).min(self.scratch_out[ch].len());
            out[..n].copy_from_slice(&self.scratch_out[ch][..n]);
        }

        // Events the backend posted during process (audio thread), then
        // GUI-thread events if an editor exists. A contended inbox lock
        // just defers delivery to a later tick.
        while let Some(event) = self.listener.pop_rt_event() {
            self.emit_event(event);
        }
        if self.window.is_some() {
            if let Some(events) = self.inbox.try_drain() {
                for event in events {
                    self.emit_event(event);
                }
            }
        }

        Some(produced)
    }

    // -----------------------------------------------------------------
    // reply application (the audio-side stage of every command)
    // -----------------------------------------------------------------

    fn drain_replies(&mut self) {
        while let Some(reply) = self.reply_queue.pop() {
            self.apply_reply(reply);
        }
    }

    fn apply_reply(&mut self, reply: CommandReply) {
        match reply {
            CommandReply::Opened { plugin: Some(plugin) } => {
                let plugin = *plugin;
                self.single_precision = plugin.info.flags.single_precision;
                self.params.reset(plugin.info.num_parameters);
                self.scratch_in = vec![vec![0.0; self.config.block_size]; plugin.info.num_inputs];
                self.scratch_out =
                    vec![vec![0.0; self.config.block_size]; plugin.info.num_outputs];
                let has_editor = plugin.window.is_some();
                self.backend = Some(plugin.backend);
                self.window = plugin.window;
                self.gui_thread = plugin.gui_thread;
                tracing::debug!("loaded {}", plugin.info.name);
                self.info = Some(plugin.info);
                self.state = HostState::Ready;
                self.sink.send(Reply::Open {
                    ok: true,
                    has_editor,
                });
            }
            CommandReply::Opened { plugin: None } => {
                self.state = HostState::Empty;
                self.sink.send(Reply::Open {
                    ok: false,
                    has_editor: false,
                });
            }
            CommandReply::Closed => {
                if self.state == HostState::Closing {
                    self.state = HostState::Empty;
                }
            }
            CommandReply::ParamSet {
                index,
                value,
                display,
            } => {
                self.params.note_sent(index, value);
                self.sink.send(Reply::Param {
                    index: index as i32,
                    value,
                    display,
                });
            }
            CommandReply::QueriedParams { onset, entries } => {
                for (k, (value, display)) in entries.into_iter().enumerate() {
                    self.sink.send(Reply::Param {
                        index: (onset + k) as i32,
                        value,
                        display,
                    });
                }
            }
            CommandReply::GotParam { value } => {
                self.sink.send(Reply::Set { value });
            }
            CommandReply::GotParams { values } => {
                self.sink.send(Reply::SetN { values });
            }
            CommandReply::ProgramIndex { index } => {
                self.sink.send(Reply::ProgramIndex {
                    index: index as i32,
                });
            }
            CommandReply::ProgramName { index, name } => {
                self.sink.send(Reply::ProgramName {
                    index: index as i32,
                    name,
                });
            }
            CommandReply::PresetRead { ok, bank } => {
                self.sink.send(if bank {
                    Reply::BankRead { ok }
                } else {
                    Reply::ProgramRead { ok }
                });
            }
            CommandReply::PresetWritten { ok, bank } => {
                self.sink.send(if bank {
                    Reply::BankWrite { ok }
                } else {
                    Reply::ProgramWrite { ok }
                });
            }
            CommandReply::DataPacket {
                bank,
                total,
                onset,
                bytes,
            } => {
                self.sink.send(if bank {
                    Reply::BankData {
                        total,
                        onset,
                        bytes,
                    }
                } else {
                    Reply::ProgramData {
                        total,
                        onset,
                        bytes,
                    }
                });
            }
            CommandReply::Automated { index, value } => {
                self.emit_event(InboxEvent::ParamAutomated { index, value });
            }
        }
    }

    fn emit_event(&self, event: InboxEvent) {
        match event {
            InboxEvent::ParamAutomated { index, value } => {
                let display = self.try_display(index);
                self.sink.send(Reply::Param {
                    index,
                    value,
                    display,
                });
                self.sink.send(Reply::Auto { index, value });
            }
            InboxEvent::Midi { data, .. } => {
                self.sink.send(Reply::Midi {
                    status: data[0],
                    data1: data[1],
                    data2: data[2],
                });
            }
            InboxEvent::Sysex { data, .. } => {
                self.sink.send(Reply::Sysex { bytes: data });
            }
        }
    }

    /// Best-effort display string; contended lock degrades to empty.
    fn try_display(&self, index: i32) -> String {
        if index < 0 {
            return String::new();
        }
        self.backend
            .as_ref()
            .and_then(|b| b.try_lock())
            .map(|guard| guard.parameter_display(index as usize))
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------

    fn check(&self) -> bool {
        if self.backend.is_some() {
            true
        } else {
            tracing::warn!("no plugin loaded!");
            false
        }
    }

    fn checked_backend(&self) -> Option<SharedBackend> {
        match &self.backend {
            Some(backend) => Some(Arc::clone(backend)),
            None => {
                tracing::warn!("no plugin loaded!");
                None
            }
        }
    }

    fn with_backend_inline(&self, f: impl FnOnce(&mut dyn crate::backend::PluginBackend)) {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                tracing::warn!("no plugin loaded!");
                return;
            }
        };
        match backend.try_lock() {
            Some(mut guard) => f(&mut **guard),
            None => tracing::debug!("plugin busy, inline call skipped"),
        }
    }

    fn num_parameters(&self) -> usize {
        self.info.as_ref().map_or(0, |i| i.num_parameters)
    }

    fn num_programs(&self) -> usize {
        self.info.as_ref().map_or(0, |i| i.num_programs)
    }

    fn check_param_index(&self, index: i32) -> Option<usize> {
        let count = self.num_parameters();
        if index >= 0 && (index as usize) < count {
            Some(index as usize)
        } else {
            tracing::warn!(index, "parameter index out of range!");
            None
        }
    }

    fn clamp_range(&self, onset: i32, count: i32, limit: usize) -> Option<(usize, usize)> {
        if onset < 0 || onset as usize >= limit {
            tracing::warn!(onset, "index out of range!");
            return None;
        }
        let onset = onset as usize;
        let count = (count.max(0) as usize).min(limit - onset);
        Some((onset, count))
    }

    fn scratch_hint_inputs(&self) -> usize {
        // Engine channel counts are only known at tick time; the
        // configured block layout assumes stereo unless told otherwise.
        2
    }

    fn scratch_hint_outputs(&self) -> usize {
        2
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.close();
    }
}

fn copy_through(inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) -> usize {
    let n = inputs.len().min(outputs.len());
    for ch in 0..n {
        let m = frames.min(inputs[ch].len()).min(outputs[ch].len());
        outputs[ch][..m].copy_from_slice(&inputs[ch][..m]);
    }
    n
}
