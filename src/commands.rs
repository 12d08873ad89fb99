//! Async command queue between the audio thread and the worker thread.
//!
//! The audio thread submits [`WorkerCommand`]s through a lock-free
//! queue; a single named worker thread executes them in submission
//! order and posts [`CommandReply`]s back to the submitting host's own
//! reply queue. The host applies replies at the top of its next audio
//! tick, which is what gives every command its two-stage
//! worker-then-audio shape: the audio-side stage of a command is always
//! observed strictly after its worker-side stage completed.
//!
//! Ownership moves with the commands: `Close` carries the plugin
//! handle, editor window and GUI join handle out of the host, so a
//! pending Open-then-Close pair is safe regardless of timing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use crate::backend::SharedBackend;
use crate::config::GuiMode;
use crate::dispatch::ParamValue;
use crate::info::PluginInfo;
use crate::listener::ListenerHandle;
use crate::window::{open_on_gui_thread, BackendFactory, Window, WindowFactory};

const COMMAND_QUEUE_SIZE: usize = 128;
const REPLY_PUSH_RETRIES: usize = 1000;

pub(crate) type ReplyQueue = Arc<ArrayQueue<CommandReply>>;

/// Everything Open needs to build and configure a plugin.
pub(crate) struct OpenRequest {
    pub path: PathBuf,
    pub with_editor: bool,
    pub factory: BackendFactory,
    pub windows: Option<Arc<dyn WindowFactory>>,
    pub gui_mode: GuiMode,
    pub sample_rate: f32,
    pub block_size: usize,
    pub engine_inputs: usize,
    pub engine_outputs: usize,
    pub listener: ListenerHandle,
}

/// Worker-side command payloads.
pub(crate) enum WorkerPayload {
    Open(Box<OpenRequest>),
    Close {
        backend: Option<SharedBackend>,
        window: Option<Arc<dyn Window>>,
        gui_thread: Option<JoinHandle<()>>,
    },
    ShowEditor {
        window: Arc<dyn Window>,
        show: bool,
    },
    Reset {
        backend: SharedBackend,
    },
    SetParam {
        backend: SharedBackend,
        index: usize,
        value: ParamValue,
    },
    ParamQuery {
        backend: SharedBackend,
        onset: usize,
        count: usize,
    },
    GetParam {
        backend: SharedBackend,
        index: usize,
    },
    GetParams {
        backend: SharedBackend,
        onset: usize,
        count: usize,
    },
    SetProgram {
        backend: SharedBackend,
        index: usize,
    },
    ProgramQuery {
        backend: SharedBackend,
        onset: usize,
        count: usize,
    },
    SetProgramName {
        backend: SharedBackend,
        name: String,
    },
    ReadPresetFile {
        backend: SharedBackend,
        path: PathBuf,
        bank: bool,
    },
    WritePresetFile {
        backend: SharedBackend,
        path: PathBuf,
        bank: bool,
    },
    SetPresetData {
        backend: SharedBackend,
        bytes: Vec<u8>,
        bank: bool,
    },
    GetPresetData {
        backend: SharedBackend,
        bank: bool,
        budget: usize,
    },
    Shutdown,
}

pub(crate) struct WorkerCommand {
    pub reply_to: ReplyQueue,
    pub payload: WorkerPayload,
}

/// A plugin handed back from a successful Open.
pub(crate) struct OpenedPlugin {
    pub backend: SharedBackend,
    pub window: Option<Arc<dyn Window>>,
    pub gui_thread: Option<JoinHandle<()>>,
    pub info: PluginInfo,
}

/// Audio-side stage of a command: applied by the host on its next tick.
pub(crate) enum CommandReply {
    Opened { plugin: Option<Box<OpenedPlugin>> },
    Closed,
    ParamSet { index: usize, value: f32, display: String },
    QueriedParams { onset: usize, entries: Vec<(f32, String)> },
    GotParam { value: f32 },
    GotParams { values: Vec<f32> },
    ProgramIndex { index: usize },
    ProgramName { index: usize, name: String },
    PresetRead { ok: bool, bank: bool },
    PresetWritten { ok: bool, bank: bool },
    DataPacket { bank: bool, total: usize, onset: usize, bytes: Vec<u8> },
    Automated { index: i32, value: f32 },
}

/// Push with bounded retry; the worker may block, the audio thread
/// drains, so transient fullness resolves within a few ticks.
pub(crate) fn push_reply(queue: &ReplyQueue, reply: CommandReply) {
    let mut reply = reply;
    for _ in 0..REPLY_PUSH_RETRIES {
        match queue.push(reply) {
            Ok(()) => return,
            Err(back) => reply = back,
        }
        thread::sleep(Duration::from_millis(1));
    }
    tracing::warn!("reply queue full for too long, reply dropped");
}

/// Submission side of the per-engine command queue; cheap to clone.
#[derive(Clone)]
pub struct CommandSender {
    queue: Arc<ArrayQueue<WorkerCommand>>,
}

impl CommandSender {
    pub(crate) fn submit(&self, reply_to: ReplyQueue, payload: WorkerPayload) -> bool {
        let ok = self
            .queue
            .push(WorkerCommand { reply_to, payload })
            .is_ok();
        if !ok {
            tracing::warn!("worker command queue full, command dropped");
        }
        ok
    }
}

/// One worker thread per engine, consuming commands in FIFO order.
pub struct WorkerEngine {
    queue: Arc<ArrayQueue<WorkerCommand>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerEngine {
    pub fn spawn() -> Self {
        let queue = Arc::new(ArrayQueue::new(COMMAND_QUEUE_SIZE));
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("plugin-worker".to_string())
                .spawn(move || Self::run_loop(&queue, &running))
                .expect("failed to spawn plugin worker thread")
        };

        Self {
            queue,
            running,
            thread: Some(thread),
        }
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            queue: Arc::clone(&self.queue),
        }
    }

    fn run_loop(queue: &ArrayQueue<WorkerCommand>, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            match queue.pop() {
                Some(cmd) => {
                    if exec(cmd) {
                        break;
                    }
                }
                None => thread::sleep(Duration::from_micros(100)),
            }
        }
        // Drain what's left so moved resources (plugin handles, GUI
        // threads) are torn down rather than leaked.
        while let Some(cmd) = queue.pop() {
            if let WorkerPayload::Close {
                backend,
                window,
                gui_thread,
            } = cmd.payload
            {
                exec_close(&cmd.reply_to, backend, window, gui_thread);
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.queue.push(WorkerCommand {
            reply_to: Arc::new(ArrayQueue::new(1)),
            payload: WorkerPayload::Shutdown,
        });
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Execute one command. Returns true on Shutdown.
fn exec(cmd: WorkerCommand) -> bool {
    let reply_to = cmd.reply_to;
    match cmd.payload {
        WorkerPayload::Open(request) => exec_open(&reply_to, *request),
        WorkerPayload::Close {
            backend,
            window,
            gui_thread,
        } => exec_close(&reply_to, backend, window, gui_thread),
        WorkerPayload::ShowEditor { window, show } => {
            if show {
                window.bring_to_top();
            } else {
                window.hide();
            }
        }
        WorkerPayload::Reset { backend } => {
            let mut b = backend.lock();
            b.suspend();
            b.resume();
        }
        WorkerPayload::SetParam {
            backend,
            index,
            value,
        } => {
            let mut b = backend.lock();
            let ok = match &value {
                ParamValue::Float(v) => {
                    b.set_parameter(index, *v);
                    true
                }
                ParamValue::Text(text) => b.set_parameter_text(index, text),
            };
            if !ok {
                tracing::warn!(index, "backend rejected parameter string");
            }
            let value = b.parameter(index);
            let display = b.parameter_display(index);
            push_reply(
                &reply_to,
                CommandReply::ParamSet {
                    index,
                    value,
                    display,
                },
            );
        }
        WorkerPayload::ParamQuery {
            backend,
            onset,
            count,
        } => {
            let b = backend.lock();
            let entries = (onset..onset + count)
                .map(|i| (b.parameter(i), b.parameter_display(i)))
                .collect();
            push_reply(&reply_to, CommandReply::QueriedParams { onset, entries });
        }
        WorkerPayload::GetParam { backend, index } => {
            let value = backend.lock().parameter(index);
            push_reply(&reply_to, CommandReply::GotParam { value });
        }
        WorkerPayload::GetParams {
            backend,
            onset,
            count,
        } => {
            let b = backend.lock();
            let values = (onset..onset + count).map(|i| b.parameter(i)).collect();
            push_reply(&reply_to, CommandReply::GotParams { values });
        }
        WorkerPayload::SetProgram { backend, index } => {
            let mut b = backend.lock();
            b.set_program(index);
            let current = b.program();
            push_reply(&reply_to, CommandReply::ProgramIndex { index: current });
            push_reply(
                &reply_to,
                CommandReply::ProgramName {
                    index: current,
                    name: b.program_name(),
                },
            );
        }
        WorkerPayload::ProgramQuery {
            backend,
            onset,
            count,
        } => {
            let b = backend.lock();
            for i in onset..onset + count {
                push_reply(
                    &reply_to,
                    CommandReply::ProgramName {
                        index: i,
                        name: b.program_name_indexed(i),
                    },
                );
            }
        }
        WorkerPayload::SetProgramName { backend, name } => {
            let mut b = backend.lock();
            b.set_program_name(&name);
            push_reply(
                &reply_to,
                CommandReply::ProgramName {
                    index: b.program(),
                    name: b.program_name(),
                },
            );
        }
        WorkerPayload::ReadPresetFile {
            backend,
            path,
            bank,
        } => {
            let mut b = backend.lock();
            let result = if bank {
                b.read_bank_file(&path)
            } else {
                b.read_program_file(&path)
            };
            let ok = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("couldn't read preset file {}: {}", path.display(), e);
                    false
                }
            };
            push_reply(&reply_to, CommandReply::PresetRead { ok, bank });
            if ok {
                send_post_load_info(&reply_to, &**b, bank);
            }
        }
        WorkerPayload::WritePresetFile {
            backend,
            path,
            bank,
        } => {
            let mut b = backend.lock();
            let result = if bank {
                b.write_bank_file(&path)
            } else {
                b.write_program_file(&path)
            };
            let ok = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("couldn't write preset file {}: {}", path.display(), e);
                    false
                }
            };
            push_reply(&reply_to, CommandReply::PresetWritten { ok, bank });
        }
        WorkerPayload::SetPresetData {
            backend,
            bytes,
            bank,
        } => {
            let mut b = backend.lock();
            let result = if bank {
                b.read_bank_data(&bytes)
            } else {
                b.read_program_data(&bytes)
            };
            let ok = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("preset data rejected: {}", e);
                    false
                }
            };
            push_reply(&reply_to, CommandReply::PresetRead { ok, bank });
            if ok {
                send_post_load_info(&reply_to, &**b, bank);
            }
        }
        WorkerPayload::GetPresetData {
            backend,
            bank,
            budget,
        } => {
            let mut b = backend.lock();
            let result = if bank {
                b.write_bank_data()
            } else {
                b.write_program_data()
            };
            match result {
                Ok(bytes) => {
                    let total = bytes.len();
                    let budget = budget.max(1);
                    let mut onset = 0;
                    while onset < total {
                        let n = budget.min(total - onset);
                        push_reply(
                            &reply_to,
                            CommandReply::DataPacket {
                                bank,
                                total,
                                onset,
                                bytes: bytes[onset..onset + n].to_vec(),
                            },
                        );
                        onset += n;
                    }
                }
                Err(e) => {
                    tracing::warn!("couldn't serialize preset data: {}", e);
                }
            }
        }
        WorkerPayload::Shutdown => return true,
    }
    false
}

/// After a program or bank loads, the engine wants to know where the
/// plugin ended up: current program name for programs, current program
/// index for banks.
fn send_post_load_info(reply_to: &ReplyQueue, b: &dyn crate::backend::PluginBackend, bank: bool) {
    if bank {
        push_reply(
            reply_to,
            CommandReply::ProgramIndex {
                index: b.program(),
            },
        );
    } else {
        push_reply(
            reply_to,
            CommandReply::ProgramName {
                index: b.program(),
                name: b.program_name(),
            },
        );
    }
}

fn exec_open(reply_to: &ReplyQueue, request: OpenRequest) {
    request.listener.note_worker_thread();

    let (backend, window, gui_thread) = if request.with_editor
        && request.gui_mode == GuiMode::Dedicated
    {
        let (result, thread) = open_on_gui_thread(
            Arc::clone(&request.factory),
            request.path.clone(),
            request.windows.clone(),
        );
        match result {
            Ok(opened) => {
                if opened.window.is_some() {
                    (opened.backend, opened.window, Some(thread))
                } else {
                    // No editor window means no message loop: the GUI
                    // thread already returned.
                    let _ = thread.join();
                    (opened.backend, None, None)
                }
            }
            Err(e) => {
                let _ = thread.join();
                tracing::warn!("couldn't load {}: {}", request.path.display(), e);
                push_reply(reply_to, CommandReply::Opened { plugin: None });
                return;
            }
        }
    } else {
        let backend = match (request.factory)(&request.path) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!("couldn't load {}: {}", request.path.display(), e);
                push_reply(reply_to, CommandReply::Opened { plugin: None });
                return;
            }
        };
        let shared: SharedBackend = Arc::new(Mutex::new(backend));
        let window = if request.with_editor {
            open_inline_editor(&shared, request.windows.as_deref())
        } else {
            None
        };
        (shared, window, None)
    };

    let info = {
        let mut b = backend.lock();
        b.suspend();
        b.set_sample_rate(request.sample_rate);
        b.set_block_size(request.block_size);
        if b.has_precision(crate::backend::ProcessPrecision::Single) {
            b.set_precision(crate::backend::ProcessPrecision::Single);
        } else {
            tracing::warn!(
                "plugin '{}' doesn't support single precision processing - bypassing",
                b.info().name
            );
        }
        let inputs = b.info().num_inputs.min(request.engine_inputs);
        let outputs = b.info().num_outputs.min(request.engine_outputs);
        b.set_num_speakers(inputs, outputs);
        b.resume();
        b.set_listener(Arc::clone(&request.listener));
        b.info().clone()
    };

    tracing::debug!("loaded {}", request.path.display());
    push_reply(
        reply_to,
        CommandReply::Opened {
            plugin: Some(Box::new(OpenedPlugin {
                backend,
                window,
                gui_thread,
                info,
            })),
        },
    );
}

fn open_inline_editor(
    backend: &SharedBackend,
    windows: Option<&dyn WindowFactory>,
) -> Option<Arc<dyn Window>> {
    let mut b = backend.lock();
    if !b.has_editor() {
        return None;
    }
    let windows = windows?;
    let window = match windows.create(&b.info().name) {
        Ok(window) => window,
        Err(e) => {
            tracing::warn!("couldn't create editor window: {}", e);
            return None;
        }
    };
    window.set_title(&b.info().name);
    if let Some((left, top, right, bottom)) = b.editor_rect() {
        window.set_geometry(left, top, right, bottom);
    }
    if let Err(e) = b.open_editor(window.handle()) {
        tracing::warn!("couldn't open plugin editor: {}", e);
        return None;
    }
    Some(window)
}

fn exec_close(
    reply_to: &ReplyQueue,
    backend: Option<SharedBackend>,
    window: Option<Arc<dyn Window>>,
    gui_thread: Option<JoinHandle<()>>,
) {
    match (window, gui_thread) {
        (Some(window), Some(gui_thread)) => {
            // The GUI thread owns editor teardown and, holding the last
            // backend reference, releases the plugin on the thread that
            // created it. Drop ours first.
            drop(backend);
            window.quit();
            if gui_thread.join().is_ok() {
                tracing::debug!("gui thread joined");
            }
            drop(window);
        }
        (window, _) => {
            if let Some(backend) = backend {
                if window.is_some() {
                    backend.lock().close_editor();
                }
                drop(backend);
            }
            drop(window);
        }
    }
    tracing::debug!("plugin closed");
    push_reply(reply_to, CommandReply::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_queue_capacity() {
        let queue = ArrayQueue::<WorkerCommand>::new(COMMAND_QUEUE_SIZE);
        let reply_to: ReplyQueue = Arc::new(ArrayQueue::new(4));

        for _ in 0..COMMAND_QUEUE_SIZE {
            assert!(queue
                .push(WorkerCommand {
                    reply_to: Arc::clone(&reply_to),
                    payload: WorkerPayload::Shutdown,
                })
                .is_ok());
        }
        assert!(queue
            .push(WorkerCommand {
                reply_to,
                payload: WorkerPayload::Shutdown,
            })
            .is_err());
    }

    #[test]
    fn test_engine_spawn_and_shutdown() {
        let mut engine = WorkerEngine::spawn();
        engine.shutdown();
        // Second shutdown is a no-op.
        engine.shutdown();
    }

    #[test]
    fn test_push_reply_gives_up_eventually() {
        // A 1-slot queue that nobody drains: push_reply must not hang.
        let queue: ReplyQueue = Arc::new(ArrayQueue::new(1));
        push_reply(&queue, CommandReply::Closed);
        let start = std::time::Instant::now();
        push_reply(&queue, CommandReply::Closed);
        assert!(start.elapsed() >= Duration::from_millis(REPLY_PUSH_RETRIES as u64 / 2));
    }

    #[test]
    fn test_open_failure_replies_none() {
        let reply_to: ReplyQueue = Arc::new(ArrayQueue::new(4));
        let listener = Arc::new(crate::listener::ListenerHub::new(
            Arc::clone(&reply_to),
            Arc::new(crate::events::EventInbox::new()),
        ));
        let factory: BackendFactory = Arc::new(|path: &std::path::Path| {
            Err(crate::error::HostError::LoadFailed {
                path: path.to_path_buf(),
                stage: crate::error::LoadStage::Opening,
                reason: "missing".to_string(),
            })
        });
        exec_open(
            &reply_to,
            OpenRequest {
                path: PathBuf::from("/missing.so"),
                with_editor: false,
                factory,
                windows: None,
                gui_mode: GuiMode::Dedicated,
                sample_rate: 44100.0,
                block_size: 64,
                engine_inputs: 2,
                engine_outputs: 2,
                listener,
            },
        );
        match reply_to.pop() {
            Some(CommandReply::Opened { plugin }) => assert!(plugin.is_none()),
            _ => panic!("expected an Opened reply"),
        }
    }
}
