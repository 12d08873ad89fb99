//! V2 backend adapter.
//!
//! Wraps a V2 plugin loaded through the `vst` crate behind the
//! [`PluginBackend`](crate::backend::PluginBackend) capability set. The
//! host-callback side (parameter automation, time info, MIDI output)
//! routes through the instance's listener hub. Compiled behind the
//! `vst2` feature; the FXP/FXB codec in [`fxp`] is always available.

pub mod fxp;

#[cfg(feature = "vst2")]
pub use adapter::Vst2Backend;

#[cfg(feature = "vst2")]
mod adapter {
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use arc_swap::ArcSwapOption;
    use vst::host::{Host, PluginInstance, PluginLoader};
    use vst::plugin::Plugin as VstPlugin;

    use crate::backend::{MidiEvent, PluginBackend, ProcessPrecision, SysexEvent};
    use crate::error::{HostError, LoadStage, Result};
    use crate::info::{ParamInfo, PluginFlags, PluginInfo, UniqueId};
    use crate::listener::{ListenerHandle, ListenerHub};
    use crate::transport::{TransportCell, TransportState};
    use crate::window::RawWindowHandle;

    /// State shared between the backend and its host-callback proxy.
    struct ProxyState {
        listener: ArcSwapOption<ListenerHub>,
        transport: TransportCell,
        /// f64 bits; written on the audio thread, read in callbacks.
        sample_rate: AtomicU64,
    }

    impl ProxyState {
        fn sample_rate(&self) -> f64 {
            f64::from_bits(self.sample_rate.load(Ordering::Relaxed))
        }
    }

    /// What the plugin sees as its host. Callbacks arrive on whatever
    /// thread the plugin chooses; routing is the listener hub's job.
    struct HostProxy {
        state: Arc<ProxyState>,
    }

    impl Host for HostProxy {
        fn automate(&self, index: i32, value: f32) {
            if let Some(listener) = self.state.listener.load_full() {
                listener.parameter_automated(index, value);
            }
        }

        fn get_plugin_id(&self) -> i32 {
            0x706C6768 // 'plgh'
        }

        fn idle(&self) {}

        fn get_time_info(&self, _mask: i32) -> Option<vst::api::TimeInfo> {
            Some(build_time_info(
                &self.state.transport.get(),
                self.state.sample_rate(),
            ))
        }

        fn process_events(&self, events: &vst::api::Events) {
            let listener = match self.state.listener.load_full() {
                Some(listener) => listener,
                None => return,
            };
            let count = events.num_events.max(0) as usize;
            // The events array is variable-length in the ABI; the fixed
            // [2] in the struct is just its prefix.
            let ptrs =
                unsafe { std::slice::from_raw_parts(events.events.as_ptr(), count) };
            for &ptr in ptrs {
                if ptr.is_null() {
                    continue;
                }
                unsafe {
                    match (*ptr).event_type {
                        vst::api::EventType::Midi => {
                            let event = &*(ptr as *const vst::api::MidiEvent);
                            listener.midi_event(MidiEvent {
                                data: event.midi_data,
                                delta: event.delta_frames,
                            });
                        }
                        vst::api::EventType::SysEx => {
                            let event = &*(ptr as *const vst::api::SysExEvent);
                            if !event.system_data.is_null() && event.data_size > 0 {
                                let data = std::slice::from_raw_parts(
                                    event.system_data,
                                    event.data_size as usize,
                                )
                                .to_vec();
                                listener.sysex_event(SysexEvent {
                                    data,
                                    delta: event.delta_frames,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn build_time_info(t: &TransportState, sample_rate: f64) -> vst::api::TimeInfo {
        let mut flags = 0i32;
        flags |= 1 << 0; // transport changed
        flags |= 1 << 9; // tempo valid
        flags |= 1 << 10; // time signature valid
        flags |= 1 << 11; // ppq position valid
        if t.playing {
            flags |= 1 << 1; // transport playing
        }
        vst::api::TimeInfo {
            sample_rate,
            sample_pos: t.sample_position as f64,
            ppq_pos: t.position_beats,
            tempo: t.tempo_bpm,
            time_sig_numerator: t.time_sig_numerator,
            time_sig_denominator: t.time_sig_denominator,
            flags,
            ..Default::default()
        }
    }

    pub struct Vst2Backend {
        instance: PluginInstance,
        params: Arc<dyn vst::plugin::PluginParameters>,
        state: Arc<ProxyState>,
        info: PluginInfo,
        editor_rect: Option<(i32, i32, i32, i32)>,
        // Pointer arrays reused across process calls.
        in_ptrs: Vec<*const f32>,
        out_ptrs: Vec<*mut f32>,
        // Keeps the host proxy and the shared library mapped for the
        // lifetime of the instance; dropped last.
        _host: Arc<StdMutex<HostProxy>>,
        _loader: PluginLoader<HostProxy>,
    }

    // The raw instance follows the host's ownership protocol: exactly
    // one thread touches it at a time, moves happen through commands.
    unsafe impl Send for Vst2Backend {}

    impl Vst2Backend {
        pub fn load(path: &Path) -> Result<Self> {
            let state = Arc::new(ProxyState {
                listener: ArcSwapOption::from(None),
                transport: TransportCell::default(),
                sample_rate: AtomicU64::new(44100.0f64.to_bits()),
            });
            let host = Arc::new(StdMutex::new(HostProxy {
                state: Arc::clone(&state),
            }));

            let mut loader =
                PluginLoader::load(path, Arc::clone(&host)).map_err(|e| HostError::LoadFailed {
                    path: path.to_path_buf(),
                    stage: LoadStage::Opening,
                    reason: format!("{:?}", e),
                })?;

            let mut instance = loader.instance().map_err(|e| HostError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Instantiation,
                reason: format!("{:?}", e),
            })?;

            instance.init();
            let vst_info = instance.get_info();
            let params = instance.get_parameter_object();
            let has_editor = instance.get_editor().is_some();
            let editor_rect = instance.get_editor().map(|editor| {
                let (width, height) = editor.size();
                let (left, top) = editor.position();
                (left, top, left + width, top + height)
            });

            let parameters: Vec<ParamInfo> = (0..vst_info.parameters)
                .map(|i| {
                    ParamInfo::new(
                        params.get_parameter_name(i),
                        params.get_parameter_label(i),
                    )
                })
                .collect();
            let programs: Vec<String> = (0..vst_info.presets)
                .map(|i| params.get_preset_name(i))
                .collect();

            let is_synth = matches!(
                vst_info.category,
                vst::plugin::Category::Synth | vst::plugin::Category::Generator
            );
            let flags = PluginFlags {
                has_editor,
                is_synth,
                single_precision: true,
                double_precision: vst_info.f64_precision,
                midi_input: vst_info.midi_inputs > 0,
                midi_output: vst_info.midi_outputs > 0,
                sysex_input: vst_info.midi_inputs > 0,
                sysex_output: vst_info.midi_outputs > 0,
                has_chunk_data: vst_info.preset_chunks,
            };

            let info = PluginInfo::new(vst_info.name.clone(), crate::backend::BackendKind::V2)
                .path(path.display().to_string())
                .vendor(vst_info.vendor.clone())
                .version(format!("{}", vst_info.version))
                .version_num(vst_info.version)
                .category(if is_synth { "Synth" } else { "Effect" })
                .unique_id(UniqueId::V2(vst_info.unique_id))
                .audio_io(vst_info.inputs.max(0) as usize, vst_info.outputs.max(0) as usize)
                .parameters(parameters)
                .programs(programs)
                .flags(flags);

            Ok(Self {
                instance,
                params,
                state,
                info,
                editor_rect,
                in_ptrs: Vec::new(),
                out_ptrs: Vec::new(),
                _host: host,
                _loader: loader,
            })
        }

        fn send_api_events(&mut self, api_events: Vec<vst::api::MidiEvent>) {
            use vst::api;
            if api_events.is_empty() {
                return;
            }
            let num_events = api_events.len() as i32;
            let boxed: Vec<Box<api::MidiEvent>> = api_events.into_iter().map(Box::new).collect();
            let ptrs: Vec<*mut api::Event> = boxed
                .iter()
                .map(|e| e.as_ref() as *const api::MidiEvent as *mut api::Event)
                .collect();

            if num_events <= 2 {
                let mut events = api::Events {
                    num_events,
                    _reserved: 0,
                    events: [std::ptr::null_mut(); 2],
                };
                for (slot, ptr) in events.events.iter_mut().zip(ptrs.iter()) {
                    *slot = *ptr;
                }
                self.instance.process_events(&events);
            } else {
                // More than two events needs the variable-length layout.
                #[repr(C)]
                struct LargeEvents {
                    num_events: i32,
                    _reserved: isize,
                    events: Vec<*mut api::Event>,
                }
                let large = LargeEvents {
                    num_events,
                    _reserved: 0,
                    events: ptrs,
                };
                let events_ptr = &large as *const LargeEvents as *const api::Events;
                unsafe {
                    self.instance.process_events(&*events_ptr);
                }
            }
            drop(boxed);
        }
    }

    impl PluginBackend for Vst2Backend {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        fn set_sample_rate(&mut self, rate: f32) {
            self.state
                .sample_rate
                .store((rate as f64).to_bits(), Ordering::Relaxed);
            self.instance.set_sample_rate(rate);
        }

        fn set_block_size(&mut self, frames: usize) {
            self.instance.set_block_size(frames as i64);
        }

        fn has_precision(&self, precision: ProcessPrecision) -> bool {
            match precision {
                ProcessPrecision::Single => true,
                ProcessPrecision::Double => self.info.flags.double_precision,
            }
        }

        fn set_precision(&mut self, _precision: ProcessPrecision) {
            // V2 precision is chosen by which process call the host uses.
        }

        fn set_num_speakers(&mut self, _inputs: usize, _outputs: usize) {
            // Speaker arrangements aren't exposed by the `vst` crate;
            // plugins process their declared channel counts.
        }

        fn suspend(&mut self) {
            self.instance.suspend();
        }

        fn resume(&mut self) {
            self.instance.resume();
        }

        fn process(&mut self, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>], frames: usize) {
            if frames == 0 {
                return;
            }
            self.state
                .transport
                .update(|t| t.advanced(frames, self.state.sample_rate()));

            self.in_ptrs.clear();
            self.in_ptrs.extend(inputs.iter().map(|ch| ch.as_ptr()));
            self.out_ptrs.clear();
            self.out_ptrs
                .extend(outputs.iter_mut().map(|ch| ch.as_mut_ptr()));

            let mut buffer = unsafe {
                vst::buffer::AudioBuffer::from_raw(
                    self.in_ptrs.len(),
                    self.out_ptrs.len(),
                    self.in_ptrs.as_ptr(),
                    self.out_ptrs.as_mut_ptr(),
                    frames,
                )
            };
            self.instance.process(&mut buffer);
        }

        fn process_double(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>], frames: usize) {
            if frames == 0 {
                return;
            }
            self.state
                .transport
                .update(|t| t.advanced(frames, self.state.sample_rate()));

            let in_ptrs: Vec<*const f64> = inputs.iter().map(|ch| ch.as_ptr()).collect();
            let mut out_ptrs: Vec<*mut f64> =
                outputs.iter_mut().map(|ch| ch.as_mut_ptr()).collect();
            let mut buffer = unsafe {
                vst::buffer::AudioBuffer::from_raw(
                    in_ptrs.len(),
                    out_ptrs.len(),
                    in_ptrs.as_ptr(),
                    out_ptrs.as_mut_ptr(),
                    frames,
                )
            };
            self.instance.process_f64(&mut buffer);
        }

        fn set_parameter(&mut self, index: usize, value: f32) {
            self.params.set_parameter(index as i32, value);
        }

        fn set_parameter_text(&mut self, index: usize, text: &str) -> bool {
            self.params
                .string_to_parameter(index as i32, text.to_string())
        }

        fn parameter(&self, index: usize) -> f32 {
            self.params.get_parameter(index as i32)
        }

        fn parameter_name(&self, index: usize) -> String {
            self.params.get_parameter_name(index as i32)
        }

        fn parameter_label(&self, index: usize) -> String {
            self.params.get_parameter_label(index as i32)
        }

        fn parameter_display(&self, index: usize) -> String {
            self.params.get_parameter_text(index as i32)
        }

        fn set_program(&mut self, index: usize) {
            self.params.change_preset(index as i32);
        }

        fn program(&self) -> usize {
            self.params.get_preset_num().max(0) as usize
        }

        fn set_program_name(&mut self, name: &str) {
            self.params.set_preset_name(name.to_string());
        }

        fn program_name(&self) -> String {
            self.params.get_preset_name(self.params.get_preset_num())
        }

        fn program_name_indexed(&self, index: usize) -> String {
            self.params.get_preset_name(index as i32)
        }

        fn program_chunk(&mut self) -> Result<Vec<u8>> {
            Ok(self.params.get_preset_data())
        }

        fn set_program_chunk(&mut self, data: &[u8]) -> Result<()> {
            self.params.load_preset_data(data);
            Ok(())
        }

        fn bank_chunk(&mut self) -> Result<Vec<u8>> {
            Ok(self.params.get_bank_data())
        }

        fn set_bank_chunk(&mut self, data: &[u8]) -> Result<()> {
            self.params.load_bank_data(data);
            Ok(())
        }

        fn read_program_data(&mut self, data: &[u8]) -> Result<()> {
            super::fxp::read_program(self, data)
        }

        fn write_program_data(&mut self) -> Result<Vec<u8>> {
            super::fxp::write_program(self)
        }

        fn read_bank_data(&mut self, data: &[u8]) -> Result<()> {
            super::fxp::read_bank(self, data)
        }

        fn write_bank_data(&mut self) -> Result<Vec<u8>> {
            super::fxp::write_bank(self)
        }

        fn send_midi(&mut self, event: MidiEvent) {
            use vst::api;
            let api_event = api::MidiEvent {
                event_type: api::EventType::Midi,
                byte_size: std::mem::size_of::<api::MidiEvent>() as i32,
                delta_frames: event.delta,
                flags: api::MidiEventFlags::REALTIME_EVENT.bits(),
                note_length: 0,
                note_offset: 0,
                midi_data: event.data,
                _midi_reserved: 0,
                detune: 0,
                note_off_velocity: 0,
                _reserved1: 0,
                _reserved2: 0,
            };
            self.send_api_events(vec![api_event]);
        }

        fn send_sysex(&mut self, event: SysexEvent) {
            use vst::api;
            let mut data = event.data;
            let mut sysex = api::SysExEvent {
                event_type: api::EventType::SysEx,
                byte_size: std::mem::size_of::<api::SysExEvent>() as i32,
                delta_frames: event.delta,
                _flags: 0,
                data_size: data.len() as i32,
                _reserved1: 0,
                system_data: data.as_mut_ptr(),
                _reserved2: 0,
            };
            let events = api::Events {
                num_events: 1,
                _reserved: 0,
                events: [
                    &mut sysex as *mut api::SysExEvent as *mut api::Event,
                    std::ptr::null_mut(),
                ],
            };
            self.instance.process_events(&events);
        }

        fn set_tempo(&mut self, bpm: f64) {
            self.state.transport.update(|mut t| {
                t.tempo_bpm = bpm;
                t
            });
        }

        fn set_time_signature(&mut self, numerator: i32, denominator: i32) {
            self.state.transport.update(|mut t| {
                t.time_sig_numerator = numerator;
                t.time_sig_denominator = denominator;
                t
            });
        }

        fn set_transport_playing(&mut self, playing: bool) {
            self.state.transport.update(|mut t| {
                t.playing = playing;
                t
            });
        }

        fn set_transport_position(&mut self, beats: f64) {
            let rate = self.state.sample_rate();
            self.state.transport.update(move |mut t| {
                t.position_beats = beats;
                t.sample_position = (beats / t.tempo_bpm * 60.0 * rate) as i64;
                t
            });
        }

        fn transport_position(&self) -> f64 {
            self.state.transport.get().position_beats
        }

        fn can_do(&mut self, what: &str) -> i32 {
            use vst::api::Supported;
            let supported = self
                .instance
                .can_do(vst::plugin::CanDo::Other(what.to_string()));
            match supported {
                Supported::Yes => 1,
                Supported::No => -1,
                _ => 0,
            }
        }

        fn vendor_specific(&mut self, index: i32, _value: isize, _data: &[u8], _opt: f32) -> isize {
            // The raw dispatcher isn't reachable through the safe crate
            // surface.
            tracing::debug!(index, "vendor-specific call ignored");
            0
        }

        fn open_editor(&mut self, parent: RawWindowHandle) -> Result<()> {
            let mut editor = self
                .instance
                .get_editor()
                .ok_or_else(|| HostError::EditorError("plugin has no editor".to_string()))?;
            if editor.open(parent as *mut std::ffi::c_void) {
                let (width, height) = editor.size();
                let (left, top) = editor.position();
                self.editor_rect = Some((left, top, left + width, top + height));
                Ok(())
            } else {
                Err(HostError::EditorError("editor refused to open".to_string()))
            }
        }

        fn close_editor(&mut self) {
            if let Some(mut editor) = self.instance.get_editor() {
                editor.close();
            }
        }

        fn editor_rect(&self) -> Option<(i32, i32, i32, i32)> {
            self.editor_rect
        }

        fn set_listener(&mut self, listener: ListenerHandle) {
            self.state.listener.store(Some(listener));
        }
    }

}
