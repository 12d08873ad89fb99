//! V3 backend adapter.
//!
//! Wraps a VST3 module behind the [`PluginBackend`] capability set:
//! factory → component → controller lifecycle, connection points, state
//! synchronization, parameter id/index mapping and the preset container
//! codec. Compiled behind the `vst3` feature; the codec in [`preset`] is
//! always available.

pub mod preset;

#[cfg(feature = "vst3")]
pub use adapter::Vst3Backend;

#[cfg(feature = "vst3")]
mod adapter {
    use std::collections::HashMap;
    use std::ffi::c_void;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use arc_swap::ArcSwapOption;
    use parking_lot::Mutex;
    use vst3::Steinberg::Vst::{
        BusDirections_, BusInfo, IAudioProcessor, IComponent, IComponentHandler,
        IConnectionPoint, IEditController, IUnitInfo, MediaTypes_, ParameterInfo as V3ParamInfo,
        ParameterInfo_, ProcessModes_, ProcessSetup, String128, SymbolicSampleSizes_, TChar,
    };
    use vst3::Steinberg::{
        int32, int64, kInvalidArgument, kResultOk, tresult, FIDString, IBStream, IPlugView,
        IPluginFactory, PClassInfo, TUID,
    };
    use vst3::{Class, ComRef, ComWrapper, Interface};

    use crate::backend::{MidiEvent, PluginBackend, ProcessPrecision, SysexEvent};
    use crate::error::{HostError, LoadStage, Result};
    use crate::info::{ParamInfo, PluginFlags, PluginInfo, UniqueId};
    use crate::listener::{ListenerHandle, ListenerHub};
    use crate::transport::TransportCell;
    use crate::window::RawWindowHandle;

    const AUDIO_MODULE_CLASS: &str = "Audio Module Class";

    fn load_err(path: &Path, stage: LoadStage, reason: impl Into<String>) -> HostError {
        HostError::LoadFailed {
            path: path.to_path_buf(),
            stage,
            reason: reason.into(),
        }
    }

    fn from_string128(buf: &String128) -> String {
        let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        let units: Vec<u16> = buf[..end].iter().map(|&c| c as u16).collect();
        String::from_utf16_lossy(&units)
    }

    fn to_string128(text: &str) -> String128 {
        let mut buf = [0 as TChar; 128];
        for (i, unit) in text.encode_utf16().take(127).enumerate() {
            buf[i] = unit as TChar;
        }
        buf
    }

    fn tuid_bytes(tuid: &TUID) -> [u8; 16] {
        let mut out = [0u8; 16];
        for (dst, src) in out.iter_mut().zip(tuid.iter()) {
            *dst = *src as u8;
        }
        out
    }

    /// In-memory IBStream the state getters/setters write into and read
    /// from. Buffer and cursor are shared with the caller.
    struct MemoryStream {
        data: Arc<Mutex<Vec<u8>>>,
        cursor: Mutex<i64>,
    }

    impl MemoryStream {
        fn new(data: Arc<Mutex<Vec<u8>>>) -> Self {
            Self {
                data,
                cursor: Mutex::new(0),
            }
        }
    }

    impl Class for MemoryStream {
        type Interfaces = (IBStream,);
    }

    impl vst3::Steinberg::IBStreamTrait for MemoryStream {
        unsafe fn read(
            &self,
            buffer: *mut c_void,
            num_bytes: int32,
            num_bytes_read: *mut int32,
        ) -> tresult {
            let data = self.data.lock();
            let mut cursor = self.cursor.lock();
            let pos = (*cursor).max(0) as usize;
            let available = data.len().saturating_sub(pos);
            let n = (num_bytes.max(0) as usize).min(available);
            if n > 0 {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(pos), buffer as *mut u8, n);
                *cursor = (pos + n) as i64;
            }
            if !num_bytes_read.is_null() {
                *num_bytes_read = n as int32;
            }
            kResultOk
        }

        unsafe fn write(
            &self,
            buffer: *mut c_void,
            num_bytes: int32,
            num_bytes_written: *mut int32,
        ) -> tresult {
            let mut data = self.data.lock();
            let mut cursor = self.cursor.lock();
            let pos = (*cursor).max(0) as usize;
            let n = num_bytes.max(0) as usize;
            if data.len() < pos + n {
                data.resize(pos + n, 0);
            }
            if n > 0 {
                std::ptr::copy_nonoverlapping(buffer as *const u8, data.as_mut_ptr().add(pos), n);
                *cursor = (pos + n) as i64;
            }
            if !num_bytes_written.is_null() {
                *num_bytes_written = n as int32;
            }
            kResultOk
        }

        unsafe fn seek(&self, pos: int64, mode: int32, result: *mut int64) -> tresult {
            let data_len = self.data.lock().len() as i64;
            let mut cursor = self.cursor.lock();
            let next = match mode {
                0 => pos,            // kIBSeekSet
                1 => *cursor + pos,  // kIBSeekCur
                2 => data_len + pos, // kIBSeekEnd
                _ => return kInvalidArgument,
            };
            if next < 0 {
                return kInvalidArgument;
            }
            *cursor = next;
            if !result.is_null() {
                *result = next;
            }
            kResultOk
        }

        unsafe fn tell(&self, pos: *mut int64) -> tresult {
            if pos.is_null() {
                return kInvalidArgument;
            }
            *pos = *self.cursor.lock();
            kResultOk
        }
    }

    /// State shared between the backend and its component handler.
    struct HandlerState {
        listener: ArcSwapOption<ListenerHub>,
        id_to_index: Mutex<HashMap<u32, usize>>,
    }

    /// The object the controller calls back on. Parameter ids are
    /// translated to stable indices before they reach the listener.
    struct Handler {
        state: Arc<HandlerState>,
    }

    impl Class for Handler {
        type Interfaces = (IComponentHandler,);
    }

    impl vst3::Steinberg::Vst::IComponentHandlerTrait for Handler {
        unsafe fn beginEdit(&self, _id: u32) -> tresult {
            kResultOk
        }

        unsafe fn performEdit(&self, id: u32, value_normalized: f64) -> tresult {
            if let Some(listener) = self.state.listener.load_full() {
                if let Some(&index) = self.state.id_to_index.lock().get(&id) {
                    listener.parameter_automated(index as i32, value_normalized as f32);
                }
            }
            kResultOk
        }

        unsafe fn endEdit(&self, _id: u32) -> tresult {
            kResultOk
        }

        unsafe fn restartComponent(&self, _flags: int32) -> tresult {
            tracing::debug!("plugin asked to restart component");
            kResultOk
        }
    }

    /// Resolve a `.vst3` bundle directory to its platform binary.
    fn module_binary(path: &Path) -> PathBuf {
        if !path.is_dir() {
            return path.to_path_buf();
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("plugin");
        #[cfg(target_os = "linux")]
        {
            let arch = if cfg!(target_arch = "aarch64") {
                "aarch64-linux"
            } else {
                "x86_64-linux"
            };
            path.join("Contents").join(arch).join(format!("{stem}.so"))
        }
        #[cfg(target_os = "macos")]
        {
            path.join("Contents").join("MacOS").join(stem)
        }
        #[cfg(target_os = "windows")]
        {
            let arch = if cfg!(target_arch = "aarch64") {
                "arm64-win"
            } else {
                "x86_64-win"
            };
            path.join("Contents").join(arch).join(format!("{stem}.vst3"))
        }
    }

    pub struct Vst3Backend {
        component: *mut IComponent,
        controller: *mut IEditController,
        processor: *mut IAudioProcessor,
        view: Option<*mut IPlugView>,
        handler: ComWrapper<Handler>,
        handler_state: Arc<HandlerState>,
        info: PluginInfo,
        class_id: [u8; 16],
        index_to_id: Vec<u32>,
        program_change_id: Option<u32>,
        program: usize,
        transport: TransportCell,
        sample_rate: f32,
        block_size: usize,
        in_ptrs: Vec<*mut f32>,
        out_ptrs: Vec<*mut f32>,
        _library: libloading::Library,
    }

    // The raw interface pointers follow the host's ownership protocol:
    // one thread at a time, moves between threads only through commands.
    unsafe impl Send for Vst3Backend {}

    impl Vst3Backend {
        pub fn load(path: &Path) -> Result<Self> {
            let binary = module_binary(path);
            let library = unsafe { libloading::Library::new(&binary) }
                .map_err(|e| load_err(path, LoadStage::Opening, e.to_string()))?;

            unsafe {
                // Optional per-platform module entry.
                #[cfg(target_os = "linux")]
                if let Ok(entry) = library
                    .get::<unsafe extern "C" fn(*mut c_void) -> bool>(b"ModuleEntry")
                {
                    entry(std::ptr::null_mut());
                }
                #[cfg(target_os = "macos")]
                if let Ok(entry) =
                    library.get::<unsafe extern "C" fn(*mut c_void) -> bool>(b"bundleEntry")
                {
                    entry(std::ptr::null_mut());
                }
                #[cfg(target_os = "windows")]
                if let Ok(entry) = library.get::<unsafe extern "system" fn() -> bool>(b"InitDll") {
                    entry();
                }
            }

            let get_factory = unsafe {
                library
                    .get::<unsafe extern "system" fn() -> *mut IPluginFactory>(b"GetPluginFactory")
            }
            .map_err(|_| {
                load_err(path, LoadStage::Factory, "no GetPluginFactory entry point")
            })?;

            let factory_ptr = unsafe { get_factory() };
            let factory = unsafe { ComRef::from_raw(factory_ptr) }
                .ok_or_else(|| load_err(path, LoadStage::Factory, "factory is null"))?;

            // First audio-effect class in the module.
            let mut class_cid: Option<TUID> = None;
            let mut class_name = String::new();
            unsafe {
                let count = factory.countClasses();
                for i in 0..count {
                    let mut ci: PClassInfo = std::mem::zeroed();
                    if factory.getClassInfo(i, &mut ci) == kResultOk {
                        let category: String = ci
                            .category
                            .iter()
                            .take_while(|&&c| c != 0)
                            .map(|&c| c as u8 as char)
                            .collect();
                        if category == AUDIO_MODULE_CLASS {
                            class_name = ci
                                .name
                                .iter()
                                .take_while(|&&c| c != 0)
                                .map(|&c| c as u8 as char)
                                .collect();
                            class_cid = Some(ci.cid);
                            break;
                        }
                    }
                }
            }
            let class_cid = class_cid.ok_or_else(|| {
                load_err(path, LoadStage::Factory, "module has no audio effect class")
            })?;

            // Create and initialize the component.
            let mut component_ptr: *mut c_void = std::ptr::null_mut();
            let created = unsafe {
                factory.createInstance(
                    class_cid.as_ptr() as FIDString,
                    IComponent::IID.as_ptr() as FIDString,
                    &mut component_ptr,
                )
            };
            if created != kResultOk || component_ptr.is_null() {
                return Err(load_err(path, LoadStage::Instantiation, "couldn't create component"));
            }
            let component = component_ptr as *mut IComponent;
            unsafe {
                let c = match ComRef::from_raw(component) {
                    Some(c) => c,
                    None => {
                        return Err(load_err(
                            path,
                            LoadStage::Instantiation,
                            "component pointer is null",
                        ));
                    }
                };
                if c.initialize(std::ptr::null_mut()) != kResultOk {
                    c.release();
                    return Err(load_err(
                        path,
                        LoadStage::Initialization,
                        "couldn't initialize component",
                    ));
                }
            }

            // Controller: either the component itself or a separate class.
            let controller = unsafe {
                let c = match ComRef::from_raw(component) {
                    Some(c) => c,
                    None => {
                        return Err(load_err(
                            path,
                            LoadStage::Instantiation,
                            "component pointer is null",
                        ));
                    }
                };
                match c.cast::<IEditController>() {
                    Some(controller) => controller.into_raw(),
                    None => {
                        let mut controller_cid: TUID = std::mem::zeroed();
                        if c.getControllerClassId(&mut controller_cid) != kResultOk {
                            c.terminate();
                            c.release();
                            return Err(load_err(
                                path,
                                LoadStage::Instantiation,
                                "no edit controller",
                            ));
                        }
                        let mut ptr: *mut c_void = std::ptr::null_mut();
                        let ok = factory.createInstance(
                            controller_cid.as_ptr() as FIDString,
                            IEditController::IID.as_ptr() as FIDString,
                            &mut ptr,
                        );
                        if ok != kResultOk || ptr.is_null() {
                            c.terminate();
                            c.release();
                            return Err(load_err(
                                path,
                                LoadStage::Instantiation,
                                "couldn't create edit controller",
                            ));
                        }
                        let controller = ptr as *mut IEditController;
                        let ctrl = match ComRef::from_raw(controller) {
                            Some(ctrl) => ctrl,
                            None => {
                                c.terminate();
                                c.release();
                                return Err(load_err(
                                    path,
                                    LoadStage::Instantiation,
                                    "edit controller pointer is null",
                                ));
                            }
                        };
                        if ctrl.initialize(std::ptr::null_mut()) != kResultOk {
                            ctrl.release();
                            c.terminate();
                            c.release();
                            return Err(load_err(
                                path,
                                LoadStage::Initialization,
                                "couldn't initialize edit controller",
                            ));
                        }
                        controller
                    }
                }
            };

            let handler_state = Arc::new(HandlerState {
                listener: ArcSwapOption::from(None),
                id_to_index: Mutex::new(HashMap::new()),
            });
            let handler = ComWrapper::new(Handler {
                state: Arc::clone(&handler_state),
            });
            unsafe {
                let ctrl = match ComRef::from_raw(controller) {
                    Some(ctrl) => ctrl,
                    None => {
                        return Err(load_err(
                            path,
                            LoadStage::Initialization,
                            "edit controller pointer is null",
                        ));
                    }
                };
                match handler.as_com_ref::<IComponentHandler>() {
                    Some(handler_ref) => {
                        ctrl.setComponentHandler(handler_ref.as_ptr());
                    }
                    None => {
                        return Err(load_err(
                            path,
                            LoadStage::Initialization,
                            "couldn't expose component handler",
                        ));
                    }
                }

                // Connect component and controller where supported.
                if let Some(comp) = ComRef::from_raw(component) {
                    if let (Some(ccp), Some(pcp)) = (
                        comp.cast::<IConnectionPoint>(),
                        ctrl.cast::<IConnectionPoint>(),
                    ) {
                        ccp.connect(pcp.as_ptr());
                        pcp.connect(ccp.as_ptr());
                    }
                }
            }

            // Synchronize controller with the component state. A failed
            // sync is not fatal; the plugin just starts unsynchronized.
            let sync_buf = Arc::new(Mutex::new(Vec::new()));
            unsafe {
                let stream = ComWrapper::new(MemoryStream::new(Arc::clone(&sync_buf)));
                if let (Some(stream_ref), Some(comp)) = (
                    stream.as_com_ref::<IBStream>(),
                    ComRef::from_raw(component),
                ) {
                    if comp.getState(stream_ref.as_ptr()) == kResultOk {
                        let stream2 =
                            ComWrapper::new(MemoryStream::new(Arc::clone(&sync_buf)));
                        if let (Some(ptr2), Some(ctrl)) = (
                            stream2.as_com_ref::<IBStream>(),
                            ComRef::from_raw(controller),
                        ) {
                            ctrl.setComponentState(ptr2.as_ptr());
                        }
                    }
                }
            }

            let processor = unsafe {
                let comp = match ComRef::from_raw(component) {
                    Some(comp) => comp,
                    None => {
                        return Err(load_err(path, LoadStage::Setup, "component pointer is null"));
                    }
                };
                match comp.cast::<IAudioProcessor>() {
                    Some(processor) => processor.into_raw(),
                    None => {
                        return Err(load_err(path, LoadStage::Setup, "no audio processor"));
                    }
                }
            };

            // Main bus channel counts.
            let (num_inputs, num_outputs) = unsafe {
                match ComRef::from_raw(component) {
                    Some(comp) => {
                        let count_channels = |dir: i32| -> usize {
                            let buses = comp.getBusCount(MediaTypes_::kAudio as int32, dir);
                            for i in 0..buses {
                                let mut bus: BusInfo = std::mem::zeroed();
                                if comp.getBusInfo(MediaTypes_::kAudio as int32, dir, i, &mut bus)
                                    == kResultOk
                                {
                                    return bus.channelCount.max(0) as usize;
                                }
                            }
                            0
                        };
                        (
                            count_channels(BusDirections_::kInput as int32),
                            count_channels(BusDirections_::kOutput as int32),
                        )
                    }
                    None => (0, 0),
                }
            };

            // Parameters: dedupe ids, skip the MIDI CC flood some
            // wrappers expose, note the program-change id.
            let mut parameters = Vec::new();
            let mut index_to_id = Vec::new();
            let mut id_to_index = HashMap::new();
            let mut program_change_id = None;
            unsafe {
                if let Some(ctrl) = ComRef::from_raw(controller) {
                    let count = ctrl.getParameterCount();
                    for i in 0..count {
                        let mut pi: V3ParamInfo = std::mem::zeroed();
                        if ctrl.getParameterInfo(i, &mut pi) != kResultOk {
                            continue;
                        }
                        if id_to_index.contains_key(&pi.id) {
                            continue;
                        }
                        let title = from_string128(&pi.title);
                        if pi.flags & ParameterInfo_::ParameterFlags_::kIsProgramChange as int32
                            != 0
                        {
                            program_change_id = Some(pi.id);
                        }
                        if title.contains("MIDI CC") {
                            continue;
                        }
                        id_to_index.insert(pi.id, index_to_id.len());
                        index_to_id.push(pi.id);
                        parameters.push(ParamInfo::new(title, from_string128(&pi.units)));
                    }
                }
            }
            *handler_state.id_to_index.lock() = id_to_index;

            // Program names from the unit info, if the plugin has any.
            let mut programs = Vec::new();
            unsafe {
                if let Some(units) = ComRef::from_raw(controller)
                    .and_then(|ctrl| ctrl.cast::<IUnitInfo>())
                {
                    if units.getProgramListCount() > 0 {
                        let mut pli: vst3::Steinberg::Vst::ProgramListInfo = std::mem::zeroed();
                        if units.getProgramListInfo(0, &mut pli) == kResultOk {
                            for i in 0..pli.programCount {
                                let mut name: String128 = std::mem::zeroed();
                                if units.getProgramName(pli.id, i, &mut name) == kResultOk {
                                    programs.push(from_string128(&name));
                                } else {
                                    programs.push(String::new());
                                }
                            }
                        }
                    }
                }
            }

            let has_editor = unsafe {
                match ComRef::from_raw(controller) {
                    Some(ctrl) => {
                        let view = ctrl.createView(b"editor\0".as_ptr() as FIDString);
                        match ComRef::from_raw(view) {
                            Some(view) => {
                                view.release();
                                true
                            }
                            None => false,
                        }
                    }
                    None => false,
                }
            };

            let class_id = tuid_bytes(&class_cid);
            let (single_precision, double_precision) = unsafe {
                match ComRef::from_raw(processor) {
                    Some(p) => (
                        p.canProcessSampleSize(SymbolicSampleSizes_::kSample32 as int32)
                            == kResultOk,
                        p.canProcessSampleSize(SymbolicSampleSizes_::kSample64 as int32)
                            == kResultOk,
                    ),
                    None => (false, false),
                }
            };
            let flags = PluginFlags {
                has_editor,
                is_synth: false,
                single_precision,
                double_precision,
                midi_input: false,
                midi_output: false,
                sysex_input: false,
                sysex_output: false,
                has_chunk_data: false,
            };

            let info = PluginInfo::new(class_name, crate::backend::BackendKind::V3)
                .path(path.display().to_string())
                .unique_id(UniqueId::V3(class_id))
                .audio_io(num_inputs, num_outputs)
                .parameters(parameters)
                .programs(programs)
                .flags(flags);

            Ok(Self {
                component,
                controller,
                processor,
                view: None,
                handler,
                handler_state,
                info,
                class_id,
                index_to_id,
                program_change_id,
                program: 0,
                transport: TransportCell::default(),
                sample_rate: 44100.0,
                block_size: 512,
                in_ptrs: Vec::new(),
                out_ptrs: Vec::new(),
                _library: library,
            })
        }

        fn param_id(&self, index: usize) -> Option<u32> {
            self.index_to_id.get(index).copied()
        }

        fn component_ref(&self) -> Option<ComRef<'_, IComponent>> {
            unsafe { ComRef::from_raw(self.component) }
        }

        fn controller_ref(&self) -> Option<ComRef<'_, IEditController>> {
            unsafe { ComRef::from_raw(self.controller) }
        }

        fn processor_ref(&self) -> Option<ComRef<'_, IAudioProcessor>> {
            unsafe { ComRef::from_raw(self.processor) }
        }

        fn component_state(&self) -> Result<Vec<u8>> {
            let comp = match self.component_ref() {
                Some(comp) => comp,
                None => return Err(HostError::BadPreset("component is gone".into())),
            };
            let buf = Arc::new(Mutex::new(Vec::new()));
            let stream = ComWrapper::new(MemoryStream::new(Arc::clone(&buf)));
            let stream_ref = match stream.as_com_ref::<IBStream>() {
                Some(stream_ref) => stream_ref,
                None => return Err(HostError::BadPreset("couldn't expose state stream".into())),
            };
            unsafe {
                if comp.getState(stream_ref.as_ptr()) != kResultOk {
                    return Err(HostError::BadPreset("couldn't get component state".into()));
                }
            }
            let data = buf.lock().clone();
            Ok(data)
        }

        fn set_component_state(&self, data: &[u8]) -> Result<()> {
            let comp = match self.component_ref() {
                Some(comp) => comp,
                None => return Err(HostError::BadPreset("component is gone".into())),
            };
            let stream = ComWrapper::new(MemoryStream::new(Arc::new(Mutex::new(data.to_vec()))));
            let stream_ref = match stream.as_com_ref::<IBStream>() {
                Some(stream_ref) => stream_ref,
                None => return Err(HostError::BadPreset("couldn't expose state stream".into())),
            };
            unsafe {
                if comp.setState(stream_ref.as_ptr()) != kResultOk {
                    return Err(HostError::BadPreset("couldn't set component state".into()));
                }
                // Mirror into the controller as well.
                let stream2 =
                    ComWrapper::new(MemoryStream::new(Arc::new(Mutex::new(data.to_vec()))));
                if let (Some(ptr2), Some(ctrl)) =
                    (stream2.as_com_ref::<IBStream>(), self.controller_ref())
                {
                    ctrl.setComponentState(ptr2.as_ptr());
                }
            }
            Ok(())
        }

        fn controller_state(&self) -> Result<Vec<u8>> {
            let ctrl = match self.controller_ref() {
                Some(ctrl) => ctrl,
                None => return Err(HostError::BadPreset("controller is gone".into())),
            };
            let buf = Arc::new(Mutex::new(Vec::new()));
            let stream = ComWrapper::new(MemoryStream::new(Arc::clone(&buf)));
            let stream_ref = match stream.as_com_ref::<IBStream>() {
                Some(stream_ref) => stream_ref,
                None => return Err(HostError::BadPreset("couldn't expose state stream".into())),
            };
            unsafe {
                if ctrl.getState(stream_ref.as_ptr()) != kResultOk {
                    return Err(HostError::BadPreset("couldn't get controller state".into()));
                }
            }
            let data = buf.lock().clone();
            Ok(data)
        }

        fn set_controller_state(&self, data: &[u8]) -> Result<()> {
            let ctrl = match self.controller_ref() {
                Some(ctrl) => ctrl,
                None => return Err(HostError::BadPreset("controller is gone".into())),
            };
            let stream = ComWrapper::new(MemoryStream::new(Arc::new(Mutex::new(data.to_vec()))));
            let stream_ref = match stream.as_com_ref::<IBStream>() {
                Some(stream_ref) => stream_ref,
                None => return Err(HostError::BadPreset("couldn't expose state stream".into())),
            };
            unsafe {
                if ctrl.setState(stream_ref.as_ptr()) != kResultOk {
                    return Err(HostError::BadPreset("couldn't set controller state".into()));
                }
            }
            Ok(())
        }
    }

    impl PluginBackend for Vst3Backend {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        fn set_sample_rate(&mut self, rate: f32) {
            self.sample_rate = rate;
            if let Some(processor) = self.processor_ref() {
                unsafe {
                    let mut setup: ProcessSetup = std::mem::zeroed();
                    setup.processMode = ProcessModes_::kRealtime as int32;
                    setup.symbolicSampleSize = SymbolicSampleSizes_::kSample32 as int32;
                    setup.maxSamplesPerBlock = self.block_size as int32;
                    setup.sampleRate = rate as f64;
                    processor.setupProcessing(&mut setup);
                }
            }
        }

        fn set_block_size(&mut self, frames: usize) {
            self.block_size = frames;
            let rate = self.sample_rate;
            self.set_sample_rate(rate);
        }

        fn has_precision(&self, precision: ProcessPrecision) -> bool {
            match precision {
                ProcessPrecision::Single => self.info.flags.single_precision,
                ProcessPrecision::Double => self.info.flags.double_precision,
            }
        }

        fn set_precision(&mut self, _precision: ProcessPrecision) {
            // Precision is fixed in setupProcessing; the host only asks
            // for single precision.
        }

        fn set_num_speakers(&mut self, _inputs: usize, _outputs: usize) {
            // Bus arrangements stay at the plugin defaults.
        }

        fn suspend(&mut self) {
            unsafe {
                if let Some(processor) = self.processor_ref() {
                    processor.setProcessing(0);
                }
                if let Some(component) = self.component_ref() {
                    component.setActive(0);
                }
            }
        }

        fn resume(&mut self) {
            unsafe {
                if let Some(component) = self.component_ref() {
                    component.setActive(1);
                }
                if let Some(processor) = self.processor_ref() {
                    processor.setProcessing(1);
                }
            }
        }

        fn process(&mut self, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>], frames: usize) {
            use vst3::Steinberg::Vst::{AudioBusBuffers, ProcessData};

            self.transport
                .update(|t| t.advanced(frames, self.sample_rate as f64));

            self.in_ptrs.clear();
            self.in_ptrs
                .extend(inputs.iter().map(|ch| ch.as_ptr() as *mut f32));
            self.out_ptrs.clear();
            self.out_ptrs.extend(outputs.iter_mut().map(|ch| ch.as_mut_ptr()));

            unsafe {
                let mut input_bus: AudioBusBuffers = std::mem::zeroed();
                input_bus.numChannels = self.in_ptrs.len() as int32;
                input_bus.__field0.channelBuffers32 = self.in_ptrs.as_mut_ptr();

                let mut output_bus: AudioBusBuffers = std::mem::zeroed();
                output_bus.numChannels = self.out_ptrs.len() as int32;
                output_bus.__field0.channelBuffers32 = self.out_ptrs.as_mut_ptr();

                let mut data: ProcessData = std::mem::zeroed();
                data.processMode = ProcessModes_::kRealtime as int32;
                data.symbolicSampleSize = SymbolicSampleSizes_::kSample32 as int32;
                data.numSamples = frames as int32;
                data.numInputs = if self.in_ptrs.is_empty() { 0 } else { 1 };
                data.numOutputs = if self.out_ptrs.is_empty() { 0 } else { 1 };
                data.inputs = &mut input_bus;
                data.outputs = &mut output_bus;

                match ComRef::from_raw(self.processor) {
                    Some(processor) => {
                        processor.process(&mut data);
                    }
                    None => {
                        for out in outputs.iter_mut() {
                            out[..frames.min(out.len())].fill(0.0);
                        }
                    }
                }
            }
        }

        fn process_double(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>], frames: usize) {
            // The host drives single precision; fall back to a convert
            // pass through the f32 path.
            let ins: Vec<Vec<f32>> = inputs
                .iter()
                .map(|ch| ch.iter().map(|&s| s as f32).collect())
                .collect();
            let mut outs: Vec<Vec<f32>> =
                outputs.iter().map(|ch| vec![0.0f32; ch.len()]).collect();
            self.process(&ins, &mut outs, frames);
            for (dst, src) in outputs.iter_mut().zip(outs.iter()) {
                for (d, s) in dst.iter_mut().zip(src.iter()).take(frames) {
                    *d = *s as f64;
                }
            }
        }

        fn set_parameter(&mut self, index: usize, value: f32) {
            if let Some(id) = self.param_id(index) {
                if let Some(ctrl) = self.controller_ref() {
                    unsafe {
                        ctrl.setParamNormalized(id, value as f64);
                    }
                }
            }
        }

        fn set_parameter_text(&mut self, index: usize, text: &str) -> bool {
            let id = match self.param_id(index) {
                Some(id) => id,
                None => return false,
            };
            let ctrl = match self.controller_ref() {
                Some(ctrl) => ctrl,
                None => return false,
            };
            unsafe {
                let mut value: f64 = 0.0;
                let mut buf = to_string128(text);
                if ctrl.getParamValueByString(id, buf.as_mut_ptr(), &mut value) == kResultOk {
                    ctrl.setParamNormalized(id, value) == kResultOk
                } else {
                    false
                }
            }
        }

        fn parameter(&self, index: usize) -> f32 {
            let id = match self.param_id(index) {
                Some(id) => id,
                None => return 0.0,
            };
            match self.controller_ref() {
                Some(ctrl) => unsafe { ctrl.getParamNormalized(id) as f32 },
                None => 0.0,
            }
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
            let id = match self.param_id(index) {
                Some(id) => id,
                None => return String::new(),
            };
            let ctrl = match self.controller_ref() {
                Some(ctrl) => ctrl,
                None => return String::new(),
            };
            unsafe {
                let value = ctrl.getParamNormalized(id);
                let mut buf: String128 = std::mem::zeroed();
                if ctrl.getParamStringByValue(id, value, &mut buf) == kResultOk {
                    from_string128(&buf)
                } else {
                    String::new()
                }
            }
        }

        fn set_program(&mut self, index: usize) {
            self.program = index;
            if let Some(id) = self.program_change_id {
                let count = self.info.num_programs;
                let normalized = if count > 1 {
                    index as f64 / (count - 1) as f64
                } else {
                    0.0
                };
                if let Some(ctrl) = self.controller_ref() {
                    unsafe {
                        ctrl.setParamNormalized(id, normalized);
                    }
                }
            }
        }

        fn program(&self) -> usize {
            self.program
        }

        fn set_program_name(&mut self, _name: &str) {
            // V3 program names come from the unit info and are read-only.
        }

        fn program_name(&self) -> String {
            self.program_name_indexed(self.program)
        }

        fn program_name_indexed(&self, index: usize) -> String {
            self.info.programs.get(index).cloned().unwrap_or_default()
        }

        fn program_chunk(&mut self) -> Result<Vec<u8>> {
            self.component_state()
        }

        fn set_program_chunk(&mut self, data: &[u8]) -> Result<()> {
            self.set_component_state(data)
        }

        fn bank_chunk(&mut self) -> Result<Vec<u8>> {
            Err(HostError::NotSupported("V3 bank data".into()))
        }

        fn set_bank_chunk(&mut self, _data: &[u8]) -> Result<()> {
            Err(HostError::NotSupported("V3 bank data".into()))
        }

        fn read_program_data(&mut self, data: &[u8]) -> Result<()> {
            let preset = super::preset::read(data, &self.class_id)?;
            if let Some(component) = preset.component {
                self.set_component_state(&component)?;
            }
            if let Some(controller) = preset.controller {
                self.set_controller_state(&controller)?;
            }
            Ok(())
        }

        fn write_program_data(&mut self) -> Result<Vec<u8>> {
            let component = self.component_state()?;
            let controller = self.controller_state().unwrap_or_default();
            Ok(super::preset::write(&self.class_id, &component, &controller))
        }

        fn read_bank_data(&mut self, _data: &[u8]) -> Result<()> {
            Err(HostError::NotSupported("V3 bank data".into()))
        }

        fn write_bank_data(&mut self) -> Result<Vec<u8>> {
            Err(HostError::NotSupported("V3 bank data".into()))
        }

        fn send_midi(&mut self, _event: MidiEvent) {
            tracing::debug!("direct MIDI to V3 plugins is not supported");
        }

        fn send_sysex(&mut self, _event: SysexEvent) {
            tracing::debug!("direct sysex to V3 plugins is not supported");
        }

        fn set_tempo(&mut self, bpm: f64) {
            self.transport.update(|mut t| {
                t.tempo_bpm = bpm;
                t
            });
        }

        fn set_time_signature(&mut self, numerator: i32, denominator: i32) {
            self.transport.update(|mut t| {
                t.time_sig_numerator = numerator;
                t.time_sig_denominator = denominator;
                t
            });
        }

        fn set_transport_playing(&mut self, playing: bool) {
            self.transport.update(|mut t| {
                t.playing = playing;
                t
            });
        }

        fn set_transport_position(&mut self, beats: f64) {
            self.transport.update(|mut t| {
                t.position_beats = beats;
                t
            });
        }

        fn transport_position(&self) -> f64 {
            self.transport.get().position_beats
        }

        fn can_do(&mut self, _what: &str) -> i32 {
            0
        }

        fn vendor_specific(&mut self, _index: i32, _value: isize, _data: &[u8], _opt: f32) -> isize {
            0
        }

        fn open_editor(&mut self, parent: RawWindowHandle) -> Result<()> {
            if self.view.is_some() {
                return Ok(());
            }
            let ctrl = match self.controller_ref() {
                Some(ctrl) => ctrl,
                None => {
                    return Err(HostError::EditorError("controller is gone".into()));
                }
            };
            unsafe {
                let view = ctrl.createView(b"editor\0".as_ptr() as FIDString);
                let view_ref = match ComRef::from_raw(view) {
                    Some(view_ref) => view_ref,
                    None => {
                        return Err(HostError::EditorError("plugin has no editor view".into()));
                    }
                };
                #[cfg(target_os = "linux")]
                let platform: &[u8] = b"X11EmbedWindowID\0";
                #[cfg(target_os = "macos")]
                let platform: &[u8] = b"NSView\0";
                #[cfg(target_os = "windows")]
                let platform: &[u8] = b"HWND\0";
                let attached =
                    view_ref.attached(parent as *mut c_void, platform.as_ptr() as FIDString);
                if attached != kResultOk {
                    view_ref.release();
                    return Err(HostError::EditorError("couldn't attach editor view".into()));
                }
                self.view = Some(view);
            }
            Ok(())
        }

        fn close_editor(&mut self) {
            if let Some(view) = self.view.take() {
                unsafe {
                    if let Some(v) = ComRef::from_raw(view) {
                        v.removed();
                        v.release();
                    }
                }
            }
        }

        fn editor_rect(&self) -> Option<(i32, i32, i32, i32)> {
            let view = self.view?;
            unsafe {
                let view_ref = match ComRef::from_raw(view) {
                    Some(view_ref) => view_ref,
                    None => return None,
                };
                let mut rect: vst3::Steinberg::ViewRect = std::mem::zeroed();
                if view_ref.getSize(&mut rect) == kResultOk {
                    Some((rect.left, rect.top, rect.right, rect.bottom))
                } else {
                    None
                }
            }
        }

        fn set_listener(&mut self, listener: ListenerHandle) {
            self.handler_state.listener.store(Some(listener));
        }
    }

    impl Drop for Vst3Backend {
        fn drop(&mut self) {
            self.close_editor();
            unsafe {
                if let Some(processor) = ComRef::from_raw(self.processor) {
                    processor.release();
                }
                if let Some(ctrl) = ComRef::from_raw(self.controller) {
                    ctrl.terminate();
                    ctrl.release();
                }
                if let Some(comp) = ComRef::from_raw(self.component) {
                    comp.terminate();
                    comp.release();
                }
            }
        }
    }
}
