//! Windowing seam and GUI-thread coordination.
//!
//! Per-OS window creation and event-loop plumbing live outside this
//! crate; the embedder registers a [`WindowFactory`] and the host drives
//! it through the [`Window`] trait. What lives here is the thread
//! choreography: in [`GuiMode::Dedicated`](crate::config::GuiMode) mode
//! a plugin that wants an editor is created on a fresh GUI thread, the
//! created handle travels back to the worker through a bounded(1)
//! channel, and the GUI thread stays behind running the window's event
//! loop until `quit()`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::backend::{PluginBackend, SharedBackend};
use crate::error::Result;

/// Opaque native window handle (HWND, NSView*, X11 Window…) as an integer.
pub type RawWindowHandle = usize;

/// A native top-level window hosting a plugin editor.
///
/// Created and destroyed on the GUI thread; `quit` must be callable from
/// any thread (it is how Close tears the event loop down).
pub trait Window: Send + Sync {
    fn handle(&self) -> RawWindowHandle;
    fn set_title(&self, title: &str);
    fn set_geometry(&self, left: i32, top: i32, right: i32, bottom: i32);
    fn show(&self);
    fn hide(&self);
    fn bring_to_top(&self);
    /// Run the window's event loop until [`Window::quit`] is called.
    fn run(&self);
    fn quit(&self);
}

/// Creates windows for plugin editors.
pub trait WindowFactory: Send + Sync {
    fn create(&self, title: &str) -> Result<Arc<dyn Window>>;
    /// Pump pending window events; used in `GuiMode::Inline` where no
    /// dedicated GUI thread runs the loop. Called by the embedder.
    fn poll(&self) {}
}

/// What the GUI thread hands back to the worker during Open.
pub(crate) struct GuiOpened {
    pub backend: SharedBackend,
    pub window: Option<Arc<dyn Window>>,
}

/// Instantiates plugin backends from module paths. The default loads
/// through [`crate::backend::load_module`]; probing hosts and tests
/// substitute their own.
pub type BackendFactory =
    Arc<dyn Fn(&std::path::Path) -> Result<Box<dyn PluginBackend>> + Send + Sync>;

/// Load a plugin on a dedicated GUI thread.
///
/// The thread creates the backend, hands (backend, window) back through
/// a bounded(1) channel, then, if there is a window, opens the editor
/// and runs the event loop. When the loop exits (Close called
/// `window.quit()`), the editor is closed and the GUI thread's backend
/// reference is dropped there, so a backend whose other references were
/// already released is freed on the thread that created it.
///
/// Returns the load result plus the join handle; the caller joins the
/// handle immediately when no window was created.
pub(crate) fn open_on_gui_thread(
    factory: BackendFactory,
    path: PathBuf,
    windows: Option<Arc<dyn WindowFactory>>,
) -> (Result<GuiOpened>, JoinHandle<()>) {
    let (tx, rx) = crossbeam_channel::bounded::<Result<GuiOpened>>(1);

    let thread = std::thread::Builder::new()
        .name("plugin-gui".to_string())
        .spawn(move || {
            let backend = match factory(&path) {
                Ok(backend) => backend,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };

            let name = backend.info().name.clone();
            let rect = backend.editor_rect();
            let has_editor = backend.has_editor();
            let backend: SharedBackend = Arc::new(Mutex::new(backend));

            let window = if has_editor {
                match windows.as_ref().map(|f| f.create(&name)) {
                    Some(Ok(window)) => Some(window),
                    Some(Err(e)) => {
                        tracing::warn!("couldn't create editor window: {}", e);
                        None
                    }
                    None => None,
                }
            } else {
                None
            };

            let _ = tx.send(Ok(GuiOpened {
                backend: Arc::clone(&backend),
                window: window.clone(),
            }));

            let window = match window {
                Some(window) => window,
                // No editor window: nothing to run, the thread ends and
                // the worker joins it right away.
                None => return,
            };

            window.set_title(&name);
            if let Some((left, top, right, bottom)) = rect {
                window.set_geometry(left, top, right, bottom);
            }
            if let Err(e) = backend.lock().open_editor(window.handle()) {
                tracing::warn!("couldn't open plugin editor: {}", e);
            }

            tracing::debug!("gui thread: entering message loop");
            window.run();
            tracing::debug!("gui thread: message loop done");

            backend.lock().close_editor();
            // Last reference (Close drops the others first) frees the
            // plugin on the thread that created it.
            drop(backend);
        })
        .expect("failed to spawn plugin gui thread");

    let result = rx
        .recv()
        .unwrap_or_else(|_| Err(crate::error::HostError::EditorError(
            "gui thread died before returning a plugin".to_string(),
        )));
    (result, thread)
}
