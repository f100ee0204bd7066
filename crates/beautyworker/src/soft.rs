//! In-memory stand-ins for the graphics context, the GL entry points and the
//! native engine.
//!
//! The worker runs unchanged on top of [`SoftPlatform`], which makes it usable
//! without a GPU or the vendor library: in tests, and for dry runs of the
//! command-line tool. Probes share counters with the objects living on the
//! worker thread and can be read from any thread.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::context::{ContextError, GraphicsContext};
use crate::engine::ffi::{
    BundleKind, EngineLoader, ImageInput, InstanceHandle, LoadError, NativeArg, NativeEngine,
};
use crate::gl::{FramebufferId, GlApi, TextureId, FRAMEBUFFER_COMPLETE};
use crate::platform::Platform;

#[derive(Debug, Default)]
struct GpuCounters {
    live_textures: AtomicUsize,
    textures_created: AtomicUsize,
    live_framebuffers: AtomicUsize,
    make_current_calls: AtomicUsize,
    function_loads: AtomicUsize,
    destroyed: AtomicBool,
}

/// Observes a [`SoftContext`] and its [`SoftGl`] from other threads.
#[derive(Debug, Clone, Default)]
pub struct GpuProbe {
    counters: Arc<GpuCounters>,
}

impl GpuProbe {
    pub fn live_textures(&self) -> usize {
        self.counters.live_textures.load(Ordering::SeqCst)
    }

    pub fn textures_created(&self) -> usize {
        self.counters.textures_created.load(Ordering::SeqCst)
    }

    pub fn live_framebuffers(&self) -> usize {
        self.counters.live_framebuffers.load(Ordering::SeqCst)
    }

    pub fn make_current_calls(&self) -> usize {
        self.counters.make_current_calls.load(Ordering::SeqCst)
    }

    /// How many times GL entry points were actually resolved.
    pub fn function_loads(&self) -> usize {
        self.counters.function_loads.load(Ordering::SeqCst)
    }

    pub fn context_destroyed(&self) -> bool {
        self.counters.destroyed.load(Ordering::SeqCst)
    }
}

pub struct SoftContext {
    probe: GpuProbe,
    functions: Option<Rc<SoftGl>>,
    destroyed: bool,
}

impl SoftContext {
    pub fn new(probe: GpuProbe) -> Self {
        Self {
            probe,
            functions: None,
            destroyed: false,
        }
    }
}

impl GraphicsContext for SoftContext {
    type Api = SoftGl;

    fn make_current(&mut self) -> Result<(), ContextError> {
        if self.destroyed {
            return Err(ContextError::Destroyed);
        }
        self.probe
            .counters
            .make_current_calls
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_functions(&mut self) -> Result<Rc<SoftGl>, ContextError> {
        if self.destroyed {
            return Err(ContextError::Destroyed);
        }
        let probe = &self.probe;
        let functions = self.functions.get_or_insert_with(|| {
            probe.counters.function_loads.fetch_add(1, Ordering::SeqCst);
            Rc::new(SoftGl::new(probe.clone()))
        });
        Ok(Rc::clone(functions))
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.functions = None;
        self.probe.counters.destroyed.store(true, Ordering::SeqCst);
    }
}

struct SoftTexture {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

/// Host-memory texture store. Rows are kept in the order they were uploaded,
/// which for GL is bottom row first.
pub struct SoftGl {
    probe: GpuProbe,
    textures: RefCell<HashMap<u32, SoftTexture>>,
    framebuffers: RefCell<HashSet<u32>>,
    bound: Cell<Option<u32>>,
    next_name: Cell<u32>,
}

impl SoftGl {
    pub fn new(probe: GpuProbe) -> Self {
        Self {
            probe,
            textures: RefCell::new(HashMap::new()),
            framebuffers: RefCell::new(HashSet::new()),
            bound: Cell::new(None),
            next_name: Cell::new(1),
        }
    }

    fn next_name(&self) -> u32 {
        let name = self.next_name.get();
        self.next_name.set(name + 1);
        name
    }
}

impl GlApi for SoftGl {
    fn alloc_texture(&self) -> Result<TextureId, String> {
        let name = self.next_name();
        self.textures.borrow_mut().insert(
            name,
            SoftTexture {
                width: 0,
                height: 0,
                rgba: Vec::new(),
            },
        );
        self.probe
            .counters
            .live_textures
            .fetch_add(1, Ordering::SeqCst);
        self.probe
            .counters
            .textures_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(TextureId(name))
    }

    fn upload_rgba(&self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) {
        if let Some(slot) = self.textures.borrow_mut().get_mut(&texture.0) {
            slot.width = width;
            slot.height = height;
            slot.rgba = pixels.to_vec();
        }
    }

    fn free_texture(&self, texture: TextureId) {
        if self.textures.borrow_mut().remove(&texture.0).is_some() {
            self.probe
                .counters
                .live_textures
                .fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn alloc_framebuffer(&self) -> Result<FramebufferId, String> {
        let name = self.next_name();
        self.framebuffers.borrow_mut().insert(name);
        self.probe
            .counters
            .live_framebuffers
            .fetch_add(1, Ordering::SeqCst);
        Ok(FramebufferId(name))
    }

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId) -> u32 {
        let attachable = self.framebuffers.borrow().contains(&framebuffer.0)
            && self
                .textures
                .borrow()
                .get(&texture.0)
                .is_some_and(|slot| !slot.rgba.is_empty());
        if attachable {
            self.bound.set(Some(texture.0));
            FRAMEBUFFER_COMPLETE
        } else {
            self.bound.set(None);
            glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT
        }
    }

    fn read_rgba(&self, width: u32, height: u32, pixels: &mut [u8]) {
        let Some(name) = self.bound.get() else {
            return;
        };
        let textures = self.textures.borrow();
        let Some(slot) = textures.get(&name) else {
            return;
        };
        let rows = height.min(slot.height) as usize;
        let row_bytes = width.min(slot.width) as usize * 4;
        for row in 0..rows {
            let src = row * slot.width as usize * 4;
            let dst = row * width as usize * 4;
            pixels[dst..dst + row_bytes].copy_from_slice(&slot.rgba[src..src + row_bytes]);
        }
    }

    fn unbind_framebuffer(&self) {
        self.bound.set(None);
    }

    fn free_framebuffer(&self, framebuffer: FramebufferId) {
        if self.framebuffers.borrow_mut().remove(&framebuffer.0) {
            self.probe
                .counters
                .live_framebuffers
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Behaviour knobs for [`PassthroughEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineScript {
    /// Library load fails with this message.
    pub fail_load: Option<String>,
    /// Instance creation returns null.
    pub null_instance: bool,
    /// Fixed process return code instead of echoing the input texture.
    pub process_code: Option<i32>,
    /// Status returned by every parameter setter call.
    pub setter_status: i32,
    /// Instance release reports a failure.
    pub fail_release: bool,
    pub load_delay: Duration,
    pub process_delay: Duration,
}

/// One call to the engine's process entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub library: PathBuf,
    pub texture: u32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: i32,
    pub rotation: i32,
}

#[derive(Debug, Default)]
struct EngineLog {
    libraries_loaded: Vec<PathBuf>,
    bundles: Vec<(BundleKind, usize)>,
    setter_calls: usize,
    live_instances: usize,
    processed: Vec<ProcessRecord>,
    loads_started: usize,
    processes_started: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    log: Arc<Mutex<EngineLog>>,
}

impl EngineProbe {
    fn log(&self) -> MutexGuard<'_, EngineLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn libraries_loaded(&self) -> Vec<PathBuf> {
        self.log().libraries_loaded.clone()
    }

    pub fn bundles(&self) -> Vec<(BundleKind, usize)> {
        self.log().bundles.clone()
    }

    pub fn setter_calls(&self) -> usize {
        self.log().setter_calls
    }

    pub fn live_instances(&self) -> usize {
        self.log().live_instances
    }

    pub fn processed(&self) -> Vec<ProcessRecord> {
        self.log().processed.clone()
    }

    /// Load calls entered, counted before the scripted delay.
    pub fn loads_started(&self) -> usize {
        self.log().loads_started
    }

    /// Process calls entered, counted before the scripted delay.
    pub fn processes_started(&self) -> usize {
        self.log().processes_started
    }
}

/// Loader for [`PassthroughEngine`]; the library file itself is never read.
#[derive(Debug, Clone)]
pub struct PassthroughLoader {
    script: EngineScript,
    probe: EngineProbe,
}

impl PassthroughLoader {
    pub fn new(script: EngineScript, probe: EngineProbe) -> Self {
        Self { script, probe }
    }
}

impl EngineLoader for PassthroughLoader {
    fn load(&self, library: &Path) -> Result<Box<dyn NativeEngine>, LoadError> {
        self.probe.log().loads_started += 1;
        thread::sleep(self.script.load_delay);
        if let Some(message) = &self.script.fail_load {
            return Err(message.clone().into());
        }
        self.probe
            .log()
            .libraries_loaded
            .push(library.to_path_buf());
        Ok(Box::new(PassthroughEngine {
            library: library.to_path_buf(),
            script: self.script.clone(),
            probe: self.probe.clone(),
        }))
    }
}

/// Engine that leaves pixels untouched and returns its input texture.
pub struct PassthroughEngine {
    library: PathBuf,
    script: EngineScript,
    probe: EngineProbe,
}

impl NativeEngine for PassthroughEngine {
    fn create_instance(&self) -> Option<InstanceHandle> {
        if self.script.null_instance {
            return None;
        }
        self.probe.log().live_instances += 1;
        InstanceHandle::from_raw(std::ptr::NonNull::<std::ffi::c_void>::dangling().as_ptr())
    }

    fn destroy_instance(&self, _instance: InstanceHandle) -> Result<(), String> {
        let mut log = self.probe.log();
        log.live_instances = log.live_instances.saturating_sub(1);
        if self.script.fail_release {
            return Err("scripted release failure".into());
        }
        Ok(())
    }

    fn load_bundle(&self, _instance: &InstanceHandle, bytes: &[u8], kind: BundleKind) -> i32 {
        self.probe.log().bundles.push((kind, bytes.len()));
        0
    }

    fn set_parameter(&self, _instance: &InstanceHandle, _key: i32, _value: NativeArg<'_>) -> i32 {
        self.probe.log().setter_calls += 1;
        self.script.setter_status
    }

    unsafe fn process(&self, _instance: &InstanceHandle, input: &mut ImageInput) -> i32 {
        self.probe.log().processes_started += 1;
        thread::sleep(self.script.process_delay);
        self.probe.log().processed.push(ProcessRecord {
            library: self.library.clone(),
            texture: input.texture_id,
            width: input.width,
            height: input.height,
            stride: input.strides[0],
            format: input.format,
            rotation: input.rotation,
        });
        match self.script.process_code {
            Some(code) => code,
            None if input.texture_id != 0 => input.texture_id as i32,
            None => 1,
        }
    }
}

/// Worker platform built from the in-memory pieces above.
#[derive(Debug, Clone, Default)]
pub struct SoftPlatform {
    script: EngineScript,
    fail_context: Option<String>,
    gpu: GpuProbe,
    engine: EngineProbe,
}

impl SoftPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, script: EngineScript) -> Self {
        self.script = script;
        self
    }

    /// Context creation fails with this message.
    pub fn with_context_failure(mut self, message: impl Into<String>) -> Self {
        self.fail_context = Some(message.into());
        self
    }

    pub fn gpu_probe(&self) -> GpuProbe {
        self.gpu.clone()
    }

    pub fn engine_probe(&self) -> EngineProbe {
        self.engine.clone()
    }
}

impl Platform for SoftPlatform {
    type Context = SoftContext;
    type Loader = PassthroughLoader;

    fn create_context(&mut self) -> Result<SoftContext, ContextError> {
        if let Some(message) = &self.fail_context {
            return Err(ContextError::Creation(message.clone()));
        }
        Ok(SoftContext::new(self.gpu.clone()))
    }

    fn create_loader(&mut self) -> PassthroughLoader {
        PassthroughLoader::new(self.script.clone(), self.engine.clone())
    }
}
