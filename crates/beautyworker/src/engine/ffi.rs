//! Native effects engine boundary.
//!
//! [`NativeEngine`] is the narrow set of calls the session makes into the
//! vendor library. [`DylibLoader`] resolves them from a shared library with
//! `libloading`; the software backend provides an in-process stand-in.

use std::error::Error;
use std::ffi::{c_int, c_uint, c_void, CStr};
use std::path::Path;
use std::ptr::{self, NonNull};

use libloading::Library;
use tracing::debug;

/// Error type returned by engine loaders.
pub type LoadError = Box<dyn Error + Send + Sync + 'static>;

/// Pixel formats understood by the engine's input descriptor.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Unknown = 0,
    Rgb = 1,
    Bgr = 2,
    Rgba = 3,
    Bgra = 4,
    Argb = 5,
    Abgr = 6,
    Gray = 7,
    Nv12 = 8,
    Nv21 = 9,
    I420 = 10,
    Texture = 11,
}

/// Kinds of resource bundle the engine accepts.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Filter = 0,
    Auth = 2,
    Sticker = 3,
}

/// Fixed-layout input descriptor passed to the process call.
#[repr(C)]
#[derive(Debug)]
pub struct ImageInput {
    pub texture_id: c_uint,
    pub width: c_int,
    pub height: c_int,
    pub data: [*const c_void; 3],
    pub strides: [c_int; 3],
    pub format: c_int,
    pub rotation: c_int,
}

impl ImageInput {
    pub fn for_texture(texture_id: u32, width: u32, height: u32, rotation: i32) -> Self {
        Self {
            texture_id,
            width: width as c_int,
            height: height as c_int,
            data: [ptr::null(); 3],
            strides: [0; 3],
            format: ImageFormat::Texture as c_int,
            rotation,
        }
    }

    /// Descriptor pointing at a single packed plane. The pointer is only
    /// valid for as long as the borrowed buffer.
    pub fn for_plane(
        plane: *const c_void,
        stride: usize,
        width: u32,
        height: u32,
        format: ImageFormat,
        rotation: i32,
    ) -> Self {
        Self {
            texture_id: 0,
            width: width as c_int,
            height: height as c_int,
            data: [plane, ptr::null(), ptr::null()],
            strides: [stride as c_int, 0, 0],
            format: format as c_int,
            rotation,
        }
    }
}

/// Non-null handle to one native engine instance. Not `Clone`: it is handed
/// back to [`NativeEngine::destroy_instance`] exactly once.
#[derive(Debug)]
pub struct InstanceHandle(NonNull<c_void>);

impl InstanceHandle {
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Setter argument, passed to the engine by reference.
#[derive(Debug, Clone, Copy)]
pub enum NativeArg<'a> {
    Number(&'a f32),
    Flag(&'a bool),
    Text(&'a CStr),
}

impl NativeArg<'_> {
    pub fn as_ptr(&self) -> *const c_void {
        match self {
            NativeArg::Number(value) => *value as *const f32 as *const c_void,
            NativeArg::Flag(value) => *value as *const bool as *const c_void,
            NativeArg::Text(value) => value.as_ptr() as *const c_void,
        }
    }
}

/// Calls into one loaded engine library.
pub trait NativeEngine {
    fn create_instance(&self) -> Option<InstanceHandle>;

    fn destroy_instance(&self, instance: InstanceHandle) -> Result<(), String>;

    /// Returns the native status; zero means the bundle was accepted.
    fn load_bundle(&self, instance: &InstanceHandle, bytes: &[u8], kind: BundleKind) -> i32;

    /// Returns the native status; zero means the value was applied.
    fn set_parameter(&self, instance: &InstanceHandle, key: i32, value: NativeArg<'_>) -> i32;

    /// Runs the blocking process call.
    ///
    /// # Safety
    ///
    /// Every pointer in `input` must reference memory that stays valid and
    /// correctly sized for the duration of the call, and the graphics context
    /// the instance was created under must be current.
    unsafe fn process(&self, instance: &InstanceHandle, input: &mut ImageInput) -> i32;
}

pub trait EngineLoader {
    fn load(&self, library: &Path) -> Result<Box<dyn NativeEngine>, LoadError>;
}

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type BundleFn = unsafe extern "C" fn(*mut c_void, *const c_void, c_int, c_int) -> c_int;
type SetParamFn = unsafe extern "C" fn(*mut c_void, c_int, *const c_void) -> c_int;
type ProcessFn = unsafe extern "C" fn(*mut c_void, *mut ImageInput) -> c_int;

const SYM_CREATE: &[u8] = b"PF_NewPixelFree\0";
const SYM_DESTROY: &[u8] = b"PF_DeletePixelFree\0";
const SYM_BUNDLE: &[u8] = b"PF_createBeautyItemFormBundle\0";
const SYM_PROCESS: &[u8] = b"PF_processWithBuffer\0";
// Older SDK builds only export the misspelled setter.
const SYM_SET_PARAM: [&[u8]; 2] = [
    b"PF_pixelFreeSetBeautyFilterParam\0",
    b"PF_pixelFreeSetBeautyFiterParam\0",
];

/// Loads the engine from a shared library on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl EngineLoader for DylibLoader {
    fn load(&self, library: &Path) -> Result<Box<dyn NativeEngine>, LoadError> {
        Ok(Box::new(DylibEngine::open(library)?))
    }
}

struct DylibEngine {
    create: CreateFn,
    destroy: Option<DestroyFn>,
    load_bundle: BundleFn,
    set_param: SetParamFn,
    process: ProcessFn,
    // Declared last so the function pointers above never outlive the mapping.
    _library: Library,
}

impl DylibEngine {
    fn open(path: &Path) -> Result<Self, LoadError> {
        // SAFETY: loading runs the library's initialisers; the vendor library
        // is trusted to have none with process-wide side effects.
        let library = unsafe { Library::new(path) }?;
        // SAFETY: the symbol types match the vendor SDK headers.
        let engine = unsafe {
            let create = *library.get::<CreateFn>(SYM_CREATE)?;
            let destroy = library.get::<DestroyFn>(SYM_DESTROY).ok().map(|sym| *sym);
            let load_bundle = *library.get::<BundleFn>(SYM_BUNDLE)?;
            let process = *library.get::<ProcessFn>(SYM_PROCESS)?;
            let set_param = match library.get::<SetParamFn>(SYM_SET_PARAM[0]) {
                Ok(sym) => *sym,
                Err(_) => *library.get::<SetParamFn>(SYM_SET_PARAM[1])?,
            };
            DylibEngine {
                create,
                destroy,
                load_bundle,
                set_param,
                process,
                _library: library,
            }
        };
        debug!(path = %path.display(), "resolved engine symbols");
        Ok(engine)
    }
}

impl NativeEngine for DylibEngine {
    fn create_instance(&self) -> Option<InstanceHandle> {
        // SAFETY: takes no arguments; a null return is handled by the caller.
        InstanceHandle::from_raw(unsafe { (self.create)() })
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> Result<(), String> {
        let destroy = self
            .destroy
            .ok_or_else(|| "library does not export PF_DeletePixelFree".to_string())?;
        // SAFETY: the handle came from `create_instance` and is consumed here.
        unsafe { destroy(instance.as_ptr()) };
        Ok(())
    }

    fn load_bundle(&self, instance: &InstanceHandle, bytes: &[u8], kind: BundleKind) -> i32 {
        let Ok(len) = c_int::try_from(bytes.len()) else {
            return -1;
        };
        // SAFETY: the engine copies the bundle before returning.
        unsafe {
            (self.load_bundle)(
                instance.as_ptr(),
                bytes.as_ptr() as *const c_void,
                len,
                kind as c_int,
            )
        }
    }

    fn set_parameter(&self, instance: &InstanceHandle, key: i32, value: NativeArg<'_>) -> i32 {
        // SAFETY: `value` borrows a live f32, bool or NUL-terminated string.
        unsafe { (self.set_param)(instance.as_ptr(), key, value.as_ptr()) }
    }

    unsafe fn process(&self, instance: &InstanceHandle, input: &mut ImageInput) -> i32 {
        (self.process)(instance.as_ptr(), input as *mut ImageInput)
    }
}
