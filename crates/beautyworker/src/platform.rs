use crate::context::{ContextError, GlutinContext, GraphicsContext, SurfaceSettings};
use crate::engine::ffi::{DylibLoader, EngineLoader};

/// Supplies the thread-affine pieces a worker builds on its own thread.
///
/// The platform value itself crosses into the worker thread; the context and
/// loader it produces never leave it.
pub trait Platform: Send + 'static {
    type Context: GraphicsContext;
    type Loader: EngineLoader;

    fn create_context(&mut self) -> Result<Self::Context, ContextError>;

    fn create_loader(&mut self) -> Self::Loader;
}

/// Hidden glutin window plus the vendor shared library.
#[derive(Debug, Clone, Default)]
pub struct NativePlatform {
    pub surface: SurfaceSettings,
}

impl Platform for NativePlatform {
    type Context = GlutinContext;
    type Loader = DylibLoader;

    fn create_context(&mut self) -> Result<GlutinContext, ContextError> {
        GlutinContext::create(&self.surface)
    }

    fn create_loader(&mut self) -> DylibLoader {
        DylibLoader
    }
}
