//! Hidden-surface OpenGL context owned by the worker thread.

use std::ffi::CString;
use std::num::NonZeroU32;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use glow::HasContext;
use glutin::config::ConfigTemplateBuilder;
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, PossiblyCurrentContext, Version,
};
use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use glutin::surface::{Surface, SurfaceAttributesBuilder, WindowSurface};
use glutin_winit::DisplayBuilder;
use raw_window_handle::HasRawWindowHandle;
use thiserror::Error;
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::{EventLoop, EventLoopBuilder};
use winit::window::{Window, WindowBuilder};

use crate::gl::GlApi;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to initialise windowing subsystem: {0}")]
    Windowing(String),
    #[error("failed to create OpenGL context: {0}")]
    Creation(String),
    #[error("failed to make OpenGL context current: {0}")]
    MakeCurrent(String),
    #[error("failed to load OpenGL entry points: {0}")]
    FunctionLoad(String),
    #[error("graphics context has been destroyed")]
    Destroyed,
}

/// A graphics context bound to exactly one thread.
///
/// `load_functions` resolves the GL entry points the first time it is called
/// and hands out the same table afterwards.
pub trait GraphicsContext {
    type Api: GlApi;

    fn make_current(&mut self) -> Result<(), ContextError>;

    fn load_functions(&mut self) -> Result<Rc<Self::Api>, ContextError>;

    /// Releases the surface and the windowing handle. Safe to call twice.
    fn destroy(&mut self);
}

/// Settings for the hidden surface backing [`GlutinContext`].
#[derive(Debug, Clone)]
pub struct SurfaceSettings {
    pub title: String,
    pub size: (u32, u32),
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            title: "beautyfx offscreen".into(),
            size: (4, 4),
        }
    }
}

/// OpenGL 3.3 compatibility context on an invisible winit window.
///
/// winit permits a single event loop per process, so at most one of these can
/// exist over the lifetime of the program.
pub struct GlutinContext {
    context: Option<PossiblyCurrentContext>,
    surface: Option<Surface<WindowSurface>>,
    window: Option<Window>,
    event_loop: Option<EventLoop<()>>,
    functions: Option<Rc<glow::Context>>,
}

impl GlutinContext {
    pub fn create(settings: &SurfaceSettings) -> Result<Self, ContextError> {
        let mut builder = EventLoopBuilder::new();
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            use winit::platform::wayland::EventLoopBuilderExtWayland;
            EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
        }
        #[cfg(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        ))]
        {
            use winit::platform::x11::EventLoopBuilderExtX11;
            EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
        }
        #[cfg(target_os = "windows")]
        {
            use winit::platform::windows::EventLoopBuilderExtWindows;
            EventLoopBuilderExtWindows::with_any_thread(&mut builder, true);
        }
        let event_loop = builder
            .build()
            .map_err(|err| ContextError::Windowing(err.to_string()))?;

        let (width, height) = settings.size;
        let window_builder = WindowBuilder::new()
            .with_title(settings.title.clone())
            .with_visible(false)
            .with_inner_size(PhysicalSize::new(width, height));

        let template = ConfigTemplateBuilder::new().with_alpha_size(8);
        // The picker has to hand back a config, so an empty list unwinds out of
        // the builder and is turned into an error here.
        let built = guard_config_pick(|| {
            DisplayBuilder::new()
                .with_window_builder(Some(window_builder))
                .build(&event_loop, template, |configs| {
                    match fewest_samples(configs, |config| config.num_samples()) {
                        Some(config) => config,
                        None => panic::resume_unwind(Box::new(NoFramebufferConfigs)),
                    }
                })
        })?;
        let (window, gl_config) = built.map_err(|err| ContextError::Creation(err.to_string()))?;
        let window = window
            .ok_or_else(|| ContextError::Windowing("display builder produced no window".into()))?;

        let raw_window_handle = window.raw_window_handle();
        let display = gl_config.display();
        let attributes = ContextAttributesBuilder::new()
            .with_profile(GlProfile::Compatibility)
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(raw_window_handle));
        let not_current = unsafe { display.create_context(&gl_config, &attributes) }
            .map_err(|err| ContextError::Creation(err.to_string()))?;

        let surface_attributes = SurfaceAttributesBuilder::<WindowSurface>::new().build(
            raw_window_handle,
            NonZeroU32::new(width).unwrap_or(NonZeroU32::MIN),
            NonZeroU32::new(height).unwrap_or(NonZeroU32::MIN),
        );
        let surface = unsafe { display.create_window_surface(&gl_config, &surface_attributes) }
            .map_err(|err| ContextError::Creation(err.to_string()))?;
        let context = not_current
            .make_current(&surface)
            .map_err(|err| ContextError::MakeCurrent(err.to_string()))?;

        info!(width, height, "created hidden OpenGL 3.3 compatibility context");
        Ok(Self {
            context: Some(context),
            surface: Some(surface),
            window: Some(window),
            event_loop: Some(event_loop),
            functions: None,
        })
    }
}

/// Unwind payload raised by the config picker when the display has nothing to offer.
struct NoFramebufferConfigs;

fn guard_config_pick<T>(build: impl FnOnce() -> T) -> Result<T, ContextError> {
    match panic::catch_unwind(AssertUnwindSafe(build)) {
        Ok(value) => Ok(value),
        Err(payload) if payload.is::<NoFramebufferConfigs>() => Err(ContextError::Creation(
            "display offered no framebuffer configs".into(),
        )),
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Cheapest config: the first one with the fewest multisample samples.
fn fewest_samples<C>(configs: impl Iterator<Item = C>, samples: impl Fn(&C) -> u8) -> Option<C> {
    configs.reduce(|best, next| if samples(&next) < samples(&best) { next } else { best })
}

impl GraphicsContext for GlutinContext {
    type Api = glow::Context;

    fn make_current(&mut self) -> Result<(), ContextError> {
        let (Some(context), Some(surface)) = (self.context.as_ref(), self.surface.as_ref()) else {
            return Err(ContextError::Destroyed);
        };
        context
            .make_current(surface)
            .map_err(|err| ContextError::MakeCurrent(err.to_string()))
    }

    fn load_functions(&mut self) -> Result<Rc<glow::Context>, ContextError> {
        if let Some(functions) = &self.functions {
            return Ok(Rc::clone(functions));
        }
        let context = self.context.as_ref().ok_or(ContextError::Destroyed)?;
        let display = context.display();
        let functions = unsafe {
            glow::Context::from_loader_function(|symbol| match CString::new(symbol) {
                Ok(name) => display.get_proc_address(&name),
                Err(_) => std::ptr::null(),
            })
        };
        let version = functions.version();
        if version.major < 3 {
            return Err(ContextError::FunctionLoad(format!(
                "driver reports OpenGL {}.{}",
                version.major, version.minor
            )));
        }
        debug!(major = version.major, minor = version.minor, "resolved OpenGL entry points");
        let functions = Rc::new(functions);
        self.functions = Some(Rc::clone(&functions));
        Ok(functions)
    }

    fn destroy(&mut self) {
        if self.event_loop.is_none() {
            return;
        }
        self.functions = None;
        self.context = None;
        self.surface = None;
        self.window = None;
        self.event_loop = None;
        debug!("destroyed hidden OpenGL context");
    }
}

impl Drop for GlutinContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_first_config_with_fewest_samples() {
        let configs = [(4, "msaa4"), (0, "plain"), (0, "plain-late"), (8, "msaa8")];
        let picked = fewest_samples(configs.into_iter(), |(samples, _)| *samples);
        assert_eq!(picked, Some((0, "plain")));
        assert_eq!(fewest_samples(std::iter::empty::<(u8, &str)>(), |c| c.0), None);
    }

    #[test]
    fn empty_config_list_becomes_a_creation_error() {
        let err = guard_config_pick(|| -> u32 {
            panic::resume_unwind(Box::new(NoFramebufferConfigs))
        })
        .unwrap_err();
        assert!(matches!(err, ContextError::Creation(_)));
        assert!(err.to_string().contains("no framebuffer configs"));
        assert_eq!(guard_config_pick(|| 7).unwrap(), 7);
    }
}
