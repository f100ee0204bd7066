//! Engine session: one native effects instance and its parameter cache.
//!
//! ```text
//!   Uninitialized ──open──▶ Ready ──close──▶ Closed
//!                             ▲                 │
//!                             └──────open───────┘
//! ```
//!
//! A session never mutates its configuration in place; opening with a new
//! [`EngineConfig`] tears the previous instance down first and starts from an
//! empty parameter cache.

pub mod ffi;
pub mod params;
pub mod rotation;

use std::ffi::CString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{FrameBuffer, PixelLayout};
use crate::gl::TextureId;

use self::ffi::{
    BundleKind, EngineLoader, ImageFormat, ImageInput, InstanceHandle, LoadError, NativeArg,
    NativeEngine,
};
use self::params::{ParameterCache, ParameterKey, ParameterValue, Parameters};
use self::rotation::Rotation;

pub const DEFAULT_LIBRARY_STEM: &str = "PixelFree";
pub const DEFAULT_AUTH_FILE: &str = "pixelfreeAuth.lic";
pub const DEFAULT_FILTER_FILE: &str = "filter_model.bundle";

/// Resources a session needs before it can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Library,
    Auth,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Library => f.write_str("engine library"),
            Resource::Auth => f.write_str("auth bundle"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{resource} not found at {}", path.display())]
    MissingResource { resource: Resource, path: PathBuf },
    #[error("failed to load engine library {}: {source}", path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error("engine returned a null instance")]
    InstanceCreation,
    #[error("engine session is not open")]
    NotReady,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("invalid texture {texture} ({width}x{height})")]
    InvalidTexture { texture: u32, width: u32, height: u32 },
    #[error("cannot encode parameter {key}: {reason}")]
    InvalidParameter { key: ParameterKey, reason: String },
    #[error("engine processing failed with code {0}")]
    ProcessingFailed(i32),
}

/// Locations of the native resources a session loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    library: PathBuf,
    auth: PathBuf,
    filter: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(library: impl AsRef<Path>, auth: impl AsRef<Path>) -> Self {
        Self {
            library: normalize(library.as_ref()),
            auth: normalize(auth.as_ref()),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl AsRef<Path>) -> Self {
        self.filter = Some(normalize(filter.as_ref()));
        self
    }

    /// Standard SDK layout: platform library, auth licence and filter bundle
    /// side by side in `dir`.
    pub fn from_base_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join(libloading::library_filename(DEFAULT_LIBRARY_STEM)),
            dir.join(DEFAULT_AUTH_FILE),
        )
        .with_filter(dir.join(DEFAULT_FILTER_FILE))
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    pub fn auth(&self) -> &Path {
        &self.auth
    }

    pub fn filter(&self) -> Option<&Path> {
        self.filter.as_deref()
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Closed,
}

/// Loaded library plus the instance created from it. Dropping the binding
/// releases the instance before the library is unloaded.
struct NativeBinding {
    instance: Option<InstanceHandle>,
    engine: Box<dyn NativeEngine>,
}

impl NativeBinding {
    fn instance(&self) -> Result<&InstanceHandle, EngineError> {
        self.instance.as_ref().ok_or(EngineError::NotReady)
    }

    fn release(&mut self) {
        if let Some(instance) = self.instance.take() {
            match self.engine.destroy_instance(instance) {
                Ok(()) => debug!("released engine instance"),
                Err(reason) => warn!(%reason, "failed to release engine instance"),
            }
        }
    }

    fn load_bundle(&self, path: &Path, kind: BundleKind) {
        let Ok(instance) = self.instance() else {
            return;
        };
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), ?kind, error = %err, "failed to read bundle");
                return;
            }
        };
        let code = self.engine.load_bundle(instance, &bytes, kind);
        if code == 0 {
            debug!(path = %path.display(), ?kind, bytes = bytes.len(), "loaded bundle");
        } else {
            warn!(path = %path.display(), ?kind, code, "engine rejected bundle");
        }
    }
}

impl Drop for NativeBinding {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct EngineSession {
    state: SessionState,
    config: Option<EngineConfig>,
    binding: Option<NativeBinding>,
    cache: ParameterCache,
}

impl Default for EngineSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            config: None,
            binding: None,
            cache: ParameterCache::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration adopted by the last successful `open`.
    pub fn config(&self) -> Option<&EngineConfig> {
        self.config.as_ref()
    }

    pub fn cache(&self) -> &ParameterCache {
        &self.cache
    }

    /// Loads the library, creates an instance and feeds it the bundles.
    ///
    /// An already open session is closed first. Bundle problems are logged and
    /// do not fail the call.
    pub fn open(
        &mut self,
        loader: &dyn EngineLoader,
        config: &EngineConfig,
    ) -> Result<(), EngineError> {
        self.close();

        for (resource, path) in [
            (Resource::Library, config.library()),
            (Resource::Auth, config.auth()),
        ] {
            if !path.is_file() {
                return Err(EngineError::MissingResource {
                    resource,
                    path: path.to_path_buf(),
                });
            }
        }

        let engine = loader
            .load(config.library())
            .map_err(|source| EngineError::LibraryLoad {
                path: config.library().to_path_buf(),
                source,
            })?;
        let instance = engine
            .create_instance()
            .ok_or(EngineError::InstanceCreation)?;
        let binding = NativeBinding {
            instance: Some(instance),
            engine,
        };

        binding.load_bundle(config.auth(), BundleKind::Auth);
        if let Some(filter) = config.filter() {
            if filter.is_file() {
                binding.load_bundle(filter, BundleKind::Filter);
            } else {
                warn!(path = %filter.display(), "filter bundle not found; continuing without it");
            }
        }

        self.binding = Some(binding);
        self.config = Some(config.clone());
        self.state = SessionState::Ready;
        info!(path = %config.library().display(), "engine session ready");
        Ok(())
    }

    /// Releases the native instance. Safe to call in any state.
    pub fn close(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            binding.release();
        }
        self.cache.clear();
        if self.state == SessionState::Ready {
            self.state = SessionState::Closed;
            debug!("engine session closed");
        }
    }

    /// Sends every parameter whose value differs from the last applied one.
    ///
    /// Returns how many values the engine accepted. A value the engine rejects
    /// stays out of the cache so the next call sends it again.
    pub fn apply_parameters(&mut self, params: &Parameters) -> Result<usize, EngineError> {
        let binding = self.binding.as_ref().ok_or(EngineError::NotReady)?;
        let instance = binding.instance()?;
        let mut applied = 0;

        for (key, value) in params.iter() {
            let Some(value) = value else { continue };
            if !key.is_forwarded() {
                continue;
            }
            let value = value.normalized();
            if self.cache.is_current(key, &value) {
                continue;
            }

            let id = key.native_id();
            let code = match &value {
                ParameterValue::Number(number) => {
                    binding
                        .engine
                        .set_parameter(instance, id, NativeArg::Number(number))
                }
                ParameterValue::Flag(flag) => {
                    binding
                        .engine
                        .set_parameter(instance, id, NativeArg::Flag(flag))
                }
                ParameterValue::Text(text) => {
                    let encoded = CString::new(text.as_bytes()).map_err(|_| {
                        EngineError::InvalidParameter {
                            key,
                            reason: "text contains a NUL byte".into(),
                        }
                    })?;
                    binding
                        .engine
                        .set_parameter(instance, id, NativeArg::Text(&encoded))
                }
            };

            if code == 0 {
                debug!(parameter = key.name(), %value, "applied parameter");
            } else {
                debug!(parameter = key.name(), %value, code, "engine reported non-zero status");
            }
            self.cache.record(key, value);
            applied += 1;
        }
        Ok(applied)
    }

    /// Processes a BGR/BGRA buffer in place and hands it back.
    pub fn process_frame(
        &mut self,
        mut frame: FrameBuffer,
        rotation: Rotation,
    ) -> Result<FrameBuffer, EngineError> {
        let binding = self.binding.as_ref().ok_or(EngineError::NotReady)?;
        let instance = binding.instance()?;
        let format = match frame.layout() {
            Some(PixelLayout::Bgr) => ImageFormat::Bgr,
            Some(PixelLayout::Bgra) => ImageFormat::Bgra,
            None => {
                return Err(EngineError::InvalidFrame(format!(
                    "expected 3 or 4 channels, got {}",
                    frame.channels()
                )))
            }
        };
        let (width, height, stride) = (frame.width(), frame.height(), frame.stride());
        if i32::try_from(stride).is_err() || i32::try_from(height).is_err() {
            return Err(EngineError::InvalidFrame(format!(
                "{width}x{height} exceeds the engine's size limits"
            )));
        }

        let pixels = frame.as_bytes_mut();
        let mut input = ImageInput::for_plane(
            pixels.as_mut_ptr() as *const _,
            stride,
            width,
            height,
            format,
            rotation.native(),
        );
        // SAFETY: `input` points into `frame`, which is exclusively borrowed
        // and outlives the call.
        let code = unsafe { binding.engine.process(instance, &mut input) };
        if code <= 0 {
            return Err(EngineError::ProcessingFailed(code));
        }
        debug!(width, height, code, "processed frame buffer");
        Ok(frame)
    }

    /// Processes a GPU texture and returns the engine's output texture.
    pub fn process_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Result<TextureId, EngineError> {
        let binding = self.binding.as_ref().ok_or(EngineError::NotReady)?;
        let instance = binding.instance()?;
        if texture.is_null() || width == 0 || height == 0 {
            return Err(EngineError::InvalidTexture {
                texture: texture.0,
                width,
                height,
            });
        }

        let mut input = ImageInput::for_texture(texture.0, width, height, rotation.native());
        // SAFETY: a texture descriptor carries no host pointers.
        let code = unsafe { binding.engine.process(instance, &mut input) };
        if code <= 0 {
            return Err(EngineError::ProcessingFailed(code));
        }
        debug!(texture = texture.0, output = code, "processed texture");
        Ok(TextureId(code as u32))
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::{EngineProbe, EngineScript, PassthroughLoader};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: EngineConfig,
    }

    fn fixture(with_filter: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let library = dir.path().join("libPixelFree.so");
        let auth = dir.path().join(DEFAULT_AUTH_FILE);
        fs::write(&library, b"stub").unwrap();
        fs::write(&auth, b"licence").unwrap();
        let mut config = EngineConfig::new(&library, &auth);
        if with_filter {
            let filter = dir.path().join(DEFAULT_FILTER_FILE);
            fs::write(&filter, b"filters").unwrap();
            config = config.with_filter(filter);
        }
        Fixture { _dir: dir, config }
    }

    fn loader(script: EngineScript) -> (PassthroughLoader, EngineProbe) {
        let probe = EngineProbe::default();
        (PassthroughLoader::new(script, probe.clone()), probe)
    }

    fn open_session(fixture: &Fixture) -> (EngineSession, EngineProbe) {
        let (loader, probe) = loader(EngineScript::default());
        let mut session = EngineSession::new();
        session.open(&loader, &fixture.config).unwrap();
        (session, probe)
    }

    #[test]
    fn open_loads_auth_then_filter_bundles() {
        let fixture = fixture(true);
        let (session, probe) = open_session(&fixture);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            probe.bundles(),
            vec![(BundleKind::Auth, 7), (BundleKind::Filter, 7)]
        );
        assert_eq!(probe.live_instances(), 1);
    }

    #[test]
    fn missing_auth_names_the_path() {
        let fixture = fixture(false);
        fs::remove_file(fixture.config.auth()).unwrap();
        let (loader, probe) = loader(EngineScript::default());
        let mut session = EngineSession::new();
        let err = session.open(&loader, &fixture.config).unwrap_err();
        match &err {
            EngineError::MissingResource { resource, path } => {
                assert_eq!(*resource, Resource::Auth);
                assert_eq!(path, fixture.config.auth());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains(DEFAULT_AUTH_FILE));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(probe.libraries_loaded().is_empty());
    }

    #[test]
    fn missing_filter_is_tolerated() {
        let fixture = fixture(false);
        let config = fixture.config.clone().with_filter("/nonexistent/filter_model.bundle");
        let (loader, probe) = loader(EngineScript::default());
        let mut session = EngineSession::new();
        session.open(&loader, &config).unwrap();
        assert_eq!(probe.bundles(), vec![(BundleKind::Auth, 7)]);
    }

    #[test]
    fn load_failure_wraps_loader_error() {
        let fixture = fixture(false);
        let (loader, _probe) = loader(EngineScript {
            fail_load: Some("file not found".into()),
            ..EngineScript::default()
        });
        let err = EngineSession::new()
            .open(&loader, &fixture.config)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("file not found"), "{message}");
        assert!(message.contains("libPixelFree.so"), "{message}");
    }

    #[test]
    fn null_instance_is_an_error() {
        let fixture = fixture(false);
        let (loader, _probe) = loader(EngineScript {
            null_instance: true,
            ..EngineScript::default()
        });
        let err = EngineSession::new()
            .open(&loader, &fixture.config)
            .unwrap_err();
        assert!(matches!(err, EngineError::InstanceCreation));
    }

    #[test]
    fn close_is_idempotent_and_releases_instance() {
        let fixture = fixture(false);
        let (mut session, probe) = open_session(&fixture);
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(probe.live_instances(), 0);
        assert!(matches!(
            session.apply_parameters(&Parameters::new()),
            Err(EngineError::NotReady)
        ));
    }

    #[test]
    fn close_tolerates_failed_native_release() {
        let fixture = fixture(false);
        let (loader, probe) = loader(EngineScript {
            fail_release: true,
            ..EngineScript::default()
        });
        let mut session = EngineSession::new();
        session.open(&loader, &fixture.config).unwrap();

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(probe.live_instances(), 0);

        session.open(&loader, &fixture.config).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(probe.live_instances(), 1);
    }

    #[test]
    fn reopening_replaces_the_instance_and_cache() {
        let fixture = fixture(false);
        let (mut session, probe) = open_session(&fixture);
        let params = Parameters::new().with(ParameterKey::BlurStrength, 0.5_f32);
        session.apply_parameters(&params).unwrap();
        assert_eq!(session.cache().len(), 1);

        let loader = PassthroughLoader::new(EngineScript::default(), probe.clone());
        session.open(&loader, &fixture.config).unwrap();
        assert_eq!(probe.live_instances(), 1);
        assert!(session.cache().is_empty());
    }

    #[test]
    fn identical_parameters_are_sent_once() {
        let fixture = fixture(false);
        let (mut session, probe) = open_session(&fixture);
        let params = Parameters::new()
            .with(ParameterKey::BlurStrength, 0.6_f32)
            .with(ParameterKey::FilterName, "heibai1")
            .with(ParameterKey::Sticker2dFilter, true);

        assert_eq!(session.apply_parameters(&params).unwrap(), 3);
        let calls = probe.setter_calls();
        assert_eq!(session.apply_parameters(&params).unwrap(), 0);
        assert_eq!(probe.setter_calls(), calls);
    }

    #[test]
    fn clamped_values_compare_after_clamping() {
        let fixture = fixture(false);
        let (mut session, probe) = open_session(&fixture);
        session
            .apply_parameters(&Parameters::new().with(ParameterKey::WhitenStrength, 1.4_f32))
            .unwrap();
        session
            .apply_parameters(&Parameters::new().with(ParameterKey::WhitenStrength, 1.0_f32))
            .unwrap();
        assert_eq!(probe.setter_calls(), 1);
        assert_eq!(
            session.cache().get(ParameterKey::WhitenStrength),
            Some(&ParameterValue::Number(1.0))
        );
    }

    #[test]
    fn one_key_and_unset_entries_are_skipped() {
        let fixture = fixture(false);
        let (mut session, probe) = open_session(&fixture);
        let mut params = Parameters::new().with(ParameterKey::OneKey, 1.0_f32);
        params.unset(ParameterKey::FilterName);
        assert_eq!(session.apply_parameters(&params).unwrap(), 0);
        assert_eq!(probe.setter_calls(), 0);
    }

    #[test]
    fn non_zero_setter_status_is_cached_like_success() {
        let fixture = fixture(false);
        let (loader, probe) = loader(EngineScript {
            setter_status: 3,
            ..EngineScript::default()
        });
        let mut session = EngineSession::new();
        session.open(&loader, &fixture.config).unwrap();
        let params = Parameters::new().with(ParameterKey::FilterStrength, 0.3_f32);
        assert_eq!(session.apply_parameters(&params).unwrap(), 1);
        for _ in 0..100 {
            assert_eq!(session.apply_parameters(&params).unwrap(), 0);
        }
        assert_eq!(probe.setter_calls(), 1);
        assert_eq!(
            session.cache().get(ParameterKey::FilterStrength),
            Some(&ParameterValue::Number(0.3))
        );
    }

    #[test]
    fn text_with_nul_is_rejected() {
        let fixture = fixture(false);
        let (mut session, _probe) = open_session(&fixture);
        let params = Parameters::new().with(ParameterKey::FilterName, "bad\0name");
        assert!(matches!(
            session.apply_parameters(&params),
            Err(EngineError::InvalidParameter {
                key: ParameterKey::FilterName,
                ..
            })
        ));
    }

    #[test]
    fn process_frame_returns_the_same_buffer() {
        let fixture = fixture(false);
        let (mut session, probe) = open_session(&fixture);
        let frame = FrameBuffer::new(2, 2, 3, (0..12).collect()).unwrap();
        let out = session
            .process_frame(frame.clone(), Rotation::Half)
            .unwrap();
        assert_eq!(out, frame);
        let record = probe.processed().pop().unwrap();
        assert_eq!(record.format, ImageFormat::Bgr as i32);
        assert_eq!(record.rotation, Rotation::Half.native());
        assert_eq!(record.stride, 6);
    }

    #[test]
    fn process_frame_rejects_gray_input() {
        let fixture = fixture(false);
        let (mut session, _probe) = open_session(&fixture);
        let gray = FrameBuffer::new(2, 2, 1, vec![0; 4]).unwrap();
        assert!(matches!(
            session.process_frame(gray, Rotation::None),
            Err(EngineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn non_positive_process_code_is_a_failure() {
        let fixture = fixture(false);
        let (loader, _probe) = loader(EngineScript {
            process_code: Some(0),
            ..EngineScript::default()
        });
        let mut session = EngineSession::new();
        session.open(&loader, &fixture.config).unwrap();
        let err = session
            .process_texture(TextureId(5), 4, 4, Rotation::None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProcessingFailed(0)));
    }

    #[test]
    fn null_texture_is_invalid() {
        let fixture = fixture(false);
        let (mut session, _probe) = open_session(&fixture);
        assert!(matches!(
            session.process_texture(TextureId::NULL, 4, 4, Rotation::None),
            Err(EngineError::InvalidTexture { .. })
        ));
    }

    #[test]
    fn base_dir_layout_uses_platform_library_name() {
        let config = EngineConfig::from_base_dir("dependencies/./pixel_free");
        assert_eq!(
            config.library(),
            Path::new("dependencies/pixel_free").join(libloading::library_filename("PixelFree"))
        );
        assert_eq!(
            config.auth(),
            Path::new("dependencies/pixel_free/pixelfreeAuth.lic")
        );
        assert_eq!(
            config.filter(),
            Some(Path::new("dependencies/pixel_free/filter_model.bundle"))
        );
    }
}
