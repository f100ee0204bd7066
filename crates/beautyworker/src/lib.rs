//! Thread-confined job worker for a native beauty-effects engine.
//!
//! The engine is only valid while the OpenGL context it was created under is
//! current, and its process call is blocking and non-reentrant. This crate
//! hides both constraints behind [`EffectsWorker`], a `Send + Sync` handle
//! whose methods can be called from any thread:
//!
//! ```text
//!   EffectsWorker::spawn ──▶ worker thread
//!                             ├─ GraphicsContext   hidden surface, GL 3.3
//!                             ├─ TextureBridge     frame ⇄ texture
//!                             └─ EngineSession     native instance + cache
//!
//!   process(frame, params, rotation) ─┐
//!   reload(config) ───────────────────┼─▶ FIFO ─▶ executed one at a time
//!   close() ──────────────────────────┘
//! ```
//!
//! Everything below the worker is pluggable through [`Platform`]. Production
//! code uses [`NativePlatform`] (glutin + libloading); [`soft::SoftPlatform`]
//! replaces the GPU and the vendor library with in-memory stand-ins.

pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gl;
pub mod platform;
pub mod soft;
pub mod texture;
pub mod worker;

pub use context::{ContextError, GlutinContext, GraphicsContext, SurfaceSettings};
pub use engine::ffi::{BundleKind, DylibLoader, EngineLoader, ImageFormat, NativeEngine};
pub use engine::params::{ParameterCache, ParameterKey, ParameterValue, Parameters};
pub use engine::rotation::{Rotation, RotationDegrees};
pub use engine::{EngineConfig, EngineError, EngineSession, Resource, SessionState};
pub use error::{JobError, OperationError, SetupError};
pub use frame::{FrameBuffer, FrameError, PixelLayout};
pub use gl::{GlApi, TextureId};
pub use platform::{NativePlatform, Platform};
pub use texture::{TextureBridge, TextureError, UploadedTexture};
pub use worker::{CloseStatus, EffectsWorker, Pipeline, WorkerOptions};
