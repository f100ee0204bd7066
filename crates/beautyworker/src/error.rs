use thiserror::Error;

use crate::context::ContextError;
use crate::engine::EngineError;
use crate::texture::TextureError;

/// Failure while bringing a worker up. The worker thread has already exited
/// by the time this is returned.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("graphics context setup failed: {0}")]
    Context(#[source] ContextError),
    #[error("texture bridge setup failed: {0}")]
    Texture(#[source] TextureError),
    #[error("engine setup failed: {0}")]
    Engine(#[source] EngineError),
    #[error("worker thread exited before reporting readiness")]
    Aborted,
}

/// Failure of a single job. The worker keeps serving later jobs.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error("effects worker is closed")]
    Closed,
}

impl JobError {
    pub fn is_closed(&self) -> bool {
        matches!(self, JobError::Closed)
    }
}
