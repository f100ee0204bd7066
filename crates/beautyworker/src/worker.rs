//! The job queue worker.
//!
//! One dedicated thread owns the graphics context, the texture bridge and the
//! engine session for the worker's whole life. Callers on any thread submit
//! jobs through a FIFO channel and block on a per-job reply channel, so native
//! calls are serialised without a lock around them.
//!
//! ```text
//!   caller threads                      worker thread
//!   ──────────────                      ─────────────
//!   process()/reload() ──▶ job queue ──▶ make_current ─▶ bridge / session
//!          ▲                                                   │
//!          └────────────────── reply channel ◀─────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::context::GraphicsContext;
use crate::engine::params::Parameters;
use crate::engine::rotation::{Rotation, RotationDegrees};
use crate::engine::{EngineConfig, EngineSession};
use crate::error::{JobError, OperationError, SetupError};
use crate::frame::FrameBuffer;
use crate::platform::{NativePlatform, Platform};
use crate::texture::{TextureBridge, TextureError, TextureLease};

/// How process jobs reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pipeline {
    /// Upload to a texture, process on the GPU, read back.
    #[default]
    Texture,
    /// Hand the host buffer to the engine directly.
    Buffer,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub pipeline: Pipeline,
    /// Upper bound on how long `close` waits for the thread to exit.
    pub close_timeout: Duration,
    pub thread_name: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            pipeline: Pipeline::Texture,
            close_timeout: Duration::from_secs(2),
            thread_name: "beautyfx-worker".into(),
        }
    }
}

/// Outcome of [`EffectsWorker::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// The worker thread exited and was joined.
    Stopped,
    /// The thread was still busy when the timeout elapsed and was detached.
    TimedOut,
    AlreadyClosed,
}

type Reply<T> = Sender<Result<T, OperationError>>;

struct ProcessRequest {
    frame: FrameBuffer,
    parameters: Parameters,
    rotation: RotationDegrees,
}

enum Job {
    Process {
        id: u64,
        request: ProcessRequest,
        reply: Reply<FrameBuffer>,
    },
    Reload {
        id: u64,
        config: EngineConfig,
        reply: Reply<()>,
    },
    Stop,
}

/// Thread-safe handle to a running worker.
pub struct EffectsWorker {
    jobs: Mutex<Option<Sender<Job>>>,
    // Never receives; disconnects when the worker thread returns.
    exited: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_job: AtomicU64,
    close_timeout: Duration,
}

impl EffectsWorker {
    /// Starts a worker on a hidden OpenGL context with the vendor library.
    pub fn spawn(config: EngineConfig, options: WorkerOptions) -> Result<Self, SetupError> {
        Self::spawn_with(NativePlatform::default(), config, options)
    }

    /// Starts a worker on `platform`, blocking until setup finished or failed.
    pub fn spawn_with<P: Platform>(
        platform: P,
        config: EngineConfig,
        options: WorkerOptions,
    ) -> Result<Self, SetupError> {
        let (job_tx, job_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let pipeline = options.pipeline;
        let handle = thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || {
                let _exit = exit_tx;
                run_worker_thread(platform, config, pipeline, job_rx, ready_tx);
            })
            .map_err(SetupError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                jobs: Mutex::new(Some(job_tx)),
                exited: exit_rx,
                handle: Mutex::new(Some(handle)),
                next_job: AtomicU64::new(1),
                close_timeout: options.close_timeout,
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SetupError::Aborted)
            }
        }
    }

    /// Runs one frame through the engine and returns the processed copy.
    pub fn process(
        &self,
        frame: FrameBuffer,
        parameters: Parameters,
        rotation: impl Into<RotationDegrees>,
    ) -> Result<FrameBuffer, JobError> {
        let request = ProcessRequest {
            frame,
            parameters,
            rotation: rotation.into(),
        };
        self.submit("process", |id, reply| Job::Process { id, request, reply })
    }

    /// Replaces the engine session with one built from `config`. Jobs queued
    /// after this call observe the new configuration.
    pub fn reload(&self, config: EngineConfig) -> Result<(), JobError> {
        self.submit("reload", |id, reply| Job::Reload { id, config, reply })
    }

    /// Stops the worker. Jobs already queued run first; anything submitted
    /// afterwards fails with [`JobError::Closed`].
    pub fn close(&self) -> CloseStatus {
        let Some(sender) = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return CloseStatus::AlreadyClosed;
        };
        let _ = sender.send(Job::Stop);
        drop(sender);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match self.exited.recv_timeout(self.close_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.close_timeout,
                    "effects worker still busy; detaching thread"
                );
                CloseStatus::TimedOut
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        error!("effects worker thread panicked");
                    }
                }
                CloseStatus::Stopped
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn submit<T>(
        &self,
        kind: &'static str,
        build: impl FnOnce(u64, Reply<T>) -> Job,
    ) -> Result<T, JobError> {
        let sender = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(JobError::Closed)?;
        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = bounded(1);
        sender
            .send(build(id, reply_tx))
            .map_err(|_| JobError::Closed)?;
        drop(sender);
        debug!(job = id, kind, "job queued");

        // The worker may finish this job and exit in the same instant, so a
        // pending reply still wins over the exit signal.
        let outcome = select! {
            recv(reply_rx) -> reply => reply.ok(),
            recv(self.exited) -> _ => reply_rx.try_recv().ok(),
        };
        match outcome {
            Some(result) => result.map_err(JobError::from),
            None => {
                debug!(job = id, kind, "worker exited before replying");
                Err(JobError::Closed)
            }
        }
    }
}

impl Drop for EffectsWorker {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker_thread<P: Platform>(
    mut platform: P,
    config: EngineConfig,
    pipeline: Pipeline,
    jobs: Receiver<Job>,
    ready_tx: Sender<Result<(), SetupError>>,
) {
    let mut state = match WorkerState::start(&mut platform, &config, pipeline) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "effects worker failed to start");
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    info!(path = %config.library().display(), ?pipeline, "effects worker ready");
    let _ = ready_tx.send(Ok(()));

    state.run(&jobs);

    let abandoned = jobs.try_iter().count();
    if abandoned > 0 {
        debug!(abandoned, "discarded jobs queued behind stop");
    }
    state.shutdown();
}

struct WorkerState<P: Platform> {
    context: P::Context,
    bridge: TextureBridge<<P::Context as GraphicsContext>::Api>,
    session: EngineSession,
    loader: P::Loader,
    pipeline: Pipeline,
}

impl<P: Platform> WorkerState<P> {
    /// Context, entry points, bridge, session; each failure unwinds the
    /// steps before it.
    fn start(
        platform: &mut P,
        config: &EngineConfig,
        pipeline: Pipeline,
    ) -> Result<Self, SetupError> {
        let mut context = platform.create_context().map_err(SetupError::Context)?;
        let functions = match context
            .make_current()
            .and_then(|()| context.load_functions())
        {
            Ok(functions) => functions,
            Err(err) => {
                context.destroy();
                return Err(SetupError::Context(err));
            }
        };
        let mut bridge = match TextureBridge::new(functions) {
            Ok(bridge) => bridge,
            Err(err) => {
                context.destroy();
                return Err(SetupError::Texture(err));
            }
        };
        let loader = platform.create_loader();
        let mut session = EngineSession::new();
        if let Err(err) = session.open(&loader, config) {
            bridge.close();
            context.destroy();
            return Err(SetupError::Engine(err));
        }
        Ok(Self {
            context,
            bridge,
            session,
            loader,
            pipeline,
        })
    }

    fn run(&mut self, jobs: &Receiver<Job>) {
        for job in jobs.iter() {
            match job {
                Job::Stop => {
                    debug!("stop requested");
                    break;
                }
                Job::Process { id, request, reply } => {
                    debug!(job = id, kind = "process", "job executing");
                    let result = self.process(request);
                    log_outcome(id, "process", &result);
                    let _ = reply.send(result);
                }
                Job::Reload { id, config, reply } => {
                    debug!(job = id, kind = "reload", "job executing");
                    let result = self.reload(config);
                    log_outcome(id, "reload", &result);
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn process(&mut self, request: ProcessRequest) -> Result<FrameBuffer, OperationError> {
        self.context.make_current()?;
        let rotation = Rotation::from(&request.rotation);
        match self.pipeline {
            Pipeline::Texture => self.process_texture(request.frame, &request.parameters, rotation),
            Pipeline::Buffer => {
                self.session.apply_parameters(&request.parameters)?;
                Ok(self.session.process_frame(request.frame, rotation)?)
            }
        }
    }

    fn process_texture(
        &mut self,
        frame: FrameBuffer,
        parameters: &Parameters,
        rotation: Rotation,
    ) -> Result<FrameBuffer, OperationError> {
        let layout = frame.layout().ok_or(TextureError::UnsupportedFormat {
            channels: frame.channels(),
        })?;
        let input = self.bridge.upload(&frame)?;
        // Released on every path out of this function.
        let _lease = TextureLease::new(&self.bridge, input.id);

        self.session.apply_parameters(parameters)?;
        let output = self
            .session
            .process_texture(input.id, input.width, input.height, rotation)?;
        Ok(self
            .bridge
            .read_back(output, input.width, input.height, layout)?)
    }

    fn reload(&mut self, config: EngineConfig) -> Result<(), OperationError> {
        self.context.make_current()?;
        self.session.close();
        self.session.open(&self.loader, &config)?;
        info!(path = %config.library().display(), "engine reloaded");
        Ok(())
    }

    fn shutdown(mut self) {
        if let Err(err) = self.context.make_current() {
            warn!(error = %err, "could not make context current for teardown");
        }
        self.session.close();
        self.bridge.close();
        self.context.destroy();
        info!("effects worker stopped");
    }
}

fn log_outcome<T>(id: u64, kind: &'static str, result: &Result<T, OperationError>) {
    match result {
        Ok(_) => debug!(job = id, kind, "job completed"),
        Err(err) => warn!(job = id, kind, error = %err, "job failed"),
    }
}
