use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use beautyworker::soft::SoftPlatform;
use beautyworker::{EffectsWorker, EngineConfig, ParameterKey, WorkerOptions};
use presetconfig::PresetConfig;
use tracing_subscriber::EnvFilter;

use crate::bindings::{map_pipeline, resolve_engine_config, resolve_parameters};
use crate::cli::{Backend, ProcessArgs, ResourceArgs};
use crate::frames::{load_frame, save_frame};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads an explicit config file, or the one in the config directory when present.
pub fn load_config(explicit: Option<&Path>) -> Result<PresetConfig> {
    match explicit {
        Some(path) => {
            if !path.is_file() {
                bail!("configuration file {} does not exist", path.display());
            }
            PresetConfig::load_or_default(path)
                .with_context(|| format!("failed to load {}", path.display()))
        }
        None => {
            let path = AppPaths::discover()?.config_file();
            tracing::debug!(config = %path.display(), "looking for configuration");
            PresetConfig::load_or_default(&path)
                .with_context(|| format!("failed to load {}", path.display()))
        }
    }
}

pub fn process(config_path: Option<&Path>, args: ProcessArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = resolve_engine_config(&args.resources, &config.engine);
    let parameters = resolve_parameters(&config, args.preset.as_deref(), &args.params)?;
    let rotation = args.rotation.or(config.defaults.rotation).unwrap_or(0);
    let options = WorkerOptions {
        pipeline: args
            .pipeline
            .unwrap_or_else(|| map_pipeline(config.pipeline())),
        close_timeout: config.close_timeout(),
        ..WorkerOptions::default()
    };

    let frame = load_frame(&args.image)?;
    tracing::info!(
        image = %args.image.display(),
        width = frame.width(),
        height = frame.height(),
        library = %engine.library().display(),
        pipeline = ?options.pipeline,
        backend = ?args.backend,
        parameters = parameters.len(),
        rotation,
        "processing image"
    );

    let worker = match args.backend {
        Backend::Native => EffectsWorker::spawn(engine, options),
        Backend::Software => EffectsWorker::spawn_with(SoftPlatform::new(), engine, options),
    }
    .context("failed to start effects worker")?;

    let started = Instant::now();
    let outcome = worker.process(frame, parameters, rotation);
    let status = worker.close();
    tracing::debug!(?status, "effects worker closed");

    let processed = outcome.context("effects processing failed")?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "image processed"
    );
    save_frame(&processed, &args.output)?;
    println!("Wrote {}", args.output.display());
    Ok(())
}

pub fn check(config_path: Option<&Path>, args: ResourceArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = resolve_engine_config(&args, &config.engine);
    let missing = report_resources(&engine);
    if missing > 0 {
        bail!("{missing} required engine resource(s) missing");
    }
    Ok(())
}

/// Prints one line per resource and returns how many required ones are absent.
fn report_resources(engine: &EngineConfig) -> usize {
    let mut missing = 0;
    println!("Engine resources:");
    for (label, path, required) in [
        ("library", Some(engine.library()), true),
        ("auth", Some(engine.auth()), true),
        ("filter", engine.filter(), false),
    ] {
        let Some(path) = path else {
            println!("  {label:<8} (not configured)");
            continue;
        };
        let status = if path.is_file() {
            "present"
        } else if required {
            missing += 1;
            "missing"
        } else {
            "absent"
        };
        println!("  {label:<8} status={status:<8} {}", path.display());
    }
    missing
}

pub fn where_paths(config_path: Option<&Path>) -> Result<()> {
    let paths = AppPaths::discover()?;
    println!("Configuration:");
    println!("  config dir:  {}", paths.config_dir().display());
    match config_path {
        Some(path) => println!("  config file: {} (explicit)", path.display()),
        None => {
            let file = paths.config_file();
            let state = if file.is_file() { "present" } else { "absent" };
            println!("  config file: {} ({state})", file.display());
        }
    }
    Ok(())
}

pub fn list_params() -> Result<()> {
    println!("Beauty parameters:");
    for key in ParameterKey::all() {
        let note = if key.is_forwarded() {
            ""
        } else {
            "  (ignored by the worker)"
        };
        println!("  {:>2}  {}{note}", key.native_id(), key.name());
    }
    Ok(())
}
