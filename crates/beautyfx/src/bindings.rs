use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use beautyworker::{EngineConfig, ParameterKey, ParameterValue, Parameters, Pipeline};
use presetconfig::{EngineSection, PipelineSetting, Preset, PresetConfig, PresetValue};

use crate::cli::ResourceArgs;

/// SDK directory used when neither the command line nor the config names one.
pub const DEFAULT_ENGINE_DIR: &str = "dependencies/pixel_free";

pub fn map_pipeline(setting: PipelineSetting) -> Pipeline {
    match setting {
        PipelineSetting::Texture => Pipeline::Texture,
        PipelineSetting::Buffer => Pipeline::Buffer,
    }
}

pub fn map_preset_value(value: &PresetValue) -> ParameterValue {
    match value {
        PresetValue::Flag(flag) => ParameterValue::Flag(*flag),
        PresetValue::Number(number) => ParameterValue::Number(*number as f32),
        PresetValue::Text(text) => ParameterValue::Text(text.clone()),
    }
}

pub fn preset_parameters(name: &str, preset: &Preset) -> Result<Parameters> {
    let mut parameters = Parameters::new();
    for (key, value) in preset {
        let key = ParameterKey::from_name(key)
            .ok_or_else(|| anyhow!("preset '{name}' names unknown parameter '{key}'"))?;
        parameters.set(key, map_preset_value(value));
    }
    Ok(parameters)
}

/// Preset parameters (explicit name, else the configured default) with
/// command-line values layered on top.
pub fn resolve_parameters(
    config: &PresetConfig,
    preset: Option<&str>,
    overrides: &[(ParameterKey, ParameterValue)],
) -> Result<Parameters> {
    let mut parameters = match preset.or_else(|| config.default_preset()) {
        Some(name) => match config.preset(name) {
            Some(entries) => preset_parameters(name, entries)?,
            None => bail!("unknown preset '{name}'"),
        },
        None => Parameters::new(),
    };

    for (key, value) in overrides {
        parameters.set(*key, value.clone());
    }
    Ok(parameters)
}

/// Resource paths by precedence: explicit flag, config file entry, then the
/// standard layout under `--engine-dir`, `engine.base_dir`, or
/// [`DEFAULT_ENGINE_DIR`].
pub fn resolve_engine_config(args: &ResourceArgs, section: &EngineSection) -> EngineConfig {
    let base_dir: PathBuf = args
        .engine_dir
        .clone()
        .or_else(|| section.base_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_DIR));
    let standard = EngineConfig::from_base_dir(&base_dir);

    let library = pick(&args.library, section.library_path(), standard.library());
    let auth = pick(&args.auth, section.auth_path(), standard.auth());
    let filter = args
        .filter
        .clone()
        .or_else(|| section.filter_path())
        .or_else(|| standard.filter().map(Path::to_path_buf));

    let config = EngineConfig::new(library, auth);
    match filter {
        Some(filter) => config.with_filter(filter),
        None => config,
    }
}

fn pick(flag: &Option<PathBuf>, configured: Option<PathBuf>, standard: &Path) -> PathBuf {
    flag.clone()
        .or(configured)
        .unwrap_or_else(|| standard.to_path_buf())
}
