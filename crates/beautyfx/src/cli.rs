use std::path::PathBuf;

use beautyworker::{ParameterKey, ParameterValue, Pipeline};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "beautyfx",
    author,
    version,
    about = "Run images through the PixelFree beauty engine"
)]
pub struct Cli {
    /// Configuration file; defaults to `beautyfx.toml` inside the config directory.
    #[arg(long, global = true, value_name = "FILE", env = "BEAUTYFX_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process a single image and write the result.
    Process(ProcessArgs),
    /// Report which engine resources resolve and exist, without loading them.
    Check(ResourceArgs),
    /// Print the resolved configuration directory and file.
    Where,
    /// List the beauty parameters understood by the engine.
    Params,
}

/// Engine resource overrides shared by `process` and `check`.
#[derive(Args, Debug, Clone, Default)]
pub struct ResourceArgs {
    /// Directory holding the SDK library, licence and filter bundle.
    #[arg(long, value_name = "DIR")]
    pub engine_dir: Option<PathBuf>,

    /// Path to the engine shared library.
    #[arg(long, value_name = "FILE")]
    pub library: Option<PathBuf>,

    /// Path to the authorization licence.
    #[arg(long, value_name = "FILE")]
    pub auth: Option<PathBuf>,

    /// Path to the filter bundle.
    #[arg(long, value_name = "FILE")]
    pub filter: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Input image (png, jpeg, bmp or gif).
    #[arg(long, value_name = "FILE")]
    pub image: PathBuf,

    /// Where to write the processed image; the format follows the extension.
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,

    #[command(flatten)]
    pub resources: ResourceArgs,

    /// Beauty parameter applied after the preset (repeatable), e.g. `face_blur_strength=0.6`.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(ParameterKey, ParameterValue)>,

    /// Named preset from the configuration file.
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Clockwise rotation of the input in degrees (multiples of 90).
    #[arg(long, value_name = "DEGREES", allow_negative_numbers = true)]
    pub rotation: Option<i64>,

    /// How frames reach the engine: `texture` or `buffer`.
    #[arg(long, value_name = "MODE", value_parser = parse_pipeline)]
    pub pipeline: Option<Pipeline>,

    /// Worker backend: `native` (OpenGL + vendor library) or `software`.
    #[arg(
        long,
        value_name = "BACKEND",
        value_parser = parse_backend,
        default_value = "native"
    )]
    pub backend: Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Native,
    /// In-memory context and pass-through engine; useful for smoke tests.
    Software,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_param(value: &str) -> Result<(ParameterKey, ParameterValue), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("parameter name must not be empty".to_string());
    }
    let key: ParameterKey = key.parse()?;

    let raw = raw.trim();
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "true" => ParameterValue::Flag(true),
        "false" => ParameterValue::Flag(false),
        _ => match raw.parse::<f32>() {
            Ok(number) if number.is_finite() => ParameterValue::Number(number),
            _ => ParameterValue::Text(raw.to_string()),
        },
    };
    Ok((key, parsed))
}

pub fn parse_pipeline(value: &str) -> Result<Pipeline, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "texture" | "gpu" => Ok(Pipeline::Texture),
        "buffer" | "cpu" => Ok(Pipeline::Buffer),
        "" => Err("pipeline must not be empty".to_string()),
        other => Err(format!("unknown pipeline '{other}' (expected texture or buffer)")),
    }
}

pub fn parse_backend(value: &str) -> Result<Backend, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "native" | "gl" => Ok(Backend::Native),
        "software" | "soft" => Ok(Backend::Software),
        other => Err(format!("unknown backend '{other}' (expected native or software)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_values_prefer_flag_then_number_then_text() {
        assert_eq!(
            parse_param("face_whiten_strength=true").unwrap(),
            (ParameterKey::WhitenStrength, ParameterValue::Flag(true))
        );
        assert_eq!(
            parse_param(" face_blur_strength = 0.6 ").unwrap(),
            (ParameterKey::BlurStrength, ParameterValue::Number(0.6))
        );
        assert_eq!(
            parse_param("filter_name=heibai1").unwrap(),
            (
                ParameterKey::FilterName,
                ParameterValue::Text("heibai1".into())
            )
        );
        assert_eq!(
            parse_param("filter_name=NaN").unwrap().1,
            ParameterValue::Text("NaN".into())
        );
    }

    #[test]
    fn param_rejects_malformed_input() {
        assert!(parse_param("face_blur_strength").is_err());
        assert!(parse_param("=0.5").is_err());
        let err = parse_param("glow=1").unwrap_err();
        assert!(err.contains("glow"), "{err}");
    }

    #[test]
    fn pipeline_and_backend_names() {
        assert_eq!(parse_pipeline("Buffer").unwrap(), Pipeline::Buffer);
        assert_eq!(parse_pipeline("texture").unwrap(), Pipeline::Texture);
        assert!(parse_pipeline("").is_err());
        assert_eq!(parse_backend("software").unwrap(), Backend::Software);
        assert!(parse_backend("vulkan").is_err());
    }

    #[test]
    fn process_arguments_collect_repeated_params() {
        let cli = Cli::try_parse_from([
            "beautyfx",
            "process",
            "--image",
            "in.png",
            "--output",
            "out.png",
            "--param",
            "face_blur_strength=0.5",
            "--param",
            "eye_strength=0.2",
            "--rotation",
            "-90",
            "--backend",
            "software",
        ])
        .unwrap();

        let Command::Process(args) = cli.command else {
            panic!("expected process subcommand");
        };
        assert_eq!(args.params.len(), 2);
        assert_eq!(args.rotation, Some(-90));
        assert_eq!(args.backend, Backend::Software);
        assert!(args.pipeline.is_none());
    }
}
