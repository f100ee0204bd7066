use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// File name looked up inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "beautyfx.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineSetting {
    Texture,
    Buffer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetConfig {
    pub version: u32,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

/// Native resource locations. Relative paths resolve against `base_dir` when it is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSection {
    pub base_dir: Option<PathBuf>,
    pub library: Option<PathBuf>,
    pub auth: Option<PathBuf>,
    pub filter: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerSection {
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub close_timeout: Option<Duration>,
    #[serde(default)]
    pub pipeline: Option<PipelineSetting>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Defaults {
    pub preset: Option<String>,
    pub rotation: Option<i64>,
}

/// Raw parameter value as written in TOML; key names are interpreted by the consumer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PresetValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

pub type Preset = BTreeMap<String, PresetValue>;

fn default_close_timeout() -> Duration {
    Duration::from_secs(2)
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            version: 1,
            engine: EngineSection::default(),
            worker: WorkerSection::default(),
            defaults: Defaults::default(),
            presets: BTreeMap::new(),
        }
    }
}

impl PresetConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PresetConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads `path`, falling back to the default configuration when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn default_preset(&self) -> Option<&str> {
        self.defaults.preset.as_deref()
    }

    pub fn close_timeout(&self) -> Duration {
        self.worker
            .close_timeout
            .unwrap_or_else(default_close_timeout)
    }

    pub fn pipeline(&self) -> PipelineSetting {
        self.worker.pipeline.unwrap_or(PipelineSetting::Texture)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if let Some(timeout) = self.worker.close_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "worker.close_timeout must be greater than zero".into(),
                ));
            }
        }

        for (name, preset) in &self.presets {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("preset names may not be empty".into()));
            }

            for (key, value) in preset {
                if key.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "preset '{name}' contains an empty parameter name"
                    )));
                }

                if let PresetValue::Number(number) = value {
                    if !number.is_finite() {
                        return Err(ConfigError::Invalid(format!(
                            "preset '{name}' parameter '{key}' must be a finite number"
                        )));
                    }
                }
            }
        }

        if let Some(default_preset) = &self.defaults.preset {
            if !self.presets.contains_key(default_preset) {
                return Err(ConfigError::Invalid(format!(
                    "defaults.preset references unknown preset '{default_preset}'"
                )));
            }
        }

        for (label, path) in [
            ("engine.library", &self.engine.library),
            ("engine.auth", &self.engine.auth),
            ("engine.filter", &self.engine.filter),
            ("engine.base_dir", &self.engine.base_dir),
        ] {
            if let Some(path) = path {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(format!("{label} may not be empty")));
                }
            }
        }

        Ok(())
    }
}

impl EngineSection {
    pub fn library_path(&self) -> Option<PathBuf> {
        self.library.as_deref().map(|path| self.anchor(path))
    }

    pub fn auth_path(&self) -> Option<PathBuf> {
        self.auth.as_deref().map(|path| self.anchor(path))
    }

    pub fn filter_path(&self) -> Option<PathBuf> {
        self.filter.as_deref().map(|path| self.anchor(path))
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[engine]
base_dir = "dependencies/pixel_free"
library = "PixelFree.dll"
auth = "pixelfreeAuth.lic"
filter = "/opt/pixelfree/filter_model.bundle"

[worker]
close_timeout = "1500ms"
pipeline = "buffer"

[defaults]
preset = "soft"
rotation = 90

[presets.soft]
face_blur_strength = 0.6
face_whiten_strength = 1
filter_name = "heibai1"

[presets.mono]
filter_name = "heibai1"
filter_strength = 0.8
"#;

    #[test]
    fn parses_sample_config() {
        let config = PresetConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.version, 1);
        assert_eq!(config.default_preset(), Some("soft"));
        assert_eq!(config.defaults.rotation, Some(90));
        assert_eq!(config.close_timeout(), Duration::from_millis(1500));
        assert_eq!(config.pipeline(), PipelineSetting::Buffer);

        let soft = config.preset("soft").unwrap();
        assert_eq!(
            soft.get("face_blur_strength"),
            Some(&PresetValue::Number(0.6))
        );
        assert_eq!(
            soft.get("face_whiten_strength"),
            Some(&PresetValue::Number(1.0))
        );
        assert_eq!(
            soft.get("filter_name"),
            Some(&PresetValue::Text("heibai1".into()))
        );
    }

    #[test]
    fn anchors_relative_engine_paths_on_base_dir() {
        let config = PresetConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.engine.library_path(),
            Some(PathBuf::from("dependencies/pixel_free/PixelFree.dll"))
        );
        assert_eq!(
            config.engine.filter_path(),
            Some(PathBuf::from("/opt/pixelfree/filter_model.bundle"))
        );
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = PresetConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.close_timeout(), Duration::from_secs(2));
        assert_eq!(config.pipeline(), PipelineSetting::Texture);
        assert!(config.engine.library_path().is_none());
        assert!(config.presets.is_empty());
    }

    #[test]
    fn accepts_numeric_close_timeout() {
        let config = PresetConfig::from_toml_str(
            r#"
version = 1
[worker]
close_timeout = 3
"#,
        )
        .unwrap();
        assert_eq!(config.close_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_unknown_default_preset() {
        let config = r#"
version = 1

[defaults]
preset = "missing"

[presets.soft]
face_blur_strength = 0.5
"#;
        let err = PresetConfig::from_toml_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_close_timeout() {
        let config = r#"
version = 1
[worker]
close_timeout = "0s"
"#;
        let err = PresetConfig::from_toml_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = PresetConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_yields_default() {
        let config =
            PresetConfig::load_or_default(Path::new("/nonexistent/beautyfx.toml")).unwrap();
        assert_eq!(config.version, 1);
    }
}
