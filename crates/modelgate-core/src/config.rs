//! Loader configuration.
//!
//! Sources, in the order callers usually layer them: defaults,
//! `MODELGATE_*` environment variables or a YAML file, then `with_*`
//! builders.
//!
//! ```yaml
//! root: ./models
//! manifest: ./models/model_manifest.json
//! strict_integrity: false
//! limits:
//!   max_input_bytes: 268435456
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::decode::{DecodeLimits, DecodeLimitsOverrides};
use crate::error::ConfigError;
use crate::manifest::MANIFEST_FILE_NAME;

pub const ENV_ROOT: &str = "MODELGATE_ROOT";
pub const ENV_MANIFEST: &str = "MODELGATE_MANIFEST";
pub const ENV_STRICT_INTEGRITY: &str = "MODELGATE_STRICT_INTEGRITY";
pub const ENV_MAX_INPUT_BYTES: &str = "MODELGATE_MAX_INPUT_BYTES";

/// Everything a `SecureLoader` needs besides the admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Trusted model root. Manifest keys are relative to it.
    pub root: PathBuf,

    /// Manifest location. `None` means `<root>/model_manifest.json`.
    pub manifest_path: Option<PathBuf>,

    /// Refuse to decode files whose integrity could not be established.
    pub strict_integrity: bool,

    /// Decoder ceilings.
    pub limits: DecodeLimits,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    root: Option<PathBuf>,
    manifest: Option<PathBuf>,
    strict_integrity: Option<bool>,
    #[serde(default)]
    limits: DecodeLimitsOverrides,
}

impl LoaderConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest_path: None,
            strict_integrity: false,
            limits: DecodeLimits::default(),
        }
    }

    /// Read `MODELGATE_*` variables. Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(lookup(ENV_ROOT).unwrap_or_else(|| ".".to_string()));
        config.manifest_path = lookup(ENV_MANIFEST).map(PathBuf::from);
        config.strict_integrity = lookup(ENV_STRICT_INTEGRITY)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Some(max) = lookup(ENV_MAX_INPUT_BYTES).and_then(|v| v.parse().ok()) {
            config.limits.max_input_bytes = max;
        }
        config
    }

    /// Parse YAML. Relative paths are kept as written.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(content).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;

        let mut config = Self::new(file.root.unwrap_or_else(|| PathBuf::from(".")));
        config.manifest_path = file.manifest;
        config.strict_integrity = file.strict_integrity.unwrap_or(false);
        config.limits = DecodeLimits::default().apply(&file.limits);
        Ok(config)
    }

    /// Load a YAML file. Relative `root` and `manifest` are resolved against
    /// the file's directory.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.root = base.join(&config.root);
        config.manifest_path = config.manifest_path.map(|m| base.join(m));
        Ok(config)
    }

    /// Where the manifest is read from.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.root.join(MANIFEST_FILE_NAME))
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    pub fn with_strict_integrity(mut self, strict: bool) -> Self {
        self.strict_integrity = strict;
        self
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
