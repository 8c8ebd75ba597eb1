//! Loader settings for a command: config file or env, then CLI flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use modelgate_core::LoaderConfig;

use crate::cli::args::TrustArgs;

pub fn resolve(config: Option<&Path>, trust: &TrustArgs) -> Result<LoaderConfig> {
    let mut resolved = match config {
        Some(path) => LoaderConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => LoaderConfig::from_env(),
    };
    if let Some(root) = &trust.root {
        resolved = resolved.with_root(absolute(root)?);
    }
    if let Some(manifest) = &trust.manifest {
        resolved = resolved.with_manifest_path(absolute(manifest)?);
    }
    if trust.strict {
        resolved = resolved.with_strict_integrity(true);
    }
    Ok(resolved)
}

/// Command-line paths are relative to the working directory, not the model root.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path: {}", path.display()))
}
