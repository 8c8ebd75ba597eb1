//! Non-fatal advisories.
//!
//! An advisory reports that a load went ahead with weaker guarantees than a
//! fully verified, restricted load: no manifest, an untracked file, a file
//! outside the model root, verification switched off, or the unsafe escape
//! hatch. Advisories never abort a load.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

/// A non-fatal signal raised while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// No manifest file; hash verification is disabled.
    ManifestMissing { path: PathBuf },

    /// The file is under the model root but has no manifest entry.
    NotTracked { path: String },

    /// The file lies outside the model root and cannot be checked.
    OutsideTree { path: PathBuf, root: PathBuf },

    /// The caller disabled integrity verification for this load.
    VerificationBypassed { path: PathBuf },

    /// The caller used `unsafe_load`.
    UnsafeLoad { path: PathBuf },
}

impl Advisory {
    /// Stable identifier, used as the `advisory` field in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestMissing { .. } => "manifest_missing",
            Self::NotTracked { .. } => "not_tracked",
            Self::OutsideTree { .. } => "outside_tree",
            Self::VerificationBypassed { .. } => "verification_bypassed",
            Self::UnsafeLoad { .. } => "unsafe_load",
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestMissing { path } => write!(
                f,
                "model manifest not found at {}; hash verification disabled",
                path.display()
            ),
            Self::NotTracked { path } => write!(
                f,
                "model file {} not found in manifest; hash verification skipped",
                path
            ),
            Self::OutsideTree { path, root } => write!(
                f,
                "model file {} is outside the model root {}; hash verification skipped",
                path.display(),
                root.display()
            ),
            Self::VerificationBypassed { path } => write!(
                f,
                "hash verification disabled for {}; only do this for trusted files",
                path.display()
            ),
            Self::UnsafeLoad { path } => write!(
                f,
                "unsafe_load bypasses every security check for {}; use secure_load instead",
                path.display()
            ),
        }
    }
}

/// Receiver for advisories.
pub trait AdvisorySink: Send + Sync {
    fn emit(&self, advisory: &Advisory);
}

/// Default sink: each advisory becomes one `tracing` warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AdvisorySink for TracingSink {
    fn emit(&self, advisory: &Advisory) {
        match advisory {
            Advisory::ManifestMissing { path } => {
                warn!(advisory = advisory.kind(), manifest = %path.display(), "{}", advisory)
            }
            Advisory::NotTracked { path } => {
                warn!(advisory = advisory.kind(), path = %path, "{}", advisory)
            }
            Advisory::OutsideTree { path, root } => warn!(
                advisory = advisory.kind(),
                path = %path.display(),
                root = %root.display(),
                "{}",
                advisory
            ),
            Advisory::VerificationBypassed { path } | Advisory::UnsafeLoad { path } => {
                warn!(advisory = advisory.kind(), path = %path.display(), "{}", advisory)
            }
        }
    }
}

/// Sink that keeps every advisory in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    advisories: Mutex<Vec<Advisory>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn advisories(&self) -> Vec<Advisory> {
        self.advisories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Drain the recorded advisories.
    pub fn take(&self) -> Vec<Advisory> {
        std::mem::take(
            &mut *self
                .advisories
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl AdvisorySink for RecordingSink {
    fn emit(&self, advisory: &Advisory) {
        self.advisories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(advisory.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_take_drains() {
        let sink = RecordingSink::new();
        sink.emit(&Advisory::NotTracked {
            path: "beats/a.pkl".to_string(),
        });
        assert_eq!(sink.advisories().len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.advisories().is_empty());
    }

    #[test]
    fn test_display_carries_context() {
        let advisory = Advisory::OutsideTree {
            path: PathBuf::from("/tmp/x.pkl"),
            root: PathBuf::from("/models"),
        };
        let text = advisory.to_string();
        assert!(text.contains("/tmp/x.pkl"));
        assert!(text.contains("/models"));
        assert_eq!(advisory.kind(), "outside_tree");
    }
}
