//! Content integrity verification against the trust manifest.
//!
//! Verification is tolerant by default: a file that cannot be checked (no
//! manifest, untracked, outside the model root) gets a `Skipped*` verdict and
//! an advisory. A file that *can* be checked and does not match is always a
//! hard [`IntegrityError`].

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::advisory::{Advisory, AdvisorySink};
use crate::digest::file_digest;
use crate::error::IntegrityError;
use crate::manifest::TrustManifest;

/// Outcome of a non-failing integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrityVerdict {
    /// The digest matched the manifest entry.
    Verified { path: String, digest: String },

    /// The manifest is empty; nothing was hashed.
    SkippedNoManifest,

    /// The file is under the root but has no manifest entry.
    SkippedNotTracked { path: String },

    /// The file resolves outside the model root.
    SkippedOutsideTree { path: PathBuf },
}

impl IntegrityVerdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    pub fn is_skipped(&self) -> bool {
        !self.is_verified()
    }
}

impl fmt::Display for IntegrityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified { path, digest } => write!(f, "verified {path} ({digest})"),
            Self::SkippedNoManifest => f.write_str("no trust manifest"),
            Self::SkippedNotTracked { path } => write!(f, "{path} is not tracked in the manifest"),
            Self::SkippedOutsideTree { path } => {
                write!(f, "{} is outside the model root", path.display())
            }
        }
    }
}

/// Where a file stands relative to the manifest, before any hashing.
pub(crate) enum Lookup<'m> {
    /// Nothing to hash; the verdict is final.
    Skipped(IntegrityVerdict),
    /// Tracked: hash the file and compare against `expected`.
    Tracked { key: String, expected: &'m str },
}

/// Classify `path` and emit the advisory for any skip.
///
/// `path` must already be resolved (absolute or relative to `root`).
pub(crate) fn lookup<'m>(
    path: &Path,
    root: &Path,
    manifest: &'m TrustManifest,
    sink: &dyn AdvisorySink,
) -> Lookup<'m> {
    if manifest.is_empty() {
        return Lookup::Skipped(IntegrityVerdict::SkippedNoManifest);
    }

    let Some(key) = relative_key(path, root) else {
        sink.emit(&Advisory::OutsideTree {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        });
        return Lookup::Skipped(IntegrityVerdict::SkippedOutsideTree {
            path: path.to_path_buf(),
        });
    };

    match manifest.get(&key) {
        Some(expected) => Lookup::Tracked { key, expected },
        None => {
            sink.emit(&Advisory::NotTracked { path: key.clone() });
            Lookup::Skipped(IntegrityVerdict::SkippedNotTracked { path: key })
        }
    }
}

/// Compare a computed digest with the manifest entry.
pub(crate) fn compare(
    path: &Path,
    key: String,
    expected: &str,
    actual: String,
) -> Result<IntegrityVerdict, IntegrityError> {
    if actual != expected {
        return Err(IntegrityError::DigestMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    info!(path = %key, digest = %actual, "model integrity verified");
    Ok(IntegrityVerdict::Verified {
        path: key,
        digest: actual,
    })
}

/// Verify `file_path` against `manifest`.
///
/// Relative paths are taken relative to `root`. Advisories for skipped
/// checks go to `sink`.
pub fn verify(
    file_path: impl AsRef<Path>,
    root: impl AsRef<Path>,
    manifest: &TrustManifest,
    sink: &dyn AdvisorySink,
) -> Result<IntegrityVerdict, IntegrityError> {
    let root = absolute_root(root.as_ref());
    let path = resolve_under(&root, file_path.as_ref());

    match lookup(&path, &root, manifest, sink) {
        Lookup::Skipped(verdict) => {
            debug!(path = %path.display(), verdict = %verdict, "integrity check skipped");
            Ok(verdict)
        }
        Lookup::Tracked { key, expected } => {
            let actual = file_digest(&path).map_err(|source| IntegrityError::Unreadable {
                path: path.clone(),
                source,
            })?;
            compare(&path, key, expected, actual)
        }
    }
}

/// Absolute form of the model root, without touching the filesystem.
pub(crate) fn absolute_root(root: &Path) -> PathBuf {
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    normalize_lexically(&absolute)
}

/// Join a relative `path` onto `root`; absolute paths are kept as given.
pub(crate) fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Manifest key for `path`, or `None` if it is not strictly inside `root`.
///
/// Both paths are normalised lexically first, so `root/a/../../x` is outside
/// even though it starts with `root`. Symlinks are not resolved.
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let root = normalize_lexically(root);
    let path = normalize_lexically(&resolve_under(&root, path));

    let relative = path.strip_prefix(&root).ok()?;
    let parts = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Drop `.` and fold `..` without consulting the filesystem. A `..` that
/// would climb above the first component is kept, so such paths never
/// appear to be inside a root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}
