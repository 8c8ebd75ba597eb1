//! Error types for trusted loading.

use std::io;
use std::path::PathBuf;

use crate::admission::TypeRef;
use crate::decode::DecodeError;
use crate::integrity::IntegrityVerdict;

/// Content integrity failures. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// File bytes do not match the trusted digest.
    #[error("digest mismatch for {}: expected {expected}, got {actual}", path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The file is tracked but could not be hashed.
    #[error("cannot hash {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Trust manifest failures.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed manifest{}: {message}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Malformed {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("cannot write manifest {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot hash {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid file pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}

impl ManifestError {
    pub(crate) fn malformed(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path,
            message: message.into(),
        }
    }
}

/// Loader configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Everything `SecureLoader` can fail with.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("model file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    /// Decoding was refused or failed. `source` says which.
    #[error("unsafe or invalid model file {}: {source}", path.display())]
    Unsafe {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// Strict integrity mode and the file could not be verified.
    #[error("cannot verify {}: {verdict}", path.display())]
    Unverifiable {
        path: PathBuf,
        verdict: IntegrityVerdict,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LoadError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 1,
            Self::Io { .. } => 1,

            Self::Manifest(_) => 2,

            // Refused to decode
            Self::Unsafe { .. } => 3,

            // Trust failures
            Self::Integrity(_) => 4,
            Self::Unverifiable { .. } => 4,
        }
    }

    /// The type reference the admission policy refused, if that is why
    /// loading failed.
    pub fn blocked_reference(&self) -> Option<&TypeRef> {
        match self {
            Self::Unsafe { source, .. } => source.rejected_reference(),
            _ => None,
        }
    }

    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Integrity(_) | Self::Unverifiable { .. })
    }
}

/// Result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{RejectRule, UnsafeTypeError};

    #[test]
    fn test_exit_codes() {
        let not_found = LoadError::NotFound {
            path: PathBuf::from("m.pkl"),
        };
        assert_eq!(not_found.exit_code(), 1);

        let mismatch = LoadError::from(IntegrityError::DigestMismatch {
            path: PathBuf::from("m.pkl"),
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        });
        assert_eq!(mismatch.exit_code(), 4);
        assert!(mismatch.is_integrity_failure());

        let manifest = LoadError::from(ManifestError::malformed(None, "bad"));
        assert_eq!(manifest.exit_code(), 2);
    }

    #[test]
    fn test_blocked_reference_through_unsafe() {
        let err = LoadError::Unsafe {
            path: PathBuf::from("m.pkl"),
            source: DecodeError::Unsafe(UnsafeTypeError {
                reference: TypeRef::new("os", "system"),
                rule: RejectRule::NotAllowed,
            }),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.blocked_reference(), Some(&TypeRef::new("os", "system")));
        assert_eq!(
            err.to_string(),
            "unsafe or invalid model file m.pkl: blocked unsafe type os.system: not in the allowlist"
        );

        let structural = LoadError::Unsafe {
            path: PathBuf::from("m.pkl"),
            source: DecodeError::Cycle,
        };
        assert_eq!(structural.blocked_reference(), None);
    }

    #[test]
    fn test_mismatch_message_carries_both_digests() {
        let err = IntegrityError::DigestMismatch {
            path: PathBuf::from("a/b.bin"),
            expected: "e".repeat(64),
            actual: "f".repeat(64),
        };
        let message = err.to_string();
        assert!(message.contains(&"e".repeat(64)));
        assert!(message.contains(&"f".repeat(64)));
        assert!(message.contains("a/b.bin"));
    }

    #[test]
    fn test_malformed_message_with_and_without_path() {
        let with = ManifestError::malformed(Some(PathBuf::from("x.json")), "bad key");
        assert_eq!(with.to_string(), "malformed manifest x.json: bad key");
        let without = ManifestError::malformed(None, "bad key");
        assert_eq!(without.to_string(), "malformed manifest: bad key");
    }
}
