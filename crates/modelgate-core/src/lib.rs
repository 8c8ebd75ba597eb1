//! Integrity-checked, allowlist-restricted loading of pickled model files.
//!
//! Model artifacts are stored in the pickle object-graph format, which can
//! name and invoke arbitrary callables while it is being decoded. This crate
//! never executes anything. It provides:
//!
//! - SHA-256 content digests and a trust manifest of expected digests
//! - Integrity verification against the manifest
//! - A type admission policy (allowlist + denylist) over a closed type table
//! - A restricted pickle decoder whose only type resolution goes through the policy
//! - A loader that chains the two, with typed errors and advisories
//!
//! # Quick Start
//!
//! ```no_run
//! use modelgate_core::{LoaderConfig, SecureLoader};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = LoaderConfig::new("/srv/models");
//! let loader = SecureLoader::from_config(&config)?;
//!
//! let value = loader.secure_load("beats/2015/beats_blstm_1.pkl", true)?;
//! println!("decoded a {}", value.type_name());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `MODELGATE_ROOT` | Trusted model root (default: `.`) |
//! | `MODELGATE_MANIFEST` | Manifest path (default: `<root>/model_manifest.json`) |
//! | `MODELGATE_STRICT_INTEGRITY` | Refuse files that cannot be verified |
//! | `MODELGATE_MAX_INPUT_BYTES` | Decoder input ceiling in bytes |

pub mod admission;
pub mod advisory;
pub mod config;
pub mod decode;
pub mod digest;
pub mod error;
pub mod integrity;
pub mod loader;
pub mod manifest;

// Re-export main types
pub use admission::{
    AdmissionPolicy, AdmittedType, KnownType, RejectRule, TypeRef, UnsafeTypeError,
};
pub use advisory::{Advisory, AdvisorySink, RecordingSink, TracingSink};
pub use config::LoaderConfig;
pub use decode::{decode, decode_slice, DecodeError, DecodeLimits, DecodeLimitsOverrides, Object, Value};
pub use digest::{file_digest, sha256_hex_bytes, sha256_hex_reader};
pub use error::{ConfigError, IntegrityError, LoadError, LoadResult, ManifestError};
pub use integrity::{relative_key, verify, IntegrityVerdict};
pub use loader::SecureLoader;
pub use manifest::{TrustManifest, DEFAULT_PATTERN, MANIFEST_FILE_NAME, MANIFEST_VERSION};
