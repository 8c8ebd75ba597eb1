//! Secure load orchestration: integrity gate, then restricted decode.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::admission::AdmissionPolicy;
use crate::advisory::{Advisory, AdvisorySink, TracingSink};
use crate::config::LoaderConfig;
use crate::decode::{self, DecodeLimits, Value};
use crate::digest::sha256_hex_reader;
use crate::error::{IntegrityError, LoadError, LoadResult, ManifestError};
use crate::integrity::{self, IntegrityVerdict, Lookup};
use crate::manifest::TrustManifest;

/// Loads model files from a trusted root.
///
/// Cheap to clone; the manifest, policy and sink are shared. Any number of
/// loads may run concurrently on clones or through a shared reference.
#[derive(Clone)]
pub struct SecureLoader {
    root: PathBuf,
    manifest: Arc<TrustManifest>,
    policy: Arc<AdmissionPolicy>,
    sink: Arc<dyn AdvisorySink>,
    limits: DecodeLimits,
    strict_integrity: bool,
}

impl fmt::Debug for SecureLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureLoader")
            .field("root", &self.root)
            .field("manifest_entries", &self.manifest.len())
            .field("closed_world", &self.policy.is_closed_world())
            .field("limits", &self.limits)
            .field("strict_integrity", &self.strict_integrity)
            .finish_non_exhaustive()
    }
}

impl SecureLoader {
    /// Loader with the default admission policy, default limits and
    /// advisories logged through `tracing`.
    pub fn new(root: impl AsRef<Path>, manifest: TrustManifest) -> Self {
        Self {
            root: integrity::absolute_root(root.as_ref()),
            manifest: Arc::new(manifest),
            policy: Arc::new(AdmissionPolicy::default()),
            sink: Arc::new(TracingSink),
            limits: DecodeLimits::default(),
            strict_integrity: false,
        }
    }

    /// Build from config, reading the manifest it points at.
    pub fn from_config(config: &LoaderConfig) -> Result<Self, ManifestError> {
        Self::from_config_with_sink(config, Arc::new(TracingSink))
    }

    pub fn from_config_with_sink(
        config: &LoaderConfig,
        sink: Arc<dyn AdvisorySink>,
    ) -> Result<Self, ManifestError> {
        let manifest = TrustManifest::load(config.manifest_path(), sink.as_ref())?;
        Ok(Self::new(&config.root, manifest)
            .with_sink(sink)
            .with_limits(config.limits)
            .with_strict_integrity(config.strict_integrity))
    }

    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_shared_policy(mut self, policy: Arc<AdmissionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AdvisorySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_strict_integrity(mut self, strict: bool) -> Self {
        self.strict_integrity = strict;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &TrustManifest {
        &self.manifest
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    pub fn is_strict(&self) -> bool {
        self.strict_integrity
    }

    /// Check `path` against the manifest without decoding it.
    ///
    /// In strict mode a skipped check is `LoadError::Unverifiable`.
    pub fn verify_integrity(&self, path: impl AsRef<Path>) -> LoadResult<IntegrityVerdict> {
        let path = self.resolve(path.as_ref());
        let mut file = open(&path)?;
        let verdict = self.check(&path, &mut file)?;
        self.enforce(&path, verdict)
    }

    /// Verify (unless `verify_integrity` is false) and decode with the
    /// admission policy.
    pub fn secure_load(&self, path: impl AsRef<Path>, verify_integrity: bool) -> LoadResult<Value> {
        let path = self.resolve(path.as_ref());
        let mut file = open(&path)?;

        if verify_integrity {
            let verdict = self.check(&path, &mut file)?;
            self.enforce(&path, verdict)?;
            file.rewind().map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
        } else {
            self.sink.emit(&Advisory::VerificationBypassed { path: path.clone() });
        }

        debug!(path = %path.display(), "decoding with restricted policy");
        let value = decode::decode(BufReader::new(file), &self.policy, &self.limits)
            .map_err(|source| LoadError::Unsafe {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), nodes = value.node_count(), "model loaded");
        Ok(value)
    }

    /// `secure_load` with verification, for a path relative to the root.
    pub fn load_model(&self, relative: impl AsRef<Path>) -> LoadResult<Value> {
        self.secure_load(self.root.join(relative.as_ref()), true)
    }

    /// Decode with no integrity check and no type restrictions.
    ///
    /// Types are still never executed: everything becomes an inert record.
    /// Emits exactly one `UnsafeLoad` advisory per call, before any I/O.
    pub fn unsafe_load(&self, path: impl AsRef<Path>) -> LoadResult<Value> {
        let path = self.resolve(path.as_ref());
        self.sink.emit(&Advisory::UnsafeLoad { path: path.clone() });

        let file = open(&path)?;
        decode::decode_unrestricted(BufReader::new(file), &self.limits).map_err(|source| {
            LoadError::Unsafe {
                path: path.clone(),
                source,
            }
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        integrity::resolve_under(&self.root, path)
    }

    /// Hash from the already open handle so the checked bytes are the
    /// decoded bytes.
    fn check(&self, path: &Path, file: &mut File) -> LoadResult<IntegrityVerdict> {
        match integrity::lookup(path, &self.root, &self.manifest, self.sink.as_ref()) {
            Lookup::Skipped(verdict) => Ok(verdict),
            Lookup::Tracked { key, expected } => {
                let actual = sha256_hex_reader(&mut *file).map_err(|source| {
                    IntegrityError::Unreadable {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                Ok(integrity::compare(path, key, expected, actual)?)
            }
        }
    }

    fn enforce(&self, path: &Path, verdict: IntegrityVerdict) -> LoadResult<IntegrityVerdict> {
        if self.strict_integrity && verdict.is_skipped() {
            return Err(LoadError::Unverifiable {
                path: path.to_path_buf(),
                verdict,
            });
        }
        Ok(verdict)
    }
}

fn open(path: &Path) -> LoadResult<File> {
    match File::open(path) {
        Ok(file) if file.metadata().is_ok_and(|m| m.is_dir()) => Err(LoadError::NotFound {
            path: path.to_path_buf(),
        }),
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LoadError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(LoadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
