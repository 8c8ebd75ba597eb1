//! Trust manifest: the expected digest of every tracked model file.
//!
//! The manifest lives next to the model tree (`model_manifest.json` under the
//! model root) and maps root-relative paths to SHA-256 digests.
//!
//! # Manifest Format (v1)
//!
//! ```json
//! {
//!   "version": 1,
//!   "algorithm": "sha256",
//!   "generated_at": "2026-01-29T10:00:00Z",
//!   "generated_by": "modelgate/0.1.0",
//!   "models": {
//!     "beats/2015/beats_blstm_1.pkl": "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
//!   }
//! }
//! ```
//!
//! Only `models` is required. A missing manifest file is not an error: it
//! yields an empty manifest and a `ManifestMissing` advisory.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::advisory::{Advisory, AdvisorySink};
use crate::digest::{file_digest, is_hex_digest};
use crate::error::ManifestError;

/// Default manifest file name, directly under the model root.
pub const MANIFEST_FILE_NAME: &str = "model_manifest.json";

/// Current manifest schema version.
pub const MANIFEST_VERSION: u8 = 1;

/// The only supported digest algorithm.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Files picked up by `generate` unless told otherwise.
pub const DEFAULT_PATTERN: &str = "**/*.pkl";

/// On-disk shape.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    generated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    generated_by: Option<String>,

    #[serde(deserialize_with = "unique_models")]
    models: BTreeMap<String, String>,
}

/// `models` map that refuses a path listed twice.
fn unique_models<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueModels;

    impl<'de> Visitor<'de> for UniqueModels {
        type Value = BTreeMap<String, String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of model paths to digests")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut models = BTreeMap::new();
            while let Some((path, digest)) = access.next_entry::<String, String>()? {
                if models.contains_key(&path) {
                    return Err(de::Error::custom(format!("duplicate entry for {path:?}")));
                }
                models.insert(path, digest);
            }
            Ok(models)
        }
    }

    deserializer.deserialize_map(UniqueModels)
}

/// Immutable map of `relative/path -> sha256 hex`.
///
/// Built once (loaded, parsed or generated) and then shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustManifest {
    entries: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl TrustManifest {
    /// An empty manifest. Verification against it always skips.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a manifest file.
    ///
    /// A missing file gives an empty manifest and a `ManifestMissing`
    /// advisory. Unreadable or malformed files are errors.
    pub fn load(path: impl AsRef<Path>, sink: &dyn AdvisorySink) -> Result<Self, ManifestError> {
        let path = path.as_ref();

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                sink.emit(&Advisory::ManifestMissing {
                    path: path.to_path_buf(),
                });
                return Ok(Self::empty());
            }
            Err(source) => {
                return Err(ManifestError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut manifest = Self::parse_from(&content, Some(path))?;
        manifest.source = Some(path.to_path_buf());
        debug!(path = %path.display(), entries = manifest.len(), "loaded trust manifest");
        Ok(manifest)
    }

    /// Parse manifest JSON.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Self::parse_from(content, None)
    }

    fn parse_from(content: &str, path: Option<&Path>) -> Result<Self, ManifestError> {
        let owned_path = || path.map(Path::to_path_buf);

        let file: ManifestFile = serde_json::from_str(content)
            .map_err(|e| ManifestError::malformed(owned_path(), e.to_string()))?;

        if let Some(version) = file.version {
            if version > MANIFEST_VERSION {
                return Err(ManifestError::malformed(
                    owned_path(),
                    format!(
                        "manifest version {version} is newer than supported version {MANIFEST_VERSION}"
                    ),
                ));
            }
        }

        if let Some(algorithm) = &file.algorithm {
            if !algorithm.eq_ignore_ascii_case(DIGEST_ALGORITHM) {
                return Err(ManifestError::malformed(
                    owned_path(),
                    format!("unsupported digest algorithm {algorithm:?}"),
                ));
            }
        }

        let mut manifest = Self::empty();
        for (raw_key, digest) in file.models {
            let (key, digest) = validate_entry(&raw_key, &digest)
                .map_err(|message| ManifestError::malformed(owned_path(), message))?;
            if manifest.entries.contains_key(&key) {
                return Err(ManifestError::malformed(
                    owned_path(),
                    format!("duplicate entry for {key}"),
                ));
            }
            manifest.entries.insert(key, digest);
        }
        Ok(manifest)
    }

    /// Hash every file under `root` whose root-relative path matches
    /// `pattern`. Symlinks are not followed.
    pub fn generate(root: impl AsRef<Path>, pattern: &str) -> Result<Self, ManifestError> {
        let root = root.as_ref();
        let matcher = compile_pattern(pattern)?;

        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;

        let mut manifest = Self::empty();
        for (key, path) in files {
            if !matcher.is_match(&key) {
                continue;
            }
            let digest = file_digest(&path).map_err(|source| ManifestError::Hash {
                path: path.clone(),
                source,
            })?;
            debug!(file = %key, digest = %digest, "hashed model file");
            manifest.entries.insert(key, digest);
        }

        info!(root = %root.display(), pattern, entries = manifest.len(), "generated trust manifest");
        Ok(manifest)
    }

    /// Add or replace an entry. Only meaningful before the manifest is shared.
    pub fn insert(&mut self, path: &str, digest: &str) -> Result<(), ManifestError> {
        let (key, digest) =
            validate_entry(path, digest).map_err(|message| ManifestError::malformed(None, message))?;
        self.entries.insert(key, digest);
        Ok(())
    }

    /// Expected digest for a root-relative path (`/` separated).
    pub fn get(&self, relative: &str) -> Option<&str> {
        self.entries.get(relative).map(String::as_str)
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.entries.contains_key(relative)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// File this manifest was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Write the manifest as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let path = path.as_ref();
        let content = self.to_json()?;

        fs::write(path, content).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), entries = self.len(), "saved trust manifest");
        Ok(())
    }

    /// Serialize with a fresh header. Keys are sorted.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        let file = ManifestFile {
            version: Some(MANIFEST_VERSION),
            algorithm: Some(DIGEST_ALGORITHM.to_string()),
            generated_at: Some(Utc::now()),
            generated_by: Some(format!("modelgate/{}", env!("CARGO_PKG_VERSION"))),
            models: self.entries.clone(),
        };
        let mut json = serde_json::to_string_pretty(&file)
            .map_err(|e| ManifestError::malformed(None, format!("failed to serialize manifest: {e}")))?;
        json.push('\n');
        Ok(json)
    }
}

fn validate_entry(raw_key: &str, digest: &str) -> Result<(String, String), String> {
    let key = normalize_key(raw_key).ok_or_else(|| format!("invalid manifest path {raw_key:?}"))?;
    if !is_hex_digest(digest) {
        return Err(format!("invalid sha256 digest for {key}: {digest:?}"));
    }
    Ok((key, digest.to_ascii_lowercase()))
}

/// Normalise a manifest key to `/` separators. Absolute paths, empty
/// components, `.` and `..` are refused.
pub(crate) fn normalize_key(raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return None;
    }
    let parts: Vec<&str> = unified.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn compile_pattern(pattern: &str) -> Result<GlobMatcher, ManifestError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ManifestError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// Regular files under `dir` as `(root-relative key, path)`, sorted.
fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), ManifestError> {
    let read_err = |source| ManifestError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(read_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(read_err)?;
        if file_type.is_symlink() {
            debug!(path = %path.display(), "skipping symlink");
            continue;
        }
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        match relative_key(root, &path) {
            Some(key) => out.push((key, path)),
            None => warn!(path = %path.display(), "skipping file with non UTF-8 path"),
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::RecordingSink;
    use crate::digest::sha256_hex_bytes;

    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_parse_minimal() {
        let manifest = TrustManifest::parse(&format!(r#"{{"models": {{"a/b.bin": "{ABC}"}}}}"#)).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.get("a/b.bin"), Some(ABC));
        assert!(manifest.source().is_none());
    }

    #[test]
    fn test_parse_full_header() {
        let content = format!(
            r#"{{
                "version": 1,
                "algorithm": "SHA256",
                "generated_at": "2026-01-29T10:00:00Z",
                "generated_by": "modelgate/0.1.0",
                "models": {{"m.pkl": "{}"}}
            }}"#,
            ABC.to_uppercase()
        );
        let manifest = TrustManifest::parse(&content).unwrap();
        assert_eq!(manifest.get("m.pkl"), Some(ABC));
    }

    #[test]
    fn test_parse_normalizes_backslashes() {
        let manifest =
            TrustManifest::parse(&format!(r#"{{"models": {{"beats\\2015\\m.pkl": "{ABC}"}}}}"#))
                .unwrap();
        assert!(manifest.contains("beats/2015/m.pkl"));
    }

    #[test]
    fn test_parse_rejects_newer_version() {
        let err = TrustManifest::parse(r#"{"version": 99, "models": {}}"#).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_parse_rejects_other_algorithms() {
        let err = TrustManifest::parse(r#"{"algorithm": "md5", "models": {}}"#).unwrap_err();
        assert!(err.to_string().contains("md5"));
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        for content in [
            r#"{"models": {"m.pkl": "abc"}}"#.to_string(),
            format!(r#"{{"models": {{"../m.pkl": "{ABC}"}}}}"#),
            format!(r#"{{"models": {{"/etc/m.pkl": "{ABC}"}}}}"#),
            format!(r#"{{"models": {{"a//m.pkl": "{ABC}"}}}}"#),
            format!(r#"{{"models": {{"C:\\m.pkl": "{ABC}"}}}}"#),
            format!(r#"{{"models": {{"a/b": "{ABC}", "a\\b": "{ABC}"}}}}"#),
            r#"{"version": 1}"#.to_string(),
            "not json".to_string(),
        ] {
            let err = TrustManifest::parse(&content).unwrap_err();
            assert!(matches!(err, ManifestError::Malformed { .. }), "{content}");
        }
    }

    #[test]
    fn test_parse_rejects_repeated_json_key() {
        let other = "0".repeat(64);
        let content = format!(r#"{{"models": {{"m.pkl": "{ABC}", "m.pkl": "{other}"}}}}"#);
        let err = TrustManifest::parse(&content).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed { .. }));
        assert!(err.to_string().contains("duplicate entry"), "{err}");
    }

    #[test]
    fn test_load_missing_file_is_empty_with_advisory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        let sink = RecordingSink::new();

        let manifest = TrustManifest::load(&path, &sink).unwrap();

        assert!(manifest.is_empty());
        assert_eq!(sink.advisories(), vec![Advisory::ManifestMissing { path }]);
    }

    #[test]
    fn test_load_malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(&path, "{").unwrap();

        let err = TrustManifest::load(&path, &RecordingSink::new()).unwrap_err();

        match err {
            ManifestError::Malformed { path: Some(p), .. } => assert_eq!(p, path),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn test_generate_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("beats/2015")).unwrap();
        fs::write(root.join("beats/2015/m.pkl"), b"abc").unwrap();
        fs::write(root.join("top.pkl"), b"top").unwrap();
        fs::write(root.join("notes.txt"), b"skip me").unwrap();

        let manifest = TrustManifest::generate(root, DEFAULT_PATTERN).unwrap();
        assert_eq!(
            manifest.entries().collect::<Vec<_>>(),
            vec![
                ("beats/2015/m.pkl", ABC),
                ("top.pkl", sha256_hex_bytes(b"top").as_str()),
            ]
        );

        let path = root.join(MANIFEST_FILE_NAME);
        manifest.save(&path).unwrap();
        let loaded = TrustManifest::load(&path, &RecordingSink::new()).unwrap();
        assert_eq!(loaded.entries().collect::<Vec<_>>(), manifest.entries().collect::<Vec<_>>());
        assert_eq!(loaded.source(), Some(path.as_path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_generate_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.pkl"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.pkl"), dir.path().join("link.pkl"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked_dir")).unwrap();

        let manifest = TrustManifest::generate(dir.path(), DEFAULT_PATTERN).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_generate_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrustManifest::generate(dir.path(), "[").unwrap_err();
        assert!(matches!(err, ManifestError::Pattern { .. }));
    }

    #[test]
    fn test_to_json_header_and_order() {
        let mut manifest = TrustManifest::empty();
        manifest.insert("z.pkl", ABC).unwrap();
        manifest.insert("a.pkl", &ABC.to_uppercase()).unwrap();

        let json = manifest.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["algorithm"], "sha256");
        assert!(value["generated_by"].as_str().unwrap().starts_with("modelgate/"));
        assert!(json.find("a.pkl").unwrap() < json.find("z.pkl").unwrap());
        assert_eq!(value["models"]["a.pkl"], ABC);
    }

    #[test]
    fn test_insert_rejects_invalid_key() {
        let mut manifest = TrustManifest::empty();
        assert!(manifest.insert("../x", ABC).is_err());
        assert!(manifest.insert("x", "zz").is_err());
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("a\\b/c.pkl").as_deref(), Some("a/b/c.pkl"));
        assert_eq!(normalize_key("./a"), None);
        assert_eq!(normalize_key(""), None);
        assert_eq!(normalize_key("a/"), None);
    }
}
