//! Shared fixtures: a small protocol 2 stream writer and model trees.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use modelgate_core::{sha256_hex_bytes, TrustManifest, MANIFEST_FILE_NAME};
use tempfile::TempDir;

/// Writes pickle opcodes, protocol 2.
pub struct Pickle {
    buf: Vec<u8>,
}

impl Pickle {
    pub fn new() -> Self {
        Self {
            buf: vec![0x80, 0x02],
        }
    }

    fn op(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn global(self, module: &str, name: &str) -> Self {
        self.op(format!("c{module}\n{name}\n").as_bytes())
    }

    pub fn mark(self) -> Self {
        self.op(b"(")
    }

    pub fn int(self, value: i32) -> Self {
        let mut op = vec![b'J'];
        op.extend_from_slice(&value.to_le_bytes());
        self.op(&op)
    }

    pub fn float(self, value: f64) -> Self {
        let mut op = vec![b'G'];
        op.extend_from_slice(&value.to_be_bytes());
        self.op(&op)
    }

    pub fn str(self, value: &str) -> Self {
        let len = u32::try_from(value.len()).expect("short string");
        let mut op = vec![b'X'];
        op.extend_from_slice(&len.to_le_bytes());
        op.extend_from_slice(value.as_bytes());
        self.op(&op)
    }

    pub fn empty_tuple(self) -> Self {
        self.op(b")")
    }

    pub fn tuple(self) -> Self {
        self.op(b"t")
    }

    pub fn empty_list(self) -> Self {
        self.op(b"]")
    }

    pub fn appends(self) -> Self {
        self.op(b"e")
    }

    pub fn empty_dict(self) -> Self {
        self.op(b"}")
    }

    pub fn setitems(self) -> Self {
        self.op(b"u")
    }

    pub fn reduce(self) -> Self {
        self.op(b"R")
    }

    pub fn newobj(self) -> Self {
        self.op(b"\x81")
    }

    pub fn build(self) -> Self {
        self.op(b"b")
    }

    pub fn stop(self) -> Vec<u8> {
        self.op(b".").buf
    }
}

impl Default for Pickle {
    fn default() -> Self {
        Self::new()
    }
}

/// `{}` at protocol 2.
pub fn empty_dict_stream() -> Vec<u8> {
    Pickle::new().empty_dict().stop()
}

/// A feed-forward layer with two weights and a softmax activation.
pub fn layer_stream() -> Vec<u8> {
    Pickle::new()
        .global("madmom.ml.nn.layers", "FeedForwardLayer")
        .empty_tuple()
        .newobj()
        .empty_dict()
        .mark()
        .str("weights")
        .empty_list()
        .mark()
        .float(0.25)
        .float(-0.5)
        .appends()
        .str("activation_fn")
        .global("madmom.ml.nn.activations", "softmax")
        .str("size")
        .int(2)
        .setitems()
        .build()
        .stop()
}

/// `os.system("id")` via REDUCE.
pub fn os_system_stream() -> Vec<u8> {
    Pickle::new()
        .global("os", "system")
        .mark()
        .str("id")
        .tuple()
        .reduce()
        .stop()
}

/// Temp model root holding `files`, without a manifest.
pub fn model_tree(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (relative, content) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        fs::write(path, content).expect("write model");
    }
    dir
}

/// Write `<root>/model_manifest.json` tracking `entries` with their true
/// digests.
pub fn write_manifest(root: &Path, entries: &[(&str, &[u8])]) {
    let mut manifest = TrustManifest::empty();
    for (relative, content) in entries {
        manifest
            .insert(relative, &sha256_hex_bytes(content))
            .expect("valid entry");
    }
    manifest
        .save(root.join(MANIFEST_FILE_NAME))
        .expect("save manifest");
}
