//! Streaming SHA-256 content digests.
//!
//! Digests are rendered as 64 lowercase hex characters, the same form the
//! trust manifest stores. Input is consumed in fixed-size chunks so the size
//! of a model file never dictates memory use.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

const CHUNK_SIZE: usize = 8192;

/// Hash everything `reader` yields.
pub fn sha256_hex_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory buffer.
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash the file at `path`. Exposed for manifest tooling.
pub fn file_digest(path: impl AsRef<Path>) -> io::Result<String> {
    let file = File::open(path.as_ref())?;
    sha256_hex_reader(file)
}

/// Whether `s` has the shape of a hex SHA-256 digest (either case).
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
