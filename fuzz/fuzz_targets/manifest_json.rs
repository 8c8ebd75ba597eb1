#![no_main]

use libfuzzer_sys::fuzz_target;
use modelgate_core::TrustManifest;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(manifest) = TrustManifest::parse(content) {
        for (key, digest) in manifest.entries() {
            assert!(!key.starts_with('/'));
            assert_eq!(digest.len(), 64);
        }
    }
});
