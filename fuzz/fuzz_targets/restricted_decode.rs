#![no_main]

use libfuzzer_sys::fuzz_target;
use modelgate_core::{decode_slice, AdmissionPolicy, DecodeError, DecodeLimits};

fuzz_target!(|data: &[u8]| {
    let policy = AdmissionPolicy::default();
    let limits = DecodeLimits {
        max_input_bytes: 1 << 20,
        ..DecodeLimits::default()
    };
    if let Err(DecodeError::Unsafe(rejected)) = decode_slice(data, &policy, &limits) {
        assert!(!policy.is_admitted(&rejected.reference));
    }
});
