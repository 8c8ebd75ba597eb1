//! Process exit codes for `modelgate`.
//! These codes are part of the public contract and match `LoadError::exit_code()`.

use modelgate_core::{ConfigError, DecodeError, IntegrityError, LoadError, ManifestError};

pub const SUCCESS: i32 = 0;
pub const NOT_FOUND: i32 = 1; // Missing file or I/O failure
pub const CONFIG_ERROR: i32 = 2; // Bad config, manifest or arguments
pub const UNSAFE: i32 = 3; // Blocked type or undecodable stream
pub const INTEGRITY: i32 = 4; // Digest mismatch, or unverifiable in strict mode

/// Map a command failure onto the exit code contract.
pub fn for_error(err: &anyhow::Error) -> i32 {
    if let Some(load) = err.downcast_ref::<LoadError>() {
        return load.exit_code();
    }
    if err.downcast_ref::<IntegrityError>().is_some() {
        return INTEGRITY;
    }
    if err.downcast_ref::<DecodeError>().is_some() {
        return UNSAFE;
    }
    if err.downcast_ref::<ManifestError>().is_some() || err.downcast_ref::<ConfigError>().is_some()
    {
        return CONFIG_ERROR;
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return NOT_FOUND;
    }
    CONFIG_ERROR
}
