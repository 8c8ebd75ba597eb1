//! Restricted object-graph decoder.
//!
//! Reads the pickle wire format (protocols 0 through 5) without executing
//! anything. Type references are resolved only through an
//! [`AdmissionPolicy`]; admitted types become inert [`Object`] records or,
//! for builtin containers, plain [`Value`]s.

mod limits;
mod keys;
mod machine;
mod opcodes;
mod reader;
mod text;
mod value;


use std::io::{self, BufReader, Read};

use thiserror::Error;

use crate::admission::{AdmissionPolicy, TypeRef, UnsafeTypeError};

pub use limits::{DecodeLimits, DecodeLimitsOverrides};
pub use value::{Object, Value};

use machine::Machine;
use reader::StreamReader;

/// Errors produced while decoding a stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Unsafe(#[from] UnsafeTypeError),

    #[error("unexpected end of stream at offset {offset}")]
    Truncated { offset: u64 },

    #[error("invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: u64 },

    #[error("unsupported protocol version {protocol}")]
    UnsupportedProtocol { protocol: u8 },

    #[error("unsupported opcode {opcode} at offset {offset}: {reason}")]
    Unsupported {
        opcode: &'static str,
        offset: u64,
        reason: &'static str,
    },

    #[error("malformed stream at offset {offset}: {message}")]
    Malformed { offset: u64, message: String },

    #[error("{limit} limit exceeded: {value} > {max}")]
    LimitExceeded {
        limit: &'static str,
        value: u64,
        max: u64,
    },

    #[error("object graph contains a reference cycle")]
    Cycle,

    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// True when the stream named a type the policy refused.
    pub fn is_unsafe(&self) -> bool {
        matches!(self, Self::Unsafe(_))
    }

    pub fn rejected_reference(&self) -> Option<&TypeRef> {
        match self {
            Self::Unsafe(err) => Some(&err.reference),
            _ => None,
        }
    }
}

/// Decode one object graph from `reader`.
///
/// Decoding stops at the first `STOP` opcode; trailing bytes are not read.
pub fn decode<R: Read>(
    reader: R,
    policy: &AdmissionPolicy,
    limits: &DecodeLimits,
) -> Result<Value, DecodeError> {
    let stream = StreamReader::new(BufReader::new(reader), limits.max_input_bytes);
    Machine::new(policy, limits).run(stream)
}

pub fn decode_slice(
    bytes: &[u8],
    policy: &AdmissionPolicy,
    limits: &DecodeLimits,
) -> Result<Value, DecodeError> {
    decode(bytes, policy, limits)
}

/// Decode with an unrestricted policy. Crate-internal: callers go through
/// `SecureLoader::unsafe_load`, which reports the bypass.
pub(crate) fn decode_unrestricted<R: Read>(
    reader: R,
    limits: &DecodeLimits,
) -> Result<Value, DecodeError> {
    decode(reader, &AdmissionPolicy::unrestricted(), limits)
}
