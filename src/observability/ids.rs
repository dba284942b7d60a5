//! W3C trace-context compatible identifiers
//!
//! Trace ids are 16 random bytes, span ids 8 random bytes, both rendered as
//! lowercase hex without separators. Bytes come straight from the operating
//! system CSPRNG; there is no fallback to a seeded generator.

use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt::Write;

use crate::error::ObservabilityError;

pub const TRACE_ID_HEX_LEN: usize = 32;
pub const SPAN_ID_HEX_LEN: usize = 16;

/// Generate a 32-character trace id, surfacing entropy failures.
pub fn try_generate_trace_id() -> Result<String, ObservabilityError> {
    random_hex::<16>()
}

/// Generate a 16-character span id, surfacing entropy failures.
pub fn try_generate_span_id() -> Result<String, ObservabilityError> {
    random_hex::<8>()
}

/// Generate a 32-character trace id.
///
/// # Panics
///
/// Panics if the OS random source is unavailable. Identifier generation must
/// never degrade to a predictable source, so this is treated as fatal.
pub fn generate_trace_id() -> String {
    match try_generate_trace_id() {
        Ok(id) => id,
        Err(e) => panic!("FATAL: cannot generate trace id: {e}"),
    }
}

/// Generate a 16-character span id.
///
/// # Panics
///
/// Same conditions as [`generate_trace_id`].
pub fn generate_span_id() -> String {
    match try_generate_span_id() {
        Ok(id) => id,
        Err(e) => panic!("FATAL: cannot generate span id: {e}"),
    }
}

/// Check that the OS random source works. Called once during service startup.
pub fn ensure_entropy_available() -> Result<(), ObservabilityError> {
    try_generate_span_id().map(|_| ())
}

pub fn is_valid_trace_id(id: &str) -> bool {
    is_valid_hex_id(id, TRACE_ID_HEX_LEN)
}

pub fn is_valid_span_id(id: &str) -> bool {
    is_valid_hex_id(id, SPAN_ID_HEX_LEN)
}

// All-zero ids are reserved as invalid by the W3C format.
fn is_valid_hex_id(id: &str, len: usize) -> bool {
    id.len() == len
        && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && id.bytes().any(|b| b != b'0')
}

fn random_hex<const N: usize>() -> Result<String, ObservabilityError> {
    let mut bytes = [0u8; N];
    loop {
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| ObservabilityError::Entropy(e.to_string()))?;
        if bytes.iter().any(|b| *b != 0) {
            break;
        }
    }

    let mut out = String::with_capacity(N * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    Ok(out)
}
