//! Decoding of cluster quantity strings
//!
//! The cluster API reports CPU as whole cores or with an `n`/`u`/`m`
//! suffix, and memory as bytes or with a two-character binary suffix.
//!
//! Memory suffixes are scaled by powers of 1000 even though their names
//! imply powers of 1024. Stored series depend on this scaling, so it is
//! kept as is.

use thiserror::Error;

/// Multipliers for the two-character memory suffixes
const MEMORY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1e3),
    ("Mi", 1e6),
    ("Gi", 1e9),
    ("Ti", 1e12),
    ("Pi", 1e15),
    ("Ei", 1e18),
];

/// Multipliers for the single-character CPU suffixes
const CPU_SUFFIXES: &[(char, f64)] = &[('n', 1e-9), ('u', 1e-6), ('m', 1e-3)];

/// Error raised when a quantity payload is not an integer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity {input:?}")]
    Invalid { input: String },
}

fn parse_integer(payload: &str, input: &str) -> Result<f64, QuantityError> {
    payload
        .parse::<i64>()
        .map(|v| v as f64)
        .map_err(|_| QuantityError::Invalid {
            input: input.to_string(),
        })
}

/// Decode a memory quantity into bytes.
///
/// A trailing `i` marks a two-character suffix; an unrecognized suffix
/// decodes to zero.
pub fn decode_memory(input: &str) -> Result<f64, QuantityError> {
    if input.is_empty() {
        return Err(QuantityError::Empty);
    }

    if !input.ends_with('i') {
        return parse_integer(input, input);
    }

    let Some(split) = input.len().checked_sub(2).filter(|i| input.is_char_boundary(*i)) else {
        return Ok(0.0);
    };
    let (payload, unit) = input.split_at(split);

    match MEMORY_SUFFIXES.iter().find(|(suffix, _)| *suffix == unit) {
        Some((_, multiplier)) => Ok(multiplier * parse_integer(payload, input)?),
        None => Ok(0.0),
    }
}

/// Decode a CPU quantity into cores.
pub fn decode_cpu(input: &str) -> Result<f64, QuantityError> {
    let Some(last) = input.chars().last() else {
        return Err(QuantityError::Empty);
    };

    match CPU_SUFFIXES.iter().find(|(suffix, _)| *suffix == last) {
        Some((_, multiplier)) => {
            let payload = &input[..input.len() - last.len_utf8()];
            Ok(multiplier * parse_integer(payload, input)?)
        }
        None => parse_integer(input, input),
    }
}

/// Decode a memory quantity, degrading malformed input to zero
pub fn memory_or_zero(input: &str) -> f64 {
    decode_memory(input).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Failed to decode memory quantity");
        0.0
    })
}

/// Decode a CPU quantity, degrading malformed input to zero
pub fn cpu_or_zero(input: &str) -> f64 {
    decode_cpu(input).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Failed to decode cpu quantity");
        0.0
    })
}
