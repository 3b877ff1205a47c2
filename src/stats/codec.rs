//! Value codec
//!
//! Numbers and strings are stored verbatim so the store stays readable by
//! any external tool. Everything else is stored as JSON behind a version
//! marker.
//!
//! Decoding tries, in order:
//! 1. integer (`-?[0-9]+`)
//! 2. decimal (`[+-]?digits[.digits][e[+-]digits]`)
//! 3. opaque blob (`json:v1:` followed by JSON)
//! 4. plain text
//!
//! Integer-looking input never reaches the blob decoder.

use tracing::warn;

use super::value::{MetricValue, Number};
use crate::error::CodecError;

/// Marker prefixed to every opaque blob. Bump the version when the blob
/// encoding changes.
pub const OPAQUE_MARKER: &str = "json:v1:";

pub struct ValueCodec;

impl ValueCodec {
    pub fn encode(value: &MetricValue) -> Result<Vec<u8>, CodecError> {
        match value {
            MetricValue::Number(n) => Self::encode_number(*n),
            MetricValue::Text(s) => Ok(s.as_bytes().to_vec()),
            MetricValue::Opaque(v) => {
                let mut out = OPAQUE_MARKER.as_bytes().to_vec();
                serde_json::to_writer(&mut out, v)?;
                Ok(out)
            }
        }
    }

    /// Floats always carry a decimal point so they read back as floats.
    pub fn encode_number(n: Number) -> Result<Vec<u8>, CodecError> {
        match n {
            Number::Int(i) => Ok(i.to_string().into_bytes()),
            Number::Float(f) if !f.is_finite() => Err(CodecError::NonFinite(f)),
            Number::Float(f) => {
                let mut s = f.to_string();
                if !s.contains('.') {
                    s.push_str(".0");
                }
                Ok(s.into_bytes())
            }
        }
    }

    /// `None` for absent or empty input.
    pub fn decode(raw: Option<&[u8]>) -> Option<MetricValue> {
        let raw = raw.filter(|r| !r.is_empty())?;
        let text = String::from_utf8_lossy(raw);

        if let Some(i) = parse_integer(&text) {
            return Some(MetricValue::Number(Number::Int(i)));
        }
        if let Some(f) = parse_decimal(&text) {
            return Some(MetricValue::Number(Number::Float(f)));
        }
        if let Some(blob) = text.strip_prefix(OPAQUE_MARKER) {
            match serde_json::from_str::<serde_json::Value>(blob) {
                Ok(v) => return Some(MetricValue::Opaque(v)),
                Err(e) => warn!(error = %e, "malformed opaque blob, returning raw text"),
            }
        }
        Some(MetricValue::Text(text.into_owned()))
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_decimal(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa_digits = i - int_start;

    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        mantissa_digits += i - frac_start;
    }
    if mantissa_digits == 0 {
        return None;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }

    if i != bytes.len() {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}
