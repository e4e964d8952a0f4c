//! Normalisation rules shared by both decoder paths.

use base64::Engine as _;
use chrono::DateTime;

use super::DecodeError;
use crate::model::{AttrValue, Span, EXAMPLE_KEY, EXPERIMENT_KEY};

/// Values at or above this are nanosecond timestamps; below, milliseconds.
const NANO_THRESHOLD: i64 = 10_000_000_000_000;

/// Normalise a textual trace or span id.
///
/// 32- or 16-character hexadecimal ids are kept byte-for-byte as received;
/// anything else is decoded as base64 and re-encoded as lowercase hex. An
/// empty id stays empty (and later fails batch validation).
pub fn normalize_id(field: &'static str, raw: &str) -> Result<String, DecodeError> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    if (raw.len() == 32 || raw.len() == 16) && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(raw.to_owned());
    }
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map(hex::encode)
        .map_err(|_| DecodeError::InvalidId {
            field,
            value: raw.to_owned(),
        })
}

/// Parse a timestamp in any of the accepted shapes into epoch milliseconds.
///
/// Accepted: integers/floats in nanoseconds (>= 10^13) or milliseconds,
/// the same as numeric strings, ISO-8601 strings, and `[seconds, nanos]`
/// pairs. Returns `None` for absent/null/unparseable values.
pub fn parse_time_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => Some(scale_epoch(n.as_f64()?)),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(numeric) = trimmed.parse::<f64>() {
                return Some(scale_epoch(numeric));
            }
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        serde_json::Value::Array(pair) if pair.len() == 2 => {
            let seconds = pair[0].as_f64()?;
            let nanos = pair[1].as_f64().unwrap_or(0.0);
            Some((seconds * 1_000.0 + nanos / 1_000_000.0) as i64)
        }
        _ => None,
    }
}

fn scale_epoch(value: f64) -> i64 {
    if value >= NANO_THRESHOLD as f64 {
        (value / 1_000_000.0) as i64
    } else {
        value as i64
    }
}

/// Apply the post-decode rules common to both encodings: resource attributes
/// merge over span attributes (service identity must not be shadowed by
/// per-span tags), and the reserved `example`/`experiment` keys move from
/// the merged attribute map to top-level span fields.
pub fn finish_span(span: &mut Span) {
    if let Some(resource) = &span.resource {
        for (key, value) in &resource.attributes {
            span.attributes.insert(key.clone(), value.clone());
        }
    }
    if let Some(value) = span.attributes.remove(EXAMPLE_KEY) {
        span.example = Some(attr_to_string(&value));
    }
    if let Some(value) = span.attributes.remove(EXPERIMENT_KEY) {
        span.experiment = Some(attr_to_string(&value));
    }
}

fn attr_to_string(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}
