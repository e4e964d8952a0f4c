//! OTLP trace decoding.
//!
//! Turns an `ExportTraceServiceRequest` body, in either of its two wire
//! encodings, into the internal [`Span`] records of [`crate::model`]. The
//! JSON path is deliberately lenient (clients disagree on id, timestamp and
//! attribute spellings); the Protobuf path goes through the prost-generated
//! OTLP messages.

mod json;
mod normalize;
mod proto;

pub use normalize::{normalize_id, parse_time_value};
pub use proto::convert as convert_proto_request;

use thiserror::Error;

use crate::model::Span;

/// Recognised request encodings for `POST /v1/traces`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Protobuf,
}

impl ContentKind {
    /// Map a Content-Type header value to an encoding, ignoring parameters
    /// such as `; charset=utf-8`.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/json" => Some(Self::Json),
            "application/x-protobuf" | "application/protobuf" => Some(Self::Protobuf),
            _ => None,
        }
    }
}

/// Decoder failures. All of these surface as OTLP `INVALID_ARGUMENT`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("malformed JSON payload: {0}")]
    Json(String),

    #[error("malformed protobuf payload: {0}")]
    Protobuf(String),

    #[error("invalid {field} id: {value:?}")]
    InvalidId { field: &'static str, value: String },

    #[error("span at index {index} is missing a trace or span id")]
    MissingId { index: usize },
}

/// Decode one export request body into ordered span records.
///
/// An empty or absent `resourceSpans` list decodes to an empty batch, which
/// the endpoint treats as success with no work.
pub fn decode_export(kind: ContentKind, body: &[u8]) -> Result<Vec<Span>, DecodeError> {
    match kind {
        ContentKind::Json => json::decode(body),
        ContentKind::Protobuf => proto::decode(body),
    }
}

/// Reject the whole batch if any span lacks a trace or span id.
pub fn validate_spans(spans: &[Span]) -> Result<(), DecodeError> {
    for (index, span) in spans.iter().enumerate() {
        if span.trace.is_empty() || span.id.is_empty() {
            return Err(DecodeError::MissingId { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    #[test]
    fn content_kind_recognises_both_protobuf_spellings() {
        assert_eq!(
            ContentKind::from_content_type("application/x-protobuf"),
            Some(ContentKind::Protobuf)
        );
        assert_eq!(
            ContentKind::from_content_type("application/protobuf"),
            Some(ContentKind::Protobuf)
        );
        assert_eq!(
            ContentKind::from_content_type("application/json; charset=utf-8"),
            Some(ContentKind::Json)
        );
        assert_eq!(ContentKind::from_content_type("text/plain"), None);
    }

    #[test]
    fn validate_rejects_batch_with_blank_ids() {
        let good = Span {
            id: "ab".repeat(8),
            trace: "cd".repeat(16),
            ..Default::default()
        };
        let bad = Span {
            id: String::new(),
            trace: "cd".repeat(16),
            ..Default::default()
        };
        assert!(validate_spans(&[good.clone()]).is_ok());
        let err = validate_spans(&[good, bad]).unwrap_err();
        assert!(matches!(err, DecodeError::MissingId { index: 1 }));
    }
}
