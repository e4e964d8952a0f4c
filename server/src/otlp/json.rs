//! Lenient OTLP/JSON decoding.
//!
//! Exporters differ in how they spell ids (hex vs base64), timestamps
//! (nanosecond strings, millisecond numbers, ISO-8601, `[seconds, nanos]`
//! pairs) and attribute values (wrapped `AnyValue` objects vs raw JSON), and
//! older SDKs still send `instrumentationLibrarySpans`. This walker accepts
//! all of them and normalises into the internal model.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde_json::Value;

use super::normalize::{finish_span, normalize_id, parse_time_value};
use super::DecodeError;
use crate::model::{
    AttrValue, InstrumentationScope, Resource, Span, SpanEvent, SpanLink, SpanStatus,
};

pub(super) fn decode(body: &[u8]) -> Result<Vec<Span>, DecodeError> {
    let root: Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::Json(e.to_string()))?;

    let mut spans = Vec::new();
    let Some(resource_spans) = root.get("resourceSpans").and_then(Value::as_array) else {
        return Ok(spans);
    };

    for rs in resource_spans {
        let resource = rs.get("resource").map(decode_resource);

        let scope_spans = rs
            .get("scopeSpans")
            .or_else(|| rs.get("instrumentationLibrarySpans"))
            .and_then(Value::as_array);
        let Some(scope_spans) = scope_spans else {
            continue;
        };

        for ss in scope_spans {
            let scope = ss
                .get("scope")
                .or_else(|| ss.get("instrumentationLibrary"))
                .map(decode_scope);

            let Some(raw_spans) = ss.get("spans").and_then(Value::as_array) else {
                continue;
            };
            for raw in raw_spans {
                spans.push(decode_span(raw, resource.clone(), scope.clone())?);
            }
        }
    }

    Ok(spans)
}

fn decode_span(
    raw: &Value,
    resource: Option<Resource>,
    scope: Option<InstrumentationScope>,
) -> Result<Span, DecodeError> {
    let trace = normalize_id("trace", str_field(raw, "traceId"))?;
    let id = normalize_id("span", str_field(raw, "spanId"))?;
    let parent = match str_field(raw, "parentSpanId") {
        "" => None,
        p => Some(normalize_id("parent", p)?),
    };

    let start = raw
        .get("startTimeUnixNano")
        .or_else(|| raw.get("startTime"))
        .and_then(parse_time_value)
        .unwrap_or(0);
    let end = raw
        .get("endTimeUnixNano")
        .or_else(|| raw.get("endTime"))
        .and_then(parse_time_value)
        .filter(|&t| t != 0);
    let ended = end.is_some();

    let mut span = Span {
        id,
        trace,
        parent,
        name: str_field(raw, "name").to_owned(),
        kind: raw.get("kind").map_or(0, decode_kind),
        status: raw.get("status").map(decode_status).unwrap_or_default(),
        start,
        end: end.unwrap_or(start),
        ended,
        attributes: decode_attributes(raw.get("attributes")),
        events: decode_events(raw.get("events"))?,
        links: decode_links(raw.get("links"))?,
        resource,
        scope,
        dropped_attributes_count: u32_field(raw, "droppedAttributesCount"),
        dropped_events_count: u32_field(raw, "droppedEventsCount"),
        dropped_links_count: u32_field(raw, "droppedLinksCount"),
        ..Default::default()
    };
    finish_span(&mut span);
    Ok(span)
}

fn decode_resource(raw: &Value) -> Resource {
    Resource {
        attributes: decode_attributes(raw.get("attributes")),
    }
}

fn decode_scope(raw: &Value) -> InstrumentationScope {
    InstrumentationScope {
        name: str_field(raw, "name").to_owned(),
        version: raw
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_owned),
    }
}

fn decode_status(raw: &Value) -> SpanStatus {
    let code = raw.get("code").map_or(0, |c| match c {
        Value::Number(n) => n.as_i64().unwrap_or(0) as i32,
        Value::String(s) => match s.trim_start_matches("STATUS_CODE_") {
            "OK" => 1,
            "ERROR" => 2,
            _ => 0,
        },
        _ => 0,
    });
    SpanStatus {
        code,
        message: raw
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_owned),
    }
}

fn decode_kind(raw: &Value) -> i32 {
    match raw {
        Value::Number(n) => n.as_i64().unwrap_or(0) as i32,
        Value::String(s) => match s.trim_start_matches("SPAN_KIND_") {
            "INTERNAL" => 1,
            "SERVER" => 2,
            "CLIENT" => 3,
            "PRODUCER" => 4,
            "CONSUMER" => 5,
            _ => 0,
        },
        _ => 0,
    }
}

/// Decode an attribute collection: either the OTLP `[{key, value}]` list or
/// a plain JSON object.
fn decode_attributes(raw: Option<&Value>) -> BTreeMap<String, AttrValue> {
    let mut out = BTreeMap::new();
    match raw {
        Some(Value::Array(entries)) => {
            for entry in entries {
                let Some(key) = entry.get("key").and_then(Value::as_str) else {
                    continue;
                };
                let value = entry
                    .get("value")
                    .map_or(AttrValue::Str(String::new()), flatten_any_value);
                out.insert(key.to_owned(), value);
            }
        }
        Some(Value::Object(map)) => {
            for (key, value) in map {
                out.insert(key.clone(), flatten_any_value(value));
            }
        }
        _ => {}
    }
    out
}

/// Flatten an OTLP `AnyValue` (or, leniently, a raw JSON value) to a native
/// [`AttrValue`].
fn flatten_any_value(raw: &Value) -> AttrValue {
    if let Value::Object(map) = raw {
        if let Some(Value::String(s)) = map.get("stringValue") {
            return AttrValue::Str(s.clone());
        }
        if let Some(Value::Bool(b)) = map.get("boolValue") {
            return AttrValue::Bool(*b);
        }
        if let Some(v) = map.get("intValue") {
            // OTLP/JSON carries int64 as a decimal string
            let parsed = match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse::<i64>().ok(),
                _ => None,
            };
            if let Some(i) = parsed {
                return AttrValue::Int(i);
            }
        }
        if let Some(v) = map.get("doubleValue") {
            let parsed = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            };
            if let Some(d) = parsed {
                return AttrValue::Double(d);
            }
        }
        if let Some(Value::String(encoded)) = map.get("bytesValue") {
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) {
                return AttrValue::Bytes(bytes);
            }
        }
        if let Some(array) = map.get("arrayValue") {
            let values = array
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(flatten_any_value).collect())
                .unwrap_or_default();
            return AttrValue::Array(values);
        }
        if let Some(kvlist) = map.get("kvlistValue") {
            let mut nested = BTreeMap::new();
            if let Some(entries) = kvlist.get("values").and_then(Value::as_array) {
                for entry in entries {
                    if let Some(key) = entry.get("key").and_then(Value::as_str) {
                        let value = entry
                            .get("value")
                            .map_or(AttrValue::Str(String::new()), flatten_any_value);
                        nested.insert(key.to_owned(), value);
                    }
                }
            }
            return AttrValue::Map(nested);
        }
    }
    AttrValue::from_json(raw)
}

fn decode_events(raw: Option<&Value>) -> Result<Vec<SpanEvent>, DecodeError> {
    let Some(Value::Array(entries)) = raw else {
        return Ok(Vec::new());
    };
    Ok(entries
        .iter()
        .map(|entry| SpanEvent {
            name: str_field(entry, "name").to_owned(),
            time_ms: entry
                .get("timeUnixNano")
                .or_else(|| entry.get("time"))
                .and_then(parse_time_value)
                .unwrap_or(0),
            attributes: decode_attributes(entry.get("attributes")),
        })
        .collect())
}

fn decode_links(raw: Option<&Value>) -> Result<Vec<SpanLink>, DecodeError> {
    let Some(Value::Array(entries)) = raw else {
        return Ok(Vec::new());
    };
    let mut links = Vec::with_capacity(entries.len());
    for entry in entries {
        links.push(SpanLink {
            trace: normalize_id("trace", str_field(entry, "traceId"))?,
            span: normalize_id("span", str_field(entry, "spanId"))?,
            attributes: decode_attributes(entry.get("attributes")),
        });
    }
    Ok(links)
}

fn str_field<'a>(raw: &'a Value, key: &str) -> &'a str {
    raw.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn u32_field(raw: &Value, key: &str) -> u32 {
    raw.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn batch(spans: serde_json::Value) -> Vec<u8> {
        serde_json::json!({
            "resourceSpans": [{
                "resource": {
                    "attributes": [
                        {"key": "service.name", "value": {"stringValue": "agent"}}
                    ]
                },
                "scopeSpans": [{
                    "scope": {"name": "llm-sdk", "version": "1.2.0"},
                    "spans": spans
                }]
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_a_two_span_batch() {
        let body = batch(serde_json::json!([
            {
                "traceId": "a1".repeat(16),
                "spanId": "01".repeat(8),
                "name": "parent",
                "kind": 1,
                "startTimeUnixNano": "1700000000000000000",
                "endTimeUnixNano": "1700000001000000000",
                "status": {"code": 1},
                "attributes": [
                    {"key": "inputTokens", "value": {"intValue": "10"}}
                ]
            },
            {
                "traceId": "a1".repeat(16),
                "spanId": "02".repeat(8),
                "parentSpanId": "01".repeat(8),
                "name": "child",
                "startTimeUnixNano": "1700000000100000000",
                "endTimeUnixNano": "1700000000200000000"
            }
        ]));

        let spans = decode(&body).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "parent");
        assert_eq!(spans[0].start, 1_700_000_000_000);
        assert_eq!(spans[0].end, 1_700_000_001_000);
        assert!(spans[0].ended);
        assert_eq!(spans[0].attributes.get("inputTokens"), Some(&AttrValue::Int(10)));
        // resource attributes merged over span attributes
        assert_eq!(
            spans[0].attributes.get("service.name"),
            Some(&AttrValue::Str("agent".into()))
        );
        assert_eq!(spans[1].parent.as_deref(), Some(&"01".repeat(8)[..]));
        assert_eq!(spans[1].scope.as_ref().unwrap().name, "llm-sdk");
    }

    #[test]
    fn missing_end_means_in_progress() {
        let body = batch(serde_json::json!([{
            "traceId": "a1".repeat(16),
            "spanId": "01".repeat(8),
            "name": "open",
            "startTimeUnixNano": 1_700_000_000_000_i64
        }]));
        let spans = decode(&body).unwrap();
        assert!(!spans[0].ended);
        assert_eq!(spans[0].end, spans[0].start);
    }

    #[test]
    fn iso_times_and_second_nano_pairs_are_accepted() {
        let body = batch(serde_json::json!([{
            "traceId": "a1".repeat(16),
            "spanId": "01".repeat(8),
            "name": "mixed",
            "startTimeUnixNano": "2023-11-14T22:13:20Z",
            "endTimeUnixNano": [1_700_000_001, 500_000_000]
        }]));
        let spans = decode(&body).unwrap();
        assert_eq!(spans[0].start, 1_700_000_000_000);
        assert_eq!(spans[0].end, 1_700_000_001_500);
    }

    #[test]
    fn base64_ids_are_re_encoded_as_hex() {
        let trace_bytes: Vec<u8> = (0..16).collect();
        let span_bytes: Vec<u8> = (16..24).collect();
        let body = batch(serde_json::json!([{
            "traceId": base64::engine::general_purpose::STANDARD.encode(&trace_bytes),
            "spanId": base64::engine::general_purpose::STANDARD.encode(&span_bytes),
            "name": "b64",
            "startTimeUnixNano": 1_700_000_000_000_i64
        }]));
        let spans = decode(&body).unwrap();
        assert_eq!(spans[0].trace, hex::encode(&trace_bytes));
        assert_eq!(spans[0].id, hex::encode(&span_bytes));
    }

    #[test]
    fn status_and_kind_accept_enum_names() {
        let body = batch(serde_json::json!([{
            "traceId": "a1".repeat(16),
            "spanId": "01".repeat(8),
            "name": "failed",
            "kind": "SPAN_KIND_CLIENT",
            "status": {"code": "STATUS_CODE_ERROR", "message": "boom"},
            "startTimeUnixNano": 1_700_000_000_000_i64,
            "endTimeUnixNano": 1_700_000_000_100_i64
        }]));
        let spans = decode(&body).unwrap();
        assert_eq!(spans[0].kind, 3);
        assert!(spans[0].status.is_error());
        assert_eq!(spans[0].status.message.as_deref(), Some("boom"));
    }

    #[test]
    fn kvlist_and_array_values_flatten() {
        let body = batch(serde_json::json!([{
            "traceId": "a1".repeat(16),
            "spanId": "01".repeat(8),
            "name": "nested",
            "startTimeUnixNano": 1_700_000_000_000_i64,
            "attributes": [
                {"key": "opts", "value": {"kvlistValue": {"values": [
                    {"key": "temperature", "value": {"doubleValue": 0.7}}
                ]}}},
                {"key": "stop", "value": {"arrayValue": {"values": [
                    {"stringValue": "\n"}
                ]}}}
            ]
        }]));
        let spans = decode(&body).unwrap();
        let AttrValue::Map(opts) = &spans[0].attributes["opts"] else {
            panic!("expected map");
        };
        assert_eq!(opts.get("temperature"), Some(&AttrValue::Double(0.7)));
        let AttrValue::Array(stop) = &spans[0].attributes["stop"] else {
            panic!("expected array");
        };
        assert_eq!(stop[0], AttrValue::Str("\n".into()));
    }

    #[test]
    fn empty_resource_spans_is_an_empty_batch() {
        let spans = decode(br#"{"resourceSpans": []}"#).unwrap();
        assert!(spans.is_empty());
        let spans = decode(b"{}").unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(decode(b"{nope"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn example_and_experiment_promote_from_attributes() {
        let body = batch(serde_json::json!([{
            "traceId": "a1".repeat(16),
            "spanId": "01".repeat(8),
            "name": "root",
            "startTimeUnixNano": 1_700_000_000_000_i64,
            "attributes": [
                {"key": "example", "value": {"stringValue": "ex-9"}},
                {"key": "experiment", "value": {"stringValue": "exp-4"}}
            ]
        }]));
        let spans = decode(&body).unwrap();
        assert_eq!(spans[0].example.as_deref(), Some("ex-9"));
        assert_eq!(spans[0].experiment.as_deref(), Some("exp-4"));
        assert!(!spans[0].attributes.contains_key("example"));
        assert!(!spans[0].attributes.contains_key("experiment"));
    }
}
