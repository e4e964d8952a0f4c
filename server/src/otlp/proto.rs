//! OTLP/Protobuf decoding via the prost-generated collector messages.

use std::collections::BTreeMap;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value as ProtoValue;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::trace::v1 as trace_v1;
use prost::Message as _;

use super::normalize::finish_span;
use super::DecodeError;
use crate::model::{
    AttrValue, InstrumentationScope, Resource, Span, SpanEvent, SpanLink, SpanStatus,
};

pub(super) fn decode(body: &[u8]) -> Result<Vec<Span>, DecodeError> {
    let request = ExportTraceServiceRequest::decode(body)
        .map_err(|e| DecodeError::Protobuf(e.to_string()))?;
    Ok(convert(request))
}

/// Convert an already-decoded request, as received on the gRPC surface.
pub fn convert(request: ExportTraceServiceRequest) -> Vec<Span> {
    let mut spans = Vec::new();
    for rs in request.resource_spans {
        let resource = rs.resource.map(|r| Resource {
            attributes: convert_attributes(r.attributes),
        });
        for ss in rs.scope_spans {
            let scope = ss.scope.map(|s| InstrumentationScope {
                name: s.name,
                version: (!s.version.is_empty()).then_some(s.version),
            });
            for raw in ss.spans {
                spans.push(convert_span(raw, resource.clone(), scope.clone()));
            }
        }
    }
    spans
}

fn convert_span(
    raw: trace_v1::Span,
    resource: Option<Resource>,
    scope: Option<InstrumentationScope>,
) -> Span {
    let start = (raw.start_time_unix_nano / 1_000_000) as i64;
    let ended = raw.end_time_unix_nano != 0;
    let end = if ended {
        (raw.end_time_unix_nano / 1_000_000) as i64
    } else {
        start
    };

    let mut span = Span {
        id: id_hex(&raw.span_id),
        trace: id_hex(&raw.trace_id),
        parent: (!raw.parent_span_id.is_empty()).then(|| id_hex(&raw.parent_span_id)),
        name: raw.name,
        kind: raw.kind,
        status: raw.status.map(convert_status).unwrap_or_default(),
        start,
        end,
        ended,
        attributes: convert_attributes(raw.attributes),
        events: raw.events.into_iter().map(convert_event).collect(),
        links: raw.links.into_iter().map(convert_link).collect(),
        resource,
        scope,
        dropped_attributes_count: raw.dropped_attributes_count,
        dropped_events_count: raw.dropped_events_count,
        dropped_links_count: raw.dropped_links_count,
        ..Default::default()
    };
    finish_span(&mut span);
    span
}

fn id_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        String::new()
    } else {
        hex::encode(bytes)
    }
}

fn convert_status(status: trace_v1::Status) -> SpanStatus {
    SpanStatus {
        code: status.code,
        message: (!status.message.is_empty()).then_some(status.message),
    }
}

fn convert_event(event: trace_v1::span::Event) -> SpanEvent {
    SpanEvent {
        name: event.name,
        time_ms: (event.time_unix_nano / 1_000_000) as i64,
        attributes: convert_attributes(event.attributes),
    }
}

fn convert_link(link: trace_v1::span::Link) -> SpanLink {
    SpanLink {
        trace: id_hex(&link.trace_id),
        span: id_hex(&link.span_id),
        attributes: convert_attributes(link.attributes),
    }
}

fn convert_attributes(attrs: Vec<KeyValue>) -> BTreeMap<String, AttrValue> {
    attrs
        .into_iter()
        .map(|kv| {
            let value = kv
                .value
                .map_or(AttrValue::Str(String::new()), convert_any_value);
            (kv.key, value)
        })
        .collect()
}

fn convert_any_value(value: AnyValue) -> AttrValue {
    match value.value {
        Some(ProtoValue::StringValue(s)) => AttrValue::Str(s),
        Some(ProtoValue::BoolValue(b)) => AttrValue::Bool(b),
        Some(ProtoValue::IntValue(i)) => AttrValue::Int(i),
        Some(ProtoValue::DoubleValue(d)) => AttrValue::Double(d),
        Some(ProtoValue::BytesValue(b)) => AttrValue::Bytes(b),
        Some(ProtoValue::ArrayValue(array)) => {
            AttrValue::Array(array.values.into_iter().map(convert_any_value).collect())
        }
        Some(ProtoValue::KvlistValue(kvlist)) => {
            AttrValue::Map(convert_attributes(kvlist.values))
        }
        None => AttrValue::Str(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    use prost::Message as _;
    use opentelemetry_proto::tonic::common::v1 as common_v1;
    use opentelemetry_proto::tonic::resource::v1 as resource_v1;

    fn string_attr(key: &str, value: &str) -> common_v1::KeyValue {
        common_v1::KeyValue {
            key: key.to_owned(),
            value: Some(common_v1::AnyValue {
                value: Some(ProtoValue::StringValue(value.to_owned())),
            }),
        }
    }

    fn sample_request() -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![trace_v1::ResourceSpans {
                resource: Some(resource_v1::Resource {
                    attributes: vec![string_attr("service.name", "agent")],
                    ..Default::default()
                }),
                scope_spans: vec![trace_v1::ScopeSpans {
                    scope: Some(common_v1::InstrumentationScope {
                        name: "llm-sdk".into(),
                        version: "1.2.0".into(),
                        ..Default::default()
                    }),
                    spans: vec![trace_v1::Span {
                        trace_id: (0..16).collect(),
                        span_id: (16..24).collect(),
                        name: "call".into(),
                        kind: 3,
                        start_time_unix_nano: 1_700_000_000_000_000_000,
                        end_time_unix_nano: 1_700_000_001_000_000_000,
                        attributes: vec![string_attr("experiment", "exp-1")],
                        status: Some(trace_v1::Status {
                            message: "boom".into(),
                            code: 2,
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn round_trips_an_encoded_request() {
        let body = sample_request().encode_to_vec();
        let spans = decode(&body).unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.trace, hex::encode((0..16).collect::<Vec<u8>>()));
        assert_eq!(span.id, hex::encode((16..24).collect::<Vec<u8>>()));
        assert_eq!(span.start, 1_700_000_000_000);
        assert_eq!(span.end, 1_700_000_001_000);
        assert!(span.ended);
        assert!(span.status.is_error());
        assert_eq!(span.experiment.as_deref(), Some("exp-1"));
        assert_eq!(
            span.attributes.get("service.name"),
            Some(&AttrValue::Str("agent".into()))
        );
    }

    #[test]
    fn zero_end_time_means_in_progress() {
        let mut request = sample_request();
        request.resource_spans[0].scope_spans[0].spans[0].end_time_unix_nano = 0;
        let spans = decode(&request.encode_to_vec()).unwrap();
        assert!(!spans[0].ended);
        assert_eq!(spans[0].end, spans[0].start);
    }

    #[test]
    fn random_bytes_are_rejected() {
        // Field tag 0xff is invalid wire data
        assert!(matches!(
            decode(&[0xff, 0x01, 0x02]),
            Err(DecodeError::Protobuf(_))
        ));
    }
}
