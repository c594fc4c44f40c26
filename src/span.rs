//! Canonical in-memory span representation — spec.md §3/§4.4.
//!
//! Field naming follows OpenTelemetry conventions (the same shape as
//! `opentelemetry-sdk`'s `trace::span` types in the wider example pack)
//! without depending on the `opentelemetry` crate itself: OTLP wire
//! plumbing is an explicit Non-goal, so conversion from the wire format is
//! a collaborator's job and this module only needs the decoded shape.

use std::collections::HashMap;

use crate::attribute::AttributeValue;

/// Opaque, equality-comparable trace id — spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub Vec<u8>);

/// Opaque span id, unique within process lifetime — spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub Vec<u8>);

impl TraceId {
    pub fn as_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl SpanId {
    pub fn as_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unset,
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

/// Nanosecond-resolution, monotonic-comparable wall-clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn saturating_sub(self, other: Timestamp) -> i64 {
        self.0.saturating_sub(other.0)
    }
}

/// One unit of work — immutable once accepted (spec.md §3).
#[derive(Debug, Clone)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub service_name: String,
    pub operation_name: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub status: Status,
    pub kind: Kind,
    pub attributes: HashMap<String, AttributeValue>,
    pub resource_attributes: HashMap<String, String>,
    /// Set when `end < start` or `end` was missing and got clamped to
    /// `start` by the receiver — spec.md §3/§8.
    pub repaired: bool,
    /// Set when `parent_span_id` does not refer to any span in the same
    /// trace — spec.md §3 invariant (i): dangling parents are permitted
    /// but flagged.
    pub dangling_parent: bool,
}

impl Span {
    /// `duration = end − start`, non-negative by construction (see
    /// [`SpanBuilder::build`]).
    pub fn duration_nanos(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Span-level attributes are checked before resource attributes, per
    /// spec.md §4.4: "ties are broken in favor of span-level attributes."
    pub fn attribute(&self, path: &str) -> Option<AttributeValue> {
        if let Some(value) = self.attributes.get(path) {
            return Some(value.clone());
        }
        self.resource_attributes
            .get(path)
            .map(|s| AttributeValue::Str(s.clone()))
    }
}

/// Builds a [`Span`] from raw receiver input, applying the clamp-and-flag
/// repair rule from spec.md §3/§8: "A span with `end < start` is clamped
/// to `duration = 0` and marked repaired."
pub struct SpanBuilder {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    service_name: String,
    operation_name: String,
    start: Timestamp,
    end: Option<Timestamp>,
    status: Status,
    kind: Kind,
    attributes: HashMap<String, AttributeValue>,
    resource_attributes: HashMap<String, String>,
}

impl SpanBuilder {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        service_name: impl Into<String>,
        operation_name: impl Into<String>,
        start: Timestamp,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            service_name: service_name.into(),
            operation_name: operation_name.into(),
            start,
            end: None,
            status: Status::Unset,
            kind: Kind::Internal,
            attributes: HashMap::new(),
            resource_attributes: HashMap::new(),
        }
    }

    pub fn parent(mut self, parent: SpanId) -> Self {
        self.parent_span_id = Some(parent);
        self
    }

    pub fn end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Span {
        let (end, repaired) = match self.end {
            None => (self.start, true),
            Some(end) if end.0 < self.start.0 => (self.start, true),
            Some(end) => (end, false),
        };
        Span {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            service_name: self.service_name,
            operation_name: self.operation_name,
            start: self.start,
            end,
            status: self.status,
            kind: self.kind,
            attributes: self.attributes,
            resource_attributes: self.resource_attributes,
            repaired,
            dangling_parent: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> SpanId {
        SpanId(vec![n])
    }

    #[test]
    fn negative_duration_is_clamped_and_flagged() {
        let span = SpanBuilder::new(TraceId(vec![1]), id(1), "svc", "op", Timestamp(100))
            .end(Timestamp(50))
            .build();
        assert_eq!(span.duration_nanos(), 0);
        assert!(span.repaired);
    }

    #[test]
    fn missing_end_is_clamped_and_flagged() {
        let span = SpanBuilder::new(TraceId(vec![1]), id(1), "svc", "op", Timestamp(100)).build();
        assert_eq!(span.duration_nanos(), 0);
        assert!(span.repaired);
    }

    #[test]
    fn normal_duration_is_not_repaired() {
        let span = SpanBuilder::new(TraceId(vec![1]), id(1), "svc", "op", Timestamp(100))
            .end(Timestamp(150))
            .build();
        assert_eq!(span.duration_nanos(), 50);
        assert!(!span.repaired);
    }

    #[test]
    fn span_attribute_prefers_span_level_over_resource() {
        let span = SpanBuilder::new(TraceId(vec![1]), id(1), "svc", "op", Timestamp(0))
            .end(Timestamp(1))
            .attribute("env", AttributeValue::Str("span-value".into()))
            .resource_attribute("env", "resource-value")
            .build();
        assert_eq!(
            span.attribute("env"),
            Some(AttributeValue::Str("span-value".into()))
        );
    }

    #[test]
    fn span_attribute_falls_back_to_resource() {
        let span = SpanBuilder::new(TraceId(vec![1]), id(1), "svc", "op", Timestamp(0))
            .end(Timestamp(1))
            .resource_attribute("region", "us-east-1")
            .build();
        assert_eq!(
            span.attribute("region"),
            Some(AttributeValue::Str("us-east-1".into()))
        );
    }
}
