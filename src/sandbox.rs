//! Predicate sandbox (C10) — spec.md §4.6 "Sandbox".
//!
//! A predicate only ever sees a [`SpanView`]: lookup by dotted attribute
//! path, operation name, duration, status, kind, service name. No
//! navigation to the rest of the trace, no mutation, no reflection, no I/O.
//! The view borrows its span for the duration of one evaluator invocation
//! and cannot outlive it (spec.md §5 "Span views inside predicates: scoped
//! to one evaluator invocation; never escape").

use crate::attribute::AttributeValue;
use crate::span::{Kind, Span, Status};

#[derive(Clone, Copy)]
pub struct SpanView<'a> {
    span: &'a Span,
}

impl<'a> SpanView<'a> {
    pub fn new(span: &'a Span) -> Self {
        Self { span }
    }

    pub fn operation_name(&self) -> &str {
        &self.span.operation_name
    }

    pub fn service_name(&self) -> &str {
        &self.span.service_name
    }

    pub fn duration_nanos(&self) -> i64 {
        self.span.duration_nanos()
    }

    pub fn status(&self) -> Status {
        self.span.status
    }

    pub fn kind(&self) -> Kind {
        self.span.kind
    }

    /// The only way to reach an attribute value: a dotted path, resolved
    /// span-attributes-first then resource-attributes, exactly as
    /// [`Span::attribute`] does. There is deliberately no accessor that
    /// hands back the raw attribute maps.
    pub fn attribute(&self, path: &str) -> Option<AttributeValue> {
        self.span.attribute(path)
    }
}
