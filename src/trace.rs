//! The set of spans sharing one trace id — spec.md §3.

use std::collections::HashMap;

use crate::span::{Span, SpanId, TraceId};

/// All spans belonging to one trace id, in arrival order — spec.md §4.5
/// "Ordering": "Within a single trace id, spans are delivered to the
/// evaluator in arrival order."
#[derive(Debug, Clone)]
pub struct Trace {
    pub trace_id: TraceId,
    spans: Vec<Span>,
    /// True if the trace was closed by hitting `hardTraceTTL` rather than
    /// quiescing normally — spec.md §4.5/§8.
    pub force_closed: bool,
}

impl Trace {
    pub fn new(trace_id: TraceId) -> Self {
        Self {
            trace_id,
            spans: Vec::new(),
            force_closed: false,
        }
    }

    /// Appends a span, flagging it if its parent doesn't resolve within
    /// this trace — spec.md §3 invariant (i). Span graphs are treated as
    /// DAGs addressed by id, never by back-pointer, so this is a simple
    /// membership check, not a walk (spec.md §9 "Cyclic parent/child
    /// references").
    pub fn push(&mut self, mut span: Span) {
        if let Some(parent) = &span.parent_span_id {
            span.dangling_parent = !self.contains_span(parent);
        }
        self.spans.push(span);
    }

    fn contains_span(&self, id: &SpanId) -> bool {
        self.spans.iter().any(|s| &s.span_id == id)
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn first_arrival(&self) -> Option<crate::span::Timestamp> {
        // Arrival order, not start time: the first element pushed.
        self.spans.first().map(|s| s.start)
    }

    /// All spans whose operation name satisfies `pattern`.
    pub fn spans_matching<'a>(
        &'a self,
        pattern: &'a crate::dsl::Pattern,
    ) -> impl Iterator<Item = &'a Span> + 'a {
        self.spans
            .iter()
            .filter(move |s| pattern.matches(&s.operation_name))
    }

    /// Recompute every span's `dangling_parent` flag against the final
    /// span set — used once a trace is deemed complete, since spans may
    /// arrive out of order (spec.md §3 invariant (ii)) and a parent that
    /// hadn't arrived yet at push-time may have arrived since.
    pub fn recompute_dangling_parents(&mut self) {
        let ids: std::collections::HashSet<&SpanId> =
            self.spans.iter().map(|s| &s.span_id).collect();
        for span in &mut self.spans {
            if let Some(parent) = &span.parent_span_id {
                span.dangling_parent = !ids.contains(parent);
            }
        }
    }

    /// Count of dangling spans, repaired spans — useful for completion
    /// diagnostics and tests.
    pub fn repair_stats(&self) -> RepairStats {
        let mut stats = RepairStats::default();
        for span in &self.spans {
            if span.repaired {
                stats.repaired += 1;
            }
            if span.dangling_parent {
                stats.dangling += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairStats {
    pub repaired: usize,
    pub dangling: usize,
}

/// Resource attributes are inherited per-trace in OTLP but spans carry
/// their own snapshot (spec.md §4.4): this helper resolves a path against
/// a specific span the same way [`Span::attribute`] does, exposed at the
/// trace level for convenience callers (e.g. the sandbox).
pub fn attribute_index(trace: &Trace) -> HashMap<&str, usize> {
    let mut index = HashMap::new();
    for (i, span) in trace.spans().iter().enumerate() {
        index.entry(span.operation_name.as_str()).or_insert(i);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;
    use crate::span::{SpanBuilder, Timestamp};

    fn span(trace: TraceId, id: u8, op: &str, parent: Option<u8>) -> Span {
        let mut builder = SpanBuilder::new(trace, SpanId(vec![id]), "svc", op, Timestamp(0))
            .end(Timestamp(10));
        if let Some(p) = parent {
            builder = builder.parent(SpanId(vec![p]));
        }
        builder.build()
    }

    #[test]
    fn empty_trace_has_no_spans() {
        let trace = Trace::new(TraceId(vec![1]));
        assert!(trace.is_empty());
    }

    #[test]
    fn dangling_parent_is_flagged() {
        let mut trace = Trace::new(TraceId(vec![1]));
        trace.push(span(TraceId(vec![1]), 1, "child", Some(99)));
        assert!(trace.spans()[0].dangling_parent);
    }

    #[test]
    fn parent_arriving_late_is_reconciled_on_recompute() {
        let mut trace = Trace::new(TraceId(vec![1]));
        trace.push(span(TraceId(vec![1]), 2, "child", Some(1)));
        assert!(trace.spans()[0].dangling_parent);
        trace.push(span(TraceId(vec![1]), 1, "parent", None));
        trace.recompute_dangling_parents();
        assert!(!trace.spans()[0].dangling_parent);
    }

    #[test]
    fn spans_matching_pattern() {
        let mut trace = Trace::new(TraceId(vec![1]));
        trace.push(span(TraceId(vec![1]), 1, "payment", None));
        trace.push(span(TraceId(vec![1]), 2, "logging", None));
        let pattern = crate::dsl::Pattern::Exact("payment".into());
        let matched: Vec<_> = trace.spans_matching(&pattern).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].operation_name, "payment");
    }

    #[test]
    fn attribute_lookup_uses_span_level_value() {
        let trace_id = TraceId(vec![1]);
        let mut trace = Trace::new(trace_id.clone());
        trace.push(
            SpanBuilder::new(trace_id, SpanId(vec![1]), "svc", "payment", Timestamp(0))
                .end(Timestamp(10))
                .attribute("amount", AttributeValue::Int(1500))
                .build(),
        );
        assert_eq!(
            trace.spans()[0].attribute("amount"),
            Some(AttributeValue::Int(1500))
        );
    }
}
