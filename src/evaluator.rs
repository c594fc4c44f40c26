//! Evaluator (C8) — spec.md §4.6.
//!
//! Interprets a [`CompiledRule`] against a completed [`Trace`] from a single
//! dispatch site (spec.md §9 design note: "a single interpreter dispatch
//! site, not N duplicated matches"), then drives a worker pool that applies
//! every active rule to each completed trace in turn.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug_span, warn};

use crate::attribute::AttributeValue;
use crate::dsl::{CmpOp, CompiledCheck, CompiledCondition, CompiledLiteral, CompiledRule, Pattern};
use crate::registry::{RuleRegistry, RuleSnapshotEntry};
use crate::sandbox::SpanView;
use crate::span::Span;
use crate::trace::Trace;
use crate::violation::{SpanRef, ViolationStore};

/// True iff `condition` holds for `trace`. The single dispatch site for
/// every condition kind; `Has`/`Count` checks bottom out in
/// [`eval_predicate`] via the sandboxed [`SpanView`].
fn eval_condition(condition: &CompiledCondition, trace: &Trace) -> bool {
    match condition {
        CompiledCondition::And(l, r) => eval_condition(l, trace) && eval_condition(r, trace),
        CompiledCondition::Or(l, r) => eval_condition(l, trace) || eval_condition(r, trace),
        CompiledCondition::Not(inner) => !eval_condition(inner, trace),
        CompiledCondition::Check(check) => eval_check(check, trace),
    }
}

fn eval_check(check: &CompiledCheck, trace: &Trace) -> bool {
    match check {
        CompiledCheck::Count { pattern, op, n } => {
            let count = trace.spans_matching(pattern).count() as i64;
            compare_int(count, *op, *n)
        }
        CompiledCheck::Has { pattern, predicate } => trace.spans_matching(pattern).any(|span| {
            match predicate {
                Some(p) => eval_predicate(p, SpanView::new(span)),
                None => true,
            }
        }),
    }
}

fn compare_int(count: i64, op: CmpOp, n: i64) -> bool {
    match op {
        CmpOp::Eq => count == n,
        CmpOp::Ne => count != n,
        CmpOp::Lt => count < n,
        CmpOp::Le => count <= n,
        CmpOp::Gt => count > n,
        CmpOp::Ge => count >= n,
        // Grammar restricts count comparisons to the six relational ops;
        // the parser never produces `In`/`Matches`/`Contains` here.
        _ => false,
    }
}

fn eval_predicate(predicate: &crate::dsl::compiled::CompiledPredicate, span: SpanView) -> bool {
    let Some(value) = span.attribute(&predicate.attr_path) else {
        // A missing attribute never matches, regardless of operator —
        // `== None` has no representation in the DSL's literal set.
        return false;
    };
    match (predicate.op, &predicate.literal) {
        (CmpOp::Matches, CompiledLiteral::Regex(re)) => re.is_match(&value.as_string_form()),
        (CmpOp::In, CompiledLiteral::List(items)) => value.in_list(items),
        (CmpOp::Contains, CompiledLiteral::Value(needle)) => value.contains(needle),
        (op, CompiledLiteral::Value(literal)) => compare_value(&value, op, literal),
        _ => false,
    }
}

fn compare_value(value: &AttributeValue, op: CmpOp, literal: &AttributeValue) -> bool {
    match op {
        CmpOp::Eq => value.loose_eq(literal),
        CmpOp::Ne => !value.loose_eq(literal),
        CmpOp::Lt => value.partial_cmp_loose(literal) == Some(std::cmp::Ordering::Less),
        CmpOp::Le => matches!(
            value.partial_cmp_loose(literal),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        CmpOp::Gt => value.partial_cmp_loose(literal) == Some(std::cmp::Ordering::Greater),
        CmpOp::Ge => matches!(
            value.partial_cmp_loose(literal),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        CmpOp::Contains => value.contains(literal),
        CmpOp::In | CmpOp::Matches => false,
    }
}

/// One pass of a rule over a trace — spec.md §4.6 "Semantics of a rule".
/// Returns `Some(message)` when the rule is matched and violated.
fn eval_rule(rule: &CompiledRule, trace: &Trace) -> Option<String> {
    if !eval_condition(&rule.when, trace) {
        return None;
    }
    let mut failed = Vec::new();
    if let Some(always) = &rule.always {
        if !eval_condition(always, trace) {
            failed.push("always");
        }
    }
    if let Some(never) = &rule.never {
        if eval_condition(never, trace) {
            failed.push("never");
        }
    }
    if failed.is_empty() {
        None
    } else {
        Some(format!("{} clause violated", failed.join(" and ")))
    }
}

fn span_refs(trace: &Trace) -> Vec<SpanRef> {
    trace
        .spans()
        .iter()
        .map(|s: &Span| SpanRef {
            trace_id: s.trace_id.clone(),
            span_id: s.span_id.clone(),
            service_name: s.service_name.clone(),
        })
        .collect()
}

/// Applies every rule in `snapshot`, in order, to `trace`, recording any
/// violation found. A panic inside one rule's evaluation is caught, logged
/// with the rule id, and does not stop the remaining rules — spec.md §5
/// "wraps each rule evaluation in a guard that catches unexpected
/// failures... and continues with the next rule."
pub fn evaluate_trace(
    snapshot: &[RuleSnapshotEntry],
    trace: &Trace,
    store: &ViolationStore,
) {
    for entry in snapshot {
        let _span = debug_span!("evaluate_rule", rule_id = %entry.id).entered();
        let outcome = catch_unwind(AssertUnwindSafe(|| eval_rule(&entry.compiled, trace)));
        match outcome {
            Ok(Some(message)) => {
                store.record_violation(
                    &entry.id,
                    &entry.name,
                    entry.severity,
                    message,
                    vec![trace.trace_id.clone()],
                    span_refs(trace),
                );
            }
            Ok(None) => {}
            Err(_) => {
                warn!(rule_id = %entry.id, "rule evaluation panicked, skipping");
            }
        }
    }
}

/// One unit of work handed from the Trace Buffer to a worker.
pub struct EvaluationJob {
    pub trace: Trace,
}

/// Bounded worker pool — spec.md §4.6 "Concurrency model": default size =
/// CPU count, backpressure via a bounded queue (default depth 1024).
#[derive(Clone)]
pub struct Evaluator {
    sender: mpsc::Sender<EvaluationJob>,
}

impl Evaluator {
    pub fn spawn(
        workers: usize,
        queue_depth: usize,
        registry: Arc<RuleRegistry>,
        store: Arc<ViolationStore>,
        cancellation: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let registry = registry.clone();
            let store = store.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = cancellation.cancelled() => break,
                        job = async { receiver.lock().await.recv().await } => job,
                    };
                    let Some(job) = job else { break };
                    let snapshot = registry.snapshot_active();
                    evaluate_trace(&snapshot, &job.trace, &store);
                }
            });
        }
        Self { sender }
    }

    /// Enqueues a completed trace. Blocks (applying backpressure to the
    /// caller, per spec.md §4.6) when the queue is full.
    pub async fn submit(&self, trace: Trace) -> Result<(), EvaluationJob> {
        self.sender
            .send(EvaluationJob { trace })
            .await
            .map_err(|e| e.0)
    }
}
